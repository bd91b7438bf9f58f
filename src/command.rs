//! The operator command line protocol: request framing, parsing, and the
//! exhaustively-matched command enum (§4.7, §6, §9).
//!
//! Grounded on `Engine.py`'s `receive_command`/`send_response`: the request
//! is ASCII up to 1024 bytes terminated by LF or NUL with CR ignored, and
//! the response is the text followed by two LFs. Recognition is still
//! prefix-based on the first token, but (per §9 REDESIGN FLAGS) it is
//! parsed once into this tagged enum rather than dispatched by repeated
//! string-prefix checks throughout the engine.

use std::io::{self, BufRead, Write};

/// Maximum size of one request line, in bytes (§6).
pub const MAX_REQUEST_BYTES: usize = 1024;

/// Which zone a `sign`/`update` command targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZoneTarget {
    All,
    Named(String),
}

/// A fully parsed operator command (§4.7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Zones,
    Sign(ZoneTarget),
    Clear(String),
    Queue,
    Flush,
    Update(Option<ZoneTarget>),
    Verbosity(u8),
    Metrics,
    Stop,
}

/// An error recognising or parsing a command line (§7: "malformed command
/// produces `unknown command`").
#[derive(Debug)]
pub struct CommandError {
    pub input: String,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown command: {:?}", self.input)
    }
}

impl std::error::Error for CommandError {}

impl Command {
    /// Parse one already-stripped (no CR/LF) request line.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or("");
        let rest: Vec<&str> = parts.collect();

        let unknown = || CommandError {
            input: line.to_string(),
        };

        match verb {
            "help" => Ok(Command::Help),
            "zones" => Ok(Command::Zones),
            "queue" => Ok(Command::Queue),
            "flush" => Ok(Command::Flush),
            "metrics" => Ok(Command::Metrics),
            "stop" => Ok(Command::Stop),
            "sign" => {
                let arg = rest.first().ok_or_else(unknown)?;
                Ok(Command::Sign(parse_target(arg)))
            }
            "clear" => {
                let zone = rest.first().ok_or_else(unknown)?;
                Ok(Command::Clear((*zone).to_string()))
            }
            "update" => Ok(Command::Update(rest.first().map(|arg| parse_target(arg)))),
            "verbosity" => {
                let n: u8 = rest.first().ok_or_else(unknown)?.parse().map_err(|_| unknown())?;
                Ok(Command::Verbosity(n))
            }
            _ => Err(unknown()),
        }
    }
}

fn parse_target(arg: &str) -> ZoneTarget {
    if arg == "all" {
        ZoneTarget::All
    } else {
        ZoneTarget::Named(arg.to_string())
    }
}

/// Read one request off `reader`: bytes up to LF or NUL, bounded by
/// [`MAX_REQUEST_BYTES`], with any CR stripped (§6). Returns `Ok(None)` at
/// EOF with nothing read.
pub fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte)?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            break;
        }
        match byte[0] {
            b'\n' | 0 => break,
            b'\r' => continue,
            b => buf.push(b),
        }
        if buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Write a response: the text followed by two LFs (§6).
pub fn write_response<W: Write>(writer: &mut W, text: &str) -> io::Result<()> {
    writer.write_all(text.as_bytes())?;
    writer.write_all(b"\n\n")?;
    writer.flush()
}

pub const HELP_TEXT: &str = "\
commands:
  help                  show this text
  zones                 list known zones and their status
  sign <zone>|all       schedule a (re)sign
  clear <zone>          delete temp files for a zone
  queue                 show the task queue
  flush                 run all pending tasks now
  update [<zone>|all]   re-read the zone list and policies
  verbosity <n>         set the log verbosity level
  metrics               show metrics in OpenMetrics text format
  stop                  stop the engine";

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_every_command_kind() {
        assert_eq!(Command::parse("help").unwrap(), Command::Help);
        assert_eq!(Command::parse("zones").unwrap(), Command::Zones);
        assert_eq!(
            Command::parse("sign example.com").unwrap(),
            Command::Sign(ZoneTarget::Named("example.com".into()))
        );
        assert_eq!(
            Command::parse("sign all").unwrap(),
            Command::Sign(ZoneTarget::All)
        );
        assert_eq!(
            Command::parse("clear example.com").unwrap(),
            Command::Clear("example.com".into())
        );
        assert_eq!(Command::parse("queue").unwrap(), Command::Queue);
        assert_eq!(Command::parse("flush").unwrap(), Command::Flush);
        assert_eq!(Command::parse("update").unwrap(), Command::Update(None));
        assert_eq!(
            Command::parse("update all").unwrap(),
            Command::Update(Some(ZoneTarget::All))
        );
        assert_eq!(Command::parse("verbosity 3").unwrap(), Command::Verbosity(3));
        assert_eq!(Command::parse("metrics").unwrap(), Command::Metrics);
        assert_eq!(Command::parse("stop").unwrap(), Command::Stop);
    }

    #[test]
    fn unknown_verb_is_an_error() {
        assert!(Command::parse("frobnicate").is_err());
    }

    #[test]
    fn sign_without_argument_is_an_error() {
        assert!(Command::parse("sign").is_err());
    }

    #[test]
    fn read_request_strips_cr_and_stops_at_lf() {
        let mut cursor = Cursor::new(b"sign all\r\nqueue\n".to_vec());
        let first = read_request(&mut cursor).unwrap().unwrap();
        assert_eq!(first, "sign all");
        let second = read_request(&mut cursor).unwrap().unwrap();
        assert_eq!(second, "queue");
    }

    #[test]
    fn read_request_stops_at_nul() {
        let mut cursor = Cursor::new(b"stop\0garbage".to_vec());
        let first = read_request(&mut cursor).unwrap().unwrap();
        assert_eq!(first, "stop");
    }

    #[test]
    fn read_request_at_eof_is_none() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_request(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn write_response_appends_two_linefeeds() {
        let mut buf = Vec::new();
        write_response(&mut buf, "ok").unwrap();
        assert_eq!(buf, b"ok\n\n");
    }
}
