//! Invocation of the external record-manipulation tools (§1, §6).
//!
//! Grounded on `Util.py`'s `run_tool`/`write_p` helpers, redesigned per
//! SPEC_FULL.md §9: every invocation goes through [`ScopedChild`], which
//! guarantees stdin is closed and the child is reaped on every exit path,
//! normal or error — the Python original leaks neither, but does so through
//! `finally` blocks scattered per call site; here it is a single RAII type.

use std::fs::File;
use std::io::{self, Write};
use std::process::{Child, Command, ExitStatus, Stdio};

use camino::Utf8Path;
use tracing::{debug, warn};

/// Errors that can occur invoking an external tool (§7).
#[derive(Debug)]
pub enum ToolError {
    /// The program could not be spawned (missing binary, OS error).
    Spawn { program: String, source: io::Error },
    /// The program exited with a non-zero status.
    ExitNonZero {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    /// An I/O error occurred writing to the child's stdin or reading an
    /// intermediate file.
    Io(io::Error),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::Spawn { program, source } => {
                write!(f, "failed to spawn '{program}': {source}")
            }
            ToolError::ExitNonZero {
                program,
                status,
                stderr,
            } => write!(
                f,
                "'{program}' exited with {status}: {}",
                stderr.trim_end()
            ),
            ToolError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for ToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ToolError::Spawn { source, .. } => Some(source),
            ToolError::Io(err) => Some(err),
            ToolError::ExitNonZero { .. } => None,
        }
    }
}

impl From<io::Error> for ToolError {
    fn from(err: io::Error) -> Self {
        ToolError::Io(err)
    }
}

/// A spawned child process which guarantees its stdin is closed and it is
/// reaped (waited on) no matter how the caller's scope exits.
pub struct ScopedChild {
    program: String,
    child: Child,
    reaped: bool,
}

impl ScopedChild {
    pub fn spawn(program: &str, command: &mut Command) -> Result<Self, ToolError> {
        let child = command
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.to_string(),
                source,
            })?;
        Ok(ScopedChild {
            program: program.to_string(),
            child,
            reaped: false,
        })
    }

    pub fn stdin(&mut self) -> Option<&mut std::process::ChildStdin> {
        self.child.stdin.as_mut()
    }

    /// Close stdin (drop the handle) without waiting for the child yet.
    pub fn close_stdin(&mut self) {
        self.child.stdin.take();
    }

    /// Close stdin, wait for the child, and collect its stdout/stderr.
    pub fn finish(mut self) -> Result<std::process::Output, ToolError> {
        self.close_stdin();
        let output = self.child.wait_with_output().map_err(ToolError::Io)?;
        self.reaped = true;
        if !output.status.success() {
            return Err(ToolError::ExitNonZero {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output)
    }
}

impl Drop for ScopedChild {
    fn drop(&mut self) {
        if !self.reaped {
            self.child.stdin.take();
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Run a tool with no stdin, capturing stdout/stderr, returning its stdout
/// as a `String` on success.
fn run_capturing(program: &str, args: &[&str]) -> Result<String, ToolError> {
    debug!(program, ?args, "invoking tool");
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let child = ScopedChild::spawn(program, &mut cmd)?;
    let output = child.finish()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a tool whose stdout is redirected straight to `out_path` and whose
/// stderr is captured (used by the sort/preprocess/denial stages, §4.4/§6).
fn run_to_file(program: &str, args: &[&str], out_path: &Utf8Path) -> Result<(), ToolError> {
    debug!(program, ?args, %out_path, "invoking tool");
    let out_file = File::create(out_path)?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out_file))
        .stderr(Stdio::piped());
    let child = ScopedChild::spawn(program, &mut cmd)?;
    child.finish()?;
    Ok(())
}

/// `get_serial -f <file>` (§6).
pub fn get_serial(program: &str, file: &Utf8Path) -> Result<u32, ToolError> {
    let out = run_capturing(program, &["-f", file.as_str()])?;
    out.trim()
        .parse()
        .map_err(|_| ToolError::Io(io::Error::other("get_serial: non-numeric output")))
}

/// `get_class -f <file>` (§6).
pub fn get_class(program: &str, file: &Utf8Path) -> Result<u16, ToolError> {
    let out = run_capturing(program, &["-f", file.as_str()])?;
    out.trim()
        .parse()
        .map_err(|_| ToolError::Io(io::Error::other("get_class: non-numeric output")))
}

/// `create_dnskey -c <engine-config> -k <class> -o <zone> -a <algo> -f <flags> -t <ttl> <locator>` (§6).
#[allow(clippy::too_many_arguments)]
pub fn create_dnskey(
    program: &str,
    engine_config: &Utf8Path,
    class: u16,
    zone: &str,
    algorithm: u8,
    flags: u16,
    ttl: u32,
    locator: &str,
) -> Result<String, ToolError> {
    let class = class.to_string();
    let algo = algorithm.to_string();
    let flags = flags.to_string();
    let ttl = ttl.to_string();
    run_capturing(
        program,
        &[
            "-c",
            engine_config.as_str(),
            "-k",
            &class,
            "-o",
            zone,
            "-a",
            &algo,
            "-f",
            &flags,
            "-t",
            &ttl,
            locator,
        ],
    )
}

/// `sorter -o <zone> -f <in> -w <out> [-m <soa_min>]` (§6).
pub fn sorter(
    program: &str,
    zone: &str,
    input: &Utf8Path,
    output: &Utf8Path,
    soa_minimum: Option<u32>,
) -> Result<(), ToolError> {
    let min_str = soa_minimum.map(|m| m.to_string());
    let mut args = vec!["-o", zone, "-f", input.as_str(), "-w", output.as_str()];
    if let Some(m) = &min_str {
        args.push("-m");
        args.push(m);
    }
    run_plain(program, &args)
}

/// `zone_reader -k <class> -o <zone> -w <out> [-n -t iters -a algo [-s salt] [-p]]` (§6).
///
/// The DNSKEY RRs are written to the child's stdin, followed by the zone
/// body read from `input`.
#[allow(clippy::too_many_arguments)]
pub fn zone_reader(
    program: &str,
    class: u16,
    zone: &str,
    output: &Utf8Path,
    nsec3: Option<(u16, u8, Option<&str>)>,
    no_signature_keys: bool,
    dnskey_rrs: &[String],
    input: &Utf8Path,
) -> Result<(), ToolError> {
    let class = class.to_string();
    let mut args = vec!["-k", class.as_str(), "-o", zone, "-w", output.as_str()];
    let iters_str;
    let algo_str;
    if let Some((iters, algo, salt)) = nsec3 {
        if no_signature_keys {
            args.push("-n");
        }
        iters_str = iters.to_string();
        algo_str = algo.to_string();
        args.push("-t");
        args.push(&iters_str);
        args.push("-a");
        args.push(&algo_str);
        if let Some(salt) = salt {
            args.push("-s");
            args.push(salt);
        }
        args.push("-p");
    }

    let mut cmd = Command::new(program);
    cmd.args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = ScopedChild::spawn(program, &mut cmd)?;
    {
        let stdin = child.stdin().expect("stdin piped");
        for rr in dnskey_rrs {
            writeln!(stdin, "{rr}")?;
        }
        let mut body = File::open(input)?;
        io::copy(&mut body, stdin)?;
    }
    child.finish()?;
    Ok(())
}

/// `nseccer -f <in> -w <out> [-m <soa_min>]` (§6).
pub fn nseccer(
    program: &str,
    input: &Utf8Path,
    output: &Utf8Path,
    soa_minimum: Option<u32>,
) -> Result<(), ToolError> {
    let min_str = soa_minimum.map(|m| m.to_string());
    let mut args = vec!["-f", input.as_str(), "-w", output.as_str()];
    if let Some(m) = &min_str {
        args.push("-m");
        args.push(m);
    }
    run_plain(program, &args)
}

/// `nsec3er -o <zone> -t iters -a algo -i <in> -w <out> [-s salt] [-m <soa_min>] [-p]` (§6).
#[allow(clippy::too_many_arguments)]
pub fn nsec3er(
    program: &str,
    zone: &str,
    iterations: u16,
    algorithm: u8,
    input: &Utf8Path,
    output: &Utf8Path,
    salt: Option<&str>,
    soa_minimum: Option<u32>,
    opt_out: bool,
) -> Result<(), ToolError> {
    let iters = iterations.to_string();
    let algo = algorithm.to_string();
    let min_str = soa_minimum.map(|m| m.to_string());
    let mut args = vec![
        "-o",
        zone,
        "-t",
        &iters,
        "-a",
        &algo,
        "-i",
        input.as_str(),
        "-w",
        output.as_str(),
    ];
    if let Some(salt) = salt {
        args.push("-s");
        args.push(salt);
    }
    if let Some(m) = &min_str {
        args.push("-m");
        args.push(m);
    }
    if opt_out {
        args.push("-p");
    }
    run_plain(program, &args)
}

/// A single `:add_zsk`/`:add_ksk` directive for the signer's directive
/// stream (§6).
pub struct KeyDirective {
    pub is_ksk: bool,
    pub tool_key_id: String,
    pub algorithm: u8,
    pub flags: u16,
}

/// Everything the signer's directive stream needs, per §4.6/§6.
pub struct SignDirectives<'a> {
    pub origin: &'a str,
    pub soa_ttl: u32,
    pub soa_minimum: u32,
    pub soa_serial: Option<u32>,
    pub soa_serial_keep: bool,
    pub nsec3: Option<(u8, u16, Option<&'a str>)>,
    pub expiration: i64,
    pub expiration_denial: i64,
    pub jitter: u64,
    pub inception: i64,
    pub refresh: i64,
    pub refresh_denial: i64,
    pub keys: &'a [KeyDirective],
}

/// `signer -c <cfg> -p <previous-signed> -w <out> -r [-l <syslog-facility>]` (§6).
///
/// Writes the directive stream, then the `.nsecced` zone body, to the
/// child's stdin; returns the number of new signatures reported on stderr
/// (`Number of signatures created: N`).
pub fn sign(
    program: &str,
    config: &Utf8Path,
    previous_signed: Option<&Utf8Path>,
    output: &Utf8Path,
    syslog_facility: Option<&str>,
    directives: &SignDirectives,
    nsecced_body: &Utf8Path,
) -> Result<u32, ToolError> {
    let mut args = vec!["-c", config.as_str()];
    if let Some(prev) = previous_signed {
        args.push("-p");
        args.push(prev.as_str());
    }
    args.push("-w");
    args.push(output.as_str());
    args.push("-r");
    if let Some(facility) = syslog_facility {
        args.push("-l");
        args.push(facility);
    }

    let mut cmd = Command::new(program);
    cmd.args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = ScopedChild::spawn(program, &mut cmd)?;
    {
        let stdin = child.stdin().expect("stdin piped");
        write_directive_stream(stdin, directives)?;
        let mut body = File::open(nsecced_body)?;
        io::copy(&mut body, stdin)?;
    }
    let output = child.finish()?;
    parse_signature_count(&String::from_utf8_lossy(&output.stderr))
}

fn write_directive_stream<W: Write>(w: &mut W, d: &SignDirectives) -> io::Result<()> {
    writeln!(w, ":origin {}", d.origin)?;
    writeln!(w, ":soa_ttl {}", d.soa_ttl)?;
    writeln!(w, ":soa_minimum {}", d.soa_minimum)?;
    if let Some(serial) = d.soa_serial {
        writeln!(w, ":soa_serial {serial}")?;
    }
    if d.soa_serial_keep {
        writeln!(w, ":soa_serial_keep 1")?;
    }
    if let Some((algo, iters, salt)) = d.nsec3 {
        writeln!(w, ":nsec3_algorithm {algo}")?;
        writeln!(w, ":nsec3_iterations {iters}")?;
        writeln!(w, ":nsec3_salt {}", salt.unwrap_or("-"))?;
    }
    writeln!(w, ":expiration {}", crate::timestamp::render_utc(d.expiration))?;
    writeln!(
        w,
        ":expiration_denial {}",
        crate::timestamp::render_utc(d.expiration_denial)
    )?;
    writeln!(w, ":jitter {}", d.jitter)?;
    writeln!(w, ":inception {}", crate::timestamp::render_utc(d.inception))?;
    writeln!(w, ":refresh {}", crate::timestamp::render_utc(d.refresh))?;
    writeln!(
        w,
        ":refresh_denial {}",
        crate::timestamp::render_utc(d.refresh_denial)
    )?;
    for key in d.keys {
        let verb = if key.is_ksk { "add_ksk" } else { "add_zsk" };
        writeln!(w, ":{verb} {} {} {}", key.tool_key_id, key.algorithm, key.flags)?;
    }
    Ok(())
}

fn parse_signature_count(stderr: &str) -> Result<u32, ToolError> {
    const PREFIX: &str = "Number of signatures created:";
    for line in stderr.lines() {
        if let Some(rest) = line.trim().strip_prefix(PREFIX) {
            return rest
                .trim()
                .parse()
                .map_err(|_| ToolError::Io(io::Error::other("signer: malformed signature count")));
        }
    }
    warn!("signer did not report a signature count; assuming 0");
    Ok(0)
}

/// `finalizer -f <signed>` (§6): prints the deliverable zone on stdout.
pub fn finalizer(program: &str, signed: &Utf8Path, output: &Utf8Path) -> Result<(), ToolError> {
    run_to_file(program, &["-f", signed.as_str()], output)
}

/// `auditor -c <cfg> -s <finalized> -z <zone>` (§6): exit 0 iff the zone
/// passes audit.
pub fn auditor(
    program: &str,
    config: &Utf8Path,
    finalized: &Utf8Path,
    zone: &str,
) -> Result<(), ToolError> {
    run_plain(
        program,
        &["-c", config.as_str(), "-s", finalized.as_str(), "-z", zone],
    )
}

/// Run a tool with no stdin and discard its stdout, but surface a non-zero
/// exit as an error with the captured stderr.
fn run_plain(program: &str, args: &[&str]) -> Result<(), ToolError> {
    debug!(program, ?args, "invoking tool");
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let child = ScopedChild::spawn(program, &mut cmd)?;
    child.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signature_count() {
        let stderr = "some other line\nNumber of signatures created: 42\n";
        assert_eq!(parse_signature_count(stderr).unwrap(), 42);
    }

    #[test]
    fn missing_signature_count_defaults_to_zero() {
        assert_eq!(parse_signature_count("nothing relevant\n").unwrap(), 0);
    }

    #[test]
    fn directive_stream_contains_required_lines() {
        let d = SignDirectives {
            origin: "example.com.",
            soa_ttl: 3600,
            soa_minimum: 3600,
            soa_serial: Some(42),
            soa_serial_keep: false,
            nsec3: None,
            expiration: 1257382200 + 86400,
            expiration_denial: 1257382200 + 86400,
            jitter: 0,
            inception: 1257382200 - 3600,
            refresh: 1257382200,
            refresh_denial: 1257382200,
            keys: &[],
        };
        let mut buf = Vec::new();
        write_directive_stream(&mut buf, &d).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(":origin example.com.\n"));
        assert!(text.contains(":soa_serial 42\n"));
        assert!(!text.contains(":soa_serial_keep"));
    }
}
