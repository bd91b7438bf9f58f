//! `zosignctl`: the operator CLI client for the command socket (§4.7, §6).
//!
//! Grounded on `NLnetLabs-cascade/src/cli/commands/mod.rs`'s
//! `clap::Subcommand` dispatch pattern, but translating each subcommand into
//! one line of the engine's plain-text protocol over a `UnixStream` instead
//! of an HTTP request.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "zosignctl", version, about = "Control a running zosignd instance.")]
struct Args {
    /// Path to the engine's Unix-domain command socket.
    #[arg(short, long, default_value = "/run/zosign/engine.sock")]
    socket: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List known zones and their status.
    Zones,
    /// Schedule a (re)sign of one zone or all zones.
    Sign {
        /// A zone name, or "all".
        zone: String,
    },
    /// Delete temp files for a zone.
    Clear {
        zone: String,
    },
    /// Show the task queue.
    Queue,
    /// Run all pending tasks now.
    Flush,
    /// Re-read the zone list and policies.
    Update {
        /// A zone name, or "all"; omit to re-read every changed policy.
        zone: Option<String>,
    },
    /// Set the running log verbosity.
    Verbosity {
        level: u8,
    },
    /// Show metrics in OpenMetrics text format.
    Metrics,
    /// Stop the engine.
    Stop,
}

impl Command {
    fn to_request_line(&self) -> String {
        match self {
            Command::Zones => "zones".to_string(),
            Command::Sign { zone } => format!("sign {zone}"),
            Command::Clear { zone } => format!("clear {zone}"),
            Command::Queue => "queue".to_string(),
            Command::Flush => "flush".to_string(),
            Command::Update { zone: Some(zone) } => format!("update {zone}"),
            Command::Update { zone: None } => "update".to_string(),
            Command::Verbosity { level } => format!("verbosity {level}"),
            Command::Metrics => "metrics".to_string(),
            Command::Stop => "stop".to_string(),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut stream = match UnixStream::connect(&args.socket) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("failed to connect to {}: {err}", args.socket);
            return ExitCode::FAILURE;
        }
    };

    let request = args.command.to_request_line();
    if let Err(err) = writeln!(stream, "{request}") {
        eprintln!("failed to send request: {err}");
        return ExitCode::FAILURE;
    }

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) if line == "\n" && !response.is_empty() => break,
            Ok(_) => response.push_str(&line),
            Err(err) => {
                eprintln!("failed to read response: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    print!("{}", response.trim_end_matches('\n'));
    println!();
    ExitCode::SUCCESS
}
