//! `zosignd`: the zone-signing engine daemon (§4.7, §10b).
//!
//! Grounded on `NLnetLabs-cascade/src/main.rs`'s startup sequence (logger,
//! config, daemonize, spawn workers, wait for shutdown) but synchronous
//! throughout: no Tokio runtime, a plain `UnixListener` accept loop instead
//! of `manager::spawn`'s unit graph, and `engine::wait_for_signal` instead
//! of `tokio::signal::ctrl_c`/unit `Terminate` messages.

use std::io::{BufReader, BufWriter};
use std::os::unix::net::{UnixListener, UnixStream};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use camino::Utf8PathBuf;
use clap::Parser;
use tracing::{error, info, warn};

use zosign::command::{self, Command};
use zosign::config::{EngineConfig, Spec};
use zosign::daemon::{self, Identity};
use zosign::engine::{Engine, ShutdownSignal};
use zosign::log::{verbosity_to_level, Logger};

#[derive(Parser, Debug)]
#[command(name = "zosignd", version, about = "A DNSSEC zone-signing engine daemon.")]
struct Args {
    /// Path to the engine configuration file.
    #[arg(short, long, default_value = "/etc/zosign/engine.toml")]
    config: Utf8PathBuf,

    /// Stay in the foreground instead of forking into the background.
    #[arg(short, long)]
    foreground: bool,

    /// Initial log verbosity (0 = error .. 4 = trace).
    #[arg(short, long, default_value_t = 2)]
    verbosity: u8,

    /// User to switch to after binding the command socket.
    #[arg(long)]
    user: Option<String>,

    /// Group to switch to after binding the command socket.
    #[arg(long)]
    group: Option<String>,

    /// Path to write the daemon's pid file.
    #[arg(long)]
    pid_file: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let logger = Logger::launch(verbosity_to_level(args.verbosity));

    let config = match Spec::load(&args.config) {
        Ok(config) => config,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %args.config, "no configuration file found, using defaults");
            EngineConfig::default()
        }
        Err(err) => {
            error!(path = %args.config, %err, "failed to read configuration");
            return ExitCode::FAILURE;
        }
    };

    let identity = match (&args.user, &args.group) {
        (Some(user), Some(group)) => Some(Identity { user, group }),
        (None, None) => None,
        _ => {
            error!("--user and --group must be given together");
            return ExitCode::FAILURE;
        }
    };

    let socket_path = config.command_socket_path.clone();
    let _ = std::fs::remove_file(&socket_path);
    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(path = %socket_path, %err, "failed to bind command socket");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = daemon::daemonize(args.foreground, args.pid_file.as_deref(), identity) {
        error!(%err, "failed to daemonize");
        return ExitCode::FAILURE;
    }

    let worker_count = config.worker_count;
    let engine = Engine::new(config, logger);
    if let Err(err) = engine.bootstrap() {
        error!(%err, "failed to read the zone list");
        return ExitCode::FAILURE;
    }

    let pool = engine.start_workers(worker_count);

    {
        let engine = Arc::clone(&engine);
        thread::spawn(move || accept_loop(listener, engine));
    }

    info!("zosignd running");
    loop {
        match zosign::engine::wait_for_signal() {
            Ok(ShutdownSignal::Hup) => {
                info!("SIGHUP received, re-reading zone list and policies");
                let _ = engine.handle_command(Command::Update(None));
            }
            Ok(ShutdownSignal::Term) => {
                info!("SIGTERM received, shutting down");
                break;
            }
            Err(err) => {
                error!(%err, "failed to wait for signal");
                break;
            }
        }
    }

    pool.join();
    let _ = std::fs::remove_file(&socket_path);
    ExitCode::SUCCESS
}

fn accept_loop(listener: UnixListener, engine: Arc<Engine>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let engine = Arc::clone(&engine);
                thread::spawn(move || handle_connection(stream, engine));
            }
            Err(err) => warn!(%err, "failed to accept connection"),
        }
    }
}

fn handle_connection(stream: UnixStream, engine: Arc<Engine>) {
    let writer_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            warn!(%err, "failed to clone command connection");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut writer = BufWriter::new(writer_stream);

    loop {
        match command::read_request(&mut reader) {
            Ok(Some(line)) if !line.is_empty() => {
                let response = match Command::parse(&line) {
                    Ok(cmd) => engine.handle_command(cmd),
                    Err(err) => err.to_string(),
                };
                if command::write_response(&mut writer, &response).is_err() {
                    break;
                }
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "command connection read error");
                break;
            }
        }
    }
}
