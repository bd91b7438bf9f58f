//! Daemonization and privilege drop (§10b).
//!
//! Grounded on `NLnetLabs-cascade/src/daemon.rs`'s `daemonize` function using
//! `daemonbase::process::{Config, Process}`; trimmed of the socket-provider
//! machinery (`SocketProvider`/`EnvSockets`), which exists there to hand
//! systemd-provided listen sockets to the teacher's async HTTP servers. This
//! engine's only listener is the Unix command socket, bound directly by
//! `engine.rs` after privileges are dropped.

use camino::Utf8Path;

/// What identity to switch to after daemonizing, if any.
pub struct Identity<'a> {
    pub user: &'a str,
    pub group: &'a str,
}

/// Daemonize the current process and optionally drop privileges.
///
/// `run_in_foreground = true` skips the actual fork/detach (useful under a
/// supervisor or for interactive debugging) but still applies the pid file
/// and identity change.
pub fn daemonize(
    run_in_foreground: bool,
    pid_file: Option<&Utf8Path>,
    identity: Option<Identity>,
) -> Result<(), String> {
    let mut daemon_config = daemonbase::process::Config::default();

    if let Some(Identity { user, group }) = &identity {
        daemon_config = daemon_config
            .with_user(user)
            .map_err(|err| format!("invalid user name: {err}"))?
            .with_group(group)
            .map_err(|err| format!("invalid group name: {err}"))?;
    }

    if let Some(pid_file) = pid_file {
        daemon_config = daemon_config.with_pid_file(into_daemon_path(pid_file));
    }

    let mut process = daemonbase::process::Process::from_config(daemon_config);

    if !run_in_foreground {
        tracing::debug!("becoming daemon process");
        if process.setup_daemon(true).is_err() {
            return Err("failed to become daemon process".into());
        }
    }

    if identity.is_some() {
        tracing::debug!("dropping privileges");
        if process.drop_privileges().is_err() {
            return Err("failed to drop privileges".into());
        }
    }

    Ok(())
}

fn into_daemon_path(p: &Utf8Path) -> daemonbase::config::ConfigPath {
    daemonbase::config::ConfigPath::from(p.as_std_path().to_path_buf())
}
