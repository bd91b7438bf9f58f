//! Structured logging setup (§10a).
//!
//! Grounded on `NLnetLabs-cascade/src/log.rs`'s `Logger`/reload-layer
//! pattern, trimmed to what this engine needs: a single `stdout` target (no
//! syslog layer — syslog here is a parameter passed through to the `signer`
//! tool, not something this process emits to, see SPEC_FULL.md §10a) and a
//! level that can be changed at runtime by the `verbosity` command.

use std::fmt;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload::{self, Handle};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// The running logger; holds a reload handle so `verbosity` can change the
/// level without restarting the process.
pub struct Logger {
    filter: Handle<EnvFilter, Registry>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Logger {
    /// Install the global `tracing` subscriber.
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber has already been set.
    pub fn launch(initial_level: LevelFilter) -> &'static Logger {
        let filter = EnvFilter::default().add_directive(initial_level.into());
        let (filter, handle) = reload::Layer::new(filter);
        let layer = FmtLayer::new().with_writer(std::io::stderr);
        tracing_subscriber::registry().with(filter).with(layer).init();
        Box::leak(Box::new(Logger { filter: handle }))
    }

    /// Change the running log level (`verbosity <n>`, §4.7).
    pub fn set_verbosity(&self, n: u8) -> Result<(), String> {
        let level = verbosity_to_level(n);
        self.filter
            .reload(EnvFilter::default().add_directive(level.into()))
            .map_err(|err| err.to_string())
    }

    /// Build a reload handle without installing it as the global
    /// subscriber, for tests that need an `Engine` but must not fight over
    /// the process-global subscriber slot.
    #[cfg(test)]
    pub fn new_detached(initial_level: LevelFilter) -> Logger {
        let filter = EnvFilter::default().add_directive(initial_level.into());
        let (_, handle) = reload::Layer::new(filter);
        Logger { filter: handle }
    }
}

/// Map a `verbosity <n>` argument to a level filter: 0 = error, 1 = warn,
/// 2 = info, 3 = debug, 4+ = trace.
pub fn verbosity_to_level(n: u8) -> LevelFilter {
    match n {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        3 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_mapping_is_monotonic() {
        assert_eq!(verbosity_to_level(0), LevelFilter::ERROR);
        assert_eq!(verbosity_to_level(2), LevelFilter::INFO);
        assert_eq!(verbosity_to_level(9), LevelFilter::TRACE);
    }
}
