//! Engine-wide configuration (§1, §6, §10d).
//!
//! Grounded on `NLnetLabs-cascade/src/policy/file/mod.rs`'s versioned
//! `Spec`/`load`/`save` pattern, generalized from per-zone policy to the
//! engine's own settings: the worker count, the command socket path, the
//! workdir root, and the paths of every external tool listed in §6.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Paths to every external tool this engine invokes as a child process
/// (§1, §6). All are out-of-scope collaborators; the engine only needs to
/// know how to launch them.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct ToolPaths {
    pub get_serial: String,
    pub get_class: String,
    pub create_dnskey: String,
    pub sorter: String,
    pub zone_reader: String,
    pub nseccer: String,
    pub nsec3er: String,
    pub signer: String,
    pub finalizer: String,
    pub auditor: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            get_serial: "get_serial".into(),
            get_class: "get_class".into(),
            create_dnskey: "create_dnskey".into(),
            sorter: "sorter".into(),
            zone_reader: "zone_reader".into(),
            nseccer: "nseccer".into(),
            nsec3er: "nsec3er".into(),
            signer: "signer".into(),
            finalizer: "finalizer".into(),
            auditor: "auditor".into(),
        }
    }
}

/// Engine-wide settings read at startup and on SIGHUP (§4.7, §9).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct EngineConfig {
    /// How many worker threads to run (§4.2, §5).
    pub worker_count: usize,
    /// Root directory for per-zone temp files (§3, §6).
    pub workdir: Utf8PathBuf,
    /// Path to the zone list document (§3a).
    pub zone_list_path: Utf8PathBuf,
    /// Directory containing per-zone policy files, named `<zone>.toml`
    /// (§3a).
    pub policy_dir: Utf8PathBuf,
    /// Path of the Unix-domain command socket (§6).
    pub command_socket_path: Utf8PathBuf,
    /// Passed as `-c <engine-config>` to `create_dnskey`, `signer` (as part
    /// of `-c <cfg>`), and `auditor` (§6); opaque to the core beyond being a
    /// path.
    pub tool_config_path: Utf8PathBuf,
    /// Passed as `signer -l <syslog-facility>` when set (§6).
    pub syslog_facility: Option<String>,
    /// Shell command run after `move_output`, with `%zone`/`%zonefile`
    /// substitution (§4.4 step 9).
    pub notify_command: Option<String>,
    pub tools: ToolPaths,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            workdir: Utf8PathBuf::from("/var/lib/zosign/work"),
            zone_list_path: Utf8PathBuf::from("/etc/zosign/zonelist.toml"),
            policy_dir: Utf8PathBuf::from("/etc/zosign/policy"),
            command_socket_path: Utf8PathBuf::from("/run/zosign/engine.sock"),
            tool_config_path: Utf8PathBuf::from("/etc/zosign/tools.toml"),
            syslog_facility: None,
            notify_command: None,
            tools: ToolPaths::default(),
        }
    }
}

/// The engine configuration file, tagged by format version (§10d).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", tag = "version")]
pub enum Spec {
    V1(EngineConfig),
}

impl Spec {
    pub fn parse(self) -> EngineConfig {
        match self {
            Self::V1(cfg) => cfg,
        }
    }

    pub fn build(cfg: &EngineConfig) -> Self {
        Self::V1(cfg.clone())
    }

    pub fn load(path: &Utf8Path) -> io::Result<EngineConfig> {
        let text = std::fs::read_to_string(path)?;
        let spec: Spec =
            toml::from_str(&text).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(spec.parse())
    }

    pub fn save(&self, path: &Utf8Path) -> io::Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        crate::util::write_file(path, text.as_bytes())
    }
}
