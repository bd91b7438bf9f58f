//! The on-disk policy file (§3a).
//!
//! TOML rather than XML: the XML reader is explicitly out of scope (§1, "the
//! core consumes parsed structures"), and the host project's own policy
//! subsystem already uses TOML — so this follows
//! `NLnetLabs-cascade/src/policy/file/mod.rs`'s versioned-`Spec`/`load`/
//! `save` pattern rather than inventing a one-off format.

use std::{fs, io};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use super::ZoneConfig;

pub mod v1;

//----------- Spec -------------------------------------------------------------

/// A policy file, tagged by format version.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "version")]
pub enum Spec {
    /// The version 1 format.
    V1(v1::Spec),
}

//--- Conversion

impl Spec {
    /// Parse into a runtime [`ZoneConfig`].
    pub fn parse(self) -> ZoneConfig {
        let mut cfg = match self {
            Self::V1(spec) => spec.parse(),
        };
        cfg.normalize();
        cfg
    }

    /// Build from a runtime [`ZoneConfig`] (used when saving a reloaded
    /// policy back out, e.g. for the `queue`/`zones` status commands).
    pub fn build(policy: &ZoneConfig) -> Self {
        Self::V1(v1::Spec::build(policy))
    }
}

//--- Loading / Saving

impl Spec {
    /// Load and parse this specification from a file, returning the parsed
    /// policy and the file's mtime (§3's `last_modified`).
    pub fn load(path: &Utf8Path) -> io::Result<ZoneConfig> {
        let text = fs::read_to_string(path)?;
        let spec: Spec =
            toml::from_str(&text).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let mtime = fs::metadata(path)?.modified()?;
        let mut cfg = spec.parse();
        cfg.last_modified = Some(mtime);
        Ok(cfg)
    }

    /// Build and save this specification to a file.
    pub fn save(&self, path: &Utf8Path) -> io::Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        crate::util::write_file(path, text.as_bytes())
    }
}

/// Read just the mtime of a policy file, without fully reparsing it; used by
/// `check_config_file_update` (§3, §4.7 `sign` command).
pub fn file_mtime(path: &Utf8Path) -> io::Result<std::time::SystemTime> {
    fs::metadata(path)?.modified()
}
