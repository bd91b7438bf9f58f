//! The authoritative set of known zones and their file paths (§3).
//!
//! Grounded on `Zonelist.py`'s `ZonelistEntry`/`Zonelist`: `is_same`'s
//! six-field equality and `merge`'s (removed, added, updated) triple are
//! carried over unchanged; only the on-disk encoding (TOML, see
//! SPEC_FULL.md §3a) differs from the source's XML.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// One entry in the zone list: a zone name plus everything needed to find
/// its policy and its input/output files (§3).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ZonelistEntry {
    pub name: String,
    pub policy_path: Utf8PathBuf,
    /// The input adapter; only `"file"` is implemented (§3).
    pub input_adapter: String,
    pub input_data: Utf8PathBuf,
    pub output_adapter: String,
    pub output_data: Utf8PathBuf,
}

impl ZonelistEntry {
    /// Two entries are "same" iff all six fields match (§3); otherwise the
    /// zone is considered updated.
    pub fn is_same(&self, other: &ZonelistEntry) -> bool {
        self == other
    }
}

/// The parsed zone list document (§3a: a TOML array of [`ZonelistEntry`]).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ZoneList {
    pub zones: Vec<ZonelistEntry>,
}

/// The result of diffing an old zone list against a newly-read one.
pub struct MergeResult {
    pub removed: Vec<ZonelistEntry>,
    pub added: Vec<ZonelistEntry>,
    pub updated: Vec<ZonelistEntry>,
}

impl ZoneList {
    /// Read the zone list document from `path` (§3a).
    pub fn load(path: &Utf8Path) -> io::Result<ZoneList> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Write the zone list document to `path` (§3a).
    pub fn save(&self, path: &Utf8Path) -> io::Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        crate::util::write_file(path, text.as_bytes())
    }

    /// Diff `self` (old) against `new`, by zone name.
    pub fn merge(&self, new: &ZoneList) -> MergeResult {
        let mut removed = Vec::new();
        let mut added = Vec::new();
        let mut updated = Vec::new();

        for old_entry in &self.zones {
            match new.zones.iter().find(|e| e.name == old_entry.name) {
                None => removed.push(old_entry.clone()),
                Some(new_entry) if !old_entry.is_same(new_entry) => {
                    updated.push(new_entry.clone())
                }
                Some(_) => {}
            }
        }

        for new_entry in &new.zones {
            if !self.zones.iter().any(|e| e.name == new_entry.name) {
                added.push(new_entry.clone());
            }
        }

        MergeResult {
            removed,
            added,
            updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, input: &str) -> ZonelistEntry {
        ZonelistEntry {
            name: name.into(),
            policy_path: Utf8PathBuf::from(format!("/etc/zosign/policy/{name}.toml")),
            input_adapter: "file".into(),
            input_data: Utf8PathBuf::from(input),
            output_adapter: "file".into(),
            output_data: Utf8PathBuf::from(format!("/var/zosign/out/{name}")),
        }
    }

    #[test]
    fn merge_detects_added_removed_updated() {
        let old = ZoneList {
            zones: vec![entry("a.example", "/in/a"), entry("b.example", "/in/b")],
        };
        let new = ZoneList {
            zones: vec![entry("a.example", "/in/a-new"), entry("c.example", "/in/c")],
        };

        let diff = old.merge(&new);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].name, "b.example");
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].name, "c.example");
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0].name, "a.example");
    }

    #[test]
    fn identical_lists_merge_to_nothing() {
        let list = ZoneList {
            zones: vec![entry("a.example", "/in/a")],
        };
        let diff = list.merge(&list.clone());
        assert!(diff.removed.is_empty());
        assert!(diff.added.is_empty());
        assert!(diff.updated.is_empty());
    }
}
