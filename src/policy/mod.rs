//! The parsed per-zone signing policy and its diff operation (§3, §4.3).
//!
//! Grounded on `ZoneConfig.py`'s `compare_config`: the fields it compares,
//! and the order in which it checks them, are carried over unchanged; only
//! the parsing front-end (TOML instead of XML, see `file` submodule and
//! SPEC_FULL.md §3a) differs from the source.

use std::time::SystemTime;

use foldhash::HashMap;

pub mod file;

//----------- Action -------------------------------------------------------

/// The minimal re-work action required after a policy change, per §4.3.
///
/// Ordering is load-bearing (§9: "keep as-is"): every higher action
/// subsumes all lower ones in the pipeline executed by
/// [`crate::zone::Zone::perform_action`]. Do not reorder the variants or
/// split this into independent flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    NoChange,
    NoSchedule,
    Reschedule,
    Resort,
    Reread,
    Rensec,
    Resign,
}

//----------- SerialPolicy ---------------------------------------------------

/// The SOA serial generation policy (§3, §4.5).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SerialPolicy {
    Keep,
    Counter,
    UnixTime,
    DateCounter,
}

//----------- DenialPolicy ---------------------------------------------------

/// How denial-of-existence records are generated (§3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DenialPolicy {
    Nsec,
    Nsec3 {
        opt_out: bool,
        algorithm: u8,
        iterations: u16,
        /// `None` represents the XML/TOML `-` (empty) salt.
        salt: Option<String>,
    },
}

impl DenialPolicy {
    /// Fields that participate in the RESORT comparison: everything except
    /// opt-out, which only triggers RENSEC (§4.3).
    fn resort_key(&self) -> (bool, u8, u16, Option<&str>) {
        match self {
            DenialPolicy::Nsec => (false, 0, 0, None),
            DenialPolicy::Nsec3 {
                algorithm,
                iterations,
                salt,
                ..
            } => (true, *algorithm, *iterations, salt.as_deref()),
        }
    }

    fn opt_out(&self) -> bool {
        matches!(self, DenialPolicy::Nsec3 { opt_out: true, .. })
    }
}

//----------- KeyConfig -------------------------------------------------------

/// One signing key as referenced by the policy (§3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyConfig {
    pub locator: String,
    pub ttl: u32,
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub is_zsk: bool,
    pub is_ksk: bool,
    pub publish: bool,
    /// Cached rendered `DNSKEY` RR text, filled in once by `create_dnskey`
    /// (§6); absent until then.
    pub dnskey_text: Option<String>,
    /// Cached backend-specific key id used in the signer's `:add_zsk`/
    /// `:add_ksk` directives (§6); opaque to the core.
    pub tool_key_id: Option<String>,
}

impl KeyConfig {
    pub fn is_signature_key(&self) -> bool {
        self.is_zsk || self.is_ksk
    }

    /// Compare the policy-meaningful fields only, ignoring the `dnskey_text`/
    /// `tool_key_id` runtime caches (§6) — those are filled in lazily after
    /// parsing and must never cause `ZoneConfig::compare` to see a change.
    fn policy_eq(&self, other: &KeyConfig) -> bool {
        self.ttl == other.ttl
            && self.flags == other.flags
            && self.protocol == other.protocol
            && self.algorithm == other.algorithm
            && self.is_zsk == other.is_zsk
            && self.is_ksk == other.is_ksk
            && self.publish == other.publish
    }
}

//----------- ZoneConfig ------------------------------------------------------

/// The fully parsed signing policy for one zone (§3).
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneConfig {
    pub resign_interval: u64,
    pub refresh_time: u64,
    pub validity_default: u64,
    pub validity_denial: u64,
    pub validity_keys: u64,
    pub jitter: u64,
    pub inception_offset: u64,

    pub denial: DenialPolicy,

    pub keys: HashMap<String, KeyConfig>,

    pub soa_ttl: u32,
    pub soa_minimum: u32,
    pub soa_serial: SerialPolicy,

    pub audit: bool,

    /// mtime of the backing policy file at the time this was parsed; used
    /// by `check_config_file_update` (§3).
    pub last_modified: Option<SystemTime>,
}

impl ZoneConfig {
    /// Keys flagged as ZSK or KSK, i.e. the keys that actually sign (§3).
    pub fn signature_keys(&self) -> Vec<&KeyConfig> {
        let mut v: Vec<&KeyConfig> = self
            .keys
            .values()
            .filter(|k| k.is_signature_key())
            .collect();
        v.sort_by(|a, b| a.locator.cmp(&b.locator));
        v
    }

    /// Keys flagged for publication as a `DNSKEY` RR (§3).
    pub fn publish_keys(&self) -> Vec<&KeyConfig> {
        let mut v: Vec<&KeyConfig> = self.keys.values().filter(|k| k.publish).collect();
        v.sort_by(|a, b| a.locator.cmp(&b.locator));
        v
    }

    fn publish_locators_sorted(&self) -> Vec<&str> {
        self.publish_keys()
            .into_iter()
            .map(|k| k.locator.as_str())
            .collect()
    }

    fn signature_locators_sorted(&self) -> Vec<&str> {
        self.signature_keys()
            .into_iter()
            .map(|k| k.locator.as_str())
            .collect()
    }

    /// Validate and normalize invariants from §3:
    ///  - if `validity_denial`/`validity_keys` are zero, they default to
    ///    `validity_default`.
    pub fn normalize(&mut self) {
        if self.validity_denial == 0 {
            self.validity_denial = self.validity_default;
        }
        if self.validity_keys == 0 {
            self.validity_keys = self.validity_default;
        }
    }

    /// Return the minimal re-work action for the transition `self` (old) →
    /// `other` (new), per §4.3. Symmetric: `a.compare(b) == b.compare(a)`.
    pub fn compare(&self, other: &ZoneConfig) -> Action {
        if self.publish_locators_sorted() != other.publish_locators_sorted()
            || self.denial.resort_key() != other.denial.resort_key()
        {
            return Action::Resort;
        }

        if self.denial.opt_out() != other.denial.opt_out() {
            return Action::Rensec;
        }

        if self.signature_locators_sorted() != other.signature_locators_sorted()
            || self.soa_ttl != other.soa_ttl
            || self.soa_minimum != other.soa_minimum
            || self.soa_serial != other.soa_serial
        {
            return Action::Resign;
        }

        if self.resign_interval != other.resign_interval
            || self.refresh_time != other.refresh_time
        {
            return Action::Reschedule;
        }

        if self.validity_default != other.validity_default
            || self.validity_denial != other.validity_denial
            || self.validity_keys != other.validity_keys
            || self.jitter != other.jitter
            || self.inception_offset != other.inception_offset
            || !Self::keys_policy_eq(&self.keys, &other.keys)
        {
            return Action::NoSchedule;
        }

        Action::NoChange
    }

    /// Whether two key maps agree on every policy-meaningful field, ignoring
    /// the `dnskey_text`/`tool_key_id` runtime caches (§6).
    fn keys_policy_eq(a: &HashMap<String, KeyConfig>, b: &HashMap<String, KeyConfig>) -> bool {
        a.len() == b.len()
            && a.iter()
                .all(|(locator, key)| b.get(locator).is_some_and(|other| key.policy_eq(other)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ZoneConfig {
        ZoneConfig {
            resign_interval: 3600,
            refresh_time: 600,
            validity_default: 86400,
            validity_denial: 86400,
            validity_keys: 86400,
            jitter: 0,
            inception_offset: 3600,
            denial: DenialPolicy::Nsec,
            keys: HashMap::default(),
            soa_ttl: 3600,
            soa_minimum: 3600,
            soa_serial: SerialPolicy::Counter,
            audit: false,
            last_modified: None,
        }
    }

    #[test]
    fn identical_configs_compare_no_change() {
        let a = base();
        let b = base();
        assert_eq!(a.compare(&b), Action::NoChange);
        assert_eq!(b.compare(&a), Action::NoChange);
    }

    #[test]
    fn compare_is_symmetric_across_every_level() {
        let a = base();

        let mut b = base();
        b.jitter = 30;
        assert_eq!(a.compare(&b), b.compare(&a));
        assert_eq!(a.compare(&b), Action::NoSchedule);

        let mut c = base();
        c.resign_interval = 7200;
        assert_eq!(a.compare(&c), c.compare(&a));
        assert_eq!(a.compare(&c), Action::Reschedule);

        let mut d = base();
        d.soa_ttl = 7200;
        assert_eq!(a.compare(&d), d.compare(&a));
        assert_eq!(a.compare(&d), Action::Resign);

        let mut e = base();
        e.denial = DenialPolicy::Nsec3 {
            opt_out: false,
            algorithm: 1,
            iterations: 5,
            salt: Some("ab".into()),
        };
        assert_eq!(a.compare(&e), e.compare(&a));
        assert_eq!(a.compare(&e), Action::Resort);
    }

    #[test]
    fn opt_out_change_alone_is_rensec() {
        let mut a = base();
        a.denial = DenialPolicy::Nsec3 {
            opt_out: false,
            algorithm: 1,
            iterations: 5,
            salt: Some("ab".into()),
        };
        let mut b = a.clone();
        b.denial = DenialPolicy::Nsec3 {
            opt_out: true,
            algorithm: 1,
            iterations: 5,
            salt: Some("ab".into()),
        };
        assert_eq!(a.compare(&b), Action::Rensec);
        assert_eq!(b.compare(&a), Action::Rensec);
    }

    #[test]
    fn no_change_iff_structurally_equal_on_compared_fields() {
        let a = base();
        let mut b = base();
        assert_eq!(a.compare(&b), Action::NoChange);
        b.audit = !b.audit; // not a compared field
        assert_eq!(a.compare(&b), Action::NoChange);
    }
}
