//! Version 1 of the policy file.

use foldhash::HashMap;
use serde::{Deserialize, Serialize};

use super::super::{DenialPolicy, KeyConfig, SerialPolicy, ZoneConfig};

//----------- Spec -------------------------------------------------------------

/// A policy file.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Spec {
    /// How often the zone is re-signed, in seconds.
    pub resign_interval: u64,
    /// How long before signature expiration re-signing is scheduled, in
    /// seconds.
    pub refresh_time: u64,
    /// Default RRSIG validity, in seconds.
    pub validity_default: u64,
    /// Denial-of-existence RRSIG validity, in seconds. Zero means "use
    /// `validity-default`" (§3).
    pub validity_denial: u64,
    /// DNSKEY RRSIG validity, in seconds. Zero means "use
    /// `validity-default`" (§3).
    pub validity_keys: u64,
    /// Inception jitter, in seconds.
    pub jitter: u64,
    /// Signature inception offset, in seconds; subtracted from the sign
    /// time (§4.6, §9).
    pub inception_offset: u64,

    /// Denial-of-existence mechanism.
    pub denial: DenialSpec,

    /// Signing keys, keyed by locator.
    pub keys: HashMap<String, KeySpec>,

    pub soa_ttl: u32,
    pub soa_minimum: u32,
    pub soa_serial: SerialPolicySpec,

    pub audit: bool,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            resign_interval: 3600,
            refresh_time: 600,
            validity_default: 86400,
            validity_denial: 0,
            validity_keys: 0,
            jitter: 0,
            inception_offset: 3600,
            denial: DenialSpec::default(),
            keys: HashMap::default(),
            soa_ttl: 3600,
            soa_minimum: 3600,
            soa_serial: SerialPolicySpec::default(),
            audit: false,
        }
    }
}

//--- Conversion

impl Spec {
    /// Parse from this specification.
    pub fn parse(self) -> ZoneConfig {
        ZoneConfig {
            resign_interval: self.resign_interval,
            refresh_time: self.refresh_time,
            validity_default: self.validity_default,
            validity_denial: self.validity_denial,
            validity_keys: self.validity_keys,
            jitter: self.jitter,
            inception_offset: self.inception_offset,
            denial: self.denial.parse(),
            keys: self
                .keys
                .into_iter()
                .map(|(locator, key)| (locator.clone(), key.parse(locator)))
                .collect(),
            soa_ttl: self.soa_ttl,
            soa_minimum: self.soa_minimum,
            soa_serial: self.soa_serial.parse(),
            audit: self.audit,
            last_modified: None,
        }
    }

    /// Build into this specification.
    pub fn build(policy: &ZoneConfig) -> Self {
        Self {
            resign_interval: policy.resign_interval,
            refresh_time: policy.refresh_time,
            validity_default: policy.validity_default,
            validity_denial: policy.validity_denial,
            validity_keys: policy.validity_keys,
            jitter: policy.jitter,
            inception_offset: policy.inception_offset,
            denial: DenialSpec::build(&policy.denial),
            keys: policy
                .keys
                .iter()
                .map(|(locator, key)| (locator.clone(), KeySpec::build(key)))
                .collect(),
            soa_ttl: policy.soa_ttl,
            soa_minimum: policy.soa_minimum,
            soa_serial: SerialPolicySpec::build(policy.soa_serial),
            audit: policy.audit,
        }
    }
}

//----------- SerialPolicySpec ------------------------------------------------

/// The four accepted SOA serial policy tokens (§3: reject any other value at
/// parse time — `deny_unknown_fields`/the closed enum does this for us).
#[derive(Copy, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SerialPolicySpec {
    Keep,
    #[default]
    Counter,
    UnixTime,
    DateCounter,
}

impl SerialPolicySpec {
    pub fn parse(self) -> SerialPolicy {
        match self {
            Self::Keep => SerialPolicy::Keep,
            Self::Counter => SerialPolicy::Counter,
            Self::UnixTime => SerialPolicy::UnixTime,
            Self::DateCounter => SerialPolicy::DateCounter,
        }
    }

    pub fn build(policy: SerialPolicy) -> Self {
        match policy {
            SerialPolicy::Keep => Self::Keep,
            SerialPolicy::Counter => Self::Counter,
            SerialPolicy::UnixTime => Self::UnixTime,
            SerialPolicy::DateCounter => Self::DateCounter,
        }
    }
}

//----------- DenialSpec -------------------------------------------------------

/// Spec for generating denial-of-existence records.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, tag = "type")]
pub enum DenialSpec {
    Nsec,
    Nsec3 {
        opt_out: bool,
        algorithm: u8,
        iterations: u16,
        /// Hex-encoded salt, or absent for "-" (no salt).
        #[serde(default)]
        salt: Option<String>,
    },
}

impl Default for DenialSpec {
    fn default() -> Self {
        Self::Nsec
    }
}

impl DenialSpec {
    pub fn parse(self) -> DenialPolicy {
        match self {
            Self::Nsec => DenialPolicy::Nsec,
            Self::Nsec3 {
                opt_out,
                algorithm,
                iterations,
                salt,
            } => DenialPolicy::Nsec3 {
                opt_out,
                algorithm,
                iterations,
                salt,
            },
        }
    }

    pub fn build(policy: &DenialPolicy) -> Self {
        match policy {
            DenialPolicy::Nsec => Self::Nsec,
            DenialPolicy::Nsec3 {
                opt_out,
                algorithm,
                iterations,
                salt,
            } => Self::Nsec3 {
                opt_out: *opt_out,
                algorithm: *algorithm,
                iterations: *iterations,
                salt: salt.clone(),
            },
        }
    }
}

//----------- KeySpec ----------------------------------------------------------

/// One signing key, as written in the policy file.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct KeySpec {
    pub ttl: u32,
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub is_zsk: bool,
    pub is_ksk: bool,
    pub publish: bool,
}

impl Default for KeySpec {
    fn default() -> Self {
        Self {
            ttl: 3600,
            flags: 256,
            protocol: 3,
            algorithm: 8,
            is_zsk: true,
            is_ksk: false,
            publish: true,
        }
    }
}

impl KeySpec {
    pub fn parse(self, locator: String) -> KeyConfig {
        KeyConfig {
            locator,
            ttl: self.ttl,
            flags: self.flags,
            protocol: self.protocol,
            algorithm: self.algorithm,
            is_zsk: self.is_zsk,
            is_ksk: self.is_ksk,
            publish: self.publish,
            dnskey_text: None,
            tool_key_id: None,
        }
    }

    pub fn build(key: &KeyConfig) -> Self {
        Self {
            ttl: key.ttl,
            flags: key.flags,
            protocol: key.protocol,
            algorithm: key.algorithm,
            is_zsk: key.is_zsk,
            is_ksk: key.is_ksk,
            publish: key.publish,
        }
    }
}
