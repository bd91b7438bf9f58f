//! The zone entity and its sign pipeline (§3, §4.4, §4.5, §4.6).
//!
//! Grounded on `Zone.py`: the pipeline stage order, the entry-point
//! selection rules, `find_serial`, and the signature-timing arithmetic are
//! all carried over unchanged in meaning; only the mechanics of invoking
//! tools (via [`crate::tools`]) and the lock type (a real `Mutex`, not a
//! spinlock — §9) are redesigned.

use std::fs;
use std::str::FromStr;
use std::sync::Mutex;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use domain::base::Name;
use tracing::{info, warn};

use crate::config::ToolPaths;
use crate::policy::{Action, SerialPolicy, ZoneConfig};
use crate::timestamp::{self, SerialOrder};
use crate::tools::{self, KeyDirective, SignDirectives, ToolError};

/// Errors that can arise while driving a zone through the pipeline (§7).
#[derive(Debug)]
pub enum ZoneError {
    /// The zone has no successfully-parsed policy yet.
    NoPolicy,
    /// `find_serial` could not produce a serial under the `keep` policy
    /// because the input serial has not advanced (§4.5).
    SerialKeepViolation { prev: u32, candidate: u32 },
    Tool(ToolError),
    Io(std::io::Error),
}

impl std::fmt::Display for ZoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneError::NoPolicy => write!(f, "zone has no policy loaded"),
            ZoneError::SerialKeepViolation { prev, candidate } => write!(
                f,
                "cannot keep input serial: candidate {candidate} does not advance on previous {prev}"
            ),
            ZoneError::Tool(err) => write!(f, "{err}"),
            ZoneError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for ZoneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ZoneError::Tool(err) => Some(err),
            ZoneError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ToolError> for ZoneError {
    fn from(err: ToolError) -> Self {
        ZoneError::Tool(err)
    }
}

impl From<std::io::Error> for ZoneError {
    fn from(err: std::io::Error) -> Self {
        ZoneError::Io(err)
    }
}

/// Outcome of one `perform_action` run, for logging and testing.
#[derive(Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The input file was missing; nothing was done.
    NoOp,
    /// The signer reported zero new signatures and `force` was not set;
    /// the prior `.signed` file was kept unchanged (§4.4 step 6).
    NoNewSignatures,
    /// The full run to completion succeeded; `.finalized` was published.
    Published,
}

/// The pipeline stage at which a run begins, per the Action-to-entry
/// mapping (§4.4).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    SortSigned,
    Fetch,
    SortInput,
    Preprocess,
    Nsecify,
    Sign,
}

/// Pick the pipeline entry point for the current `action`, per §4.4's
/// "Action-to-entry mapping". Pure and side-effect free so it can be unit
/// tested without touching the filesystem.
pub fn entry_stage(
    action: Action,
    signed_exists: bool,
    processed_exists: bool,
    input_exists: bool,
) -> Option<Stage> {
    if action >= Action::Resign && signed_exists {
        Some(Stage::Sign)
    } else if action >= Action::Rensec && processed_exists {
        Some(Stage::Nsecify)
    } else if action >= Action::Reread && input_exists {
        Some(Stage::Fetch)
    } else if action >= Action::Resort && input_exists {
        Some(Stage::SortSigned)
    } else {
        None
    }
}

/// The sign-time-derived timestamps fed to the signer's directive stream
/// (§4.6).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SignatureTimes {
    pub inception: i64,
    pub expiration: i64,
    pub expiration_denial: i64,
    pub refresh: i64,
    pub refresh_denial: i64,
}

/// Compute the signature timing fields for a sign at time `t`, per §4.6.
pub fn signature_times(policy: &ZoneConfig, t: i64) -> SignatureTimes {
    let expiration = t + policy.validity_default as i64;
    let expiration_denial = t + policy.validity_denial as i64;
    let inception = t - policy.inception_offset as i64;
    let refresh = expiration - policy.refresh_time as i64;
    let refresh_denial = expiration_denial - policy.refresh_time as i64;
    SignatureTimes {
        inception,
        expiration,
        expiration_denial,
        refresh,
        refresh_denial,
    }
}

/// Select the next SOA serial, per `find_serial` (§4.5).
///
/// `prev` is the output (last-published) serial, `input` is the current
/// input zone's serial, `now` is the current Unix time.
pub fn find_serial(
    policy: SerialPolicy,
    prev: u32,
    input: u32,
    now: i64,
) -> Result<u32, ZoneError> {
    let is_keep = matches!(policy, SerialPolicy::Keep);
    let mut cand = match policy {
        SerialPolicy::UnixTime => now as u32,
        SerialPolicy::Counter => input,
        SerialPolicy::DateCounter => timestamp::datecounter_candidate(now),
        SerialPolicy::Keep => input,
    };

    if is_keep {
        if timestamp::serial_cmp(prev, cand) != SerialOrder::Less {
            return Err(ZoneError::SerialKeepViolation { prev, candidate: cand });
        }
        return Ok(cand);
    }

    if timestamp::serial_cmp(prev, cand) != SerialOrder::Less {
        // Candidate does not advance on prev: bump by exactly one instead.
        cand = prev.wrapping_add(1);
    }

    Ok(cand)
}

struct ZoneState {
    policy: Option<ZoneConfig>,
    action: Action,
    last_signed: Option<i64>,
}

/// One authoritative zone and its signing pipeline (§3).
pub struct Zone {
    name: Name<Bytes>,
    name_str: String,
    input_path: Utf8PathBuf,
    output_path: Utf8PathBuf,
    workdir: Utf8PathBuf,
    state: Mutex<ZoneState>,
}

impl Zone {
    pub fn new(
        name_str: impl Into<String>,
        input_path: Utf8PathBuf,
        output_path: Utf8PathBuf,
        workdir: Utf8PathBuf,
    ) -> Result<Self, String> {
        let name_str = name_str.into();
        let name = Name::<Bytes>::from_str(&name_str).map_err(|err| err.to_string())?;
        Ok(Zone {
            name,
            name_str,
            input_path,
            output_path,
            workdir,
            state: Mutex::new(ZoneState {
                policy: None,
                action: Action::Reread,
                last_signed: None,
            }),
        })
    }

    /// Construct a zone for unit tests, bypassing DNS name validation
    /// errors (tests use plain ASCII names that always parse).
    #[cfg(test)]
    pub fn new_for_test(
        name_str: &str,
        input_path: Utf8PathBuf,
        output_path: Utf8PathBuf,
        workdir: Utf8PathBuf,
    ) -> Self {
        Self::new(name_str, input_path, output_path, workdir).expect("valid test zone name")
    }

    pub fn name(&self) -> &Name<Bytes> {
        &self.name
    }

    pub fn name_str(&self) -> &str {
        &self.name_str
    }

    pub fn output_path(&self) -> &Utf8Path {
        &self.output_path
    }

    pub fn last_signed(&self) -> Option<i64> {
        self.state.lock().unwrap().last_signed
    }

    pub fn action(&self) -> Action {
        self.state.lock().unwrap().action
    }

    pub fn set_action(&self, action: Action) {
        self.state.lock().unwrap().action = action;
    }

    pub fn has_policy(&self) -> bool {
        self.state.lock().unwrap().policy.is_some()
    }

    /// mtime of the policy file backing the currently-loaded policy, if any
    /// (used by the `sign` command's `check_config_file_update`, §4.7).
    pub fn policy_mtime(&self) -> Option<std::time::SystemTime> {
        self.state.lock().unwrap().policy.as_ref()?.last_modified
    }

    /// The loaded policy's resign interval, if any (used to compute a
    /// delayed reschedule time for `Action::Reschedule`, §4.3, §4.7).
    pub fn resign_interval(&self) -> Option<u64> {
        self.state.lock().unwrap().policy.as_ref().map(|p| p.resign_interval)
    }

    fn path_for(&self, suffix: &str) -> Utf8PathBuf {
        self.workdir.join(format!("{}{suffix}", self.name_str))
    }

    fn axfr_staged_path(&self) -> Utf8PathBuf {
        let mut p = self.input_path.clone();
        p.set_extension("axfr");
        p
    }

    /// Re-read the zone's policy file and, if it differs from the current
    /// one, elevate `action` to the least-invasive re-work action that
    /// covers the change (§4.3, §4.7 `update`/`sign` commands).
    ///
    /// On a parse failure, the previous policy (if any) is kept and the
    /// error is returned without touching `action` (§7).
    pub fn read_config(&self, policy_path: &Utf8Path) -> Result<Action, std::io::Error> {
        let new_policy = crate::policy::file::Spec::load(policy_path)?;
        let mut state = self.state.lock().unwrap();
        let action = match &state.policy {
            None => Action::Resign,
            Some(old) => old.compare(&new_policy),
        };
        state.policy = Some(new_policy);
        if action > state.action {
            state.action = action;
        }
        Ok(action)
    }

    /// Delete all temp files for this zone, leaving the public output path
    /// untouched (`clear <zone>`, §4.7).
    pub fn clear_database(&self) -> std::io::Result<()> {
        let _state = self.state.lock().unwrap();
        for suffix in [
            ".unsorted",
            ".sorted",
            ".processed",
            ".nsecced",
            ".signed",
            ".signed.sorted",
            ".signed2",
            ".finalized",
        ] {
            let path = self.path_for(suffix);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Run the contiguous tail of the sign pipeline implied by the current
    /// `action`, per §4.4. After any completion (success or not) `action`
    /// is reset to `Resign` unless `schedule_now` is set (§4.4).
    pub fn perform_action(
        &self,
        tools_cfg: &ToolPaths,
        tool_config_path: &Utf8Path,
        syslog_facility: Option<&str>,
        notify_command: Option<&str>,
        schedule_now: bool,
    ) -> Result<PipelineOutcome, ZoneError> {
        let mut state = self.state.lock().unwrap();
        let policy = state.policy.clone().ok_or(ZoneError::NoPolicy)?;
        let action = state.action;
        drop(state);

        let result = self.run_pipeline(&policy, action, tools_cfg, tool_config_path, syslog_facility, notify_command);

        let mut state = self.state.lock().unwrap();
        if !schedule_now {
            state.action = Action::Resign;
        }
        result
    }

    fn run_pipeline(
        &self,
        policy: &ZoneConfig,
        action: Action,
        tools_cfg: &ToolPaths,
        tool_config_path: &Utf8Path,
        syslog_facility: Option<&str>,
        notify_command: Option<&str>,
    ) -> Result<PipelineOutcome, ZoneError> {
        let unsorted = self.path_for(".unsorted");
        let sorted = self.path_for(".sorted");
        let processed = self.path_for(".processed");
        let nsecced = self.path_for(".nsecced");
        let signed = self.path_for(".signed");
        let signed_sorted = self.path_for(".signed.sorted");
        let signed_processed = self.path_for(".signed.processed");
        let signed2 = self.path_for(".signed2");
        let finalized = self.path_for(".finalized");
        let serial_file = self.path_for(".serial");

        let signed_exists = signed.exists();
        let processed_exists = processed.exists();
        let input_exists = self.input_path.exists() || self.axfr_staged_path().exists();

        let Some(mut stage) = entry_stage(action, signed_exists, processed_exists, input_exists)
        else {
            warn!(zone = self.name_str.as_str(), "input file missing, nothing to do");
            return Ok(PipelineOutcome::NoOp);
        };
        let force = stage != Stage::Sign;

        if stage == Stage::SortSigned {
            if signed.exists() {
                tools::sorter(
                    &tools_cfg.sorter,
                    self.name_str(),
                    &signed,
                    &signed_sorted,
                    Some(policy.soa_minimum),
                )?;
                self.preprocess_into(
                    policy,
                    tools_cfg,
                    tool_config_path,
                    &signed_sorted,
                    &signed_processed,
                )?;
                fs::rename(&signed_processed, &signed)?;
            }
            stage = Stage::Fetch;
        }

        if stage == Stage::Fetch {
            self.fetch()?;
            stage = Stage::SortInput;
        }

        if stage == Stage::SortInput {
            fs::copy(&self.input_path, &unsorted)?;
            tools::sorter(
                &tools_cfg.sorter,
                self.name_str(),
                &unsorted,
                &sorted,
                Some(policy.soa_minimum),
            )?;
            stage = Stage::Preprocess;
        }

        if stage == Stage::Preprocess {
            self.preprocess_into(policy, tools_cfg, tool_config_path, &sorted, &processed)?;
            stage = Stage::Nsecify;
        }

        if stage == Stage::Nsecify {
            self.nsecify(policy, tools_cfg, &processed, &nsecced)?;
            stage = Stage::Sign;
        }

        // stage == Stage::Sign from here on.
        let now = unix_now();
        let input_serial_source = if sorted.exists() { &sorted } else { &signed };
        let input_serial = tools::get_serial(&tools_cfg.get_serial, input_serial_source)?;
        let prev_serial = read_serial_file(&serial_file).unwrap_or(0);
        let new_serial = find_serial(policy.soa_serial, prev_serial, input_serial, now)?;

        let times = signature_times(policy, now);
        let previous_signed = signed.exists().then_some(signed.as_path());
        let keys: Vec<KeyDirective> = policy
            .signature_keys()
            .into_iter()
            .map(|k| KeyDirective {
                is_ksk: k.is_ksk,
                tool_key_id: k.tool_key_id.clone().unwrap_or_else(|| k.locator.clone()),
                algorithm: k.algorithm,
                flags: k.flags,
            })
            .collect();
        let nsec3_directive = match &policy.denial {
            crate::policy::DenialPolicy::Nsec3 {
                algorithm,
                iterations,
                salt,
                ..
            } => Some((*algorithm, *iterations, salt.as_deref())),
            crate::policy::DenialPolicy::Nsec => None,
        };
        let directives = SignDirectives {
            origin: self.name_str(),
            soa_ttl: policy.soa_ttl,
            soa_minimum: policy.soa_minimum,
            soa_serial: Some(new_serial),
            soa_serial_keep: matches!(policy.soa_serial, SerialPolicy::Keep),
            nsec3: nsec3_directive,
            expiration: times.expiration,
            expiration_denial: times.expiration_denial,
            jitter: policy.jitter,
            inception: times.inception,
            refresh: times.refresh,
            refresh_denial: times.refresh_denial,
            keys: &keys,
        };

        let count = tools::sign(
            &tools_cfg.signer,
            tool_config_path,
            previous_signed,
            &signed2,
            syslog_facility,
            &directives,
            &nsecced,
        )?;

        let signature_keys_empty = policy.signature_keys().is_empty();
        if force || count > 0 || signature_keys_empty {
            fs::rename(&signed2, &signed)?;
            let mut state = self.state.lock().unwrap();
            state.last_signed = Some(now);
            drop(state);
        } else {
            let _ = fs::remove_file(&signed2);
            info!(zone = self.name_str.as_str(), "signer reported no new signatures");
            return Ok(PipelineOutcome::NoNewSignatures);
        }

        tools::finalizer(&tools_cfg.finalizer, &signed, &finalized)?;
        if fs::metadata(&finalized)?.len() == 0 {
            return Err(ZoneError::Io(std::io::Error::other(
                "finalized zone is empty",
            )));
        }

        if policy.audit {
            tools::auditor(&tools_cfg.auditor, tool_config_path, &finalized, self.name_str())?;
        }

        crate::util::write_file(&serial_file, new_serial.to_string().as_bytes())?;
        fs::rename(&finalized, &self.output_path)?;

        if let Some(cmd_template) = notify_command {
            self.run_notify(cmd_template);
        }

        Ok(PipelineOutcome::Published)
    }

    #[allow(clippy::too_many_arguments)]
    fn preprocess_into(
        &self,
        policy: &ZoneConfig,
        tools_cfg: &ToolPaths,
        tool_config_path: &Utf8Path,
        input: &Utf8Path,
        output: &Utf8Path,
    ) -> Result<(), ZoneError> {
        let class = tools::get_class(&tools_cfg.get_class, input)?;
        self.ensure_dnskey_text(tools_cfg, tool_config_path, class)?;
        let dnskey_rrs: Vec<String> = {
            let state = self.state.lock().unwrap();
            let live = state.policy.as_ref().ok_or(ZoneError::NoPolicy)?;
            policy
                .publish_keys()
                .into_iter()
                .filter_map(|k| live.keys.get(&k.locator).and_then(|lk| lk.dnskey_text.clone()))
                .collect()
        };
        let no_signature_keys = policy.signature_keys().is_empty();
        let nsec3 = match &policy.denial {
            crate::policy::DenialPolicy::Nsec3 {
                algorithm,
                iterations,
                salt,
                ..
            } if !no_signature_keys => Some((*iterations, *algorithm, salt.as_deref())),
            _ => None,
        };
        tools::zone_reader(
            &tools_cfg.zone_reader,
            class,
            self.name_str(),
            output,
            nsec3,
            no_signature_keys,
            &dnskey_rrs,
            input,
        )?;
        Ok(())
    }

    /// Render and cache `DNSKEY` record text for any publish key that
    /// doesn't have it yet (§4.4 step 3, §6), mirroring `find_key_details`/
    /// `check_key_values`'s lazy-fill-then-reuse behaviour.
    fn ensure_dnskey_text(
        &self,
        tools_cfg: &ToolPaths,
        tool_config_path: &Utf8Path,
        class: u16,
    ) -> Result<(), ZoneError> {
        let mut state = self.state.lock().unwrap();
        let Some(policy) = state.policy.as_mut() else {
            return Ok(());
        };
        for key in policy
            .keys
            .values_mut()
            .filter(|k| k.publish && k.dnskey_text.is_none())
        {
            let text = tools::create_dnskey(
                &tools_cfg.create_dnskey,
                tool_config_path,
                class,
                &self.name_str,
                key.algorithm,
                key.flags,
                key.ttl,
                &key.locator,
            )?;
            key.dnskey_text = Some(text);
        }
        Ok(())
    }

    fn nsecify(
        &self,
        policy: &ZoneConfig,
        tools_cfg: &ToolPaths,
        processed: &Utf8Path,
        nsecced: &Utf8Path,
    ) -> Result<(), ZoneError> {
        if policy.signature_keys().is_empty() {
            fs::copy(processed, nsecced)?;
            return Ok(());
        }
        match &policy.denial {
            crate::policy::DenialPolicy::Nsec => {
                tools::nseccer(
                    &tools_cfg.nseccer,
                    processed,
                    nsecced,
                    Some(policy.soa_minimum),
                )?;
            }
            crate::policy::DenialPolicy::Nsec3 {
                opt_out,
                algorithm,
                iterations,
                salt,
            } => {
                tools::nsec3er(
                    &tools_cfg.nsec3er,
                    self.name_str(),
                    *iterations,
                    *algorithm,
                    processed,
                    nsecced,
                    salt.as_deref(),
                    Some(policy.soa_minimum),
                    *opt_out,
                )?;
            }
        }
        Ok(())
    }

    fn fetch(&self) -> std::io::Result<()> {
        let staged = self.axfr_staged_path();
        if staged.exists() {
            fs::rename(&staged, &self.input_path)?;
        }
        Ok(())
    }

    fn run_notify(&self, cmd_template: &str) {
        let cmd = cmd_template
            .replace("%zone", self.name_str())
            .replace("%zonefile", self.output_path.as_str());
        match std::process::Command::new("sh").arg("-c").arg(&cmd).status() {
            Ok(status) if !status.success() => {
                warn!(zone = self.name_str.as_str(), %status, "notify command failed")
            }
            Err(err) => warn!(zone = self.name_str.as_str(), %err, "failed to run notify command"),
            Ok(_) => {}
        }
    }
}

fn read_serial_file(path: &Utf8Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_stage_cold_start_enters_at_fetch() {
        // §8 scenario 1: new zone, action defaults to Reread/Resign, input
        // exists, nothing signed yet.
        let stage = entry_stage(Action::Resign, false, false, true);
        assert_eq!(stage, Some(Stage::Fetch));
    }

    #[test]
    fn entry_stage_resort_enters_at_sort_signed() {
        let stage = entry_stage(Action::Resort, true, true, true);
        assert_eq!(stage, Some(Stage::SortSigned));
    }

    #[test]
    fn entry_stage_resign_with_signed_enters_at_sign() {
        let stage = entry_stage(Action::Resign, true, false, false);
        assert_eq!(stage, Some(Stage::Sign));
    }

    #[test]
    fn entry_stage_missing_everything_is_none() {
        assert_eq!(entry_stage(Action::Resign, false, false, false), None);
    }

    #[test]
    fn signature_timing_invariants_hold() {
        let mut policy = test_policy();
        policy.validity_default = 86400;
        policy.validity_denial = 86400;
        policy.refresh_time = 600;
        policy.inception_offset = 3600;
        let t = 1_700_000_000;
        let times = signature_times(&policy, t);
        assert!(times.inception < t);
        assert!(t <= times.expiration);
        assert!(times.refresh < times.expiration);
        assert!(times.refresh_denial < times.expiration_denial);
    }

    #[test]
    fn find_serial_keep_fails_when_not_advancing() {
        // §8 scenario 3.
        let err = find_serial(SerialPolicy::Keep, 100, 100, 2_000_000_000).unwrap_err();
        assert!(matches!(err, ZoneError::SerialKeepViolation { .. }));
    }

    #[test]
    fn find_serial_keep_succeeds_when_advancing() {
        let got = find_serial(SerialPolicy::Keep, 100, 101, 2_000_000_000).unwrap();
        assert_eq!(got, 101);
    }

    #[test]
    fn find_serial_counter_bumps_when_not_advancing() {
        let got = find_serial(SerialPolicy::Counter, 100, 100, 2_000_000_000).unwrap();
        assert_eq!(got, 101);
    }

    #[test]
    fn find_serial_datecounter_scenario() {
        // §8 scenario 4: 2009-11-05, prev=200911050050 -> 200911050100.
        let t = 1257382200; // 2009-11-05T00:50:00Z
        let got = find_serial(SerialPolicy::DateCounter, 200_911_050_050, 0, t).unwrap();
        assert_eq!(got, 200_911_050_100);
    }

    fn test_policy() -> ZoneConfig {
        ZoneConfig {
            resign_interval: 3600,
            refresh_time: 600,
            validity_default: 86400,
            validity_denial: 86400,
            validity_keys: 86400,
            jitter: 0,
            inception_offset: 3600,
            denial: crate::policy::DenialPolicy::Nsec,
            keys: foldhash::HashMap::default(),
            soa_ttl: 3600,
            soa_minimum: 3600,
            soa_serial: SerialPolicy::Counter,
            audit: false,
            last_modified: None,
        }
    }
}
