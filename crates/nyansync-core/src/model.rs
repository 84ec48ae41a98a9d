//! Persisted data model
//!
//! The config store holds one [`Snapshot`]: global [`Settings`] plus every [`Job`]
//! keyed by its id. Jobs carry their definition, user-curated `rule_domains`, and
//! the result fields written by the executor after each run.
//!
//! ## File Format
//!
//! ```json
//! {
//!   "auth": { "username": "admin", "password": "..." },
//!   "timezone": "Asia/Shanghai",
//!   "jobs": {
//!     "1718000000000": {
//!       "enabled": true,
//!       "interval_minutes": 15,
//!       "username": "user",
//!       "password": "...",
//!       "provider_host": "https://panel.example.com",
//!       "dns_token": "...",
//!       "domain": "edge.example.com",
//!       "rule_domains": { "42": ["a.example.com"] },
//!       "last_log": ["[2025-01-09 12:00:00] ..."],
//!       "last_run": "2025-01-09T04:00:00Z"
//!     }
//!   }
//! }
//! ```

use crate::config::DEFAULT_TIMEZONE;
use crate::error::{Error, Result};
use crate::traits::{DeviceGroup, RemoteForwardRule};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Opaque job identifier
pub type JobId = String;

/// Placeholder shown instead of secrets on the admin surface
pub const MASK_PLACEHOLDER: &str = "********";

/// A secret string (password or token)
///
/// Serializes transparently; `Debug` never shows the value.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value
    ///
    /// ⚠️ Never log the returned string.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Whether this value is the mask placeholder rather than a real secret
    pub fn is_placeholder(&self) -> bool {
        self.0 == MASK_PLACEHOLDER
    }

    /// The mask placeholder itself
    pub fn placeholder() -> Self {
        Self(MASK_PLACEHOLDER.to_string())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<REDACTED>")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Panel account credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Panel username
    pub username: String,
    /// Panel password
    #[serde(default)]
    pub password: Secret,
}

/// A configured job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Whether the job runs on its timer
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Timer period in minutes (0 disables the timer)
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,

    /// Panel login
    #[serde(flatten)]
    pub credentials: Credentials,

    /// Panel base URL, without trailing slash
    pub provider_host: String,

    /// DNS provider API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_token: Option<Secret>,

    /// DNS record kept in sync with the primary inbound address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Notifier token (Telegram bot token)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier_token: Option<Secret>,

    /// Notifier destination (Telegram chat id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier_target: Option<String>,

    /// Forwarding-rule id → domains curated by the user
    #[serde(default)]
    pub rule_domains: BTreeMap<String, Vec<String>>,

    /// Results of the last run
    #[serde(flatten)]
    pub results: JobResults,
}

impl Job {
    /// Whether the scheduler should keep a timer for this job
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.interval_minutes > 0
    }

    /// DNS token and record name, when both are configured
    pub fn dns_target(&self) -> Option<(&Secret, &str)> {
        let token = self.dns_token.as_ref().filter(|t| !t.is_empty())?;
        let domain = self.domain.as_deref().filter(|d| !d.trim().is_empty())?;
        Some((token, domain))
    }

    /// Notifier token and destination, when both are configured
    pub fn notifier_target(&self) -> Option<(&Secret, &str)> {
        let token = self.notifier_token.as_ref().filter(|t| !t.is_empty())?;
        let target = self
            .notifier_target
            .as_deref()
            .filter(|t| !t.trim().is_empty())?;
        Some((token, target))
    }

    /// Copy with every secret replaced by [`MASK_PLACEHOLDER`]
    pub fn masked(&self) -> Self {
        let mut job = self.clone();
        if !job.credentials.password.is_empty() {
            job.credentials.password = Secret::placeholder();
        }
        job.dns_token = job.dns_token.map(|_| Secret::placeholder());
        job.notifier_token = job.notifier_token.map(|_| Secret::placeholder());
        job
    }
}

/// Fields written by the executor after each run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResults {
    /// Formatted account summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<String>,

    /// Forwarding rules, enriched with device group data
    #[serde(default)]
    pub forward_rules: Vec<ForwardRule>,

    /// Device groups as returned by the panel
    #[serde(default)]
    pub device_groups: Vec<DeviceGroup>,

    /// Timestamped log lines of the last run
    #[serde(default)]
    pub last_log: Vec<String>,

    /// Completion time of the last run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<Timestamp>,
}

/// A forwarding rule as stored with the job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRule {
    pub id: i64,
    pub name: String,
    pub listen_port: i64,
    /// Comma-joined destinations
    pub dest: String,
    pub status: i64,
    pub traffic_gib: f64,
    pub updated_at: String,
    pub device_group_in: Option<i64>,
    pub device_group_name: String,
    pub device_group_connect: String,
}

impl ForwardRule {
    /// Join a remote rule with the device group it enters through
    pub fn enrich(rule: RemoteForwardRule, groups: &HashMap<i64, &DeviceGroup>) -> Self {
        let group = rule.device_group_in.and_then(|id| groups.get(&id).copied());

        let device_group_name = match (group, rule.device_group_in) {
            (Some(group), _) => group.name.clone().unwrap_or_default(),
            (None, Some(id)) => format!("ID {}", id),
            (None, None) => String::new(),
        };

        let dest = match rule.dest {
            Some(dest) => dest.join(", "),
            None => "unparseable".to_string(),
        };

        let traffic_gib = (rule.traffic_used / GIB * 100.0).round() / 100.0;

        Self {
            id: rule.id,
            name: rule.name,
            listen_port: rule.listen_port,
            dest,
            status: rule.status,
            traffic_gib,
            updated_at: rule.updated_at,
            device_group_in: rule.device_group_in,
            device_group_name,
            device_group_connect: group
                .and_then(|g| g.connect_host.clone())
                .unwrap_or_default(),
        }
    }
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Control-plane login, owned by the excluded auth layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Secret,
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Control-plane login (opaque to the engine)
    #[serde(default)]
    pub auth: ControlAuth,

    /// IANA timezone of the scheduling clock and log timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auth: ControlAuth::default(),
            timezone: default_timezone(),
        }
    }
}

/// Full content of the config store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub settings: Settings,

    #[serde(default)]
    pub jobs: BTreeMap<JobId, Job>,
}

impl Snapshot {
    /// Copy safe to hand to an external caller
    pub fn masked(&self) -> Self {
        let mut snapshot = self.clone();
        if !snapshot.settings.auth.password.is_empty() {
            snapshot.settings.auth.password = Secret::placeholder();
        }
        for job in snapshot.jobs.values_mut() {
            *job = job.masked();
        }
        snapshot
    }
}

/// Job definition as written by the admin surface
///
/// Secrets that are absent or equal to [`MASK_PLACEHOLDER`] keep their stored
/// value; an explicit empty string clears an optional secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,

    pub username: String,

    #[serde(default)]
    pub password: Option<Secret>,

    pub provider_host: String,

    #[serde(default)]
    pub dns_token: Option<Secret>,

    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub notifier_token: Option<Secret>,

    #[serde(default)]
    pub notifier_target: Option<String>,
}

impl JobDefinition {
    /// Create a definition with default schedule and no DNS/notifier settings
    pub fn new(
        username: impl Into<String>,
        password: impl Into<Secret>,
        provider_host: impl Into<String>,
    ) -> Self {
        Self {
            enabled: default_enabled(),
            interval_minutes: default_interval_minutes(),
            username: username.into(),
            password: Some(password.into()),
            provider_host: provider_host.into(),
            dns_token: None,
            domain: None,
            notifier_token: None,
            notifier_target: None,
        }
    }

    /// Validate the definition
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(Error::invalid_input("username cannot be empty"));
        }

        if self.enabled && self.interval_minutes == 0 {
            return Err(Error::invalid_input(
                "interval_minutes must be > 0 for an enabled job",
            ));
        }

        let host = self.provider_host.trim();
        if !host.starts_with("https://") && !host.starts_with("http://") {
            return Err(Error::invalid_input(format!(
                "provider_host must use HTTP or HTTPS scheme. Got: {}",
                host
            )));
        }

        if let Some(domain) = self.domain.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            if !is_valid_hostname(domain) {
                return Err(Error::invalid_input(format!("invalid domain: {}", domain)));
            }
        }

        Ok(())
    }

    /// Build the stored job, merging secrets and keeping data the definition does not own
    ///
    /// `rule_domains` and run results always come from `previous`.
    pub fn into_job(self, previous: Option<&Job>) -> Job {
        let password = merge_secret(
            self.password,
            previous.map(|p| &p.credentials.password),
        )
        .unwrap_or_default();

        Job {
            enabled: self.enabled,
            interval_minutes: self.interval_minutes,
            credentials: Credentials {
                username: self.username.trim().to_string(),
                password,
            },
            provider_host: self.provider_host.trim().trim_end_matches('/').to_string(),
            dns_token: merge_secret(self.dns_token, previous.and_then(|p| p.dns_token.as_ref())),
            domain: non_empty(self.domain),
            notifier_token: merge_secret(
                self.notifier_token,
                previous.and_then(|p| p.notifier_token.as_ref()),
            ),
            notifier_target: non_empty(self.notifier_target),
            rule_domains: previous.map(|p| p.rule_domains.clone()).unwrap_or_default(),
            results: previous.map(|p| p.results.clone()).unwrap_or_default(),
        }
    }
}

/// Merge an incoming secret with the stored one
///
/// - absent or placeholder → keep `previous`
/// - empty → clear
/// - anything else → overwrite
pub fn merge_secret(incoming: Option<Secret>, previous: Option<&Secret>) -> Option<Secret> {
    match incoming {
        None => previous.cloned(),
        Some(secret) if secret.is_placeholder() => previous.cloned(),
        Some(secret) if secret.is_empty() => None,
        Some(secret) => Some(secret),
    }
}

/// Account data fetched during a run
#[derive(Debug, Clone, PartialEq)]
pub struct AccountData {
    pub user_info: String,
    pub forward_rules: Vec<ForwardRule>,
    pub device_groups: Vec<DeviceGroup>,
}

/// Everything a run writes back to its job
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    /// Present when the account fetch completed
    pub account: Option<AccountData>,
    pub last_log: Vec<String>,
    pub last_run: Timestamp,
}

/// A keyed change to a single job
#[derive(Debug, Clone, PartialEq)]
pub enum JobPatch {
    /// Result fields of a completed run
    RunResults(RunRecord),
    /// Definition fields from the admin surface
    Definition(JobDefinition),
    /// Replace the domains of one forwarding rule
    SetRuleDomains { rule_id: String, domains: Vec<String> },
    /// Remove the domains of one forwarding rule
    ClearRuleDomains { rule_id: String },
}

impl JobPatch {
    /// Apply the patch in place
    pub fn apply(self, job: &mut Job) {
        match self {
            JobPatch::RunResults(record) => {
                if let Some(account) = record.account {
                    job.results.user_info = Some(account.user_info);
                    job.results.forward_rules = account.forward_rules;
                    job.results.device_groups = account.device_groups;
                }
                job.results.last_log = record.last_log;
                job.results.last_run = Some(record.last_run);
            }
            JobPatch::Definition(definition) => {
                *job = definition.into_job(Some(job));
            }
            JobPatch::SetRuleDomains { rule_id, domains } => {
                job.rule_domains.insert(rule_id, domains);
            }
            JobPatch::ClearRuleDomains { rule_id } => {
                job.rule_domains.remove(&rule_id);
            }
        }
    }
}

/// Validate a host name
///
/// Accepts a head of `[A-Za-z0-9._-]` (1 to 63 chars, alphanumeric at both ends)
/// followed by one or more alphabetic labels of at least two characters,
/// e.g. `a.example.com`.
pub fn is_valid_hostname(name: &str) -> bool {
    if name.len() > 253 {
        return false;
    }

    name.char_indices()
        .filter(|(_, c)| *c == '.')
        .any(|(split, _)| valid_head(&name[..split]) && valid_tail(&name[split..]))
}

fn valid_head(head: &str) -> bool {
    let bytes = head.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            head.len() <= 63
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        }
        _ => false,
    }
}

fn valid_tail(tail: &str) -> bool {
    match tail.strip_prefix('.') {
        Some(rest) => rest
            .split('.')
            .all(|label| label.len() >= 2 && label.bytes().all(|b| b.is_ascii_alphabetic())),
        None => false,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_enabled() -> bool {
    true
}

fn default_interval_minutes() -> u32 {
    15
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_job() -> Job {
        let mut definition = JobDefinition::new("alice", "hunter2", "https://panel.example.com/");
        definition.dns_token = Some(Secret::new("cf-token"));
        definition.domain = Some("edge.example.com".to_string());
        definition.notifier_token = Some(Secret::new("bot-token"));
        definition.notifier_target = Some("1234".to_string());
        definition.into_job(None)
    }

    #[test]
    fn masked_definition_round_trip_preserves_secrets() {
        let job = stored_job();
        let masked = job.masked();

        assert_eq!(masked.credentials.password.expose(), MASK_PLACEHOLDER);
        assert_eq!(masked.dns_token.as_ref().unwrap().expose(), MASK_PLACEHOLDER);

        // The admin UI sends the masked values back untouched
        let definition = JobDefinition {
            enabled: masked.enabled,
            interval_minutes: 30,
            username: masked.credentials.username.clone(),
            password: Some(masked.credentials.password.clone()),
            provider_host: masked.provider_host.clone(),
            dns_token: masked.dns_token.clone(),
            domain: masked.domain.clone(),
            notifier_token: None,
            notifier_target: masked.notifier_target.clone(),
        };

        let merged = definition.into_job(Some(&job));
        assert_eq!(merged.credentials.password.expose(), "hunter2");
        assert_eq!(merged.dns_token.unwrap().expose(), "cf-token");
        assert_eq!(merged.notifier_token.unwrap().expose(), "bot-token");
        assert_eq!(merged.interval_minutes, 30);
    }

    #[test]
    fn explicit_secret_overwrites_and_empty_clears() {
        let job = stored_job();

        assert_eq!(
            merge_secret(Some(Secret::new("new")), job.dns_token.as_ref()),
            Some(Secret::new("new"))
        );
        assert_eq!(merge_secret(Some(Secret::new("")), job.dns_token.as_ref()), None);
        assert_eq!(
            merge_secret(None, job.dns_token.as_ref()),
            Some(Secret::new("cf-token"))
        );
    }

    #[test]
    fn definition_write_keeps_rule_domains_and_results() {
        let mut job = stored_job();
        job.rule_domains
            .insert("7".to_string(), vec!["a.example.com".to_string()]);
        job.results.last_log = vec!["line".to_string()];

        JobPatch::Definition(JobDefinition::new("alice", MASK_PLACEHOLDER, "https://p.example.com"))
            .apply(&mut job);

        assert_eq!(job.rule_domains.len(), 1);
        assert_eq!(job.results.last_log, vec!["line".to_string()]);
        assert_eq!(job.credentials.password.expose(), "hunter2");
        assert_eq!(job.provider_host, "https://p.example.com");
        assert_eq!(job.dns_token.as_ref().unwrap().expose(), "cf-token");
    }

    #[test]
    fn host_trailing_slash_is_trimmed() {
        assert_eq!(stored_job().provider_host, "https://panel.example.com");
    }

    #[test]
    fn secrets_are_not_debug_printed() {
        let debug = format!("{:?}", stored_job());
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("cf-token"));
        assert!(debug.contains("<REDACTED>"));
    }

    #[test]
    fn hostname_validation() {
        assert!(is_valid_hostname("example.com"));
        assert!(is_valid_hostname("a.example.com"));
        assert!(is_valid_hostname("edge-1.hk.example.co.uk"));
        assert!(is_valid_hostname("x_y.example.io"));

        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("localhost"));
        assert!(!is_valid_hostname("-bad.example.com"));
        assert!(!is_valid_hostname("bad-.com"));
        assert!(!is_valid_hostname("example.c"));
        assert!(!is_valid_hostname("example.c0m"));
        assert!(!is_valid_hostname("exa mple.com"));
    }

    #[test]
    fn definition_validation() {
        let definition = JobDefinition::new("alice", "pw", "https://panel.example.com");
        assert!(definition.validate().is_ok());

        let mut bad = definition.clone();
        bad.provider_host = "panel.example.com".to_string();
        assert!(bad.validate().is_err());

        let mut bad = definition.clone();
        bad.interval_minutes = 0;
        assert!(bad.validate().is_err());

        let mut bad = definition;
        bad.domain = Some("not a domain".to_string());
        assert!(bad.validate().is_err());
    }

    #[test]
    fn snapshot_parses_minimal_file() {
        let snapshot: Snapshot = serde_json::from_str(
            r#"{
                "jobs": {
                    "1": {
                        "username": "alice",
                        "password": "pw",
                        "provider_host": "https://panel.example.com"
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(snapshot.settings.timezone, DEFAULT_TIMEZONE);
        let job = &snapshot.jobs["1"];
        assert!(job.enabled);
        assert_eq!(job.interval_minutes, 15);
        assert!(job.dns_target().is_none());
        assert!(job.results.last_run.is_none());
    }

    #[test]
    fn enrich_joins_device_group() {
        let group = DeviceGroup {
            id: 1,
            name: Some("HK".to_string()),
            connect_host: Some("1.2.3.4".to_string()),
            extra: Default::default(),
        };
        let groups: HashMap<i64, &DeviceGroup> = [(1, &group)].into_iter().collect();

        let rule = RemoteForwardRule {
            id: 9,
            name: "ssh".to_string(),
            listen_port: 2222,
            dest: Some(vec!["10.0.0.1:22".to_string(), "10.0.0.2:22".to_string()]),
            status: 0,
            traffic_used: 1.5 * GIB,
            updated_at: "2025-01-01".to_string(),
            device_group_in: Some(1),
        };

        let enriched = ForwardRule::enrich(rule.clone(), &groups);
        assert_eq!(enriched.dest, "10.0.0.1:22, 10.0.0.2:22");
        assert_eq!(enriched.device_group_name, "HK");
        assert_eq!(enriched.device_group_connect, "1.2.3.4");
        assert_eq!(enriched.traffic_gib, 1.5);

        let orphan = RemoteForwardRule {
            device_group_in: Some(5),
            dest: None,
            ..rule
        };
        let enriched = ForwardRule::enrich(orphan, &groups);
        assert_eq!(enriched.device_group_name, "ID 5");
        assert_eq!(enriched.dest, "unparseable");
        assert_eq!(enriched.device_group_connect, "");
    }
}
