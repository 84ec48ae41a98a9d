//! Job executor
//!
//! Executes one complete run of one job:
//!
//! ```text
//! ┌──────────────┐  login / groups / info / stats / rules  ┌───────────────┐
//! │              │ ───────────────────────────────────────▶ │ AccountClient │
//! │              │                                          └───────────────┘
//! │ JobExecutor  │  zone / record / update                  ┌───────────────┐
//! │              │ ───────────────────────────────────────▶ │  DnsProvider  │
//! │              │                                          └───────────────┘
//! │              │  on change only                          ┌───────────────┐
//! │              │ ───────────────────────────────────────▶ │   Notifier    │
//! └──────────────┘                                          └───────────────┘
//!        │
//!        ▼ one keyed update (results, last_log, last_run)
//! ┌──────────────┐
//! │ ConfigStore  │
//! └──────────────┘
//! ```
//!
//! ## Run Flow
//!
//! 1. Read the job and settings fresh from the store (missing job → `Skipped`)
//! 2. Log in and fetch device groups, user info, traffic (best effort) and rules
//! 3. Take the first IPv4 of the primary inbound device group
//! 4. Skip DNS when no token or record name is configured
//! 5. Update the A record when its content differs
//! 6. Notify after a change
//! 7. Log out
//! 8. Write results, `last_log` and `last_run` back in one update
//!
//! Remote failures end the run early and are recorded in `last_log`; only
//! config store failures leave [`JobExecutor::run`] as errors.

pub mod format;
pub mod log;

pub use log::RunLog;

use crate::config::{DEFAULT_TIMEZONE, ExecutorConfig, timezone_or_default};
use crate::error::{ClientError, Result, RunFailure};
use crate::model::{AccountData, ForwardRule, Job, JobId, JobPatch, RunRecord};
use crate::traits::{
    AccountClient, AccountClientFactory, ConfigStore, DeviceGroup, DnsProviderFactory,
    NotificationMessage, NotifierFactory, SessionToken,
};
use async_trait::async_trait;
use jiff::Timestamp;
use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something that can execute a job run
///
/// Implemented by [`JobExecutor`]; the scheduler only depends on this trait.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Execute one run of `job_id`
    ///
    /// # Returns
    ///
    /// - `Ok(RunReport)`: The run finished (successfully, failed, or skipped)
    /// - `Err(Error)`: The config store could not be read or written
    async fn run(&self, job_id: &str) -> Result<RunReport>;
}

/// Terminal status of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed(RunFailure),
    /// The job no longer exists
    Skipped,
}

/// What happened to the DNS record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsOutcome {
    /// The run ended before the DNS step
    NotAttempted,
    /// No DNS token or record name configured
    NotConfigured,
    /// The record already had the candidate address
    Unchanged { current: Ipv4Addr },
    /// The record was pointed at a new address
    Updated { previous: String, current: Ipv4Addr },
    /// The record does not exist at the provider
    RecordMissing,
    /// The provider call failed
    Failed(String),
}

/// What happened to the change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// No change to report
    NotAttempted,
    /// No notifier token or destination configured
    NotConfigured,
    Sent,
    Failed(String),
}

/// Result of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub job_id: JobId,
    pub status: RunStatus,
    pub dns: DnsOutcome,
    pub notify: NotifyOutcome,
    /// Log lines written to the job's `last_log`
    pub log: Vec<String>,
}

impl RunReport {
    fn skipped(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: RunStatus::Skipped,
            dns: DnsOutcome::NotAttempted,
            notify: NotifyOutcome::NotAttempted,
            log: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Factories for the remote collaborators, shared by every run
#[derive(Clone)]
pub struct Collaborators {
    pub accounts: Arc<dyn AccountClientFactory>,
    pub dns: Arc<dyn DnsProviderFactory>,
    pub notifier: Arc<dyn NotifierFactory>,
}

/// Executes job runs against the config store and the remote collaborators
pub struct JobExecutor {
    store: Arc<dyn ConfigStore>,
    clients: Collaborators,
    config: ExecutorConfig,
}

/// Account data fetched in step 2
struct FetchedAccount {
    device_groups: Vec<DeviceGroup>,
    summary: String,
    forward_rules: Vec<ForwardRule>,
}

/// DNS and notification result of steps 3 to 6
struct DnsSync {
    dns: DnsOutcome,
    notify: NotifyOutcome,
    failure: Option<RunFailure>,
}

impl DnsSync {
    fn skipped(dns: DnsOutcome) -> Self {
        Self {
            dns,
            notify: NotifyOutcome::NotAttempted,
            failure: None,
        }
    }

    fn failed(dns: DnsOutcome, failure: RunFailure) -> Self {
        Self {
            dns,
            notify: NotifyOutcome::NotAttempted,
            failure: Some(failure),
        }
    }
}

impl JobExecutor {
    /// Create a new executor
    ///
    /// # Parameters
    ///
    /// - `store`: Config store shared with the scheduler and admin surface
    /// - `clients`: Factories for the account client, DNS provider and notifier
    /// - `config`: Executor settings
    pub fn new(
        store: Arc<dyn ConfigStore>,
        clients: Collaborators,
        config: ExecutorConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clients,
            config,
        })
    }

    /// Execute one complete run of a job
    pub async fn run(&self, job_id: &str) -> Result<RunReport> {
        let snapshot = self.store.snapshot().await?;
        let Some(job) = snapshot.jobs.get(job_id).cloned() else {
            info!(job_id, "Job no longer exists, skipping run");
            return Ok(RunReport::skipped(job_id));
        };

        let (tz, fell_back) = timezone_or_default(&snapshot.settings.timezone);
        let mut log = RunLog::new(job_id, tz, self.config.log_capacity);
        if fell_back {
            log.warn(format!(
                "unknown timezone '{}', using {}",
                snapshot.settings.timezone, DEFAULT_TIMEZONE
            ));
        }

        let (status, account, sync) = self.execute(job_id, &job, &mut log).await;

        let report = RunReport {
            job_id: job_id.to_string(),
            status,
            dns: sync.dns,
            notify: sync.notify,
            log: log.to_vec(),
        };

        let record = RunRecord {
            account: account.map(|a| AccountData {
                user_info: a.summary,
                forward_rules: a.forward_rules,
                device_groups: a.device_groups,
            }),
            last_log: report.log.clone(),
            last_run: Timestamp::now(),
        };

        match self
            .store
            .update_job(job_id, JobPatch::RunResults(record))
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                warn!(job_id, "Job was deleted during the run, results discarded");
            }
            Err(e) => return Err(e),
        }

        info!(
            job_id,
            status = ?report.status,
            dns = ?report.dns,
            notify = ?report.notify,
            "Run finished"
        );
        Ok(report)
    }

    /// Steps 2 to 7
    async fn execute(
        &self,
        job_id: &str,
        job: &Job,
        log: &mut RunLog,
    ) -> (RunStatus, Option<FetchedAccount>, DnsSync) {
        let client = match self.clients.accounts.create(&job.provider_host) {
            Ok(client) => client,
            Err(e) => {
                log.error(format!("cannot create panel client: {}", e));
                return (
                    RunStatus::Failed(RunFailure::InvalidDefinition(e.to_string())),
                    None,
                    DnsSync::skipped(DnsOutcome::NotAttempted),
                );
            }
        };

        let login = self
            .bounded(
                "login",
                client.login(
                    &job.credentials.username,
                    job.credentials.password.expose(),
                ),
            )
            .await;
        let session = match login {
            Ok(session) => {
                log.info(format!("logged in to {}", display_host(client.host())));
                session
            }
            Err(e) => {
                log.error(format!("login to {} failed: {}", display_host(client.host()), e));
                return (
                    RunStatus::Failed(e.into()),
                    None,
                    DnsSync::skipped(DnsOutcome::NotAttempted),
                );
            }
        };

        let (account, sync) = match self.fetch_account(client.as_ref(), &session, log).await {
            Ok(account) => {
                let sync = self
                    .sync_dns(job_id, job, &account.device_groups, log)
                    .await;
                (Some(account), sync)
            }
            Err(failure) => (
                None,
                DnsSync::failed(DnsOutcome::NotAttempted, failure),
            ),
        };

        match self.bounded("logout", client.logout(&session)).await {
            Ok(()) => log.info("logged out"),
            Err(e) => log.warn(format!("logout failed: {}", e)),
        }

        let status = match &sync.failure {
            Some(failure) => RunStatus::Failed(failure.clone()),
            None => RunStatus::Succeeded,
        };
        (status, account, sync)
    }

    /// Step 2: device groups, user info, traffic statistics, forwarding rules
    async fn fetch_account(
        &self,
        client: &dyn AccountClient,
        session: &SessionToken,
        log: &mut RunLog,
    ) -> std::result::Result<FetchedAccount, RunFailure> {
        let device_groups = self
            .bounded("device groups", client.device_groups(session))
            .await
            .map_err(|e| abort(log, "failed to fetch device groups", e))?;
        log.info(format!("fetched {} device groups", device_groups.len()));

        let user_info = self
            .bounded("user info", client.user_info(session))
            .await
            .map_err(|e| abort(log, "failed to fetch user info", e))?;

        let mut summary = format::format_user_info(&user_info);
        log.info("account:");
        for line in &summary {
            log.info(format!("  {}", line));
        }

        match self
            .bounded("traffic statistic", client.traffic_statistic(session))
            .await
        {
            Ok(stat) => {
                let traffic = format::format_traffic(&stat);
                log.info(traffic.join(" | "));
                summary.extend(traffic);
            }
            Err(e) => log.warn(format!("traffic statistics unavailable: {}", e)),
        }

        let rules = self
            .bounded("forward rules", client.forward_rules(session))
            .await
            .map_err(|e| abort(log, "failed to fetch forwarding rules", e))?;

        let groups_by_id: HashMap<i64, &DeviceGroup> =
            device_groups.iter().map(|g| (g.id, g)).collect();
        let forward_rules: Vec<ForwardRule> = rules
            .into_iter()
            .map(|rule| ForwardRule::enrich(rule, &groups_by_id))
            .collect();
        log.info(format!("fetched {} forwarding rules", forward_rules.len()));

        Ok(FetchedAccount {
            device_groups,
            summary: summary.join("\n"),
            forward_rules,
        })
    }

    /// Steps 3 to 6
    async fn sync_dns(
        &self,
        job_id: &str,
        job: &Job,
        device_groups: &[DeviceGroup],
        log: &mut RunLog,
    ) -> DnsSync {
        let candidate = format::primary_inbound_ip(device_groups, self.config.primary_inbound_id);

        let Some((token, record_name)) = job.dns_target() else {
            match &candidate {
                Ok(ip) => log.info(format!("primary inbound address is {}", ip)),
                Err(reason) => log.warn(format!("no primary inbound address: {}", reason)),
            }
            log.info("DNS sync not configured, skipping");
            return DnsSync::skipped(DnsOutcome::NotConfigured);
        };

        let ip = match candidate {
            Ok(ip) => {
                log.info(format!("primary inbound address is {}", ip));
                ip
            }
            Err(reason) => {
                log.error(format!("no primary inbound address: {}", reason));
                return DnsSync::failed(
                    DnsOutcome::NotAttempted,
                    RunFailure::MissingPrimaryInbound(reason),
                );
            }
        };

        let provider = match self.clients.dns.create(token.expose()) {
            Ok(provider) => provider,
            Err(e) => {
                log.error(format!("cannot create DNS provider: {}", e));
                return DnsSync::failed(
                    DnsOutcome::NotAttempted,
                    RunFailure::InvalidDefinition(e.to_string()),
                );
            }
        };

        let zone_id = match self.bounded("zone lookup", provider.find_zone(record_name)).await {
            Ok(zone_id) => {
                debug!(job_id, zone_id = %zone_id, "Resolved DNS zone");
                zone_id
            }
            Err(e) => {
                log.error(format!("zone lookup for {} failed: {}", record_name, e));
                return DnsSync::failed(
                    DnsOutcome::Failed(e.to_string()),
                    RunFailure::from_dns(e),
                );
            }
        };

        let record = match self
            .bounded("record lookup", provider.get_record(&zone_id, record_name))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                log.error(format!(
                    "A record {} does not exist at {}, create it first",
                    record_name,
                    provider.provider_name()
                ));
                return DnsSync::failed(
                    DnsOutcome::RecordMissing,
                    RunFailure::RecordNotFound(record_name.to_string()),
                );
            }
            Err(e) => {
                log.error(format!("record lookup for {} failed: {}", record_name, e));
                return DnsSync::failed(
                    DnsOutcome::Failed(e.to_string()),
                    RunFailure::from_dns(e),
                );
            }
        };

        if record.ipv4() == Some(ip) {
            log.info(format!("{} already points to {}, no update needed", record_name, ip));
            return DnsSync::skipped(DnsOutcome::Unchanged { current: ip });
        }

        if let Err(e) = self
            .bounded(
                "record update",
                provider.update_record(&zone_id, &record, ip, self.config.dns_ttl_secs),
            )
            .await
        {
            log.error(format!("updating {} failed: {}", record_name, e));
            return DnsSync::failed(
                    DnsOutcome::Failed(e.to_string()),
                    RunFailure::from_dns(e),
                );
        }
        log.info(format!(
            "updated {}: {} -> {}",
            record_name, record.content, ip
        ));

        let notify = self
            .notify(job_id, job, record_name, &record.content, ip, log)
            .await;

        DnsSync {
            dns: DnsOutcome::Updated {
                previous: record.content,
                current: ip,
            },
            notify,
            failure: None,
        }
    }

    /// Step 6; never fails the run
    async fn notify(
        &self,
        job_id: &str,
        job: &Job,
        record_name: &str,
        previous: &str,
        current: Ipv4Addr,
        log: &mut RunLog,
    ) -> NotifyOutcome {
        let Some((token, target)) = job.notifier_target() else {
            return NotifyOutcome::NotConfigured;
        };

        let notifier = match self.clients.notifier.create(token.expose(), target) {
            Ok(notifier) => notifier,
            Err(e) => {
                log.warn(format!("cannot create notifier: {}", e));
                return NotifyOutcome::Failed(e.to_string());
            }
        };

        let message = NotificationMessage {
            job_id: job_id.to_string(),
            record_name: record_name.to_string(),
            previous: previous.to_string(),
            current,
            changed_at: Timestamp::now().to_zoned(log.timezone().clone()),
        };

        match self.bounded("notification", notifier.send(&message)).await {
            Ok(()) => {
                log.info(format!("{} notification sent", notifier.channel_name()));
                NotifyOutcome::Sent
            }
            Err(e) => {
                log.warn(format!("{} notification failed: {}", notifier.channel_name(), e));
                NotifyOutcome::Failed(e.to_string())
            }
        }
    }

    /// Bound a remote call by the request timeout
    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = std::result::Result<T, ClientError>>,
    ) -> std::result::Result<T, ClientError> {
        let limit = self.config.request_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(format!(
                "{} did not complete within {}s",
                what,
                limit.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl JobRunner for JobExecutor {
    async fn run(&self, job_id: &str) -> Result<RunReport> {
        JobExecutor::run(self, job_id).await
    }
}

fn abort(log: &mut RunLog, context: &str, err: ClientError) -> RunFailure {
    log.error(format!("{}: {}", context, err));
    err.into()
}

fn display_host(host: &str) -> &str {
    host.strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host)
}
