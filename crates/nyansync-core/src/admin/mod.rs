//! Administrative surface
//!
//! Library API used by the control plane (web UI, CLI). Every write goes
//! through the config store as one atomic mutation and is followed by a
//! scheduler reconciliation, so timers always follow the stored job set.
//!
//! Secrets never leave this module in clear text: reads return masked copies
//! and definition writes merge masked values back (see [`crate::model::merge_secret`]).

pub mod ids;

pub use ids::JobIdGenerator;

use crate::config::resolve_timezone;
use crate::error::{Error, Result};
use crate::model::{
    ControlAuth, Job, JobDefinition, JobId, JobPatch, Secret, Snapshot, is_valid_hostname,
    merge_secret,
};
use crate::scheduler::{Scheduler, TriggerOutcome};
use crate::traits::ConfigStore;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Maximum number of domains attached to one forwarding rule
pub const MAX_RULE_DOMAINS: usize = 500;

/// Attempts at finding an unused id before giving up
const MAX_ID_ATTEMPTS: usize = 8;

/// Control-plane login change
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUpdate {
    pub username: String,
    /// Absent or masked keeps the stored password
    #[serde(default)]
    pub password: Option<Secret>,
}

/// Whole-config write
///
/// Absent fields are left untouched. When `jobs` is present it replaces the
/// job set: ids missing from the map are deleted. `rule_domains` and run
/// results of surviving jobs are always preserved.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub auth: Option<AuthUpdate>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub jobs: Option<BTreeMap<JobId, JobDefinition>>,
}

/// Administrative operations on jobs and settings
pub struct AdminService {
    store: Arc<dyn ConfigStore>,
    scheduler: Scheduler,
    ids: JobIdGenerator,
}

impl AdminService {
    pub fn new(store: Arc<dyn ConfigStore>, scheduler: Scheduler) -> Self {
        Self {
            store,
            scheduler,
            ids: JobIdGenerator::new(),
        }
    }

    /// Full config with every secret masked
    pub async fn masked_snapshot(&self) -> Result<Snapshot> {
        Ok(self.store.snapshot().await?.masked())
    }

    /// One job with secrets masked
    pub async fn job(&self, job_id: &str) -> Result<Job> {
        self.store
            .job(job_id)
            .await?
            .map(|job| job.masked())
            .ok_or_else(|| Error::not_found(format!("job {}", job_id)))
    }

    /// Create a job under a fresh id
    pub async fn create_job(&self, definition: JobDefinition) -> Result<JobId> {
        definition.validate()?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let job_id = self.ids.next_id();
            let job = definition.clone().into_job(None);
            match self.store.insert_job(&job_id, job).await {
                Ok(()) => {
                    info!(job_id = %job_id, "Job created");
                    self.reconcile().await;
                    return Ok(job_id);
                }
                Err(Error::InvalidInput(msg)) => {
                    warn!(job_id = %job_id, "Job id collision: {}", msg);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::store("could not allocate a unique job id"))
    }

    /// Replace a job's definition
    ///
    /// Masked or absent secrets keep their stored values; `rule_domains` and
    /// run results are kept.
    pub async fn update_job(&self, job_id: &str, definition: JobDefinition) -> Result<Job> {
        definition.validate()?;

        let job = self
            .store
            .update_job(job_id, JobPatch::Definition(definition))
            .await?;
        info!(job_id, enabled = job.enabled, interval = job.interval_minutes, "Job updated");

        self.reconcile().await;
        Ok(job.masked())
    }

    /// Delete a job and stop its timer
    ///
    /// An in-flight run finishes; its result write is discarded.
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.store.remove_job(job_id).await?;
        info!(job_id, "Job deleted");

        self.reconcile().await;
        Ok(())
    }

    /// Apply a whole-config write
    pub async fn apply_config(&self, update: ConfigUpdate) -> Result<Snapshot> {
        if let Some(timezone) = &update.timezone {
            resolve_timezone(timezone)?;
        }
        if let Some(jobs) = &update.jobs {
            for (job_id, definition) in jobs {
                definition
                    .validate()
                    .map_err(|e| Error::invalid_input(format!("job {}: {}", job_id, e)))?;
            }
        }

        let snapshot = self
            .store
            .modify(Box::new(move |snapshot| {
                if let Some(auth) = update.auth {
                    let password =
                        merge_secret(auth.password, Some(&snapshot.settings.auth.password))
                            .unwrap_or_default();
                    snapshot.settings.auth = ControlAuth {
                        username: auth.username,
                        password,
                    };
                }

                if let Some(timezone) = update.timezone {
                    snapshot.settings.timezone = timezone;
                }

                if let Some(definitions) = update.jobs {
                    let jobs = definitions
                        .into_iter()
                        .map(|(job_id, definition)| {
                            let job = definition.into_job(snapshot.jobs.get(&job_id));
                            (job_id, job)
                        })
                        .collect();
                    snapshot.jobs = jobs;
                }

                Ok(())
            }))
            .await?;
        info!(jobs = snapshot.jobs.len(), "Config replaced");

        self.reconcile().await;
        Ok(snapshot.masked())
    }

    /// Change the scheduling timezone; every timer is recomputed
    pub async fn set_timezone(&self, name: &str) -> Result<()> {
        resolve_timezone(name)?;

        let timezone = name.to_string();
        self.store
            .modify(Box::new(move |snapshot| {
                snapshot.settings.timezone = timezone;
                Ok(())
            }))
            .await?;
        info!(timezone = name, "Timezone changed");

        self.reconcile().await;
        Ok(())
    }

    /// Run a job now
    pub async fn trigger(&self, job_id: &str) -> Result<TriggerOutcome> {
        self.scheduler.trigger(job_id).await
    }

    /// Domains attached to a forwarding rule (empty when none)
    pub async fn rule_domains(&self, job_id: &str, rule_id: &str) -> Result<Vec<String>> {
        let job = self
            .store
            .job(job_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("job {}", job_id)))?;
        Ok(job.rule_domains.get(rule_id).cloned().unwrap_or_default())
    }

    /// Replace the domains attached to a forwarding rule
    pub async fn set_rule_domains(
        &self,
        job_id: &str,
        rule_id: &str,
        domains: Vec<String>,
    ) -> Result<Vec<String>> {
        let domains = validate_rule_domains(domains)?;

        let job = self
            .store
            .update_job(
                job_id,
                JobPatch::SetRuleDomains {
                    rule_id: rule_id.to_string(),
                    domains,
                },
            )
            .await?;
        Ok(job.rule_domains.get(rule_id).cloned().unwrap_or_default())
    }

    /// Remove the domains attached to a forwarding rule
    pub async fn clear_rule_domains(&self, job_id: &str, rule_id: &str) -> Result<()> {
        self.store
            .update_job(
                job_id,
                JobPatch::ClearRuleDomains {
                    rule_id: rule_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Re-derive timers after a write
    ///
    /// The write itself already succeeded; a failed reconciliation is retried
    /// by the next one.
    async fn reconcile(&self) {
        if let Err(e) = self.scheduler.reload_from_store().await {
            warn!("Timer reconciliation after admin write failed: {}", e);
        }
    }
}

/// Validate a domain list for a forwarding rule
///
/// Entries are trimmed; empty entries are rejected like any other invalid one.
pub fn validate_rule_domains(domains: Vec<String>) -> Result<Vec<String>> {
    if domains.len() > MAX_RULE_DOMAINS {
        return Err(Error::invalid_input(format!(
            "too many domains: {} (maximum {})",
            domains.len(),
            MAX_RULE_DOMAINS
        )));
    }

    let domains: Vec<String> = domains.into_iter().map(|d| d.trim().to_string()).collect();
    let invalid: Vec<&str> = domains
        .iter()
        .map(String::as_str)
        .filter(|d| !is_valid_hostname(d))
        .collect();

    if !invalid.is_empty() {
        return Err(Error::invalid_input(format!(
            "invalid domains: {}",
            invalid.join(", ")
        )));
    }

    Ok(domains)
}
