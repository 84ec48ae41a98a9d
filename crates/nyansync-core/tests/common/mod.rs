//! Test doubles and common utilities for contract tests
//!
//! The doubles implement both the collaborator traits and their factories, and
//! share their counters across every client they create, so a test can keep a
//! handle while the executor builds its own per-run instances.

#![allow(dead_code)]

use async_trait::async_trait;
use nyansync_core::config::{ExecutorConfig, SchedulerConfig};
use nyansync_core::error::{ClientError, Result};
use nyansync_core::executor::{Collaborators, JobExecutor, JobRunner, RunReport, RunStatus};
use nyansync_core::model::{JobDefinition, JobId, Secret, Snapshot};
use nyansync_core::scheduler::Scheduler;
use nyansync_core::state::MemoryConfigStore;
use nyansync_core::traits::{
    AccountClient, AccountClientFactory, ConfigStore, DeviceGroup, DnsProvider,
    DnsProviderFactory, Mutation, NotificationMessage, Notifier, NotifierFactory, RecordMetadata,
    RemoteForwardRule, SessionToken, TrafficStatistic, UserInfo,
};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const RECORD_NAME: &str = "edge.example.com";

/// A pause point inside a mock call
///
/// The call signals `entered`, then waits for `release`.
#[derive(Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    /// Wait until a call reached the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let the waiting call continue
    pub fn open(&self) {
        self.release.notify_one();
    }

    /// Signal arrival and wait to be released
    pub async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
struct PanelState {
    groups: Mutex<Vec<DeviceGroup>>,
    rules: Mutex<Vec<RemoteForwardRule>>,
    failures: Mutex<HashMap<&'static str, ClientError>>,
    hang: Mutex<Option<&'static str>>,
    gates: Mutex<HashMap<&'static str, Gate>>,
    calls: Mutex<Vec<&'static str>>,
    logins: AtomicUsize,
    logouts: AtomicUsize,
}

/// A scripted forwarding panel
///
/// Steps are named `login`, `device_groups`, `user_info`, `traffic_statistic`,
/// `forward_rules` and `logout`.
#[derive(Clone, Default)]
pub struct MockPanel {
    state: Arc<PanelState>,
}

impl MockPanel {
    /// A panel whose primary inbound group (id 1) connects to `ip`
    pub fn with_primary_ip(ip: &str) -> Self {
        let panel = Self::default();
        panel.set_groups(vec![
            device_group(1, "HK Inbound", Some(&format!("hk.example.net, {}", ip))),
            device_group(2, "JP Outbound", Some("9.9.9.9")),
        ]);
        panel.set_rules(vec![forward_rule(42, Some(1))]);
        panel
    }

    pub fn set_groups(&self, groups: Vec<DeviceGroup>) {
        *self.state.groups.lock().unwrap() = groups;
    }

    pub fn set_rules(&self, rules: Vec<RemoteForwardRule>) {
        *self.state.rules.lock().unwrap() = rules;
    }

    /// Make a step fail with `err`
    pub fn fail(&self, step: &'static str, err: ClientError) {
        self.state.failures.lock().unwrap().insert(step, err);
    }

    /// Make a step never answer
    pub fn hang_on(&self, step: &'static str) {
        *self.state.hang.lock().unwrap() = Some(step);
    }

    /// Pause a step until the returned gate is opened
    pub fn gate(&self, step: &'static str) -> Gate {
        let gate = Gate::default();
        self.state.gates.lock().unwrap().insert(step, gate.clone());
        gate
    }

    pub fn login_count(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.state.logouts.load(Ordering::SeqCst)
    }

    /// Steps called so far, in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.calls.lock().unwrap().clone()
    }

    async fn step(&self, step: &'static str) -> std::result::Result<(), ClientError> {
        self.state.calls.lock().unwrap().push(step);

        let gate = self.state.gates.lock().unwrap().remove(step);
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let hang = *self.state.hang.lock().unwrap() == Some(step);
        if hang {
            std::future::pending::<()>().await;
        }

        match self.state.failures.lock().unwrap().get(step) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AccountClient for MockPanel {
    async fn login(
        &self,
        _username: &str,
        _password: &str,
    ) -> std::result::Result<SessionToken, ClientError> {
        self.state.logins.fetch_add(1, Ordering::SeqCst);
        self.step("login").await?;
        Ok(SessionToken::new("session"))
    }

    async fn device_groups(
        &self,
        _session: &SessionToken,
    ) -> std::result::Result<Vec<DeviceGroup>, ClientError> {
        self.step("device_groups").await?;
        Ok(self.state.groups.lock().unwrap().clone())
    }

    async fn user_info(&self, _session: &SessionToken) -> std::result::Result<UserInfo, ClientError> {
        self.step("user_info").await?;
        Ok(UserInfo {
            username: Some("alice".to_string()),
            plan_name: Some("Pro".to_string()),
            traffic_used: 1024.0 * 1024.0 * 1024.0,
            traffic_enable: Some(100.0 * 1024.0 * 1024.0 * 1024.0),
            max_rules: 20,
            ..UserInfo::default()
        })
    }

    async fn traffic_statistic(
        &self,
        _session: &SessionToken,
    ) -> std::result::Result<TrafficStatistic, ClientError> {
        self.step("traffic_statistic").await?;
        Ok(TrafficStatistic {
            traffic_today: 2048.0,
            traffic_yesterday: 3.0 * 1024.0 * 1024.0,
        })
    }

    async fn forward_rules(
        &self,
        _session: &SessionToken,
    ) -> std::result::Result<Vec<RemoteForwardRule>, ClientError> {
        self.step("forward_rules").await?;
        Ok(self.state.rules.lock().unwrap().clone())
    }

    async fn logout(&self, _session: &SessionToken) -> std::result::Result<(), ClientError> {
        self.state.logouts.fetch_add(1, Ordering::SeqCst);
        self.step("logout").await
    }

    fn host(&self) -> &str {
        "https://panel.example.com"
    }
}

impl AccountClientFactory for MockPanel {
    fn create(&self, _provider_host: &str) -> Result<Box<dyn AccountClient>> {
        Ok(Box::new(self.clone()))
    }
}

#[derive(Default)]
struct DnsState {
    record: Mutex<Option<RecordMetadata>>,
    failures: Mutex<HashMap<&'static str, ClientError>>,
    lookups: AtomicUsize,
    updates: Mutex<Vec<(String, Ipv4Addr, u32)>>,
}

/// A DNS provider holding a single A record
///
/// Updates change the held record, so a second run sees the new content.
#[derive(Clone, Default)]
pub struct MockDns {
    state: Arc<DnsState>,
}

impl MockDns {
    /// A provider whose record `RECORD_NAME` points to `content`
    pub fn with_record(content: &str) -> Self {
        let dns = Self::default();
        *dns.state.record.lock().unwrap() = Some(RecordMetadata {
            id: "rec-1".to_string(),
            name: RECORD_NAME.to_string(),
            content: content.to_string(),
            ttl: Some(300),
            proxied: false,
        });
        dns
    }

    /// A provider without the record
    pub fn without_record() -> Self {
        Self::default()
    }

    /// Make a step (`find_zone`, `get_record`, `update_record`) fail
    pub fn fail(&self, step: &'static str, err: ClientError) {
        self.state.failures.lock().unwrap().insert(step, err);
    }

    pub fn update_count(&self) -> usize {
        self.state.updates.lock().unwrap().len()
    }

    pub fn updates(&self) -> Vec<(String, Ipv4Addr, u32)> {
        self.state.updates.lock().unwrap().clone()
    }

    pub fn lookup_count(&self) -> usize {
        self.state.lookups.load(Ordering::SeqCst)
    }

    pub fn content(&self) -> Option<String> {
        self.state.record.lock().unwrap().as_ref().map(|r| r.content.clone())
    }

    fn check(&self, step: &'static str) -> std::result::Result<(), ClientError> {
        match self.state.failures.lock().unwrap().get(step) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DnsProvider for MockDns {
    async fn find_zone(&self, _record_name: &str) -> std::result::Result<String, ClientError> {
        self.state.lookups.fetch_add(1, Ordering::SeqCst);
        self.check("find_zone")?;
        Ok("zone-1".to_string())
    }

    async fn get_record(
        &self,
        _zone_id: &str,
        record_name: &str,
    ) -> std::result::Result<Option<RecordMetadata>, ClientError> {
        self.check("get_record")?;
        Ok(self
            .state
            .record
            .lock()
            .unwrap()
            .clone()
            .filter(|r| r.name == record_name))
    }

    async fn update_record(
        &self,
        _zone_id: &str,
        record: &RecordMetadata,
        new_ip: Ipv4Addr,
        ttl: u32,
    ) -> std::result::Result<(), ClientError> {
        self.check("update_record")?;
        self.state
            .updates
            .lock()
            .unwrap()
            .push((record.name.clone(), new_ip, ttl));
        if let Some(stored) = self.state.record.lock().unwrap().as_mut() {
            stored.content = new_ip.to_string();
            stored.ttl = Some(ttl);
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "mock-dns"
    }
}

impl DnsProviderFactory for MockDns {
    fn create(&self, _api_token: &str) -> Result<Box<dyn DnsProvider>> {
        Ok(Box::new(self.clone()))
    }
}

#[derive(Default)]
struct NotifierState {
    sent: Mutex<Vec<NotificationMessage>>,
    failure: Mutex<Option<ClientError>>,
    attempts: AtomicUsize,
}

/// A notifier that records every message
#[derive(Clone, Default)]
pub struct MockNotifier {
    state: Arc<NotifierState>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail
    pub fn failing(err: ClientError) -> Self {
        let notifier = Self::default();
        *notifier.state.failure.lock().unwrap() = Some(err);
        notifier
    }

    pub fn sent(&self) -> Vec<NotificationMessage> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, message: &NotificationMessage) -> std::result::Result<(), ClientError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.state.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn channel_name(&self) -> &'static str {
        "mock"
    }
}

impl NotifierFactory for MockNotifier {
    fn create(&self, _token: &str, _target: &str) -> Result<Box<dyn Notifier>> {
        Ok(Box::new(self.clone()))
    }
}

/// Everything an executor test needs
pub struct Harness {
    pub store: Arc<MemoryConfigStore>,
    pub panel: MockPanel,
    pub dns: MockDns,
    pub notifier: MockNotifier,
    pub executor: JobExecutor,
}

impl Harness {
    pub fn new(panel: MockPanel, dns: MockDns, notifier: MockNotifier) -> Self {
        Self::with_config(panel, dns, notifier, ExecutorConfig::default())
    }

    pub fn with_config(
        panel: MockPanel,
        dns: MockDns,
        notifier: MockNotifier,
        config: ExecutorConfig,
    ) -> Self {
        let store = Arc::new(MemoryConfigStore::new());
        let clients = Collaborators {
            accounts: Arc::new(panel.clone()),
            dns: Arc::new(dns.clone()),
            notifier: Arc::new(notifier.clone()),
        };
        let executor = JobExecutor::new(store.clone(), clients, config)
            .expect("executor config is valid");

        Self {
            store,
            panel,
            dns,
            notifier,
            executor,
        }
    }

    pub async fn add_job(&self, job_id: &str, definition: JobDefinition) {
        self.store
            .insert_job(job_id, definition.into_job(None))
            .await
            .expect("insert succeeds");
    }
}

/// A job definition with DNS sync and notifications configured
pub fn full_definition() -> JobDefinition {
    let mut definition = JobDefinition::new("alice", "hunter2", "https://panel.example.com");
    definition.dns_token = Some(Secret::new("cf-token"));
    definition.domain = Some(RECORD_NAME.to_string());
    definition.notifier_token = Some(Secret::new("bot-token"));
    definition.notifier_target = Some("1234".to_string());
    definition
}

/// A job definition with the given schedule and no DNS sync
pub fn scheduled_definition(enabled: bool, interval_minutes: u32) -> JobDefinition {
    let mut definition = JobDefinition::new("alice", "hunter2", "https://panel.example.com");
    definition.enabled = enabled;
    definition.interval_minutes = interval_minutes;
    definition
}

pub fn device_group(id: i64, name: &str, connect_host: Option<&str>) -> DeviceGroup {
    DeviceGroup {
        id,
        name: Some(name.to_string()),
        connect_host: connect_host.map(str::to_string),
        extra: Default::default(),
    }
}

pub fn forward_rule(id: i64, device_group_in: Option<i64>) -> RemoteForwardRule {
    RemoteForwardRule {
        id,
        name: format!("rule-{}", id),
        listen_port: 10000 + id,
        dest: Some(vec!["10.0.0.1:22".to_string()]),
        status: 0,
        traffic_used: 0.0,
        updated_at: "2025-01-01 00:00:00".to_string(),
        device_group_in,
    }
}

pub fn log_contains(report: &RunReport, needle: &str) -> bool {
    report.log.iter().any(|line| line.contains(needle))
}

/// A runner that sleeps instead of syncing and records concurrency
#[derive(Clone, Default)]
pub struct MockRunner {
    delay: Duration,
    started: Arc<Mutex<Vec<JobId>>>,
    active: Arc<Mutex<HashMap<JobId, usize>>>,
    active_total: Arc<AtomicUsize>,
    max_total: Arc<AtomicUsize>,
    max_per_job: Arc<AtomicUsize>,
}

impl MockRunner {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Total runs started
    pub fn run_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    /// Job ids in the order their runs started
    pub fn started(&self) -> Vec<JobId> {
        self.started.lock().unwrap().clone()
    }

    /// Runs started for one job
    pub fn runs_of(&self, job_id: &str) -> usize {
        self.started
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == job_id)
            .count()
    }

    /// Highest number of runs executing at once, across all jobs
    pub fn max_concurrent(&self) -> usize {
        self.max_total.load(Ordering::SeqCst)
    }

    /// Highest number of runs executing at once for a single job
    pub fn max_concurrent_per_job(&self) -> usize {
        self.max_per_job.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for MockRunner {
    async fn run(&self, job_id: &str) -> Result<RunReport> {
        self.started.lock().unwrap().push(job_id.to_string());
        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(job_id.to_string()).or_insert(0);
            *count += 1;
            self.max_per_job.fetch_max(*count, Ordering::SeqCst);
        }
        let total = self.active_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_total.fetch_max(total, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.active_total.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.active.lock().unwrap().get_mut(job_id) {
            *count -= 1;
        }

        Ok(RunReport {
            job_id: job_id.to_string(),
            status: RunStatus::Succeeded,
            dns: nyansync_core::DnsOutcome::NotConfigured,
            notify: nyansync_core::NotifyOutcome::NotAttempted,
            log: Vec::new(),
        })
    }
}

/// A store whose next `snapshot()` reads, then pauses at a gate before returning
#[derive(Clone)]
pub struct StallingStore {
    inner: Arc<MemoryConfigStore>,
    gate: Arc<Mutex<Option<Gate>>>,
}

impl StallingStore {
    pub fn new(inner: Arc<MemoryConfigStore>) -> Self {
        Self {
            inner,
            gate: Arc::new(Mutex::new(None)),
        }
    }

    /// Pause the next snapshot read after it has read the store
    pub fn stall_next_snapshot(&self) -> Gate {
        let gate = Gate::default();
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl ConfigStore for StallingStore {
    async fn snapshot(&self) -> Result<Snapshot> {
        let snapshot = self.inner.snapshot().await?;
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(snapshot)
    }

    async fn modify(&self, mutation: Mutation) -> Result<Snapshot> {
        self.inner.modify(mutation).await
    }
}

/// A store seeded with jobs and a scheduler driving `runner`
pub async fn scheduler_with_jobs(
    runner: MockRunner,
    pool_size: usize,
    jobs: &[(&str, JobDefinition)],
) -> (Scheduler, Arc<MemoryConfigStore>) {
    let store = Arc::new(MemoryConfigStore::new());
    for (job_id, definition) in jobs {
        store
            .insert_job(job_id, definition.clone().into_job(None))
            .await
            .expect("insert succeeds");
    }

    let config = SchedulerConfig {
        pool_size,
        ..SchedulerConfig::default()
    };
    let scheduler =
        Scheduler::new(Arc::new(runner), store.clone(), &config).expect("scheduler config is valid");
    (scheduler, store)
}

/// Wait until no run is active (paused-time friendly)
pub async fn wait_idle(scheduler: &Scheduler) {
    for _ in 0..10_000 {
        if scheduler.active_runs() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("scheduler did not become idle");
}
