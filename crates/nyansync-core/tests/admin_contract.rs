//! Contract Test: Administrative Surface
//!
//! Constraints verified:
//! - Reads never expose secrets
//! - Masked secrets written back keep their stored values
//! - Every job-set change is reflected in the armed timers
//! - Whole-config writes keep rule domains and run results of surviving jobs
//! - Invalid input is rejected before anything is written

mod common;

use common::*;
use nyansync_core::admin::{AuthUpdate, ConfigUpdate};
use nyansync_core::error::Error;
use nyansync_core::model::{JobPatch, MASK_PLACEHOLDER, RunRecord, Secret};
use nyansync_core::traits::ConfigStore;
use nyansync_core::{AdminService, MemoryConfigStore, Scheduler, SchedulerConfig};
use std::collections::BTreeMap;
use std::sync::Arc;

struct Admin {
    service: AdminService,
    scheduler: Scheduler,
    store: Arc<MemoryConfigStore>,
    runner: MockRunner,
}

impl Admin {
    fn new() -> Self {
        let store = Arc::new(MemoryConfigStore::new());
        let runner = MockRunner::default();
        let scheduler = Scheduler::new(
            Arc::new(runner.clone()),
            store.clone(),
            &SchedulerConfig::default(),
        )
        .unwrap();
        let service = AdminService::new(store.clone(), scheduler.clone());
        Self {
            service,
            scheduler,
            store,
            runner,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn created_job_is_read_back_masked() {
    let admin = Admin::new();

    let job_id = admin.service.create_job(full_definition()).await.unwrap();
    let job = admin.service.job(&job_id).await.unwrap();

    assert_eq!(job.credentials.username, "alice");
    assert_eq!(job.credentials.password.expose(), MASK_PLACEHOLDER);
    assert_eq!(job.dns_token.as_ref().unwrap().expose(), MASK_PLACEHOLDER);
    assert_eq!(job.notifier_token.as_ref().unwrap().expose(), MASK_PLACEHOLDER);
    assert_eq!(job.provider_host, "https://panel.example.com");

    let stored = admin.store.job(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.credentials.password.expose(), "hunter2");
    assert_eq!(stored.dns_token.as_ref().unwrap().expose(), "cf-token");

    let snapshot = admin.service.masked_snapshot().await.unwrap();
    let serialized = serde_json::to_string(&snapshot).unwrap();
    assert!(!serialized.contains("hunter2"));
    assert!(!serialized.contains("cf-token"));
    assert!(!serialized.contains("bot-token"));
}

#[tokio::test(start_paused = true)]
async fn created_jobs_get_distinct_ids_and_timers() {
    let admin = Admin::new();

    let first = admin.service.create_job(full_definition()).await.unwrap();
    let second = admin.service.create_job(full_definition()).await.unwrap();
    assert_ne!(first, second);

    let timers = admin.scheduler.timers().await;
    assert_eq!(timers.len(), 2);
    assert_eq!(timers[&first].interval_minutes, 15);
}

#[tokio::test(start_paused = true)]
async fn disabled_job_gets_no_timer() {
    let admin = Admin::new();

    let job_id = admin
        .service
        .create_job(scheduled_definition(false, 10))
        .await
        .unwrap();

    assert!(admin.scheduler.timers().await.is_empty());
    assert!(admin.store.job(&job_id).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn invalid_definition_is_rejected_before_writing() {
    let admin = Admin::new();

    let mut definition = full_definition();
    definition.provider_host = "panel.example.com".into();
    let err = admin.service.create_job(definition).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let mut definition = full_definition();
    definition.username = "  ".into();
    assert!(admin.service.create_job(definition).await.is_err());

    assert!(admin.store.snapshot().await.unwrap().jobs.is_empty());
    assert_eq!(admin.store.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn update_with_masked_secrets_keeps_stored_values() {
    let admin = Admin::new();
    let job_id = admin.service.create_job(full_definition()).await.unwrap();

    let mut definition = full_definition();
    definition.password = Some(Secret::placeholder());
    definition.dns_token = Some(Secret::placeholder());
    definition.notifier_token = None;
    definition.interval_minutes = 30;

    let masked = admin.service.update_job(&job_id, definition).await.unwrap();
    assert_eq!(masked.credentials.password.expose(), MASK_PLACEHOLDER);
    assert_eq!(masked.interval_minutes, 30);

    let stored = admin.store.job(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.credentials.password.expose(), "hunter2");
    assert_eq!(stored.dns_token.as_ref().unwrap().expose(), "cf-token");
    assert_eq!(stored.notifier_token.as_ref().unwrap().expose(), "bot-token");

    assert_eq!(admin.scheduler.timers().await[&job_id].interval_minutes, 30);
}

#[tokio::test(start_paused = true)]
async fn update_with_empty_secret_clears_it() {
    let admin = Admin::new();
    let job_id = admin.service.create_job(full_definition()).await.unwrap();

    let mut definition = full_definition();
    definition.notifier_token = Some(Secret::new(""));
    admin.service.update_job(&job_id, definition).await.unwrap();

    let stored = admin.store.job(&job_id).await.unwrap().unwrap();
    assert!(stored.notifier_token.is_none());
    assert!(stored.notifier_target().is_none());
}

#[tokio::test(start_paused = true)]
async fn update_unknown_job_is_not_found() {
    let admin = Admin::new();

    let err = admin
        .service
        .update_job("404", full_definition())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(admin.store.snapshot().await.unwrap().jobs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn update_keeps_rule_domains_and_results() {
    let admin = Admin::new();
    let job_id = admin.service.create_job(full_definition()).await.unwrap();

    admin
        .service
        .set_rule_domains(&job_id, "42", vec!["a.example.com".into()])
        .await
        .unwrap();
    admin
        .store
        .update_job(
            &job_id,
            JobPatch::RunResults(RunRecord {
                account: None,
                last_log: vec!["done".into()],
                last_run: jiff::Timestamp::UNIX_EPOCH,
            }),
        )
        .await
        .unwrap();

    admin
        .service
        .update_job(&job_id, scheduled_definition(true, 5))
        .await
        .unwrap();

    let stored = admin.store.job(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.rule_domains["42"], vec!["a.example.com".to_string()]);
    assert_eq!(stored.results.last_log, vec!["done".to_string()]);
    assert!(stored.results.last_run.is_some());
}

#[tokio::test(start_paused = true)]
async fn delete_stops_timer() {
    let admin = Admin::new();
    let job_id = admin.service.create_job(full_definition()).await.unwrap();
    assert_eq!(admin.scheduler.timers().await.len(), 1);

    admin.service.delete_job(&job_id).await.unwrap();

    assert!(admin.scheduler.timers().await.is_empty());
    assert!(admin.store.job(&job_id).await.unwrap().is_none());
    assert!(admin.service.delete_job(&job_id).await.unwrap_err().is_not_found());
    assert!(admin.service.job(&job_id).await.unwrap_err().is_not_found());

    // Nothing fires for the deleted job
    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
    assert_eq!(admin.runner.run_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn apply_config_replaces_job_set() {
    let admin = Admin::new();
    let kept = admin.service.create_job(full_definition()).await.unwrap();
    let dropped = admin.service.create_job(full_definition()).await.unwrap();
    admin
        .service
        .set_rule_domains(&kept, "7", vec!["r.example.com".into()])
        .await
        .unwrap();

    let mut edited = full_definition();
    edited.password = Some(Secret::placeholder());
    edited.interval_minutes = 60;

    let mut jobs = BTreeMap::new();
    jobs.insert(kept.clone(), edited);
    jobs.insert("900".to_string(), scheduled_definition(true, 5));

    let snapshot = admin
        .service
        .apply_config(ConfigUpdate {
            auth: Some(AuthUpdate {
                username: "root".into(),
                password: Some(Secret::new("s3cret")),
            }),
            timezone: Some("Europe/Berlin".into()),
            jobs: Some(jobs),
        })
        .await
        .unwrap();

    assert_eq!(snapshot.settings.auth.password.expose(), MASK_PLACEHOLDER);
    assert!(!snapshot.jobs.contains_key(&dropped));

    let stored = admin.store.snapshot().await.unwrap();
    assert_eq!(stored.settings.auth.username, "root");
    assert_eq!(stored.settings.auth.password.expose(), "s3cret");
    assert_eq!(stored.settings.timezone, "Europe/Berlin");
    assert_eq!(stored.jobs.len(), 2);
    let job = &stored.jobs[&kept];
    assert_eq!(job.credentials.password.expose(), "hunter2");
    assert_eq!(job.interval_minutes, 60);
    assert_eq!(job.rule_domains["7"], vec!["r.example.com".to_string()]);

    let timers = admin.scheduler.timers().await;
    assert_eq!(timers.len(), 2);
    assert!(timers.values().all(|spec| spec.timezone == "Europe/Berlin"));
    assert_eq!(timers[&kept].interval_minutes, 60);
    assert!(!timers.contains_key(&dropped));
}

#[tokio::test(start_paused = true)]
async fn apply_config_without_jobs_leaves_them_alone() {
    let admin = Admin::new();
    let job_id = admin.service.create_job(full_definition()).await.unwrap();

    admin
        .service
        .apply_config(ConfigUpdate {
            auth: Some(AuthUpdate {
                username: "root".into(),
                password: None,
            }),
            ..ConfigUpdate::default()
        })
        .await
        .unwrap();

    let stored = admin.store.snapshot().await.unwrap();
    assert!(stored.jobs.contains_key(&job_id));
    assert_eq!(stored.settings.auth.username, "root");
}

#[tokio::test(start_paused = true)]
async fn invalid_timezone_is_rejected() {
    let admin = Admin::new();
    admin.service.create_job(full_definition()).await.unwrap();
    let writes = admin.store.write_count();

    let err = admin.service.set_timezone("Mars/Olympus").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = admin
        .service
        .apply_config(ConfigUpdate {
            timezone: Some("Not/AZone".into()),
            ..ConfigUpdate::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    assert_eq!(admin.store.write_count(), writes);
    assert_eq!(
        admin.store.snapshot().await.unwrap().settings.timezone,
        "Asia/Shanghai"
    );
}

#[tokio::test(start_paused = true)]
async fn set_timezone_restarts_timers() {
    let admin = Admin::new();
    let job_id = admin.service.create_job(full_definition()).await.unwrap();

    admin.service.set_timezone("UTC").await.unwrap();

    assert_eq!(admin.scheduler.timers().await[&job_id].timezone, "UTC");
}

#[tokio::test(start_paused = true)]
async fn rule_domain_lifecycle() {
    let admin = Admin::new();
    let job_id = admin.service.create_job(full_definition()).await.unwrap();

    assert!(admin.service.rule_domains(&job_id, "42").await.unwrap().is_empty());

    let saved = admin
        .service
        .set_rule_domains(
            &job_id,
            "42",
            vec![" a.example.com".into(), "b.example.org ".into()],
        )
        .await
        .unwrap();
    assert_eq!(
        saved,
        vec!["a.example.com".to_string(), "b.example.org".to_string()]
    );
    assert_eq!(admin.service.rule_domains(&job_id, "42").await.unwrap(), saved);

    let err = admin
        .service
        .set_rule_domains(&job_id, "42", vec!["ok.example.com".into(), "not a domain".into()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not a domain"));
    assert_eq!(admin.service.rule_domains(&job_id, "42").await.unwrap(), saved);

    admin.service.clear_rule_domains(&job_id, "42").await.unwrap();
    assert!(admin.service.rule_domains(&job_id, "42").await.unwrap().is_empty());

    assert!(
        admin
            .service
            .rule_domains("404", "42")
            .await
            .unwrap_err()
            .is_not_found()
    );
    assert!(
        admin
            .service
            .set_rule_domains("404", "42", vec!["a.example.com".into()])
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test(start_paused = true)]
async fn trigger_goes_through_scheduler() {
    let admin = Admin::new();
    let job_id = admin.service.create_job(full_definition()).await.unwrap();

    admin.service.trigger(&job_id).await.unwrap();
    wait_idle(&admin.scheduler).await;

    assert_eq!(admin.runner.runs_of(&job_id), 1);
    assert!(admin.service.trigger("404").await.unwrap_err().is_not_found());
}
