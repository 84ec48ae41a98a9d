// # nyansync-core
//
// Core library for panel-driven DNS synchronization.
//
// ## Architecture Overview
//
// For every configured job the engine periodically logs in to a forwarding
// panel, reads the account state, derives the address of the primary inbound
// device group, keeps a DNS A record pointed at it and notifies an operator
// when the record changed.
//
// - **AccountClient**: Trait for reading account state from the panel
// - **DnsProvider**: Trait for reading and updating A records
// - **Notifier**: Trait for best-effort change notifications
// - **ConfigStore**: Trait for the durable job/settings snapshot
// - **JobExecutor**: Executes one run of one job
// - **Scheduler**: Per-job timers, on-demand triggers, per-job mutual exclusion
// - **AdminService**: Job CRUD, masking, whole-config writes, rule domains
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from HTTP implementations
// 2. **Injected Store**: The config store is passed in, never ambient state
// 3. **Failures Are Data**: Run failures end up in the job's log, not in the process
// 4. **Library-First**: The daemon is a thin wiring layer over this crate

pub mod admin;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod scheduler;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use admin::{AdminService, ConfigUpdate};
pub use config::{EngineConfig, ExecutorConfig, SchedulerConfig};
pub use error::{ClientError, Error, Result, RunFailure};
pub use executor::{Collaborators, DnsOutcome, JobExecutor, JobRunner, NotifyOutcome, RunReport, RunStatus};
pub use model::{Job, JobDefinition, JobId, Secret, Snapshot};
pub use scheduler::{JobState, ReconcileReport, Scheduler, TriggerOutcome};
pub use state::{FileConfigStore, MemoryConfigStore};
pub use traits::{AccountClient, ConfigStore, DnsProvider, Notifier};
