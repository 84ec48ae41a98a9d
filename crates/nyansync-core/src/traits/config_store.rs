// # Config Store Trait
//
// Defines the interface for the durable job/settings snapshot.
//
// ## Purpose
//
// The config store is the only shared mutable resource of the engine. The
// scheduler reads it on every reconciliation, the executor reads a job at the
// start of each run and writes its results back, and the admin surface writes
// definitions. Every write is a single read-modify-write under the store's
// lock, so a run's result write never clobbers a concurrent definition edit.
//
// ## Implementations
//
// - File-based: JSON file with atomic replace and `.backup` recovery
// - In-memory: tests and ephemeral deployments

use crate::error::{Error, Result};
use crate::model::{Job, JobPatch, Snapshot};
use async_trait::async_trait;

/// A mutation applied to the latest snapshot under the store's lock
///
/// Returning `Err` aborts the write; the stored snapshot stays untouched.
pub type Mutation = Box<dyn FnOnce(&mut Snapshot) -> Result<()> + Send + 'static>;

/// Trait for config store implementations
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage
/// - ✅ Serialize writers with a lock
///
/// ## Forbidden Capabilities
/// - ❌ Spawn background tasks
/// - ❌ Interpret job semantics beyond applying mutations
///
/// ## Implementation Guidelines
///
/// - **Atomic**: a mutation is either fully persisted or not visible at all
/// - **Serialized**: concurrent `modify` calls must not interleave
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the latest snapshot
    async fn snapshot(&self) -> Result<Snapshot>;

    /// Apply a mutation atomically and persist the result
    ///
    /// # Returns
    ///
    /// - `Ok(Snapshot)`: The snapshot after the mutation
    /// - `Err(Error)`: The mutation failed or the write failed; nothing changed
    async fn modify(&self, mutation: Mutation) -> Result<Snapshot>;

    /// Read a single job
    async fn job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.snapshot().await?.jobs.remove(job_id))
    }

    /// Apply a keyed patch to one job
    ///
    /// # Returns
    ///
    /// - `Ok(Job)`: The job after the patch
    /// - `Err(Error::NotFound)`: The job does not exist; nothing is created
    async fn update_job(&self, job_id: &str, patch: JobPatch) -> Result<Job> {
        let id = job_id.to_string();
        let mut snapshot = self
            .modify(Box::new(move |snapshot| {
                let job = snapshot
                    .jobs
                    .get_mut(&id)
                    .ok_or_else(|| Error::not_found(format!("job {}", id)))?;
                patch.apply(job);
                Ok(())
            }))
            .await?;

        snapshot
            .jobs
            .remove(job_id)
            .ok_or_else(|| Error::not_found(format!("job {}", job_id)))
    }

    /// Insert a new job
    ///
    /// Fails with `InvalidInput` if the id is already taken.
    async fn insert_job(&self, job_id: &str, job: Job) -> Result<()> {
        let id = job_id.to_string();
        self.modify(Box::new(move |snapshot| {
            if snapshot.jobs.contains_key(&id) {
                return Err(Error::invalid_input(format!("job {} already exists", id)));
            }
            snapshot.jobs.insert(id, job);
            Ok(())
        }))
        .await?;
        Ok(())
    }

    /// Remove a job
    ///
    /// # Returns
    ///
    /// - `Ok(Job)`: The removed job
    /// - `Err(Error::NotFound)`: No such job
    async fn remove_job(&self, job_id: &str) -> Result<Job> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let id = job_id.to_string();
        self.modify(Box::new(move |snapshot| {
            let job = snapshot
                .jobs
                .remove(&id)
                .ok_or_else(|| Error::not_found(format!("job {}", id)))?;
            let _ = tx.send(job);
            Ok(())
        }))
        .await?;

        rx.await
            .map_err(|_| Error::store(format!("job {} removal was not recorded", job_id)))
    }
}
