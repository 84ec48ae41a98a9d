//! Job id allocation
//!
//! Ids are the creation time in epoch milliseconds, bumped by one when two
//! jobs are created within the same millisecond.

use crate::model::JobId;
use jiff::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct JobIdGenerator {
    last: AtomicU64,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id; strictly greater than every id handed out before
    pub fn next_id(&self) -> JobId {
        let now = u64::try_from(Timestamp::now().as_millisecond()).unwrap_or(0);
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1).to_string()
    }
}
