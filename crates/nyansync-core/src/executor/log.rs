//! Per-run log buffer
//!
//! Lines are prefixed with `[YYYY-MM-DD HH:MM:SS]` in the configured timezone,
//! kept in a bounded buffer (oldest dropped) and mirrored to `tracing`.

use jiff::Timestamp;
use jiff::tz::TimeZone;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct RunLog {
    job_id: String,
    tz: TimeZone,
    capacity: usize,
    lines: VecDeque<String>,
}

impl RunLog {
    pub fn new(job_id: impl Into<String>, tz: TimeZone, capacity: usize) -> Self {
        Self {
            job_id: job_id.into(),
            tz,
            capacity: capacity.max(1),
            lines: VecDeque::new(),
        }
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(job_id = %self.job_id, "{}", message);
        self.push(message);
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!(job_id = %self.job_id, "{}", message);
        self.push(message);
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!(job_id = %self.job_id, "{}", message);
        self.push(message);
    }

    pub fn timezone(&self) -> &TimeZone {
        &self.tz
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    fn push(&mut self, message: &str) {
        let now = Timestamp::now().to_zoned(self.tz.clone());
        let line = format!("[{}] {}", now.strftime("%Y-%m-%d %H:%M:%S"), message);

        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}
