//! Notifier trait
//!
//! Best-effort outbound messages sent after a DNS record changed.
//! Delivery is at most once: the executor never retries a failed send.

use crate::error::ClientError;
use async_trait::async_trait;
use jiff::Zoned;
use std::net::Ipv4Addr;

/// A DNS change worth telling the operator about
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    /// Job that performed the change
    pub job_id: String,
    /// Record that changed
    pub record_name: String,
    /// Content before the update, as stored by the provider
    pub previous: String,
    /// New address
    pub current: Ipv4Addr,
    /// Time of the change in the configured timezone
    pub changed_at: Zoned,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message
    async fn send(&self, message: &NotificationMessage) -> Result<(), ClientError>;

    /// Channel name (for logging)
    fn channel_name(&self) -> &'static str;
}

/// Helper trait for constructing notifiers per job
pub trait NotifierFactory: Send + Sync {
    /// Create a notifier from the job's token and destination
    fn create(&self, token: &str, target: &str) -> Result<Box<dyn Notifier>, crate::Error>;
}
