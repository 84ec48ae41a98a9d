// # DNS Provider Trait
//
// Defines the interface for reading and updating A records via provider APIs.
//
// ## Implementations
//
// - Cloudflare: `nyansync-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use nyansync_core::DnsProvider;
//
// async fn example(provider: &dyn DnsProvider) -> Result<(), nyansync_core::ClientError> {
//     let zone_id = provider.find_zone("edge.example.com").await?;
//     if let Some(record) = provider.get_record(&zone_id, "edge.example.com").await? {
//         provider
//             .update_record(&zone_id, &record, "5.6.7.8".parse().unwrap(), 120)
//             .await?;
//     }
//     Ok(())
// }
// ```

use crate::error::ClientError;
use async_trait::async_trait;
use std::net::Ipv4Addr;

/// Metadata about an existing A record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// The record ID (provider-specific)
    pub id: String,
    /// The record name
    pub name: String,
    /// The current record content, as stored by the provider
    pub content: String,
    /// Time-to-live for the record
    pub ttl: Option<u32>,
    /// Whether the provider proxies traffic for this record
    pub proxied: bool,
}

impl RecordMetadata {
    /// Current content parsed as an IPv4 address, if it is one
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.content.trim().parse().ok()
    }
}

/// Trait for DNS provider implementations
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their endpoints only
/// - ✅ Parse provider-specific responses
/// - ✅ Return success or failure
///
/// ## Forbidden Capabilities
/// - ❌ Spawn tasks or threads
/// - ❌ Implement retry logic or backoff
/// - ❌ Access the config store
/// - ❌ Decide whether an update is needed (owned by the executor)
/// - ❌ Create records that do not exist
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Find the zone that owns a record name
    ///
    /// # Returns
    ///
    /// - `Ok(zone_id)`: The provider's zone identifier
    /// - `Err(ClientError::NotFound)`: No zone matches
    async fn find_zone(&self, record_name: &str) -> Result<String, ClientError>;

    /// Read the A record with exactly this name
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))`: The record's current metadata
    /// - `Ok(None)`: No such record
    async fn get_record(
        &self,
        zone_id: &str,
        record_name: &str,
    ) -> Result<Option<RecordMetadata>, ClientError>;

    /// Point an existing record at a new address
    ///
    /// # Parameters
    ///
    /// - `zone_id`: Zone returned by [`DnsProvider::find_zone`]
    /// - `record`: Record returned by [`DnsProvider::get_record`]
    /// - `new_ip`: New content
    /// - `ttl`: TTL to write (seconds)
    async fn update_record(
        &self,
        zone_id: &str,
        record: &RecordMetadata,
        new_ip: Ipv4Addr,
        ttl: u32,
    ) -> Result<(), ClientError>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS providers per job
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider authenticated with the job's API token
    ///
    /// # Returns
    ///
    /// A boxed DnsProvider, or `Error::InvalidInput` for an unusable token
    fn create(&self, api_token: &str) -> Result<Box<dyn DnsProvider>, crate::Error>;
}
