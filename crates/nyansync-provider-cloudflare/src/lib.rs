// # Cloudflare DNS Provider
//
// Cloudflare implementation of [`DnsProvider`] for nyansync jobs.
//
// - ✅ One HTTP request per trait call (zone discovery may walk parent names)
// - ✅ Typed error propagation ([`ClientError`]); the executor decides what a failure means
// - ✅ HTTP timeout on every request
// - ✅ Dry-run mode for safe testing
// - ❌ NO retry or backoff (a failed run is retried by the next timer tick)
// - ❌ NO record creation (a missing record is reported, never created)
// - ❌ NO caching between calls
//
// ## Trust Level: Untrusted (DNS Provider)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTPS API calls to the Cloudflare API only
// - ✅ Parse Cloudflare responses
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Access the config store
// - ❌ Decide whether a record needs updating (owned by the executor)
//
// ## Security Requirements
//
// - The API token NEVER appears in logs, `Debug` output or error messages
// - A factory refuses an empty token
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=A&name=...`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use nyansync_core::traits::{DnsProvider, DnsProviderFactory, RecordMetadata};
use nyansync_core::{ClientError, Error};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Response envelope shared by every Cloudflare endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    name: String,
    #[serde(default)]
    content: String,
    ttl: Option<u32>,
    #[serde(default)]
    proxied: bool,
}

impl From<DnsRecord> for RecordMetadata {
    fn from(record: DnsRecord) -> Self {
        RecordMetadata {
            id: record.id,
            name: record.name,
            content: record.content,
            ttl: record.ttl,
            proxied: record.proxied,
        }
    }
}

fn describe_errors(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "unknown error".to_string();
    }
    errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Map a transport failure onto a client error
///
/// The URL is stripped so nothing request-specific ends up in logs.
fn transport_error(context: &str, err: reqwest::Error) -> ClientError {
    let err = err.without_url();
    if err.is_timeout() {
        ClientError::Timeout(format!("{}: {}", context, err))
    } else if err.is_decode() {
        ClientError::Malformed(format!("{}: {}", context, err))
    } else {
        ClientError::Unreachable(format!("{}: {}", context, err))
    }
}

/// Candidate zone names for a record, shortest first
///
/// `edge.example.co.uk` yields `co.uk`, `example.co.uk`, `edge.example.co.uk`.
fn zone_candidates(record_name: &str) -> Vec<String> {
    let labels: Vec<&str> = record_name
        .trim()
        .trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .collect();
    if labels.len() < 2 {
        return Vec::new();
    }
    (2..=labels.len())
        .map(|n| labels[labels.len() - n..].join("."))
        .collect()
}

/// Cloudflare DNS provider
///
/// # Trust Level: Untrusted
///
/// Stateless and single-shot: every call is an independent request.
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the provider will:
/// - Perform all GET requests (zone lookup, record lookup)
/// - Log the intended PUT payload
/// - **NOT** modify DNS records
pub struct CloudflareProvider {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// API base URL (overridable for tests)
    api_base: String,

    client: reqwest::Client,

    /// Dry-run mode: if true, perform GET requests but skip PUT updates
    dry_run: bool,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_token", &"<REDACTED>")
            .field("api_base", &self.api_base)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    /// - `dry_run`: If true, perform GET requests but skip PUT updates
    ///
    /// # Returns
    ///
    /// `Error::InvalidInput` for an empty token
    pub fn new(api_token: impl Into<String>, dry_run: bool) -> Result<Self, Error> {
        Self::with_settings(api_token, CLOUDFLARE_API_BASE, DEFAULT_HTTP_TIMEOUT, dry_run)
    }

    /// Create a provider against a specific API base with a request timeout
    pub fn with_settings(
        api_token: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
        dry_run: bool,
    ) -> Result<Self, Error> {
        let api_token = api_token.into().trim().to_string();
        if api_token.is_empty() {
            return Err(Error::invalid_input("Cloudflare API token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client,
            dry_run,
        })
    }

    /// Whether updates are only logged
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Send a request and unwrap the Cloudflare envelope
    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<Option<T>, ClientError> {
        let response = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| transport_error(context, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(context, e))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
                .map(|envelope| describe_errors(&envelope.errors))
                .unwrap_or_else(|_| status.to_string());
            return Err(ClientError::from_status(
                status.as_u16(),
                format!("{}: {}", context, detail),
            ));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| ClientError::Malformed(format!("{}: {}", context, e)))?;

        if !envelope.success {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message: format!("{}: {}", context, describe_errors(&envelope.errors)),
            });
        }

        Ok(envelope.result)
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    /// Find the zone owning `record_name`
    ///
    /// Parent names are tried from the registrable-looking two-label suffix
    /// upward, so `a.example.co.uk` resolves once `example.co.uk` matches.
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /zones?name=example.com
    /// Authorization: Bearer <token>
    /// ```
    async fn find_zone(&self, record_name: &str) -> Result<String, ClientError> {
        let candidates = zone_candidates(record_name);
        if candidates.is_empty() {
            return Err(ClientError::NotFound(format!(
                "no zone can own '{}'",
                record_name
            )));
        }

        for zone_name in &candidates {
            tracing::debug!("Looking up zone ID for {}", zone_name);

            let request = self
                .client
                .get(format!("{}/zones", self.api_base))
                .query(&[("name", zone_name.as_str())]);
            let zones: Vec<Zone> = self
                .call(request, "zone lookup")
                .await?
                .unwrap_or_default();

            if let Some(zone) = zones.into_iter().next() {
                tracing::debug!("Found zone {} ({})", zone_name, zone.id);
                return Ok(zone.id);
            }
        }

        Err(ClientError::NotFound(format!(
            "no Cloudflare zone for '{}'",
            record_name
        )))
    }

    /// # API Call
    ///
    /// ```http
    /// GET /zones/:zone_id/dns_records?type=A&name=edge.example.com
    /// Authorization: Bearer <token>
    /// ```
    async fn get_record(
        &self,
        zone_id: &str,
        record_name: &str,
    ) -> Result<Option<RecordMetadata>, ClientError> {
        tracing::debug!("Looking up A record {}", record_name);

        let request = self
            .client
            .get(format!("{}/zones/{}/dns_records", self.api_base, zone_id))
            .query(&[("type", "A"), ("name", record_name)]);
        let records: Vec<DnsRecord> = self
            .call(request, "record lookup")
            .await?
            .unwrap_or_default();

        Ok(records.into_iter().next().map(RecordMetadata::from))
    }

    /// # API Call
    ///
    /// ```http
    /// PUT /zones/:zone_id/dns_records/:record_id
    /// {"type": "A", "name": "...", "content": "5.6.7.8", "ttl": 120, "proxied": false}
    /// ```
    async fn update_record(
        &self,
        zone_id: &str,
        record: &RecordMetadata,
        new_ip: Ipv4Addr,
        ttl: u32,
    ) -> Result<(), ClientError> {
        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.api_base, zone_id, record.id
        );
        let payload = serde_json::json!({
            "type": "A",
            "name": record.name,
            "content": new_ip.to_string(),
            "ttl": ttl,
            "proxied": false,
        });

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would update {} -> {} (was: {}) with payload: {}",
                record.name,
                new_ip,
                record.content,
                payload
            );
            return Ok(());
        }

        tracing::info!(
            "Updating Cloudflare A record: {} -> {} (was: {})",
            record.name,
            new_ip,
            record.content
        );

        let request = self.client.put(url).json(&payload);
        self.call::<serde_json::Value>(request, "record update")
            .await?;

        tracing::info!("DNS record updated successfully: {} -> {}", record.name, new_ip);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}

/// Factory for creating Cloudflare providers per job
#[derive(Debug, Clone)]
pub struct CloudflareFactory {
    api_base: String,
    timeout: Duration,
    dry_run: bool,
}

impl Default for CloudflareFactory {
    fn default() -> Self {
        Self {
            api_base: CLOUDFLARE_API_BASE.to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
            dry_run: false,
        }
    }
}

impl CloudflareFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, api_token: &str) -> Result<Box<dyn DnsProvider>, Error> {
        Ok(Box::new(CloudflareProvider::with_settings(
            api_token,
            self.api_base.clone(),
            self.timeout,
            self.dry_run,
        )?))
    }
}
