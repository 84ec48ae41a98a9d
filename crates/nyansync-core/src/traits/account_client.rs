// # Account Client Trait
//
// Defines the interface for reading account state from a forwarding panel.
//
// ## Implementations
//
// - Nyanpass-style panel REST API: `nyansync-account-http` crate
//
// ## Usage
//
// ```rust,ignore
// use nyansync_core::AccountClient;
//
// async fn example(client: &dyn AccountClient) -> Result<(), nyansync_core::ClientError> {
//     let session = client.login("user", "password").await?;
//     let groups = client.device_groups(&session).await?;
//     client.logout(&session).await?;
//     Ok(())
// }
// ```

use crate::error::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Session token returned by a panel login
///
/// `Debug` never shows the token.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value for the `Authorization` header
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(<REDACTED>)")
    }
}

/// A device group of the panel account
///
/// Fields the engine does not interpret are preserved verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Free-form connect address(es) of the group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_host: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Subscription and account details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub group_name: Option<String>,

    #[serde(default)]
    pub plan_name: Option<String>,

    /// Plan expiry in epoch milliseconds (0 = never)
    #[serde(default)]
    pub expire: i64,

    /// Renewal price as reported (string or number)
    #[serde(default)]
    pub renew_price: Option<serde_json::Value>,

    /// Bytes used
    #[serde(default)]
    pub traffic_used: f64,

    /// Bytes allowed
    #[serde(default)]
    pub traffic_enable: Option<f64>,

    #[serde(default)]
    pub max_rules: i64,

    /// Speed limit in bytes per second
    #[serde(default)]
    pub speed_limit: f64,

    /// Wallet balance as reported (string or number)
    #[serde(default)]
    pub balance: Option<serde_json::Value>,
}

/// Traffic counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficStatistic {
    /// Bytes transferred today
    #[serde(default)]
    pub traffic_today: f64,

    /// Bytes transferred yesterday
    #[serde(default)]
    pub traffic_yesterday: f64,
}

/// A forwarding rule as returned by the panel
///
/// `dest` is `None` when the rule's embedded config could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteForwardRule {
    pub id: i64,
    pub name: String,
    pub listen_port: i64,
    pub dest: Option<Vec<String>>,
    pub status: i64,
    /// Bytes used
    pub traffic_used: f64,
    pub updated_at: String,
    pub device_group_in: Option<i64>,
}

/// Trait for panel account clients
///
/// Every method performs exactly one request. Clients hold no state between
/// calls besides their HTTP connection pool; the session token is passed in by
/// the executor.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS calls to the configured panel host only
/// - ✅ Parse panel envelopes and map failures onto [`ClientError`]
///
/// ## Forbidden Capabilities
/// - ❌ Retry or back off (a failed run is retried by the next timer tick)
/// - ❌ Access the config store
/// - ❌ Spawn tasks
/// - ❌ Include credentials or tokens in error messages
#[async_trait]
pub trait AccountClient: Send + Sync {
    /// Log in and obtain a session token
    ///
    /// # Parameters
    ///
    /// - `username`: Panel username
    /// - `password`: Panel password
    ///
    /// # Returns
    ///
    /// - `Ok(SessionToken)`: Token for subsequent calls
    /// - `Err(ClientError::Unauthorized)`: Credentials rejected
    async fn login(&self, username: &str, password: &str) -> Result<SessionToken, ClientError>;

    /// List device groups of the account
    async fn device_groups(&self, session: &SessionToken) -> Result<Vec<DeviceGroup>, ClientError>;

    /// Fetch subscription and account details
    async fn user_info(&self, session: &SessionToken) -> Result<UserInfo, ClientError>;

    /// Fetch today's and yesterday's traffic
    async fn traffic_statistic(
        &self,
        session: &SessionToken,
    ) -> Result<TrafficStatistic, ClientError>;

    /// List forwarding rules (first page of 100)
    async fn forward_rules(
        &self,
        session: &SessionToken,
    ) -> Result<Vec<RemoteForwardRule>, ClientError>;

    /// End the session
    async fn logout(&self, session: &SessionToken) -> Result<(), ClientError>;

    /// Panel host this client talks to (for logging)
    fn host(&self) -> &str;
}

/// Helper trait for constructing account clients per job
pub trait AccountClientFactory: Send + Sync {
    /// Create a client for the given panel base URL
    ///
    /// # Returns
    ///
    /// A boxed AccountClient, or `Error::InvalidInput` if the host is unusable
    fn create(&self, provider_host: &str) -> Result<Box<dyn AccountClient>, crate::Error>;
}
