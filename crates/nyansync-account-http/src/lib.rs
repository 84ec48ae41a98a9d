// # Panel Account Client
//
// HTTP implementation of [`AccountClient`] for Nyanpass-style forwarding
// panels.
//
// ## Protocol
//
// Every endpoint lives under `{host}/api/v1/` and answers with an envelope:
//
// ```json
// {"code": 0, "msg": "ok", "data": ...}
// ```
//
// A non-zero `code` is a failure even when the HTTP status is 200. Requests are
// authenticated with the raw session token in `Authorization` (no scheme) and
// carry browser-like `Origin` / `Referer` headers, which some panels require
// behind their firewall.
//
// ## Endpoints
//
// - `POST auth/login` with `{"username", "password"}`, data is the token
// - `GET user/devicegroup`
// - `GET user/info`
// - `GET user/statistic`
// - `GET user/forward?page=1&size=100`
// - `POST auth/logout`

use async_trait::async_trait;
use nyansync_core::traits::{
    AccountClient, AccountClientFactory, DeviceGroup, RemoteForwardRule, SessionToken,
    TrafficStatistic, UserInfo,
};
use nyansync_core::{ClientError, Error};
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default HTTP timeout for panel requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Logout is best-effort and gets a shorter bound
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Page size for the forwarding rule listing
const FORWARD_PAGE_SIZE: u32 = 100;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Panel firewall code for requests it considers automated
const FIREWALL_BLOCK_CODE: &str = "1010";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "missing_code")]
    code: i64,
    #[serde(default, alias = "message")]
    msg: Option<String>,
    data: Option<T>,
}

fn missing_code() -> i64 {
    -1
}

/// Forwarding rule item as listed by the panel
#[derive(Debug, Deserialize)]
struct ForwardItem {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    listen_port: i64,
    /// JSON document embedded as a string
    #[serde(default)]
    config: Option<String>,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    traffic_used: f64,
    #[serde(default)]
    display_updated_at: String,
    #[serde(default)]
    device_group_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ForwardConfig {
    #[serde(default)]
    dest: Vec<String>,
}

impl From<ForwardItem> for RemoteForwardRule {
    fn from(item: ForwardItem) -> Self {
        let config = item.config.as_deref().unwrap_or("{}");
        let dest = serde_json::from_str::<ForwardConfig>(config)
            .ok()
            .map(|c| c.dest);

        RemoteForwardRule {
            id: item.id,
            name: item.name,
            listen_port: item.listen_port,
            dest,
            status: item.status,
            traffic_used: item.traffic_used,
            updated_at: item.display_updated_at,
            device_group_in: item.device_group_in,
        }
    }
}

/// Map a transport failure onto a client error; the URL is stripped
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

/// Map a non-success HTTP answer, recognising the panel firewall block
fn status_error(context: &str, status: reqwest::StatusCode, body: &str) -> ClientError {
    if status == reqwest::StatusCode::FORBIDDEN && body.contains(FIREWALL_BLOCK_CODE) {
        return ClientError::Unauthorized(format!(
            "{}: blocked by the panel firewall (error {}), API access may need enabling",
            context, FIREWALL_BLOCK_CODE
        ));
    }
    ClientError::from_status(status.as_u16(), context)
}

/// Client for one panel host
pub struct NyanpassClient {
    /// Base URL without trailing slash, e.g. `https://panel.example.com`
    host: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for NyanpassClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NyanpassClient")
            .field("host", &self.host)
            .finish()
    }
}

impl NyanpassClient {
    /// Create a client for a panel
    ///
    /// # Parameters
    ///
    /// - `host`: Panel base URL (`http://` or `https://`)
    /// - `timeout`: Per-request timeout
    ///
    /// # Returns
    ///
    /// `Error::InvalidInput` when the host is not an HTTP(S) URL usable as a header value
    pub fn new(host: &str, timeout: Duration) -> Result<Self, Error> {
        let host = host.trim().trim_end_matches('/').to_string();
        if !host.starts_with("https://") && !host.starts_with("http://") {
            return Err(Error::invalid_input(format!(
                "provider_host must use HTTP or HTTPS scheme. Got: {}",
                host
            )));
        }

        let origin = HeaderValue::from_str(&host)
            .map_err(|_| Error::invalid_input(format!("invalid provider_host: {}", host)))?;
        let referer = HeaderValue::from_str(&format!("{}/", host))
            .map_err(|_| Error::invalid_input(format!("invalid provider_host: {}", host)))?;

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(header::ORIGIN, origin);
        headers.insert(header::REFERER, referer);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { host, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.host, path)
    }

    /// Send a request and unwrap the panel envelope
    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(context, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(context, e))?;

        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "Panel answered {}: {}", context, body);
            return Err(status_error(context, status, &body));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| ClientError::Malformed(format!("{}: {}", context, e)))?;

        if envelope.code != 0 {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message: format!(
                    "{}: panel code {}: {}",
                    context,
                    envelope.code,
                    envelope.msg.as_deref().unwrap_or("unknown error")
                ),
            });
        }

        envelope
            .data
            .ok_or_else(|| ClientError::Malformed(format!("{}: response has no data", context)))
    }

    fn authorized(&self, request: reqwest::RequestBuilder, session: &SessionToken) -> reqwest::RequestBuilder {
        request.header(header::AUTHORIZATION, session.expose())
    }
}

#[async_trait]
impl AccountClient for NyanpassClient {
    async fn login(&self, username: &str, password: &str) -> Result<SessionToken, ClientError> {
        let request = self
            .client
            .post(self.url("auth/login"))
            .json(&serde_json::json!({ "username": username, "password": password }));

        let token: String = match self.call(request, "login").await {
            Ok(token) => token,
            // A refused login comes back as a non-zero code
            Err(ClientError::Rejected { message, .. }) => {
                return Err(ClientError::Unauthorized(message));
            }
            Err(e) => return Err(e),
        };

        if token.trim().is_empty() {
            return Err(ClientError::Malformed("login: empty session token".to_string()));
        }
        Ok(SessionToken::new(token))
    }

    async fn device_groups(&self, session: &SessionToken) -> Result<Vec<DeviceGroup>, ClientError> {
        let request = self.authorized(self.client.get(self.url("user/devicegroup")), session);
        self.call(request, "device groups").await
    }

    async fn user_info(&self, session: &SessionToken) -> Result<UserInfo, ClientError> {
        let request = self.authorized(self.client.get(self.url("user/info")), session);
        self.call(request, "user info").await
    }

    async fn traffic_statistic(
        &self,
        session: &SessionToken,
    ) -> Result<TrafficStatistic, ClientError> {
        let request = self.authorized(self.client.get(self.url("user/statistic")), session);
        self.call(request, "traffic statistics").await
    }

    async fn forward_rules(
        &self,
        session: &SessionToken,
    ) -> Result<Vec<RemoteForwardRule>, ClientError> {
        let request = self.authorized(
            self.client
                .get(self.url("user/forward"))
                .query(&[("page", 1), ("size", FORWARD_PAGE_SIZE)]),
            session,
        );
        let items: Vec<ForwardItem> = self.call(request, "forward rules").await?;
        Ok(items.into_iter().map(RemoteForwardRule::from).collect())
    }

    async fn logout(&self, session: &SessionToken) -> Result<(), ClientError> {
        let response = self
            .authorized(self.client.post(self.url("auth/logout")), session)
            .timeout(LOGOUT_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error("logout", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("logout", status, &body));
        }
        Ok(())
    }

    fn host(&self) -> &str {
        &self.host
    }
}

/// Factory for creating panel clients per job
#[derive(Debug, Clone)]
pub struct NyanpassFactory {
    timeout: Duration,
}

impl Default for NyanpassFactory {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl NyanpassFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl AccountClientFactory for NyanpassFactory {
    fn create(&self, provider_host: &str) -> Result<Box<dyn AccountClient>, Error> {
        Ok(Box::new(NyanpassClient::new(provider_host, self.timeout)?))
    }
}
