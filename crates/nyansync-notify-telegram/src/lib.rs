//! Telegram notifier
//!
//! Sends DNS change messages through the Telegram Bot API
//! (`POST /bot{token}/sendMessage`, HTML parse mode).
//!
//! Delivery is best-effort: one request per message, no retries. The bot token
//! is part of the request path, so transport errors are stripped of their URL
//! before they are returned.

use async_trait::async_trait;
use nyansync_core::traits::{NotificationMessage, Notifier, NotifierFactory};
use nyansync_core::{ClientError, Error};
use serde::Deserialize;
use std::time::Duration;

/// Telegram Bot API base URL
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Escape text for Telegram's HTML parse mode
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render a change message as Telegram HTML
pub fn render_message(message: &NotificationMessage) -> String {
    let previous = if message.previous.trim().is_empty() {
        "(empty)".to_string()
    } else {
        escape_html(&message.previous)
    };

    format!(
        "⚠️ <b>DNS record updated</b>\n\
         Time: {}\n\
         Job: {}\n\
         Details:\n  • <code>{}</code>: {} → {}",
        message.changed_at.strftime("%Y-%m-%d %H:%M:%S %Z"),
        escape_html(&message.job_id),
        escape_html(&message.record_name),
        previous,
        message.current
    )
}

/// Notifier posting to one Telegram chat
pub struct TelegramNotifier {
    /// Bot token
    /// ⚠️ NEVER log this value
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("bot_token", &"<REDACTED>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl TelegramNotifier {
    /// Create a notifier
    ///
    /// # Parameters
    ///
    /// - `bot_token`: Bot API token
    /// - `chat_id`: Destination chat id or `@channel` name
    /// - `api_base`: API base URL ([`TELEGRAM_API_BASE`] in production)
    /// - `timeout`: Request timeout
    ///
    /// # Returns
    ///
    /// `Error::InvalidInput` when the token or chat id is empty
    pub fn new(
        bot_token: &str,
        chat_id: &str,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let bot_token = bot_token.trim();
        let chat_id = chat_id.trim();
        if bot_token.is_empty() {
            return Err(Error::invalid_input("Telegram bot token cannot be empty"));
        }
        if chat_id.is_empty() {
            return Err(Error::invalid_input("Telegram chat id cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &NotificationMessage) -> Result<(), ClientError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": render_message(message),
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                if e.is_timeout() {
                    ClientError::Timeout(format!("sendMessage: {}", e))
                } else {
                    ClientError::Unreachable(format!("sendMessage: {}", e))
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ApiResponse>(&body).ok();
        let description = parsed
            .as_ref()
            .and_then(|r| r.description.clone())
            .unwrap_or_else(|| status.to_string());

        if !status.is_success() {
            return Err(ClientError::from_status(
                status.as_u16(),
                format!("sendMessage: {}", description),
            ));
        }

        match parsed {
            Some(response) if response.ok => {
                tracing::debug!(chat_id = %self.chat_id, "Telegram message delivered");
                Ok(())
            }
            Some(_) => Err(ClientError::Rejected {
                status: status.as_u16(),
                message: format!("sendMessage: {}", description),
            }),
            None => Err(ClientError::Malformed(
                "sendMessage: response is not a Bot API object".to_string(),
            )),
        }
    }

    fn channel_name(&self) -> &'static str {
        "telegram"
    }
}

/// Factory for creating Telegram notifiers per job
#[derive(Debug, Clone)]
pub struct TelegramFactory {
    api_base: String,
    timeout: Duration,
}

impl Default for TelegramFactory {
    fn default() -> Self {
        Self {
            api_base: TELEGRAM_API_BASE.to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl TelegramFactory {
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
}

impl NotifierFactory for TelegramFactory {
    fn create(&self, token: &str, target: &str) -> Result<Box<dyn Notifier>, Error> {
        Ok(Box::new(TelegramNotifier::new(
            token,
            target,
            self.api_base.clone(),
            self.timeout,
        )?))
    }
}
