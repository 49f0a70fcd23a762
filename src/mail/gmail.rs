//! Gmail REST adapter: lists unread mail for the alias and labels it once handled.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::MailSource;
use super::types::RawMessage;
use crate::error::MailError;

pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

pub const DEFAULT_GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh this many seconds before the token actually expires.
const TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;

// ── Configuration ───────────────────────────────────────────────────

/// How the adapter obtains a bearer token.
#[derive(Debug, Clone)]
pub enum GmailAuth {
    /// Pre-issued access token, used as-is.
    AccessToken(SecretString),
    /// OAuth refresh-token grant; access tokens are minted and cached.
    RefreshToken {
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    },
}

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub auth: GmailAuth,
    /// Shared address the deal emails are sent to.
    pub alias: String,
    /// Name of the label applied once a message is handled.
    pub processed_label: String,
    /// Maximum messages fetched per run.
    pub batch_size: u32,
    /// `users/me` root of the Gmail REST API.
    pub api_base: String,
    /// OAuth token endpoint for the refresh grant.
    pub token_url: String,
}

impl GmailConfig {
    /// `to:<alias> is:unread -label:<processed>`.
    ///
    /// Gmail search matches label names with spaces replaced by dashes.
    pub fn search_query(&self) -> String {
        format!(
            "to:{} is:unread -label:{}",
            self.alias,
            self.processed_label.replace(' ', "-")
        )
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
struct Label {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<i64>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now().timestamp() >= expires_at - TOKEN_EXPIRY_BUFFER_SECS,
            None => false,
        }
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Gmail API client implementing `MailSource`.
pub struct GmailClient {
    config: GmailConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
    /// Processed-label id, forgotten when a modify call fails.
    label_id: Mutex<Option<String>>,
}

impl GmailClient {
    pub fn new(config: GmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            token: Mutex::new(None),
            label_id: Mutex::new(None),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.api_base.trim_end_matches('/'))
    }

    async fn access_token(&self) -> Result<String, MailError> {
        let (client_id, client_secret, refresh_token) = match &self.config.auth {
            GmailAuth::AccessToken(token) => return Ok(token.expose_secret().to_string()),
            GmailAuth::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            } => (client_id, client_secret, refresh_token),
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && !token.is_expired()
        {
            return Ok(token.value.clone());
        }

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| MailError::AuthFailed(format!("refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::AuthFailed(format!(
                "token refresh failed ({status}): {body}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailError::AuthFailed(format!("invalid token response: {e}")))?;

        debug!("Gmail access token refreshed");
        let token = CachedToken {
            value: body.access_token,
            expires_at: body.expires_in.map(|secs| Utc::now().timestamp() + secs),
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Send an authenticated request and decode a JSON body.
    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, MailError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| MailError::RequestFailed {
                operation: operation.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Api {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| MailError::InvalidResponse {
                operation: operation.to_string(),
                reason: e.to_string(),
            })
    }

    async fn list_message_ids(&self, max_results: u32) -> Result<Vec<String>, MailError> {
        let request = self.client.get(self.api_url("messages")).query(&[
            ("q", self.config.search_query()),
            ("maxResults", max_results.to_string()),
        ]);
        let list: MessageList = self.call("messages.list", request).await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage, MailError> {
        let request = self
            .client
            .get(self.api_url(&format!("messages/{id}")))
            .query(&[("format", "full")]);
        self.call("messages.get", request).await
    }

    /// Look the marker label up by name, creating it when absent.
    async fn ensure_label(&self) -> Result<String, MailError> {
        let mut cached = self.label_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let name = &self.config.processed_label;
        let list: LabelList = self
            .call("labels.list", self.client.get(self.api_url("labels")))
            .await?;

        let id = match list.labels.into_iter().find(|l| &l.name == name) {
            Some(label) => label.id,
            None => {
                let body = serde_json::json!({
                    "name": name,
                    "labelListVisibility": "labelShow",
                    "messageListVisibility": "show",
                });
                let created: Label = self
                    .call(
                        "labels.create",
                        self.client.post(self.api_url("labels")).json(&body),
                    )
                    .await?;
                info!(label = %created.name, id = %created.id, "Created processed label");
                created.id
            }
        };

        *cached = Some(id.clone());
        Ok(id)
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn fetch_candidates(&self, max_results: u32) -> Result<Vec<RawMessage>, MailError> {
        let ids = self.list_message_ids(max_results).await?;
        debug!(count = ids.len(), "Listed candidate messages");

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids.iter().take(max_results as usize) {
            messages.push(self.get_message(id).await?);
        }
        Ok(messages)
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), MailError> {
        let label_id = self.ensure_label().await?;
        let body = serde_json::json!({
            "addLabelIds": [label_id],
            "removeLabelIds": ["UNREAD"],
        });
        let request = self
            .client
            .post(self.api_url(&format!("messages/{message_id}/modify")))
            .json(&body);
        if let Err(e) = self.call::<serde_json::Value>("messages.modify", request).await {
            // The label may have been deleted out from under us.
            *self.label_id.lock().await = None;
            return Err(e);
        }
        debug!(message_id, "Marked message processed");
        Ok(())
    }
}
