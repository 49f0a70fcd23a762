//! Mail records as returned by the provider, and their normalized form.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// A full message as returned by `users.messages.get?format=full`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub payload: MessagePart,
}

/// One node of the MIME part tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<MessageBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn is_text(&self) -> bool {
        let mime = self.mime_type.to_ascii_lowercase();
        mime == "text/plain" || mime == "text/html"
    }

    /// Decoded body of this part, if it carries inline data.
    pub fn decoded_body(&self) -> Option<String> {
        self.body.as_ref().and_then(MessageBody::decode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Part body. `data` is base64url; absent for containers and attachments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub data: Option<String>,
}

impl MessageBody {
    /// Decode base64url data, tolerating optional padding and invalid UTF-8.
    pub fn decode(&self) -> Option<String> {
        let data = self.data.as_deref()?.trim_end_matches('=');
        if data.is_empty() {
            return None;
        }
        match URL_SAFE_NO_PAD.decode(data) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable message body");
                None
            }
        }
    }
}

/// Flat view of an email used by the rest of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEmail {
    pub subject: String,
    pub from: String,
    /// Plain text with markup removed and whitespace collapsed.
    pub body: String,
    pub date: String,
    pub message_id: String,
}
