//! Company extraction: turns a normalized email into a company identity.
//!
//! Flow:
//! 1. Fixed-schema prompt → LLM → strict JSON parse
//! 2. On any call or parse failure, the sender-domain heuristic
//! 3. If the sender header has no address either, the model error stands

pub mod fallback;
pub mod mention;

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::NormalizedEmail;

/// Max tokens for the extraction call.
const EXTRACTION_MAX_TOKENS: u32 = 500;

/// Low temperature keeps the JSON shape stable.
const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// Body characters sent to the model.
const BODY_CHAR_LIMIT: usize = 3000;

/// Company identity pulled out of an email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedCompanyInfo {
    #[serde(default)]
    pub company_url: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub company_domain: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_email: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub brief_description: String,
}

impl ExtractedCompanyInfo {
    /// True when there is enough to look the company up.
    pub fn has_identity(&self) -> bool {
        self.company_name.is_some() || self.company_domain.is_some()
    }

    /// Name to create the organization under: the given name, else the
    /// first label of the domain.
    pub fn display_name(&self) -> Option<String> {
        self.company_name.clone().or_else(|| {
            self.company_domain
                .as_deref()
                .and_then(|d| d.split('.').next())
                .filter(|l| !l.is_empty())
                .map(str::to_string)
        })
    }

    /// Blank strings become `None`; the domain is reduced to a bare host.
    fn cleaned(self) -> Self {
        Self {
            company_url: non_blank(self.company_url),
            company_name: non_blank(self.company_name),
            company_domain: non_blank(self.company_domain).and_then(|d| bare_domain(&d)),
            sender_name: non_blank(self.sender_name),
            sender_email: non_blank(self.sender_email),
            brief_description: self.brief_description.trim().to_string(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

/// `https://www.Acme.io/about` → `acme.io`.
fn bare_domain(raw: &str) -> Option<String> {
    let without_scheme = raw
        .split_once("://")
        .map_or(raw, |(_, rest)| rest);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .trim_end_matches('.')
        .to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

/// LLM-backed extractor with a deterministic fallback.
pub struct EntityExtractor {
    llm: Arc<dyn LlmProvider>,
}

impl EntityExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Extract a company identity. Fails only when the model call fails and
    /// the sender header yields no address.
    ///
    /// A model answer without a name or domain is returned as-is; the caller
    /// decides what to do with an empty identity.
    pub async fn extract(
        &self,
        email: &NormalizedEmail,
    ) -> Result<ExtractedCompanyInfo, PipelineError> {
        match self.extract_with_model(email).await {
            Ok(info) => {
                debug!(
                    message_id = %email.message_id,
                    company = info.company_name.as_deref().unwrap_or("-"),
                    domain = info.company_domain.as_deref().unwrap_or("-"),
                    "Model extraction succeeded"
                );
                Ok(info)
            }
            Err(e) => {
                warn!(
                    message_id = %email.message_id,
                    error = %e,
                    "Model extraction failed, trying sender-domain heuristic"
                );
                match fallback::from_sender(&email.from) {
                    Some(info) => {
                        info!(
                            message_id = %email.message_id,
                            domain = info.company_domain.as_deref().unwrap_or("-"),
                            "Using heuristic company identity"
                        );
                        Ok(info)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn extract_with_model(
        &self,
        email: &NormalizedEmail,
    ) -> Result<ExtractedCompanyInfo, PipelineError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extraction_system_prompt()),
            ChatMessage::user(build_extraction_user_prompt(email)),
        ])
        .with_temperature(EXTRACTION_TEMPERATURE)
        .with_max_tokens(EXTRACTION_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        debug!(
            message_id = %email.message_id,
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Extraction completion received"
        );
        parse_extraction_response(&response.content)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_extraction_system_prompt() -> String {
    "You extract information about the company behind an inbound business-development email.\n\n\
     Respond with ONLY a JSON object with exactly these keys:\n\
     {\"company_url\": string|null, \"company_name\": string|null, \"company_domain\": string|null, \
     \"sender_name\": string|null, \"sender_email\": string|null, \"brief_description\": string}\n\n\
     Rules:\n\
     - company_domain is a bare domain such as \"example.com\" (no scheme, no path)\n\
     - Use null for anything the email does not state or clearly imply\n\
     - Ignore the recipient's own organization and email providers such as gmail.com\n\
     - brief_description is one sentence about what the company does\n\
     - Do NOT wrap the JSON in markdown code fences and do not add any other text"
        .to_string()
}

fn build_extraction_user_prompt(email: &NormalizedEmail) -> String {
    let body: String = email.body.chars().take(BODY_CHAR_LIMIT).collect();
    format!(
        "Subject: {}\nFrom: {}\n\nBody:\n{}",
        email.subject, email.from, body
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the completion strictly as a JSON object. Fenced or prefixed output
/// is rejected so that it routes to the fallback.
fn parse_extraction_response(raw: &str) -> Result<ExtractedCompanyInfo, PipelineError> {
    serde_json::from_str::<ExtractedCompanyInfo>(raw.trim())
        .map(ExtractedCompanyInfo::cleaned)
        .map_err(|e| PipelineError::Extraction(format!("invalid JSON from model: {e}")))
}
