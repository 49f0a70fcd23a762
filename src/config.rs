//! Service configuration, read once at startup.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::crm::CrmConfig;
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::mail::gmail::{DEFAULT_GMAIL_API_BASE, DEFAULT_GOOGLE_TOKEN_URL};
use crate::mail::{GmailAuth, GmailConfig};

/// Default scheduler interval in minutes.
const DEFAULT_INTERVAL_MINUTES: u64 = 5;

/// Default pause between messages in a batch.
const DEFAULT_MESSAGE_DELAY_MS: u64 = 1000;

const DEFAULT_PORT: u16 = 3000;

const DEFAULT_PROCESSED_LABEL: &str = "dealflow-processed";

const DEFAULT_BATCH_SIZE: u32 = 50;

const DEFAULT_AFFINITY_BASE_URL: &str = "https://api.affinity.co";

/// Scheduling knobs for the batch loop.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Minutes between scheduled runs.
    pub interval_minutes: u64,
    /// Pause between two messages of the same batch.
    pub message_delay: Duration,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            message_delay: Duration::from_millis(DEFAULT_MESSAGE_DELAY_MS),
        }
    }
}

/// Everything the service needs, constructed once and passed down explicitly.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mail: GmailConfig,
    pub llm: LlmConfig,
    pub crm: CrmConfig,
    pub schedule: ScheduleConfig,
    pub port: u16,
}

impl AppConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);

        let mail = GmailConfig {
            auth: gmail_auth(&env)?,
            alias: env.required("DEALFLOW_ALIAS")?,
            processed_label: env
                .optional("DEALFLOW_PROCESSED_LABEL")
                .unwrap_or_else(|| DEFAULT_PROCESSED_LABEL.to_string()),
            batch_size: env.parse_or("DEALFLOW_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            api_base: env
                .optional("GMAIL_API_BASE")
                .unwrap_or_else(|| DEFAULT_GMAIL_API_BASE.to_string()),
            token_url: env
                .optional("GMAIL_TOKEN_URL")
                .unwrap_or_else(|| DEFAULT_GOOGLE_TOKEN_URL.to_string()),
        };

        let backend = match env.optional("LLM_BACKEND").as_deref() {
            None | Some("openai") => LlmBackend::OpenAi,
            Some("anthropic") => LlmBackend::Anthropic,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_BACKEND".into(),
                    message: format!("unknown backend '{other}' (expected openai or anthropic)"),
                });
            }
        };
        let (key_var, default_model) = match backend {
            LlmBackend::OpenAi => ("OPENAI_API_KEY", "gpt-4o-mini"),
            LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", "claude-3-5-haiku-latest"),
        };
        let llm = LlmConfig {
            backend,
            api_key: SecretString::from(env.required(key_var)?),
            model: env
                .optional("DEALFLOW_MODEL")
                .unwrap_or_else(|| default_model.to_string()),
        };

        let crm = CrmConfig {
            api_key: SecretString::from(env.required("AFFINITY_API_KEY")?),
            base_url: env
                .optional("AFFINITY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_AFFINITY_BASE_URL.to_string()),
            list_id: env.parse_required("AFFINITY_LIST_ID")?,
            source_field_id: env.parse_optional("AFFINITY_SOURCE_FIELD_ID")?,
            inbound_option_id: env.parse_optional("AFFINITY_INBOUND_OPTION_ID")?,
            source_note_field_id: env.parse_optional("AFFINITY_SOURCE_NOTE_FIELD_ID")?,
        };

        let interval_minutes = env.parse_or("CHECK_INTERVAL_MINUTES", DEFAULT_INTERVAL_MINUTES)?;
        if interval_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHECK_INTERVAL_MINUTES".into(),
                message: "must be at least 1".into(),
            });
        }
        if interval_minutes.checked_mul(60).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "CHECK_INTERVAL_MINUTES".into(),
                message: format!("{interval_minutes} minutes does not fit in seconds"),
            });
        }
        let schedule = ScheduleConfig {
            interval_minutes,
            message_delay: Duration::from_millis(
                env.parse_or("DEALFLOW_MESSAGE_DELAY_MS", DEFAULT_MESSAGE_DELAY_MS)?,
            ),
        };

        Ok(Self {
            mail,
            llm,
            crm,
            schedule,
            port: env.parse_or("DEALFLOW_PORT", DEFAULT_PORT)?,
        })
    }
}

/// Static token wins; otherwise all three refresh-grant keys are required.
fn gmail_auth(env: &Lookup<'_>) -> Result<GmailAuth, ConfigError> {
    if let Some(token) = env.optional("GMAIL_ACCESS_TOKEN") {
        return Ok(GmailAuth::AccessToken(SecretString::from(token)));
    }

    match (
        env.optional("GMAIL_CLIENT_ID"),
        env.optional("GMAIL_CLIENT_SECRET"),
        env.optional("GMAIL_REFRESH_TOKEN"),
    ) {
        (Some(client_id), Some(client_secret), Some(refresh_token)) => {
            Ok(GmailAuth::RefreshToken {
                client_id,
                client_secret: SecretString::from(client_secret),
                refresh_token: SecretString::from(refresh_token),
            })
        }
        _ => Err(ConfigError::MissingRequired {
            key: "GMAIL_ACCESS_TOKEN".into(),
            hint: "Set it, or set GMAIL_CLIENT_ID, GMAIL_CLIENT_SECRET and GMAIL_REFRESH_TOKEN"
                .into(),
        }),
    }
}

struct Lookup<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Lookup<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parse_optional<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    fn parse_required<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.parse_optional(key)?
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_optional(key)?.unwrap_or(default))
    }
}
