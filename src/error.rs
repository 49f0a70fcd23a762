//! Error types for dealflow.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mail provider errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Mail API returned {status} for {operation}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Invalid mail API response for {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },

    #[error("Mail authentication failed: {0}")]
    AuthFailed(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// CRM errors.
#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("CRM request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("CRM returned {status} for {operation}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Invalid CRM response for {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },

    #[error("Cannot create an organization without a name or domain")]
    MissingIdentity,
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Mail fetch failed: {0}")]
    Fetch(#[source] MailError),

    #[error("CRM error: {0}")]
    Crm(#[from] CrmError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("A pipeline run is already in progress")]
    RunInProgress,
}
