//! CRM access: the `CrmClient` seam, the Affinity adapter, and reconciliation.

pub mod affinity;
pub mod reconciler;

pub use affinity::AffinityClient;
pub use reconciler::{AnnotationReport, PipelineMembership, ReconcileOutcome, Reconciler};

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::CrmError;

/// CRM connection and field settings.
#[derive(Debug, Clone)]
pub struct CrmConfig {
    pub api_key: SecretString,
    pub base_url: String,
    /// Deal pipeline list.
    pub list_id: i64,
    /// "Source" dropdown field; unset disables the write.
    pub source_field_id: Option<i64>,
    /// Option id meaning "inbound" within the source dropdown.
    pub inbound_option_id: Option<i64>,
    /// Free-text "source note" field; unset disables the write.
    pub source_note_field_id: Option<i64>,
}

// ── Records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Payload for creating an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrganization {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// A row joining one organization to one list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub id: i64,
    pub list_id: i64,
    pub entity_id: i64,
}

/// Payload for writing a field value onto a list entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFieldValue {
    pub field_id: i64,
    pub entity_id: i64,
    pub list_entry_id: i64,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub id: i64,
    pub text: String,
}

/// A field defined on a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub dropdown_options: Vec<DropdownOption>,
}

/// A stored field value. `value` is an option id, text, or a nested object
/// depending on the field type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub id: i64,
    pub field_id: i64,
    #[serde(default)]
    pub list_entry_id: Option<i64>,
    #[serde(default)]
    pub value: serde_json::Value,
}

// ── Client seam ─────────────────────────────────────────────────────

/// The handful of CRM calls the pipeline needs. Implementations do no
/// retries and no business logic.
#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn search_organizations(&self, term: &str) -> Result<Vec<Organization>, CrmError>;

    async fn create_organization(&self, org: &NewOrganization) -> Result<Organization, CrmError>;

    /// Entries on `list_id` whose entity is `organization_id`.
    async fn list_entries(
        &self,
        list_id: i64,
        organization_id: i64,
    ) -> Result<Vec<ListEntry>, CrmError>;

    async fn create_list_entry(
        &self,
        list_id: i64,
        organization_id: i64,
    ) -> Result<ListEntry, CrmError>;

    async fn create_field_value(&self, value: &NewFieldValue) -> Result<FieldValue, CrmError>;

    async fn list_fields(&self, list_id: i64) -> Result<Vec<FieldDefinition>, CrmError>;

    async fn field_values(&self, list_entry_id: i64) -> Result<Vec<FieldValue>, CrmError>;
}
