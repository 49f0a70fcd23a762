//! Reconciles an extracted company against CRM organizations and the deal list.
//!
//! Steps, never retried here:
//! 1. `find_organization`: domain search, then name search; errors mean absent
//! 2. `create_organization`: only when nothing was found
//! 3. `ensure_in_pipeline`: existence check before insert
//! 4. `annotate_entry`: only for entries this run added; each write isolated

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    CrmClient, CrmConfig, FieldDefinition, ListEntry, NewFieldValue, NewOrganization, Organization,
};
use crate::error::CrmError;
use crate::extract::ExtractedCompanyInfo;

/// Field names treated as the pipeline stage.
const STAGE_FIELD_NAMES: [&str; 3] = ["stage", "status", "deal stage"];

const STAGE_UNKNOWN: &str = "Unknown";
const STAGE_NOT_SET: &str = "Not set";

/// Result of the membership check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineMembership {
    /// Created by this call.
    Added(ListEntry),
    /// The organization was already on the list.
    AlreadyPresent(ListEntry),
}

impl PipelineMembership {
    pub fn entry(&self) -> &ListEntry {
        match self {
            Self::Added(entry) | Self::AlreadyPresent(entry) => entry,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added(_))
    }
}

/// Outcome of the metadata writes on a new entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationReport {
    pub written: usize,
    pub failed: usize,
}

/// Everything one reconciliation did.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub organization: Organization,
    pub created_organization: bool,
    pub membership: PipelineMembership,
    /// Present only when the entry was added.
    pub annotation: Option<AnnotationReport>,
    /// Present only when the entry already existed.
    pub stage: Option<String>,
}

impl ReconcileOutcome {
    /// `exists`, `created` (new organization) or `added` (existing
    /// organization, new entry).
    pub fn status(&self) -> &'static str {
        match (&self.membership, self.created_organization) {
            (PipelineMembership::AlreadyPresent(_), _) => "exists",
            (PipelineMembership::Added(_), true) => "created",
            (PipelineMembership::Added(_), false) => "added",
        }
    }
}

pub struct Reconciler {
    client: Arc<dyn CrmClient>,
    config: CrmConfig,
}

impl Reconciler {
    pub fn new(client: Arc<dyn CrmClient>, config: CrmConfig) -> Self {
        Self { client, config }
    }

    /// Run all four steps for one company.
    pub async fn reconcile(
        &self,
        info: &ExtractedCompanyInfo,
    ) -> Result<ReconcileOutcome, CrmError> {
        let (organization, created_organization) = match self.find_organization(info).await {
            Some(org) => (org, false),
            None => (self.create_organization(info).await?, true),
        };

        let membership = self.ensure_in_pipeline(organization.id).await?;

        let (annotation, stage) = match &membership {
            PipelineMembership::Added(entry) => {
                (Some(self.annotate_entry(entry, info).await), None)
            }
            PipelineMembership::AlreadyPresent(entry) => {
                (None, Some(self.current_stage(entry.id).await))
            }
        };

        Ok(ReconcileOutcome {
            organization,
            created_organization,
            membership,
            annotation,
            stage,
        })
    }

    /// Domain search first, then name search. The first non-empty result
    /// list decides; an exact match inside it beats the first entry.
    pub async fn find_organization(&self, info: &ExtractedCompanyInfo) -> Option<Organization> {
        if let Some(domain) = info.company_domain.as_deref() {
            match self.client.search_organizations(domain).await {
                Ok(orgs) if !orgs.is_empty() => {
                    return pick(orgs, |o| {
                        o.domain
                            .as_deref()
                            .is_some_and(|d| d.eq_ignore_ascii_case(domain))
                    });
                }
                Ok(_) => debug!(domain, "No organization matched domain"),
                Err(e) => warn!(domain, error = %e, "Organization search by domain failed"),
            }
        }

        if let Some(name) = info.company_name.as_deref() {
            match self.client.search_organizations(name).await {
                Ok(orgs) if !orgs.is_empty() => {
                    return pick(orgs, |o| o.name.eq_ignore_ascii_case(name));
                }
                Ok(_) => debug!(name, "No organization matched name"),
                Err(e) => warn!(name, error = %e, "Organization search by name failed"),
            }
        }

        None
    }

    pub async fn create_organization(
        &self,
        info: &ExtractedCompanyInfo,
    ) -> Result<Organization, CrmError> {
        let name = info
            .display_name()
            .or_else(|| info.company_domain.clone())
            .ok_or(CrmError::MissingIdentity)?;
        let org = self
            .client
            .create_organization(&NewOrganization {
                name,
                domain: info.company_domain.clone(),
            })
            .await?;
        info!(organization_id = org.id, name = %org.name, "Created organization");
        Ok(org)
    }

    /// The sole cross-run duplicate guard for list entries.
    pub async fn ensure_in_pipeline(
        &self,
        organization_id: i64,
    ) -> Result<PipelineMembership, CrmError> {
        let list_id = self.config.list_id;
        let existing = self.client.list_entries(list_id, organization_id).await?;
        if let Some(entry) = existing.into_iter().next() {
            debug!(organization_id, list_entry_id = entry.id, "Organization already in pipeline");
            return Ok(PipelineMembership::AlreadyPresent(entry));
        }

        let entry = self.client.create_list_entry(list_id, organization_id).await?;
        info!(organization_id, list_entry_id = entry.id, "Added organization to pipeline");
        Ok(PipelineMembership::Added(entry))
    }

    /// Write the source dropdown and source note. Failures are counted.
    pub async fn annotate_entry(
        &self,
        entry: &ListEntry,
        info: &ExtractedCompanyInfo,
    ) -> AnnotationReport {
        let mut writes = Vec::with_capacity(2);

        if let (Some(field_id), Some(option_id)) =
            (self.config.source_field_id, self.config.inbound_option_id)
        {
            writes.push(("source", field_id, Value::from(option_id)));
        }
        if let Some(field_id) = self.config.source_note_field_id {
            writes.push(("source_note", field_id, Value::from(source_note(info))));
        }

        let mut report = AnnotationReport::default();
        for (label, field_id, value) in writes {
            let value = NewFieldValue {
                field_id,
                entity_id: entry.entity_id,
                list_entry_id: entry.id,
                value,
            };
            match self.client.create_field_value(&value).await {
                Ok(_) => report.written += 1,
                Err(e) => {
                    warn!(list_entry_id = entry.id, field = label, error = %e, "Field write failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Human-readable stage of an entry. Never fails.
    pub async fn current_stage(&self, list_entry_id: i64) -> String {
        match self.lookup_stage(list_entry_id).await {
            Ok(stage) => stage,
            Err(e) => {
                warn!(list_entry_id, error = %e, "Stage lookup failed");
                STAGE_UNKNOWN.to_string()
            }
        }
    }

    async fn lookup_stage(&self, list_entry_id: i64) -> Result<String, CrmError> {
        let fields = self.client.list_fields(self.config.list_id).await?;
        let Some(stage_field) = fields
            .into_iter()
            .find(|f| STAGE_FIELD_NAMES.iter().any(|n| f.name.eq_ignore_ascii_case(n)))
        else {
            return Ok(STAGE_UNKNOWN.to_string());
        };

        let values = self.client.field_values(list_entry_id).await?;
        Ok(values
            .into_iter()
            .find(|v| v.field_id == stage_field.id)
            .and_then(|v| stage_text(&stage_field, &v.value))
            .unwrap_or_else(|| STAGE_NOT_SET.to_string()))
    }

    /// Field definitions on the deal list, for field id discovery.
    pub async fn list_fields(&self) -> Result<Vec<FieldDefinition>, CrmError> {
        self.client.list_fields(self.config.list_id).await
    }
}

fn pick(orgs: Vec<Organization>, exact: impl Fn(&Organization) -> bool) -> Option<Organization> {
    match orgs.iter().position(exact) {
        Some(i) => orgs.into_iter().nth(i),
        None => orgs.into_iter().next(),
    }
}

fn source_note(info: &ExtractedCompanyInfo) -> String {
    match (info.sender_name.as_deref(), info.sender_email.as_deref()) {
        (Some(name), Some(email)) => format!("Inbound email from {name} ({email})"),
        (Some(who), None) | (None, Some(who)) => format!("Inbound email from {who}"),
        (None, None) => "Inbound email".to_string(),
    }
}

/// Map a stored value to display text. Dropdown values arrive as an option
/// id or as `{id, text}`.
fn stage_text(field: &FieldDefinition, value: &Value) -> Option<String> {
    let option_text = |id: i64| {
        field
            .dropdown_options
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.text.clone())
    };
    match value {
        Value::Null => None,
        Value::Number(n) => n
            .as_i64()
            .and_then(option_text)
            .or_else(|| Some(n.to_string())),
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| map.get("id").and_then(Value::as_i64).and_then(option_text)),
        other => Some(other.to_string()),
    }
}
