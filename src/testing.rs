//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use secrecy::SecretString;

use crate::crm::{
    CrmClient, CrmConfig, FieldDefinition, FieldValue, ListEntry, NewFieldValue, NewOrganization,
    Organization,
};
use crate::error::{CrmError, LlmError, MailError};
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::mail::types::{Header, MessageBody, MessagePart};
use crate::mail::{MailSource, RawMessage};

pub(crate) fn crm_config() -> CrmConfig {
    CrmConfig {
        api_key: SecretString::from("test-key"),
        base_url: "http://crm.invalid".into(),
        list_id: 42,
        source_field_id: Some(501),
        inbound_option_id: Some(77),
        source_note_field_id: Some(502),
    }
}

/// Single-part message with an HTML body.
pub(crate) fn raw_email(id: &str, subject: &str, from: &str, body: &str) -> RawMessage {
    RawMessage {
        id: id.into(),
        thread_id: Some(format!("t-{id}")),
        label_ids: vec!["INBOX".into(), "UNREAD".into()],
        payload: MessagePart {
            mime_type: "text/html".into(),
            headers: vec![
                Header {
                    name: "Subject".into(),
                    value: subject.into(),
                },
                Header {
                    name: "From".into(),
                    value: from.into(),
                },
            ],
            body: Some(MessageBody {
                size: body.len() as u64,
                data: Some(URL_SAFE_NO_PAD.encode(body)),
            }),
            parts: Vec::new(),
        },
    }
}

// ── Mail ────────────────────────────────────────────────────────────

/// Mailbox whose fetch honors the processed marker.
pub(crate) struct FakeMail {
    messages: Vec<RawMessage>,
    marked: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    fail_fetch: bool,
    fail_mark: bool,
}

impl FakeMail {
    pub(crate) fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages,
            marked: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            fail_fetch: false,
            fail_mark: false,
        }
    }

    pub(crate) fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub(crate) fn failing_mark(mut self) -> Self {
        self.fail_mark = true;
        self
    }

    pub(crate) fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailSource for FakeMail {
    async fn fetch_candidates(&self, max_results: u32) -> Result<Vec<RawMessage>, MailError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch {
            return Err(MailError::Api {
                operation: "messages.list".into(),
                status: 503,
                body: "unavailable".into(),
            });
        }
        let marked = self.marked.lock().unwrap();
        Ok(self
            .messages
            .iter()
            .filter(|m| !marked.contains(&m.id))
            .take(max_results as usize)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), MailError> {
        if self.fail_mark {
            return Err(MailError::RequestFailed {
                operation: "messages.modify".into(),
                reason: "connection reset".into(),
            });
        }
        let mut marked = self.marked.lock().unwrap();
        if !marked.iter().any(|m| m == message_id) {
            marked.push(message_id.to_string());
        }
        Ok(())
    }
}

// ── CRM ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct CrmState {
    orgs: Vec<Organization>,
    entries: Vec<ListEntry>,
    writes: Vec<NewFieldValue>,
    fields: Vec<FieldDefinition>,
    values: Vec<FieldValue>,
    searches: Vec<String>,
}

/// CRM with substring search over stored organizations.
#[derive(Default)]
pub(crate) struct FakeCrm {
    state: Mutex<CrmState>,
    failing_terms: Vec<String>,
    failing_creates: Vec<String>,
    fail_field_writes: bool,
    fail_field_reads: bool,
}

fn api_error(operation: &str) -> CrmError {
    CrmError::Api {
        operation: operation.into(),
        status: 500,
        body: "internal error".into(),
    }
}

impl FakeCrm {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_org(self, name: &str, domain: Option<&str>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state.orgs.len() as i64 + 1;
            state.orgs.push(Organization {
                id,
                name: name.into(),
                domain: domain.map(str::to_string),
            });
        }
        self
    }

    pub(crate) fn with_entry(self, organization_id: i64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state.entries.len() as i64 + 1001;
            state.entries.push(ListEntry {
                id,
                list_id: crm_config().list_id,
                entity_id: organization_id,
            });
        }
        self
    }

    pub(crate) fn with_fields(self, fields: Vec<FieldDefinition>) -> Self {
        self.state.lock().unwrap().fields = fields;
        self
    }

    pub(crate) fn with_field_value(
        self,
        list_entry_id: i64,
        field_id: i64,
        value: serde_json::Value,
    ) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state.values.len() as i64 + 5001;
            state.values.push(FieldValue {
                id,
                field_id,
                list_entry_id: Some(list_entry_id),
                value,
            });
        }
        self
    }

    pub(crate) fn failing_search(mut self, term: &str) -> Self {
        self.failing_terms.push(term.to_string());
        self
    }

    pub(crate) fn failing_create(mut self, name: &str) -> Self {
        self.failing_creates.push(name.to_string());
        self
    }

    pub(crate) fn failing_field_writes(mut self) -> Self {
        self.fail_field_writes = true;
        self
    }

    pub(crate) fn failing_field_reads(mut self) -> Self {
        self.fail_field_reads = true;
        self
    }

    pub(crate) fn organizations(&self) -> Vec<Organization> {
        self.state.lock().unwrap().orgs.clone()
    }

    pub(crate) fn entries(&self) -> Vec<ListEntry> {
        self.state.lock().unwrap().entries.clone()
    }

    pub(crate) fn field_writes(&self) -> Vec<NewFieldValue> {
        self.state.lock().unwrap().writes.clone()
    }

    pub(crate) fn search_terms(&self) -> Vec<String> {
        self.state.lock().unwrap().searches.clone()
    }
}

#[async_trait]
impl CrmClient for FakeCrm {
    async fn search_organizations(&self, term: &str) -> Result<Vec<Organization>, CrmError> {
        let mut state = self.state.lock().unwrap();
        state.searches.push(term.to_string());
        if self.failing_terms.iter().any(|t| t == term) {
            return Err(api_error("organizations.search"));
        }
        let needle = term.to_lowercase();
        Ok(state
            .orgs
            .iter()
            .filter(|o| {
                o.name.to_lowercase().contains(&needle)
                    || o
                        .domain
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }

    async fn create_organization(&self, org: &NewOrganization) -> Result<Organization, CrmError> {
        if self.failing_creates.iter().any(|n| n == &org.name) {
            return Err(api_error("organizations.create"));
        }
        let mut state = self.state.lock().unwrap();
        let created = Organization {
            id: state.orgs.len() as i64 + 1,
            name: org.name.clone(),
            domain: org.domain.clone(),
        };
        state.orgs.push(created.clone());
        Ok(created)
    }

    async fn list_entries(
        &self,
        list_id: i64,
        organization_id: i64,
    ) -> Result<Vec<ListEntry>, CrmError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|e| e.list_id == list_id && e.entity_id == organization_id)
            .cloned()
            .collect())
    }

    async fn create_list_entry(
        &self,
        list_id: i64,
        organization_id: i64,
    ) -> Result<ListEntry, CrmError> {
        let mut state = self.state.lock().unwrap();
        let entry = ListEntry {
            id: state.entries.len() as i64 + 1001,
            list_id,
            entity_id: organization_id,
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn create_field_value(&self, value: &NewFieldValue) -> Result<FieldValue, CrmError> {
        if self.fail_field_writes {
            return Err(api_error("field_values.create"));
        }
        let mut state = self.state.lock().unwrap();
        state.writes.push(value.clone());
        Ok(FieldValue {
            id: state.writes.len() as i64 + 9000,
            field_id: value.field_id,
            list_entry_id: Some(value.list_entry_id),
            value: value.value.clone(),
        })
    }

    async fn list_fields(&self, _list_id: i64) -> Result<Vec<FieldDefinition>, CrmError> {
        Ok(self.state.lock().unwrap().fields.clone())
    }

    async fn field_values(&self, list_entry_id: i64) -> Result<Vec<FieldValue>, CrmError> {
        if self.fail_field_reads {
            return Err(api_error("field_values.list"));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .values
            .iter()
            .filter(|v| v.list_entry_id == Some(list_entry_id))
            .cloned()
            .collect())
    }
}

// ── LLM ─────────────────────────────────────────────────────────────

/// Replies from a script; `None` entries and an exhausted script fail
/// unless a repeating reply is set.
pub(crate) struct ScriptedLlm {
    replies: Mutex<VecDeque<Option<String>>>,
    repeat: Option<String>,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedLlm {
    pub(crate) fn script(replies: Vec<Option<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            repeat: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub(crate) fn replying(content: &str) -> Self {
        Self {
            repeat: Some(content.to_string()),
            ..Self::script(Vec::new())
        }
    }

    pub(crate) fn failing() -> Self {
        Self::script(Vec::new())
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);

        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.repeat.clone());

        match next {
            Some(content) => Ok(CompletionResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
            }),
            None => Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "scripted failure".into(),
            }),
        }
    }
}
