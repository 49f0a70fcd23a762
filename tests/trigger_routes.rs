//! Integration tests for the HTTP trigger surface.
//!
//! Each test spins up the Axum router on a random port with stub mail, CRM
//! and model collaborators, and exercises the REST contract with reqwest.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use secrecy::SecretString;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::timeout;

use dealflow::crm::{
    CrmClient, CrmConfig, FieldDefinition, FieldValue, ListEntry, NewFieldValue, NewOrganization,
    Organization, Reconciler,
};
use dealflow::error::{CrmError, LlmError, MailError};
use dealflow::extract::EntityExtractor;
use dealflow::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use dealflow::mail::types::{Header, MessageBody, MessagePart};
use dealflow::mail::{MailSource, RawMessage};
use dealflow::pipeline::PipelineOrchestrator;
use dealflow::server::{AppState, routes};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Stubs ───────────────────────────────────────────────────────────────

struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            content: r#"{"company_url": "https://cleantech-solutions.com", "company_name": "CleanTech Solutions", "company_domain": "cleantech-solutions.com", "sender_name": "Maria Lopez", "sender_email": "maria@cleantech-solutions.com", "brief_description": "Battery recycling"}"#.to_string(),
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}

/// Mailbox that can hold `fetch_candidates` until released.
struct StubMail {
    messages: Vec<RawMessage>,
    marked: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl MailSource for StubMail {
    async fn fetch_candidates(&self, _max_results: u32) -> Result<Vec<RawMessage>, MailError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let marked = self.marked.lock().unwrap().clone();
        Ok(self
            .messages
            .iter()
            .filter(|m| !marked.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), MailError> {
        self.marked.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct StubCrm {
    orgs: Mutex<Vec<Organization>>,
    entries: Mutex<Vec<ListEntry>>,
    writes: Mutex<Vec<NewFieldValue>>,
}

#[async_trait]
impl CrmClient for StubCrm {
    async fn search_organizations(&self, term: &str) -> Result<Vec<Organization>, CrmError> {
        let term = term.to_lowercase();
        Ok(self
            .orgs
            .lock()
            .unwrap()
            .iter()
            .filter(|o| {
                o.name.to_lowercase() == term || o.domain.as_deref() == Some(term.as_str())
            })
            .cloned()
            .collect())
    }

    async fn create_organization(&self, org: &NewOrganization) -> Result<Organization, CrmError> {
        let mut orgs = self.orgs.lock().unwrap();
        let created = Organization {
            id: orgs.len() as i64 + 1,
            name: org.name.clone(),
            domain: org.domain.clone(),
        };
        orgs.push(created.clone());
        Ok(created)
    }

    async fn list_entries(
        &self,
        list_id: i64,
        organization_id: i64,
    ) -> Result<Vec<ListEntry>, CrmError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
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
        let mut entries = self.entries.lock().unwrap();
        let entry = ListEntry {
            id: entries.len() as i64 + 100,
            list_id,
            entity_id: organization_id,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn create_field_value(&self, value: &NewFieldValue) -> Result<FieldValue, CrmError> {
        let mut writes = self.writes.lock().unwrap();
        writes.push(value.clone());
        Ok(FieldValue {
            id: writes.len() as i64,
            field_id: value.field_id,
            list_entry_id: Some(value.list_entry_id),
            value: value.value.clone(),
        })
    }

    async fn list_fields(&self, _list_id: i64) -> Result<Vec<FieldDefinition>, CrmError> {
        Ok(vec![FieldDefinition {
            id: 900,
            name: "Status".into(),
            dropdown_options: Vec::new(),
        }])
    }

    async fn field_values(&self, _list_entry_id: i64) -> Result<Vec<FieldValue>, CrmError> {
        Ok(Vec::new())
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

fn raw_email(id: &str, subject: &str, from: &str, body: &str) -> RawMessage {
    RawMessage {
        id: id.into(),
        payload: MessagePart {
            mime_type: "text/plain".into(),
            headers: vec![
                Header {
                    name: "subject".into(),
                    value: subject.into(),
                },
                Header {
                    name: "from".into(),
                    value: from.into(),
                },
            ],
            body: Some(MessageBody {
                size: body.len() as u64,
                data: Some(URL_SAFE_NO_PAD.encode(body)),
            }),
            parts: Vec::new(),
        },
        ..Default::default()
    }
}

fn crm_config() -> CrmConfig {
    CrmConfig {
        api_key: SecretString::from("test"),
        base_url: "http://crm.invalid".into(),
        list_id: 42,
        source_field_id: Some(1),
        inbound_option_id: Some(2),
        source_note_field_id: Some(3),
    }
}

struct Harness {
    base: String,
    http: reqwest::Client,
    mail: Arc<StubMail>,
    crm: Arc<StubCrm>,
}

/// Start the router on a random port.
async fn start_server(messages: Vec<RawMessage>, gate: Option<Arc<Notify>>) -> Harness {
    let mail = Arc::new(StubMail {
        messages,
        marked: Mutex::new(Vec::new()),
        gate,
    });
    let crm = Arc::new(StubCrm::default());
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        mail.clone(),
        EntityExtractor::new(Arc::new(StubLlm)),
        Arc::new(Reconciler::new(crm.clone(), crm_config())),
        50,
        Duration::ZERO,
    ));
    let app = routes(AppState {
        orchestrator,
        interval_minutes: 5,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        base: format!("http://127.0.0.1:{port}"),
        http: reqwest::Client::new(),
        mail,
        crm,
    }
}

fn cleantech_email() -> RawMessage {
    raw_email(
        "m1",
        "Partnership opportunity - CleanTech Solutions",
        "Maria Lopez <maria@cleantech-solutions.com>",
        "We recycle grid-scale batteries.",
    )
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_interval() {
    let h = start_server(Vec::new(), None).await;

    let resp = h.http.get(format!("{}/health", h.base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "dealflow");
    assert_eq!(body["interval_minutes"], 5);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn manual_run_returns_summary() {
    let h = start_server(vec![cleantech_email()], None).await;

    let resp = h
        .http
        .post(format!("{}/api/process-emails", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["processed"], 1);
    assert_eq!(body["skipped"], 0);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["details"][0]["company"], "CleanTech Solutions");
    assert_eq!(body["details"][0]["already_in_pipeline"], false);
    assert!(body["run_id"].is_string());

    assert_eq!(*h.mail.marked.lock().unwrap(), vec!["m1".to_string()]);
    assert_eq!(h.crm.writes.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn webhook_acks_and_runs_in_background() {
    let h = start_server(vec![cleantech_email()], None).await;

    let resp = h
        .http
        .post(format!("{}/webhook/gmail", h.base))
        .json(&serde_json::json!({"message": {"data": "e30="}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["received"], true);

    timeout(TEST_TIMEOUT, async {
        while h.mail.marked.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("webhook run did not finish");
    assert_eq!(h.crm.entries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn overlapping_manual_run_conflicts() {
    let gate = Arc::new(Notify::new());
    let h = start_server(vec![cleantech_email()], Some(gate.clone())).await;

    // The webhook run holds the lock while parked on the gate.
    h.http
        .post(format!("{}/webhook/gmail", h.base))
        .send()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp = h
        .http
        .post(format!("{}/api/process-emails", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);

    gate.notify_one();
    timeout(TEST_TIMEOUT, async {
        while h.mail.marked.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("gated run did not finish");
}

#[tokio::test]
async fn company_intake_creates_then_reports_existing() {
    let h = start_server(Vec::new(), None).await;
    let submit = |text: &'static str| {
        h.http
            .post(format!("{}/api/companies", h.base))
            .json(&serde_json::json!({ "text": text }))
            .send()
    };

    let first: Value = submit("Acme Robotics - acme.io")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["success"], true);
    assert_eq!(first["status"], "created");
    assert_eq!(first["company"], "Acme Robotics");

    let second: Value = submit("https://acme.io").await.unwrap().json().await.unwrap();
    assert_eq!(second["status"], "exists");
    assert_eq!(second["stage"], "Not set");
    assert_eq!(h.crm.orgs.lock().unwrap().len(), 1);
    assert_eq!(h.crm.entries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn company_intake_rejects_empty_text() {
    let h = start_server(Vec::new(), None).await;

    let resp = h
        .http
        .post(format!("{}/api/companies", h.base))
        .json(&serde_json::json!({ "text": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn crm_fields_are_listed() {
    let h = start_server(Vec::new(), None).await;

    let body: Value = h
        .http
        .get(format!("{}/api/crm/fields", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["fields"][0]["name"], "Status");
    assert_eq!(body["fields"][0]["id"], 900);
}
