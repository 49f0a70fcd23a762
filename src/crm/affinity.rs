//! Affinity v1 REST adapter.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{
    CrmClient, CrmConfig, FieldDefinition, FieldValue, ListEntry, NewFieldValue, NewOrganization,
    Organization,
};
use crate::error::CrmError;

/// Affinity client implementing `CrmClient`. Basic auth with an empty user
/// and the API key as password.
pub struct AffinityClient {
    client: reqwest::Client,
    base_url: String,
    api_key: secrecy::SecretString,
}

impl AffinityClient {
    pub fn new(config: &CrmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, CrmError> {
        let response = request
            .basic_auth("", Some(self.api_key.expose_secret()))
            .send()
            .await
            .map_err(|e| CrmError::RequestFailed {
                operation: operation.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CrmError::Api {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| CrmError::InvalidResponse {
                operation: operation.to_string(),
                reason: e.to_string(),
            })
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, CrmError> {
        let body = self.send(operation, request).await?;
        serde_json::from_value(body).map_err(|e| CrmError::InvalidResponse {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }

    async fn fetch_list<T: DeserializeOwned>(
        &self,
        operation: &str,
        key: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Vec<T>, CrmError> {
        let body = self.send(operation, request).await?;
        unwrap_list(body, key).map_err(|e| CrmError::InvalidResponse {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Affinity returns collections either bare or wrapped under a key
/// (`{"organizations": [...], "next_page_token": ...}`).
fn unwrap_list<T: DeserializeOwned>(body: Value, key: &str) -> Result<Vec<T>, serde_json::Error> {
    match body {
        Value::Array(_) => serde_json::from_value(body),
        Value::Object(mut map) => match map.remove(key) {
            Some(inner) if !inner.is_null() => serde_json::from_value(inner),
            _ => Ok(Vec::new()),
        },
        _ => Ok(Vec::new()),
    }
}

#[async_trait]
impl CrmClient for AffinityClient {
    async fn search_organizations(&self, term: &str) -> Result<Vec<Organization>, CrmError> {
        let request = self
            .client
            .get(self.url("organizations"))
            .query(&[("term", term)]);
        let orgs: Vec<Organization> = self
            .fetch_list("organizations.search", "organizations", request)
            .await?;
        debug!(term, count = orgs.len(), "Searched organizations");
        Ok(orgs)
    }

    async fn create_organization(&self, org: &NewOrganization) -> Result<Organization, CrmError> {
        let request = self.client.post(self.url("organizations")).json(org);
        self.fetch_one("organizations.create", request).await
    }

    async fn list_entries(
        &self,
        list_id: i64,
        organization_id: i64,
    ) -> Result<Vec<ListEntry>, CrmError> {
        let request = self
            .client
            .get(self.url(&format!("lists/{list_id}/list-entries")))
            .query(&[("organization_id", organization_id)]);
        let entries: Vec<ListEntry> = self
            .fetch_list("list_entries.list", "list_entries", request)
            .await?;
        // The endpoint may ignore the organization filter and return the
        // whole list.
        Ok(entries
            .into_iter()
            .filter(|e| e.entity_id == organization_id)
            .collect())
    }

    async fn create_list_entry(
        &self,
        list_id: i64,
        organization_id: i64,
    ) -> Result<ListEntry, CrmError> {
        let request = self
            .client
            .post(self.url(&format!("lists/{list_id}/list-entries")))
            .json(&serde_json::json!({ "entity_id": organization_id }));
        self.fetch_one("list_entries.create", request).await
    }

    async fn create_field_value(&self, value: &NewFieldValue) -> Result<FieldValue, CrmError> {
        let request = self.client.post(self.url("field-values")).json(value);
        self.fetch_one("field_values.create", request).await
    }

    async fn list_fields(&self, list_id: i64) -> Result<Vec<FieldDefinition>, CrmError> {
        let request = self.client.get(self.url(&format!("lists/{list_id}/fields")));
        self.fetch_list("fields.list", "fields", request).await
    }

    async fn field_values(&self, list_entry_id: i64) -> Result<Vec<FieldValue>, CrmError> {
        let request = self
            .client
            .get(self.url("field-values"))
            .query(&[("list_entry_id", list_entry_id)]);
        self.fetch_list("field_values.list", "field_values", request)
            .await
    }
}
