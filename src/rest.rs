//! [`Backend`] for a hosted PostgREST-style database with object storage.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value as Json;
use std::time::Duration;

use crate::error::BackendError;
use crate::store::{Backend, Filter, Row};

const PREFER: &str = "Prefer";

#[derive(Clone)]
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl RestBackend {
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let mut auth_header = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| BackendError::Transport(format!("invalid api key: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| BackendError::Transport(format!("invalid api key: {}", e)))?;
        auth_header.insert(HeaderName::from_static("apikey"), key);
        auth_header.insert(AUTHORIZATION, bearer);

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }

    async fn rows(&self, request: reqwest::RequestBuilder) -> Result<Vec<Row>, BackendError> {
        let response = request
            .headers(self.auth_header.clone())
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, BackendError> {
        let mut params = filter_params(filter);
        params.push(("select".to_string(), "*".to_string()));
        self.rows(self.client.get(self.table_url(table)).query(&params))
            .await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header(PREFER, "return=representation")
            .json(&rows);
        self.rows(request).await
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<usize, BackendError> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&filter_params(filter))
            .header(PREFER, "return=representation")
            .json(&patch);
        Ok(self.rows(request).await?.len())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, BackendError> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&filter_params(filter))
            .header(PREFER, "return=representation");
        Ok(self.rows(request).await?.len())
    }

    async fn upsert(&self, table: &str, conflict: &[&str], row: Row) -> Result<Row, BackendError> {
        // Needs a unique constraint on the conflict columns server-side.
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", conflict.join(","))])
            .header(PREFER, "resolution=merge-duplicates,return=representation")
            .json(&vec![row]);
        self.rows(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("upsert returned no row".to_string()))
    }

    async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        let content_type = if path.to_lowercase().ends_with(".pdf") {
            "application/pdf"
        } else {
            "application/octet-stream"
        };
        let response = self
            .client
            .post(url)
            .headers(self.auth_header.clone())
            .header(CONTENT_TYPE, content_type)
            .header(HeaderName::from_static("x-upsert"), "true")
            .body(bytes)
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?;
        Ok(self.public_url(bucket, path))
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let message = response.text().await.unwrap_or_default();
        Err(BackendError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// Translates a filter into PostgREST query parameters (`field=eq.value`, `order=field.asc`).
fn filter_params(filter: &Filter) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = filter
        .conditions
        .iter()
        .map(|(field, value)| {
            let value = match value {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            };
            (field.clone(), format!("eq.{}", value))
        })
        .collect();
    if let Some(field) = &filter.order_by {
        params.push(("order".to_string(), format!("{}.asc", field)));
    }
    params
}
