use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use fileswap_types::{Clock, SwapRecord, SwapRow, SwapUpdate};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::json;
use tracing::{debug, warn};

use crate::{StoreError, StoreResult, SwapStore, diagnose_update};

/// Hosted relational store spoken to over its PostgREST interface
/// (`{base_url}/rest/v1/{table}`), e.g. a Supabase project.
///
/// Attachment is a conditional `PATCH` whose filters encode the slot guard,
/// so the hosted database performs the compare-and-set.
pub struct PostgrestStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    clock: Arc<dyn Clock>,
}

impl PostgrestStore {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        table: &str,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table),
            api_key: api_key.into(),
            clock,
        })
    }

    fn request(&self, method: Method, filters: &[(&str, String)]) -> RequestBuilder {
        self.client
            .request(method, &self.endpoint)
            .query(filters)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
    }

    async fn fetch(&self, id: &str) -> StoreResult<Option<SwapRecord>> {
        let resp = self
            .request(
                Method::GET,
                &[("select", "*".to_string()), ("swap_id", format!("eq.{}", id))],
            )
            .send()
            .await?;
        Ok(rows(resp).await?.into_iter().next().map(SwapRecord::from))
    }
}

#[async_trait]
impl SwapStore for PostgrestStore {
    async fn put(&self, record: SwapRecord) -> StoreResult<()> {
        let id = record.id.clone();
        let resp = self
            .request(Method::POST, &[])
            .json(&[SwapRow::from(record)])
            .send()
            .await?;
        if resp.status() == StatusCode::CONFLICT {
            return Err(StoreError::Conflict(id));
        }
        rows(resp).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<SwapRecord> {
        let now = self.clock.now();
        match self.fetch(id).await? {
            Some(record) if record.is_expired_at(now) => Err(StoreError::Expired(id.to_string())),
            Some(record) => Ok(record),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn update(&self, id: &str, update: SwapUpdate) -> StoreResult<SwapRecord> {
        let now = self.clock.now();
        let desc = update.descriptor();
        let mut filters = vec![
            ("swap_id", format!("eq.{}", id)),
            ("expires_at", format!("gte.{}", timestamp(now))),
        ];
        let body = match &update {
            SwapUpdate::AttachFile1(_) => {
                filters.push(("file1_url", "is.null".to_string()));
                json!({
                    "file1_url": desc.locator,
                    "file1_name": desc.display_name,
                    "file1_size": desc.size_bytes,
                })
            }
            SwapUpdate::AttachFile2(_) => {
                filters.push(("file1_url", "not.is.null".to_string()));
                filters.push(("file2_url", "is.null".to_string()));
                json!({
                    "file2_url": desc.locator,
                    "file2_name": desc.display_name,
                    "file2_size": desc.size_bytes,
                })
            }
        };

        let resp = self
            .request(Method::PATCH, &filters)
            .json(&body)
            .send()
            .await?;
        match rows(resp).await?.into_iter().next() {
            Some(row) => Ok(row.into()),
            None => {
                debug!("Guarded update of swap {} matched nothing", id);
                let current = self.fetch(id).await?;
                Err(diagnose_update(id, current, &update, now))
            }
        }
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let resp = self
            .request(Method::DELETE, &[("swap_id", format!("eq.{}", id))])
            .send()
            .await?;
        rows(resp).await?;
        Ok(())
    }

    async fn sweep_expired(&self) -> StoreResult<Vec<SwapRecord>> {
        let now = self.clock.now();
        let resp = self
            .request(
                Method::DELETE,
                &[("expires_at", format!("lt.{}", timestamp(now)))],
            )
            .send()
            .await?;
        Ok(rows(resp).await?.into_iter().map(SwapRecord::from).collect())
    }

    fn backend(&self) -> &'static str {
        "postgrest"
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a representation response. Empty bodies (204) read as no rows.
async fn rows(resp: Response) -> StoreResult<Vec<SwapRow>> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!("Hosted store returned {}: {}", status, body);
        return Err(StoreError::Backend(format!(
            "hosted store returned {}",
            status
        )));
    }
    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}
