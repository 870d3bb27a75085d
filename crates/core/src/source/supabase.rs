use crate::config::Settings;
use crate::domain::broker::{snapshots_from_rows, BrokerRow, BrokerSnapshot};
use crate::source::BrokerSource;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TABLE: &str = "brokers";
const DEFAULT_ORDER_COLUMN: &str = "overall_rating";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Reads the broker table through the hosted Postgres REST gateway (PostgREST).
#[derive(Debug, Clone)]
pub struct SupabaseBrokerSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    table: String,
    order_column: String,
}

impl SupabaseBrokerSource {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_supabase_url()?.to_string();
        let api_key = settings.require_supabase_service_role_key()?.to_string();

        let timeout_secs = std::env::var("SUPABASE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let table = std::env::var("SUPABASE_BROKERS_TABLE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());

        let order_column = std::env::var("SUPABASE_ORDER_COLUMN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_ORDER_COLUMN.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build supabase http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            table,
            order_column,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.base_url.trim_end_matches('/'),
            self.table.trim_matches('/')
        )
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn get_rows(&self, limit: i64, order_column: Option<&str>) -> Result<(StatusCode, String)> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&query_params(limit, order_column))
            .send()
            .await
            .context("supabase brokers request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read supabase response")?;
        Ok((status, text))
    }
}

/// Without an order column the server returns rows unordered; the broker cache sorts them.
fn query_params(limit: i64, order_column: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("select", "*".to_string()),
        ("is_active", "eq.true".to_string()),
    ];
    if let Some(column) = order_column {
        params.push(("order", format!("{column}.desc.nullslast")));
    }
    params.push(("limit", limit.to_string()));
    params
}

fn parse_rows(text: &str) -> Result<Vec<BrokerSnapshot>> {
    let rows = serde_json::from_str::<Vec<BrokerRow>>(text).with_context(|| {
        format!(
            "broker rows are not a JSON array of objects: {}",
            truncate_body(text)
        )
    })?;
    Ok(snapshots_from_rows(rows))
}

/// Response bodies end up in logs and sentry; keep only the head.
fn truncate_body(text: &str) -> &str {
    match text.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[async_trait::async_trait]
impl BrokerSource for SupabaseBrokerSource {
    fn source_name(&self) -> &'static str {
        "supabase"
    }

    async fn fetch_active_brokers(&self, limit: i64) -> Result<Vec<BrokerSnapshot>> {
        let (mut status, mut text) = self.get_rows(limit, Some(&self.order_column)).await?;

        // PostgREST answers 400 for an unknown order column (e.g. a table that names it
        // `avg_rating`). Retry unordered.
        if status == StatusCode::BAD_REQUEST {
            tracing::warn!(
                order_column = %self.order_column,
                body = truncate_body(&text),
                "supabase rejected order column; retrying without server-side order"
            );
            (status, text) = self.get_rows(limit, None).await?;
        }

        if !status.is_success() {
            anyhow::bail!("supabase HTTP {status}: {}", truncate_body(&text));
        }

        parse_rows(&text)
    }
}
