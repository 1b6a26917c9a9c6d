use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::EasyTimeConfig;
use crate::sync::TransactionSource;

use super::api_types::{normalize_transactions, AuthResponse, TransactionRecord};

/// Responses smaller than this trigger the escalation plan: the server has
/// been observed to silently truncate results under some parameter
/// combinations, so a suspiciously small page is retried with other shapes.
pub const SMALL_PAGE_THRESHOLD: usize = 100;

/// A request shape for the transaction endpoint.
///
/// The plan is an explicit ordered list rather than parameter guessing:
/// the limited request first, then the same request without a limit, then
/// with an explicit zero offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchVariant {
  Limited(usize),
  Unlimited,
  OffsetZero(usize),
}

impl FetchVariant {
  fn query(&self) -> Vec<(&'static str, String)> {
    let mut params = vec![("ordering", "-punch_time".to_string())];
    match self {
      Self::Limited(limit) => params.push(("limit", limit.to_string())),
      Self::Unlimited => {}
      Self::OffsetZero(limit) => {
        params.push(("limit", limit.to_string()));
        params.push(("offset", "0".to_string()));
      }
    }
    params
  }
}

/// EasyTime Pro API client.
#[derive(Clone)]
pub struct EasyTimeClient {
  http: reqwest::Client,
  base: Url,
  username: String,
  password: String,
}

impl EasyTimeClient {
  pub fn new(config: &EasyTimeConfig, password: String) -> Result<Self> {
    let base = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid EasyTime URL {}: {}", config.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      username: config.username.clone(),
      password,
    })
  }

  /// Fetch one page of transactions with the given request shape.
  async fn fetch_page(&self, token: &str, variant: FetchVariant) -> Result<Vec<TransactionRecord>> {
    let url = self
      .base
      .join("/iclock/api/transactions/")
      .map_err(|e| eyre!("Failed to build transactions URL: {}", e))?;

    let response = self
      .http
      .get(url)
      .header("Authorization", format!("Token {}", token))
      .query(&variant.query())
      .send()
      .await
      .map_err(|e| eyre!("Transaction fetch failed: {}", e))?
      .error_for_status()
      .map_err(|e| eyre!("Transaction fetch rejected: {}", e))?;

    let body: Value = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to decode transaction response: {}", e))?;

    let records = normalize_transactions(&body);
    debug!(?variant, count = records.len(), "Fetched transaction page");
    Ok(records)
  }
}

impl TransactionSource for EasyTimeClient {
  async fn authenticate(&self) -> Result<String> {
    let url = self
      .base
      .join("/api-token-auth/")
      .map_err(|e| eyre!("Failed to build auth URL: {}", e))?;

    let response = self
      .http
      .post(url)
      .json(&serde_json::json!({
        "username": self.username,
        "password": self.password,
      }))
      .send()
      .await
      .map_err(|e| eyre!("Authentication request failed: {}", e))?
      .error_for_status()
      .map_err(|e| eyre!("Authentication rejected: {}", e))?;

    let auth: AuthResponse = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to decode auth response: {}", e))?;

    Ok(auth.token)
  }

  async fn fetch_transactions(&self, token: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
    let plan = [
      FetchVariant::Limited(limit),
      FetchVariant::Unlimited,
      FetchVariant::OffsetZero(limit),
    ];

    select_largest(&plan, SMALL_PAGE_THRESHOLD, |variant| {
      self.fetch_page(token, variant)
    })
    .await
  }
}

/// Run the escalation plan and keep the largest response.
///
/// The first variant is the canonical request; if it yields fewer than
/// `threshold` records, the remaining variants are tried in order and a
/// retry is adopted only when it returns strictly more records. Retry
/// failures are logged and ignored; only the first request can fail the
/// whole fetch.
pub async fn select_largest<T, F, Fut>(
  plan: &[FetchVariant],
  threshold: usize,
  mut fetch: F,
) -> Result<Vec<T>>
where
  F: FnMut(FetchVariant) -> Fut,
  Fut: Future<Output = Result<Vec<T>>>,
{
  let (first, rest) = plan
    .split_first()
    .ok_or_else(|| eyre!("Empty fetch plan"))?;

  let mut best = fetch(*first).await?;
  if best.len() >= threshold {
    return Ok(best);
  }

  warn!(
    count = best.len(),
    threshold, "Suspiciously small transaction page, trying other request shapes"
  );

  for variant in rest {
    match fetch(*variant).await {
      Ok(records) if records.len() > best.len() => {
        debug!(?variant, count = records.len(), "Adopting larger response");
        best = records;
      }
      Ok(records) => {
        debug!(?variant, count = records.len(), "Response not larger, keeping previous");
      }
      Err(e) => {
        warn!(?variant, "Escalation fetch failed: {}", e);
      }
    }
  }

  Ok(best)
}
