//! Reconciliation of remote attendance punches into the durable cache.
//!
//! One cycle is strictly: authenticate (on demand) → fetch with the
//! escalation plan → add/merge → prune → persist → respond. Remote trouble
//! anywhere up to the merge degrades to serving the cache; from the merge
//! on, the local sequence always completes.

use chrono::Duration;
use color_eyre::Result;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tracing::{info, warn};

use crate::cache::{composite_key, merge, CacheEntry, TransactionCache};
use crate::easytime::TransactionRecord;

/// The remote side of a reconcile cycle.
///
/// [`crate::easytime::EasyTimeClient`] is the real implementation; tests
/// substitute fakes.
pub trait TransactionSource {
  fn authenticate(&self) -> impl Future<Output = Result<String>> + Send;

  /// Fetch up to `limit` transactions ordered by punch time descending.
  fn fetch_transactions(
    &self,
    token: &str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<TransactionRecord>>> + Send;
}

/// Why a cycle served cached data instead of fresh data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DegradedReason {
  Auth(String),
  Fetch(String),
}

impl fmt::Display for DegradedReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Auth(detail) => write!(
        f,
        "Serving cached data: authentication with the attendance server failed ({})",
        detail
      ),
      Self::Fetch(detail) => write!(
        f,
        "Serving cached data: attendance server unavailable ({})",
        detail
      ),
    }
  }
}

/// Outcome of one reconcile cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
  /// Fresh data was fetched and merged
  Fresh,
  /// The remote side failed; the cache alone was served
  Degraded(DegradedReason),
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
  /// Merged record set (cache ∪ newly fetched), unordered
  pub records: Vec<CacheEntry>,
  pub count: usize,
  /// The limit the caller asked for
  pub limit: usize,
  /// Distinct fetched keys that were not in the cache before this cycle
  pub new_transactions: usize,
  /// Cache size before this cycle
  pub cached_transactions: usize,
  /// Entries evicted by retention pruning this cycle
  pub pruned: usize,
  pub status: SyncStatus,
}

impl ReconcileOutcome {
  /// Human-readable degradation note, if any.
  pub fn note(&self) -> Option<String> {
    match &self.status {
      SyncStatus::Fresh => None,
      SyncStatus::Degraded(reason) => Some(reason.to_string()),
    }
  }
}

/// Orchestrates fetch cycles against a [`TransactionSource`] and the cache.
///
/// Mutation goes through `&mut self`; a multi-threaded host must put the
/// reconciler behind a mutex or a single-writer task.
pub struct Reconciler<S> {
  source: S,
  cache: TransactionCache,
  token: Option<String>,
  retention: Duration,
}

impl<S: TransactionSource> Reconciler<S> {
  pub fn new(source: S, cache: TransactionCache, retention: Duration) -> Self {
    Self {
      source,
      cache,
      token: None,
      retention,
    }
  }

  /// Run one reconcile cycle.
  ///
  /// Never fails for remote trouble: auth and fetch failures degrade to
  /// serving the cache (even when it is empty) with a
  /// [`SyncStatus::Degraded`] status callers can inspect.
  pub async fn fetch_and_reconcile(&mut self, limit: usize) -> ReconcileOutcome {
    let cached = self.cache.entries();

    let new_records = match self.fetch(limit).await {
      Ok(records) => records,
      Err(reason) => {
        warn!("{}", reason);
        return ReconcileOutcome {
          count: cached.len(),
          cached_transactions: cached.len(),
          records: cached,
          limit,
          new_transactions: 0,
          pruned: 0,
          status: SyncStatus::Degraded(reason),
        };
      }
    };

    let new_keys = new_records
      .iter()
      .map(|r| composite_key(&r.emp_code, &r.punch_time))
      .filter(|key| !self.cache.contains(key))
      .collect::<std::collections::HashSet<_>>();
    let new_count = new_keys.len();

    // Cache first, so state is current even if the caller drops the result
    for record in &new_records {
      self.cache.add_one(record.clone());
    }

    let merged = merge(&new_records, &cached);

    // Prune the live cache, not the candidate result; the result may lag
    // behind retention by one cycle
    let pruned = self.cache.prune_older_than(self.retention);
    self.cache.persist();

    info!(
      fetched = new_records.len(),
      new = new_count,
      cached = cached.len(),
      merged = merged.len(),
      pruned,
      cache_size = self.cache.len(),
      "Reconcile cycle complete"
    );

    ReconcileOutcome {
      count: merged.len(),
      records: merged,
      limit,
      new_transactions: new_count,
      cached_transactions: cached.len(),
      pruned,
      status: SyncStatus::Fresh,
    }
  }

  /// Authenticate if needed, then fetch. Remote failures map to the
  /// degradation reason served to callers.
  async fn fetch(
    &mut self,
    limit: usize,
  ) -> std::result::Result<Vec<TransactionRecord>, DegradedReason> {
    let token = match self.token.clone() {
      Some(token) => token,
      None => match self.source.authenticate().await {
        Ok(token) => {
          self.token = Some(token.clone());
          token
        }
        Err(e) => return Err(DegradedReason::Auth(e.to_string())),
      },
    };

    self
      .source
      .fetch_transactions(&token, limit)
      .await
      .map_err(|e| DegradedReason::Fetch(e.to_string()))
  }
}
