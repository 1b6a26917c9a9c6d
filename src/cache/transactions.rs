use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::easytime::TransactionRecord;

use super::store::JsonStore;

/// Deduplication identity for a punch.
///
/// Two punches for the same employee at the exact same timestamp are the
/// same event; a re-fetch of that punch overwrites the cached copy.
pub fn composite_key(emp_code: &str, punch_time: &str) -> String {
  format!("{}_{}", emp_code, punch_time)
}

/// A cached punch plus the time the cache last touched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  #[serde(flatten)]
  pub record: TransactionRecord,
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(record: TransactionRecord) -> Self {
    Self {
      record,
      cached_at: Utc::now(),
    }
  }

  /// The entry's key, always derived from its own fields.
  pub fn key(&self) -> String {
    composite_key(&self.record.emp_code, &self.record.punch_time)
  }
}

/// Merge freshly fetched records into a cached snapshot.
///
/// Pure: builds a working map from `cached`, then overlays each of
/// `new_records` in iteration order with a refreshed `cached_at` (the fetch
/// cycle confirms the remote system still reports the punch). Returns the
/// map's values; no ordering guarantee, callers sort if they need one.
pub fn merge(new_records: &[TransactionRecord], cached: &[CacheEntry]) -> Vec<CacheEntry> {
  let mut map: HashMap<String, CacheEntry> = cached
    .iter()
    .map(|entry| (entry.key(), entry.clone()))
    .collect();

  for record in new_records {
    let entry = CacheEntry::new(record.clone());
    map.insert(entry.key(), entry);
  }

  map.into_values().collect()
}

/// In-memory punch cache backed by a [`JsonStore`].
///
/// Mutation is single-writer by construction (`&mut self`); a multi-threaded
/// host must wrap the cache in a mutex or a single-writer task, since the
/// merge/prune/persist sequence is not atomic.
pub struct TransactionCache {
  entries: HashMap<String, CacheEntry>,
  store: JsonStore,
}

impl TransactionCache {
  /// Hydrate the cache from the durable store.
  ///
  /// A missing or unreadable store yields an empty cache, never an error.
  pub fn open(store: JsonStore) -> Self {
    let entries = store.load();
    Self { entries, store }
  }

  /// Insert or overwrite a record, stamping `cached_at` with the current time.
  pub fn add_one(&mut self, record: TransactionRecord) {
    let entry = CacheEntry::new(record);
    self.entries.insert(entry.key(), entry);
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries.contains_key(key)
  }

  /// Snapshot of all entries.
  pub fn entries(&self) -> Vec<CacheEntry> {
    self.entries.values().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  #[allow(dead_code)]
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Evict entries whose punch time is strictly older than `now - window`.
  ///
  /// Returns the number of evicted entries. Entries whose timestamp does not
  /// parse are kept; pruning must never drop data on a parse failure.
  pub fn prune_older_than(&mut self, window: chrono::Duration) -> usize {
    self.prune_at(Utc::now(), window)
  }

  fn prune_at(&mut self, now: DateTime<Utc>, window: chrono::Duration) -> usize {
    let cutoff = now - window;
    let before = self.entries.len();

    self.entries.retain(|key, entry| {
      match parse_punch_time(&entry.record.punch_time) {
        Some(ts) => ts >= cutoff,
        None => {
          warn!("Unparsable punch_time in cache entry {}, keeping", key);
          true
        }
      }
    });

    before - self.entries.len()
  }

  /// Flush the cache to the durable store, best-effort.
  ///
  /// A failed write is logged and otherwise ignored; the next successful
  /// persist catches up. This is a polling cache, not a ledger.
  pub fn persist(&self) {
    if let Err(e) = self.store.persist(&self.entries) {
      warn!("Failed to persist transaction cache: {}", e);
    }
  }
}

/// Parse a punch timestamp as the appliance formats it, with an RFC 3339
/// fallback for newer firmware.
fn parse_punch_time(s: &str) -> Option<DateTime<Utc>> {
  NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
    .map(|dt| dt.and_utc())
    .ok()
    .or_else(|| {
      DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
    })
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;
  use std::collections::HashSet;

  fn record(emp_code: &str, punch_time: &str) -> TransactionRecord {
    TransactionRecord {
      emp_code: emp_code.to_string(),
      punch_time: punch_time.to_string(),
      punch_state: None,
      extra: HashMap::new(),
    }
  }

  fn record_with_state(emp_code: &str, punch_time: &str, state: &str) -> TransactionRecord {
    TransactionRecord {
      punch_state: Some(state.to_string()),
      ..record(emp_code, punch_time)
    }
  }

  fn temp_cache() -> (tempfile::TempDir, TransactionCache) {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStore::open(Some(dir.path().join("transactions.json"))).unwrap();
    (dir, TransactionCache::open(store))
  }

  fn format_punch(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
  }

  #[test]
  fn test_key_derived_from_fields() {
    let entry = CacheEntry::new(record("1042", "2024-05-01 08:55:12"));
    assert_eq!(entry.key(), "1042_2024-05-01 08:55:12");
  }

  #[test]
  fn test_add_one_overwrites_same_key() {
    let (_dir, mut cache) = temp_cache();
    cache.add_one(record_with_state("1042", "2024-05-01 08:55:12", "0"));
    cache.add_one(record_with_state("1042", "2024-05-01 08:55:12", "1"));

    assert_eq!(cache.len(), 1);
    let entry = &cache.entries()[0];
    assert_eq!(entry.record.punch_state.as_deref(), Some("1"));
  }

  #[test]
  fn test_keys_unique_after_mixed_mutations() {
    let (_dir, mut cache) = temp_cache();
    cache.add_one(record("1042", "2024-05-01 08:55:12"));
    cache.add_one(record("1177", "2024-05-01 09:01:44"));
    cache.add_one(record("1042", "2024-05-01 08:55:12"));

    let merged = merge(
      &[record("1042", "2024-05-01 08:55:12"), record("1300", "2024-05-01 10:00:00")],
      &cache.entries(),
    );

    let keys: HashSet<String> = merged.iter().map(|e| e.key()).collect();
    assert_eq!(keys.len(), merged.len());
    assert_eq!(merged.len(), 3);
  }

  #[test]
  fn test_merge_overwrite_wins_and_refreshes_cached_at() {
    let old = CacheEntry {
      record: record_with_state("1042", "2024-05-01 08:55:12", "0"),
      cached_at: Utc::now() - Duration::days(3),
    };

    let merged = merge(&[record_with_state("1042", "2024-05-01 08:55:12", "1")], &[old.clone()]);

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].record.punch_state.as_deref(), Some("1"));
    assert!(merged[0].cached_at > old.cached_at);
  }

  #[test]
  fn test_merge_is_idempotent() {
    let new_records = vec![
      record("1042", "2024-05-01 08:55:12"),
      record("1177", "2024-05-01 09:01:44"),
    ];
    let cached = vec![CacheEntry::new(record("1300", "2024-04-30 17:12:00"))];

    let first = merge(&new_records, &cached);
    let second = merge(&new_records, &first);

    let keys = |entries: &[CacheEntry]| -> HashSet<String> {
      entries.iter().map(|e| e.key()).collect()
    };
    assert_eq!(keys(&first), keys(&second));
    assert_eq!(second.len(), 3);
    for entry in &second {
      let counterpart = first.iter().find(|e| e.key() == entry.key()).unwrap();
      assert_eq!(entry.record, counterpart.record);
    }
  }

  #[test]
  fn test_merge_preserves_cached_records() {
    // Cache is the superset: merging never loses previously cached records
    let cached = vec![
      CacheEntry::new(record("1042", "2024-05-01 08:55:12")),
      CacheEntry::new(record("1177", "2024-05-01 09:01:44")),
    ];
    let merged = merge(&[record("1300", "2024-05-01 10:00:00")], &cached);

    assert_eq!(merged.len(), 3);
  }

  #[test]
  fn test_prune_retention_boundary() {
    use chrono::TimeZone;

    let (_dir, mut cache) = temp_cache();
    // Whole-second clock so the formatted punch times round-trip exactly
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let window = Duration::days(30);

    cache.add_one(record("1042", &format_punch(now - window)));
    cache.add_one(record("1177", &format_punch(now - window - Duration::seconds(1))));

    let pruned = cache.prune_at(now, window);

    assert_eq!(pruned, 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.entries()[0].record.emp_code, "1042");
  }

  #[test]
  fn test_prune_keeps_unparsable_timestamps() {
    let (_dir, mut cache) = temp_cache();
    cache.add_one(record("1042", "not-a-timestamp"));
    cache.add_one(record("1177", "2001-01-01 00:00:00"));

    let pruned = cache.prune_at(Utc::now(), Duration::days(30));

    assert_eq!(pruned, 1);
    assert!(cache.contains("1042_not-a-timestamp"));
  }

  #[test]
  fn test_persist_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transactions.json");

    let store = JsonStore::open(Some(path.clone())).unwrap();
    let mut cache = TransactionCache::open(store);
    cache.add_one(record("1042", "2024-05-01 08:55:12"));
    cache.persist();

    let reopened = TransactionCache::open(JsonStore::open(Some(path)).unwrap());
    assert_eq!(reopened.len(), 1);
    assert!(reopened.contains("1042_2024-05-01 08:55:12"));
  }

  #[test]
  fn test_parse_punch_time_formats() {
    assert!(parse_punch_time("2024-05-01 08:55:12").is_some());
    assert!(parse_punch_time("2024-05-01 08:55:12.500").is_some());
    assert!(parse_punch_time("2024-05-01T08:55:12+00:00").is_some());
    assert!(parse_punch_time("yesterday").is_none());
  }
}
