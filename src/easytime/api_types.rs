//! Serde-deserializable types matching EasyTime Pro API responses.
//!
//! These types stay close to the wire format. Most terminal/device metadata
//! is passed through untouched via the flattened catch-all; the cache only
//! interprets `emp_code` and `punch_time`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// A single attendance punch as reported by the appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
  pub emp_code: String,
  /// Punch timestamp as the appliance formats it ("YYYY-MM-DD HH:MM:SS")
  pub punch_time: String,
  /// Punch direction indicator (check-in/check-out code)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub punch_state: Option<String>,
  // Catch-all for terminal serial, area alias, verify mode, etc.
  #[serde(flatten)]
  pub extra: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
  pub token: String,
}

/// Extract the transaction list from a response body.
///
/// The server's envelope is inconsistent across endpoints and versions, so
/// the known shapes are tried in a fixed order:
/// 1. `{"data": [...]}`
/// 2. `{"data": {"data": [...]}}`
/// 3. `{"results": [...]}`
///
/// When none match, a warning is logged and an empty list is returned; an
/// unrecognized envelope is not a fetch failure.
pub fn normalize_transactions(body: &Value) -> Vec<TransactionRecord> {
  let items = if let Some(items) = body.get("data").and_then(Value::as_array) {
    items
  } else if let Some(items) = body
    .get("data")
    .and_then(|d| d.get("data"))
    .and_then(Value::as_array)
  {
    items
  } else if let Some(items) = body.get("results").and_then(Value::as_array) {
    items
  } else {
    warn!(
      "No known transaction envelope in response (top-level keys: {:?})",
      body
        .as_object()
        .map(|o| o.keys().cloned().collect::<Vec<_>>())
        .unwrap_or_default()
    );
    return Vec::new();
  };

  let mut records = Vec::with_capacity(items.len());
  for item in items {
    match serde_json::from_value::<TransactionRecord>(item.clone()) {
      Ok(record) => records.push(record),
      Err(e) => warn!("Skipping malformed transaction record: {}", e),
    }
  }
  records
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn sample_body() -> Value {
    json!([
      {"emp_code": "1042", "punch_time": "2024-05-01 08:55:12", "punch_state": "0", "terminal_sn": "CJDE1234"},
      {"emp_code": "1177", "punch_time": "2024-05-01 09:01:44", "punch_state": "1"}
    ])
  }

  #[test]
  fn test_flat_data_envelope() {
    let records = normalize_transactions(&json!({"data": sample_body()}));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].emp_code, "1042");
  }

  #[test]
  fn test_nested_data_envelope() {
    let records = normalize_transactions(&json!({"data": {"data": sample_body(), "count": 2}}));
    assert_eq!(records.len(), 2);
  }

  #[test]
  fn test_results_envelope() {
    let records = normalize_transactions(&json!({"results": sample_body(), "next": null}));
    assert_eq!(records.len(), 2);
  }

  #[test]
  fn test_all_envelopes_normalize_identically() {
    let flat = normalize_transactions(&json!({"data": sample_body()}));
    let nested = normalize_transactions(&json!({"data": {"data": sample_body()}}));
    let results = normalize_transactions(&json!({"results": sample_body()}));
    assert_eq!(flat, nested);
    assert_eq!(flat, results);
  }

  #[test]
  fn test_unknown_envelope_yields_empty() {
    let records = normalize_transactions(&json!({"transactions": sample_body()}));
    assert!(records.is_empty());
  }

  #[test]
  fn test_malformed_record_is_skipped() {
    let body = json!({"data": [
      {"emp_code": "1042", "punch_time": "2024-05-01 08:55:12"},
      {"punch_time": "2024-05-01 09:00:00"}
    ]});
    let records = normalize_transactions(&body);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].emp_code, "1042");
  }

  #[test]
  fn test_device_metadata_passes_through() {
    let records = normalize_transactions(&json!({"data": sample_body()}));
    assert_eq!(
      records[0].extra.get("terminal_sn"),
      Some(&json!("CJDE1234"))
    );
  }
}
