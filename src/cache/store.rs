use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::transactions::CacheEntry;

/// Single-file JSON store backing the transaction cache.
///
/// The file holds one JSON object mapping composite key to cache entry.
/// Reads and writes are whole-file; there is no locking, so a multi-process
/// deployment needs one writer.
pub struct JsonStore {
  path: PathBuf,
}

impl JsonStore {
  /// Open a store at the given path, or the default location.
  ///
  /// Ensures the parent directory exists; does not create the file itself.
  pub fn open(path: Option<PathBuf>) -> Result<Self> {
    let path = match path {
      Some(p) => p,
      None => Self::default_path()?,
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    Ok(Self { path })
  }

  /// Get the default cache file path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("etsync").join("transactions.json"))
  }

  #[allow(dead_code)]
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Load all entries from disk.
  ///
  /// Never fails the caller: a missing or unreadable file yields an empty
  /// map and the cache starts fresh.
  pub fn load(&self) -> HashMap<String, CacheEntry> {
    let contents = match std::fs::read_to_string(&self.path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!("No cache file at {}, starting empty", self.path.display());
        return HashMap::new();
      }
      Err(e) => {
        warn!(
          "Failed to read cache file {}, starting empty: {}",
          self.path.display(),
          e
        );
        return HashMap::new();
      }
    };

    match serde_json::from_str(&contents) {
      Ok(entries) => entries,
      Err(e) => {
        warn!(
          "Cache file {} is corrupt, starting empty: {}",
          self.path.display(),
          e
        );
        HashMap::new()
      }
    }
  }

  /// Write all entries to disk, replacing the previous contents.
  pub fn persist(&self, entries: &HashMap<String, CacheEntry>) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)
      .map_err(|e| eyre!("Failed to serialize cache: {}", e))?;

    std::fs::write(&self.path, json)
      .map_err(|e| eyre!("Failed to write cache file {}: {}", self.path.display(), e))
  }
}
