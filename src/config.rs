use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub easytime: EasyTimeConfig,
  /// Days a punch stays cached before pruning (default 30)
  #[serde(default = "default_retention_days")]
  pub retention_days: i64,
  /// Override for the cache file location (default: <data_dir>/etsync/transactions.json)
  pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EasyTimeConfig {
  /// Base URL of the EasyTime Pro server, e.g. "http://10.0.0.5:8081"
  pub url: String,
  pub username: String,
  /// Request timeout in seconds (default 10)
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_retention_days() -> i64 {
  30
}

fn default_timeout_secs() -> u64 {
  10
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./etsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/etsync/config.yaml
  /// 4. ~/.config/etsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/etsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("etsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("etsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the EasyTime password from environment variables.
  ///
  /// Checks ETSYNC_EASYTIME_PASSWORD first, then EASYTIME_PASSWORD as fallback.
  /// The password never lives in the config file.
  pub fn get_password() -> Result<String> {
    std::env::var("ETSYNC_EASYTIME_PASSWORD")
      .or_else(|_| std::env::var("EASYTIME_PASSWORD"))
      .map_err(|_| {
        eyre!(
          "EasyTime password not found. Set ETSYNC_EASYTIME_PASSWORD or EASYTIME_PASSWORD environment variable."
        )
      })
  }
}
