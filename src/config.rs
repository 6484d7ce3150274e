use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::leads::{LeadField, Owner, SortKey, DEFAULT_FIELDS};

/// Bounds for the automatic refresh interval, in seconds.
pub const AUTO_REFRESH_RANGE: std::ops::RangeInclusive<u64> = 60..=900;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Ordered fields that decide whether a lead counts as modified
  #[serde(default = "default_fingerprint_fields")]
  pub fingerprint_fields: Vec<LeadField>,
  #[serde(default)]
  pub sort: SortKey,
}

fn default_fingerprint_fields() -> Vec<LeadField> {
  DEFAULT_FIELDS.to_vec()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  pub url: String,
  pub owner_id: String,
  pub owner_email: String,
  /// Team whose leads are visible to the owner, if any
  pub team: Option<String>,
  #[serde(default = "default_list_path")]
  pub list_path: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl RemoteConfig {
  /// Identity whose leads this config fetches.
  pub fn owner(&self) -> Owner {
    Owner {
      id: self.owner_id.clone(),
      email: self.owner_email.clone(),
      team: self.team.clone(),
    }
  }
}

fn default_list_path() -> String {
  "leads".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Minimum gap between manual refreshes
  pub cooldown_ms: u64,
  /// Automatic refresh interval; disabled when unset
  pub auto_refresh_secs: Option<u64>,
  pub countdown_tick_ms: u64,
  /// How long new/modified markers stay visible
  pub flag_display_ms: u64,
  /// Age after which a cached list is refetched on load
  pub stale_after_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      cooldown_ms: 120_000,
      auto_refresh_secs: None,
      countdown_tick_ms: 1_000,
      flag_display_ms: 5_000,
      stale_after_secs: 300,
    }
  }
}

impl SyncConfig {
  pub fn cooldown(&self) -> Duration {
    Duration::from_millis(self.cooldown_ms)
  }

  pub fn auto_refresh(&self) -> Option<Duration> {
    self.auto_refresh_secs.map(Duration::from_secs)
  }

  pub fn countdown_tick(&self) -> Duration {
    Duration::from_millis(self.countdown_tick_ms)
  }

  pub fn flag_display(&self) -> Duration {
    Duration::from_millis(self.flag_display_ms)
  }

  pub fn stale_after(&self) -> Duration {
    Duration::from_secs(self.stale_after_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  /// SQLite file (default: $XDG_DATA_HOME/leadsync/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./leadsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/leadsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/leadsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("leadsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("leadsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if let Some(secs) = self.sync.auto_refresh_secs {
      if !AUTO_REFRESH_RANGE.contains(&secs) {
        return Err(eyre!(
          "sync.auto_refresh_secs must be between {} and {}, got {}",
          AUTO_REFRESH_RANGE.start(),
          AUTO_REFRESH_RANGE.end(),
          secs
        ));
      }
    }
    if self.sync.countdown_tick_ms == 0 {
      return Err(eyre!("sync.countdown_tick_ms must be positive"));
    }
    if self.remote.timeout_secs == 0 {
      return Err(eyre!("remote.timeout_secs must be positive"));
    }
    if self.fingerprint_fields.is_empty() {
      return Err(eyre!("fingerprint_fields must name at least one field"));
    }
    Ok(())
  }

  /// Default location of the cache database.
  pub fn cache_path(&self) -> Result<PathBuf> {
    if let Some(p) = &self.cache.path {
      return Ok(p.clone());
    }
    Ok(data_dir()?.join("cache.db"))
  }

  /// Get the API token from the environment, if one is set.
  ///
  /// Checks LEADSYNC_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("LEADSYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

/// Per-user data directory for the cache and logs.
pub fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(base.join("leadsync"))
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINIMAL: &str = r#"
remote:
  url: https://crm.example.com/api/
  owner_id: "17"
  owner_email: rep@example.com
"#;

  #[test]
  fn test_defaults() {
    let config = Config::from_yaml(MINIMAL).unwrap();
    assert_eq!(config.sync.cooldown(), Duration::from_millis(120_000));
    assert_eq!(config.sync.countdown_tick(), Duration::from_secs(1));
    assert_eq!(config.sync.flag_display(), Duration::from_secs(5));
    assert!(config.sync.auto_refresh().is_none());
    assert!(config.cache.enabled);
    assert_eq!(config.remote.list_path, "leads");
    assert_eq!(config.fingerprint_fields, DEFAULT_FIELDS.to_vec());
    assert_eq!(config.sort, SortKey::CreatedDesc);
  }

  #[test]
  fn test_overrides() {
    let yaml = format!(
      "{}sync:\n  cooldown_ms: 5000\n  auto_refresh_secs: 300\nfingerprint_fields: [status, comments]\nsort: name_asc\n",
      MINIMAL
    );
    let config = Config::from_yaml(&yaml).unwrap();
    assert_eq!(config.sync.cooldown_ms, 5000);
    assert_eq!(config.sync.auto_refresh(), Some(Duration::from_secs(300)));
    assert_eq!(config.sync.flag_display_ms, 5000);
    assert_eq!(
      config.fingerprint_fields,
      vec![LeadField::Status, LeadField::Comments]
    );
    assert_eq!(config.sort, SortKey::NameAsc);
  }

  #[test]
  fn test_auto_refresh_out_of_range() {
    let yaml = format!("{}sync:\n  auto_refresh_secs: 5\n", MINIMAL);
    assert!(Config::from_yaml(&yaml).is_err());
  }

  #[test]
  fn test_empty_fingerprint_fields_rejected() {
    let yaml = format!("{}fingerprint_fields: []\n", MINIMAL);
    assert!(Config::from_yaml(&yaml).is_err());
  }

  #[test]
  fn test_owner_from_remote() {
    let yaml = MINIMAL.replace("owner_email: rep@example.com", "owner_email: rep@example.com\n  team: east");
    let owner = Config::from_yaml(&yaml).unwrap().remote.owner();
    assert_eq!(owner.id, "17");
    assert_eq!(owner.team.as_deref(), Some("east"));
  }
}
