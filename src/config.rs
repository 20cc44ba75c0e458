use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::api::parse_fixtures;
use crate::auth::{Auth, Credentials};
use crate::context::{DataContext, DEFAULT_TENANT_HEADER};
use crate::nav::{Navigation, NavigationItem};
use crate::store::{LocalCache, SqliteLocalCache};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub demo: DemoConfig,
  #[serde(default)]
  pub navigation: Vec<NavigationItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  /// Header carrying the tenant id (defaults to X-Proxy-Id)
  #[serde(default = "default_tenant_header")]
  pub tenant_header: String,
  #[serde(default = "default_true")]
  pub use_bearer_token: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// SQLite file (defaults to $XDG_DATA_HOME/navdata/cache.db)
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

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DemoConfig {
  #[serde(default)]
  pub enabled: bool,
  /// YAML file with a top-level `groups:` list
  pub fixtures: Option<PathBuf>,
  pub delay_ms: Option<u64>,
}

fn default_tenant_header() -> String {
  DEFAULT_TENANT_HEADER.to_string()
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./navdata.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/navdata/config.yaml
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
        "No configuration file found. Create one at ~/.config/navdata/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("navdata.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("navdata").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
  }

  pub fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Credentials from the environment.
  ///
  /// Reads NAVDATA_TOKEN, NAVDATA_USER and NAVDATA_PROXY_ID; all optional.
  pub fn credentials_from_env() -> Credentials {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    Credentials {
      token: var("NAVDATA_TOKEN"),
      user_id: var("NAVDATA_USER"),
      proxy_id: var("NAVDATA_PROXY_ID"),
      ..Credentials::default()
    }
  }

  /// Build the data context this config describes.
  pub fn build_context(&self, force_demo: bool) -> Result<DataContext> {
    let navigation = Navigation::new(self.api.base_url.clone(), self.navigation.clone());
    let auth = Auth::new(self.api.use_bearer_token).with_credentials(Self::credentials_from_env());

    let mut builder = DataContext::builder(navigation, auth).tenant_header(self.api.tenant_header.clone());

    if self.cache.enabled {
      let local = match &self.cache.path {
        Some(path) => SqliteLocalCache::open(path),
        None => SqliteLocalCache::open_default(),
      }
      .map_err(|e| eyre!("{}", e))?;
      builder = builder.local_cache(Arc::new(local) as Arc<dyn LocalCache>);
    }

    let demoing = force_demo || self.demo.enabled;
    if demoing || self.demo.fixtures.is_some() {
      let groups = match &self.demo.fixtures {
        Some(path) => {
          let contents = std::fs::read_to_string(path)
            .map_err(|e| eyre!("Failed to read demo fixtures {}: {}", path.display(), e))?;
          parse_fixtures(&contents).map_err(|e| eyre!("{}: {}", path.display(), e))?
        }
        None => Vec::new(),
      };
      builder = builder.demo(groups, demoing);
      if let Some(ms) = self.demo.delay_ms {
        builder = builder.demo_delay(Duration::from_millis(ms));
      }
    }

    builder.build().map_err(|e| eyre!("{}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::nav::StoreMode;

  const CONFIG: &str = r#"
api:
  base_url: https://api.example.com
cache:
  enabled: false
navigation:
  - name: cars
    path: fleet/cars
    local_cache: true
  - name: drivers
    aliases: [people]
    store: whole-last-updated
    expiry_hours: 2
"#;

  #[test]
  fn test_parse_config() {
    let config = Config::parse(CONFIG).unwrap();
    assert_eq!(config.api.tenant_header, "X-Proxy-Id");
    assert!(config.api.use_bearer_token);
    assert!(!config.cache.enabled);
    assert!(!config.demo.enabled);
    assert_eq!(config.navigation.len(), 2);
    assert_eq!(config.navigation[0].path.as_deref(), Some("fleet/cars"));
    assert_eq!(config.navigation[1].store, StoreMode::WholeLastUpdated);
    assert_eq!(config.navigation[1].expiry_hours, Some(2));
  }

  #[test]
  fn test_missing_explicit_config_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/navdata.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_build_demo_context_from_fixtures() {
    let dir = tempfile::tempdir().unwrap();
    let fixtures = dir.path().join("demo.yaml");
    std::fs::write(
      &fixtures,
      "groups:\n  - nav: cars\n    data:\n      - id: \"1\"\n        model: suv\n",
    )
    .unwrap();

    let mut config = Config::parse(CONFIG).unwrap();
    config.demo.fixtures = Some(fixtures);
    let ctx = config.build_context(true).unwrap();
    assert!(ctx.is_demoing());
    assert_eq!(ctx.api().demo().unwrap().data_for("cars").unwrap().len(), 1);
  }
}
