use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Prefix shared by every cache store name
  pub app_name: String,
  /// Base URL that relative precache entries are resolved against
  pub origin: String,
  /// Version suffix of the app shell store. Bump on deploy to evict old assets.
  pub shell_version: u32,
  /// Version suffix of the API store
  pub api_version: u32,
  /// Resources stored in the app shell store at install time, in order
  pub precache: Vec<String>,
  pub api: ApiConfig,
  pub network: NetworkConfig,
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
  /// Anywhere in the URL text, query string included
  #[default]
  Substring,
  /// Exact host comparison and path-prefix exclusion
  Host,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Host text identifying API requests
  pub host: String,
  /// Path fragments on the API host that are never cached (streaming media)
  pub excluded_paths: Vec<String>,
  pub matching: MatchMode,
  /// Keep-alive target; defaults to `https://{host}/`
  pub ping_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Request timeout in seconds. 0 disables the timeout.
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// SQLite database location (default: $XDG_DATA_HOME/nmusic-offline/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      app_name: "nmusic".to_string(),
      origin: "http://127.0.0.1:5000/".to_string(),
      shell_version: 5,
      api_version: 1,
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "https://cdn.tailwindcss.com".to_string(),
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.5.1/css/all.min.css".to_string(),
        "https://cdn.jsdelivr.net/npm/sortablejs@latest/Sortable.min.js".to_string(),
        "https://fonts.googleapis.com/css2?family=Inter:wght@400;500;600;700&display=swap"
          .to_string(),
      ],
      api: ApiConfig::default(),
      network: NetworkConfig::default(),
      cache: CacheConfig::default(),
    }
  }
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      host: "nmusic.onrender.com".to_string(),
      excluded_paths: vec!["/play/".to_string()],
      matching: MatchMode::default(),
      ping_url: None,
    }
  }
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./nmusic-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/nmusic-offline/config.yaml
  ///
  /// Without any file the built-in defaults of the deployed worker are used.
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
      None => {
        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("nmusic-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("nmusic-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Name of the versioned app shell store, e.g. `nmusic-player-v5`.
  pub fn shell_store_name(&self) -> String {
    format!("{}-player-v{}", self.app_name, self.shell_version)
  }

  /// Name of the versioned API store, e.g. `nmusic-api-cache-v1`.
  pub fn api_store_name(&self) -> String {
    format!("{}-api-cache-v{}", self.app_name, self.api_version)
  }

  /// Resolve the precache manifest into absolute URLs, keeping order.
  ///
  /// Entries that resolve to the same URL are collapsed into the first one,
  /// since they would share a single cache entry.
  pub fn precache_urls(&self) -> Result<Vec<Url>> {
    let origin =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    let mut urls: Vec<Url> = Vec::with_capacity(self.precache.len());
    for entry in &self.precache {
      let mut url = origin
        .join(entry)
        .map_err(|e| eyre!("Invalid precache entry '{}': {}", entry, e))?;
      url.set_fragment(None);

      if urls.contains(&url) {
        warn!(entry = %entry, %url, "Skipping duplicate precache entry");
        continue;
      }
      urls.push(url);
    }

    Ok(urls)
  }

  pub fn ping_url(&self) -> Result<Url> {
    let raw = match &self.api.ping_url {
      Some(url) => url.clone(),
      None => format!("https://{}/", self.api.host),
    };
    Url::parse(&raw).map_err(|e| eyre!("Invalid ping URL '{}': {}", raw, e))
  }

  /// Default SQLite database location.
  pub fn cache_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("nmusic-offline").join("cache.db"))
  }
}
