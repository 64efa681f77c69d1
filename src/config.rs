use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the ResQHub server, e.g. "https://resqhub.example"
  pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Version tag; doubles as the name of the current cache generation
  pub version: String,
  /// Critical resources precached at install time
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// The document served to failed navigations
  #[serde(default = "default_offline_fallback")]
  pub offline_fallback: String,
  /// Substring identifying the domain-data endpoint
  #[serde(default = "default_data_endpoint")]
  pub data_endpoint: String,
}

fn default_precache() -> Vec<String> {
  vec![
    "/".to_string(),
    "/offline.html".to_string(),
    "/build/assets/app.css".to_string(),
    "/build/assets/app.js".to_string(),
  ]
}

fn default_offline_fallback() -> String {
  "/offline.html".to_string()
}

fn default_data_endpoint() -> String {
  "/api/earthquakes".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Directory holding the cache and mirror databases
  /// (default: platform data dir, e.g. ~/.local/share/resq-offline)
  pub dir: Option<PathBuf>,
}

impl StorageConfig {
  /// Resolve the storage directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("resq-offline"))
  }

  /// Path of the response cache database.
  pub fn cache_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("cache.db"))
  }

  /// Path of the offline mirror database.
  pub fn mirror_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("mirror.db"))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./resq-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/resq-offline/config.yaml
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
        "No configuration file found. Create one at ~/.config/resq-offline/config.yaml\n\
                 See resq-offline.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("resq-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("resq-offline").join("config.yaml");
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
}
