//! Node configuration
//!
//! Config priority: explicit path > user (`~/.config/signalgate/config.toml`) > defaults.
//! Every section is optional; missing keys fall back to their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::door::ValidationMode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("Failed to serialize config: {0}")]
  Serialize(#[from] toml::ser::Error),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
  /// Actor state lives only as long as the process
  Memory,
  /// One JSON file per actor under `<data_dir>/state`
  #[default]
  File,
}

impl std::str::FromStr for StateBackend {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "memory" => Ok(StateBackend::Memory),
      "file" => Ok(StateBackend::File),
      other => Err(format!("unknown state backend: {}", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
  /// Base directory for durable state and logs (default: platform data dir)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data_dir: Option<PathBuf>,
  /// TOML file holding signal and door definitions
  #[serde(skip_serializing_if = "Option::is_none")]
  pub definitions: Option<PathBuf>,
  pub state_backend: StateBackend,
  /// Mailbox size of every actor
  pub mailbox_capacity: usize,
  /// Reload definitions when the file changes
  pub watch_definitions: bool,
  pub watcher_debounce_ms: u64,
}

impl Default for NodeConfig {
  fn default() -> Self {
    Self {
      data_dir: None,
      definitions: None,
      state_backend: StateBackend::default(),
      mailbox_capacity: 256,
      watch_definitions: true,
      watcher_debounce_ms: 250,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
  /// Max number of parent hops a single fire may relay through
  pub max_relay_depth: usize,
  /// Per-subscriber delivery timeout
  pub delivery_timeout_ms: u64,
}

impl Default for SignalConfig {
  fn default() -> Self {
    Self {
      max_relay_depth: 32,
      delivery_timeout_ms: 30_000,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorConfig {
  /// Treat definition warnings as errors
  pub strict_validation: bool,
  pub formula_cache_capacity: u64,
  /// Delay added after a door's own emission leaves its window before it is
  /// re-evaluated
  pub rearm_grace_ms: u64,
}

impl Default for DoorConfig {
  fn default() -> Self {
    Self {
      strict_validation: false,
      formula_cache_capacity: 1024,
      rearm_grace_ms: 5,
    }
  }
}

impl DoorConfig {
  pub fn validation_mode(&self) -> ValidationMode {
    if self.strict_validation {
      ValidationMode::Strict
    } else {
      ValidationMode::Lenient
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// off, error, warn, info, debug, trace
  pub level: String,
  /// daily, hourly, never
  pub rotation: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub node: NodeConfig,
  pub signals: SignalConfig,
  pub doors: DoorConfig,
  pub logging: LoggingConfig,
}

impl Config {
  /// Load from an explicit path
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load `path` if given, else the user config, else defaults
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = path {
      return Self::load_from(path);
    }

    if let Some(user_path) = Self::user_config_path()
      && user_path.exists()
    {
      return Self::load_from(&user_path);
    }

    Ok(Self::default())
  }

  /// Get the user config path
  pub fn user_config_path() -> Option<PathBuf> {
    Some(crate::dirs::default_config_dir().join("config.toml"))
  }

  pub fn data_dir(&self) -> PathBuf {
    self.node.data_dir.clone().unwrap_or_else(crate::dirs::default_data_dir)
  }

  pub fn to_toml(&self) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(self)?)
  }

  /// Commented starter config
  pub fn generate_template() -> String {
    r#"# signalgate configuration

[node]
# data_dir = "/var/lib/signalgate"
# definitions = "definitions.toml"
state_backend = "file"        # memory | file
mailbox_capacity = 256
watch_definitions = true      # reload definitions when the file changes
watcher_debounce_ms = 250

[signals]
max_relay_depth = 32          # parent hops per fire
delivery_timeout_ms = 30000   # per-subscriber delivery timeout

[doors]
strict_validation = false     # treat definition warnings as errors
formula_cache_capacity = 1024
rearm_grace_ms = 5

[logging]
level = "info"                # off | error | warn | info | debug | trace
rotation = "daily"            # daily | hourly | never
"#
    .to_string()
  }
}
