use std::path::{Path, PathBuf};

const APP_DIR: &str = "signalgate";

/// Get the default base path for node data (actor state, logs)
///
/// Respects the following environment variables (in order of precedence):
/// 1. SIGNALGATE_DATA_DIR - explicit data directory override
/// 2. XDG_DATA_HOME - standard XDG data home directory
/// 3. dirs::data_local_dir() - platform default
pub fn default_data_dir() -> PathBuf {
  resolve_dir(
    std::env::var("SIGNALGATE_DATA_DIR").ok(),
    std::env::var("XDG_DATA_HOME").ok(),
    dirs::data_local_dir(),
  )
}

/// Get the default config directory
///
/// Respects the following environment variables (in order of precedence):
/// 1. SIGNALGATE_CONFIG_DIR - explicit config directory override
/// 2. XDG_CONFIG_HOME - standard XDG config home directory
/// 3. dirs::config_dir() - platform default
pub fn default_config_dir() -> PathBuf {
  resolve_dir(
    std::env::var("SIGNALGATE_CONFIG_DIR").ok(),
    std::env::var("XDG_CONFIG_HOME").ok(),
    dirs::config_dir(),
  )
}

fn resolve_dir(explicit: Option<String>, xdg_home: Option<String>, platform: Option<PathBuf>) -> PathBuf {
  // Check explicit override first, used as-is
  if let Some(dir) = explicit {
    return PathBuf::from(dir);
  }

  // Check the XDG home; ours lives in a subdirectory
  if let Some(xdg) = xdg_home {
    return PathBuf::from(xdg).join(APP_DIR);
  }

  // Fall back to platform default, then the working directory
  platform.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

/// Directory holding one JSON file per actor
pub fn state_dir(data_dir: &Path) -> PathBuf {
  data_dir.join("state")
}
