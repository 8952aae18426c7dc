//! Configuration commands

use std::path::Path;

use anyhow::{Result, bail};
use signalgate::config::Config;

pub async fn cmd_config_init(force: bool) -> Result<()> {
  let Some(config_path) = Config::user_config_path() else {
    bail!("Could not determine the user config directory");
  };

  if config_path.exists() && !force {
    bail!("Config file already exists: {:?} (use --force to overwrite)", config_path);
  }

  if let Some(parent) = config_path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(&config_path, Config::generate_template())?;

  println!("Created config: {:?}", config_path);
  println!("Edit the file to customize settings.");
  Ok(())
}

pub async fn cmd_config_show(explicit: Option<&Path>) -> Result<()> {
  let config = Config::load(explicit)?;

  match explicit {
    Some(path) => println!("Using config: {:?}", path),
    None => match Config::user_config_path() {
      Some(user_path) if user_path.exists() => println!("Using user config: {:?}", user_path),
      _ => println!("Using default configuration (no config file found)"),
    },
  }
  println!();
  println!("{}", config.to_toml()?);

  Ok(())
}
