//! Long-running node

use std::path::PathBuf;

use anyhow::{Context, Result};
use signalgate::{Node, config::Config};
use tracing::info;

pub async fn cmd_run(mut config: Config, definitions: Option<PathBuf>, no_watch: bool) -> Result<()> {
  if let Some(path) = definitions {
    config.node.definitions = Some(path);
  }
  if no_watch {
    config.node.watch_definitions = false;
  }

  info!("Data dir: {:?}", config.data_dir());
  if let Some(path) = &config.node.definitions {
    info!("Definitions: {:?}", path);
  }

  let node = Node::from_config(config).start().await.context("failed to start node")?;
  node.run_until_ctrl_c().await;
  Ok(())
}
