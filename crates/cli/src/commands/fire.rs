//! One-shot fire against an in-process node

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use signalgate::{
  Node,
  config::{Config, StateBackend},
  signal::SignalMessage,
};
use tokio::sync::mpsc;

/// Quiet period after which no more door emissions are expected
const SETTLE: Duration = Duration::from_millis(200);

pub async fn cmd_fire(mut config: Config, definitions: &Path, signal: &str, data: Option<&str>) -> Result<()> {
  config.node.definitions = Some(definitions.to_path_buf());
  config.node.state_backend = StateBackend::Memory;
  config.node.watch_definitions = false;

  let payload: Option<serde_json::Value> = data
    .map(serde_json::from_str)
    .transpose()
    .context("--data is not valid JSON")?;

  let node = Node::from_config(config).start().await.context("failed to start node")?;
  let (_, mut rx) = node.subscribe_all_doors().await?;

  let fire_id = match &payload {
    Some(value) => node.fire_with(signal, value, None).await?,
    None => node.fire(signal, None).await?,
  };

  let emissions = collect(&mut rx).await;
  node.shutdown().await;

  let report = serde_json::json!({
    "fire_id": fire_id,
    "signal": signal,
    "emissions": emissions
      .iter()
      .map(|message| serde_json::json!({
        "door": message.source.signal_id.name_or_uid(),
        "message": message,
      }))
      .collect::<Vec<_>>(),
  });
  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(())
}

async fn collect(rx: &mut mpsc::Receiver<SignalMessage>) -> Vec<SignalMessage> {
  let mut messages = Vec::new();
  while let Ok(Some(message)) = tokio::time::timeout(SETTLE, rx.recv()).await {
    messages.push(message);
  }
  messages
}
