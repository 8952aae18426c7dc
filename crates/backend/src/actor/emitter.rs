//! Fan-out of one fired message to every subscriber
//!
//! Each subscriber gets its own delivery future; all of them run
//! concurrently and are awaited together. A failing or slow subscriber is
//! logged and counted, never allowed to hold up the others.

use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{directory::ActorDirectory, handle::DeliveryError};
use crate::domain::{ids::ActorAddress, signal::SignalMessage};

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
  pub delivered: usize,
  pub failed: usize,
}

pub(crate) async fn fan_out(
  directory: &ActorDirectory,
  from: &ActorAddress,
  targets: Vec<ActorAddress>,
  message: SignalMessage,
  timeout: Duration,
  cancel: &CancellationToken,
) -> DeliveryReport {
  if targets.is_empty() {
    return DeliveryReport::default();
  }

  let deliveries = targets.into_iter().map(|target| {
    let message = message.clone();
    async move {
      let result = deliver(directory, &target, message, timeout, cancel).await;
      (target, result)
    }
  });

  let mut report = DeliveryReport::default();
  for (target, result) in join_all(deliveries).await {
    match result {
      Ok(()) => report.delivered += 1,
      Err(e) => {
        report.failed += 1;
        warn!(from = %from, target = %target, fire_id = %message.source.fire_id, error = %e, "Signal delivery failed");
      }
    }
  }

  debug!(
    from = %from,
    fire_id = %message.source.fire_id,
    delivered = report.delivered,
    failed = report.failed,
    "Fan-out complete"
  );
  report
}

async fn deliver(
  directory: &ActorDirectory,
  target: &ActorAddress,
  message: SignalMessage,
  timeout: Duration,
  cancel: &CancellationToken,
) -> Result<(), DeliveryError> {
  let receiver = directory.receiver(target)?;
  tokio::time::timeout(timeout, receiver.receive_signal(message, cancel))
    .await
    .map_err(|_| DeliveryError::Timeout(timeout))?
}
