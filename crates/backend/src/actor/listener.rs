use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::handle::{DeliveryError, SignalReceiver};
use crate::domain::signal::SignalMessage;

/// External receiver forwarding every delivered message into a channel
///
/// Register it with the directory, then subscribe its address to a signal
/// or a door.
#[derive(Debug, Clone)]
pub struct ChannelListener {
  tx: mpsc::Sender<SignalMessage>,
}

impl ChannelListener {
  pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SignalMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Self { tx }, rx)
  }
}

#[async_trait]
impl SignalReceiver for ChannelListener {
  async fn receive_signal(&self, message: SignalMessage, cancel: &CancellationToken) -> Result<(), DeliveryError> {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(DeliveryError::Cancelled),
      sent = self.tx.send(message) => sent.map_err(|_| DeliveryError::ActorGone),
    }
  }
}
