//! Actor handles for communicating with actors
//!
//! Handles are cheap to clone and provide a way to send messages to actors.
//! They encapsulate the channel sender and wrap each request/reply pair in
//! a typed method.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
  door::{DoorError, DoorSnapshot, ReceiveOutcome, UpdateOutcome},
  message::{DoorRequest, Envelope, FireRequest, Reply, SignalRequest},
  signal::SignalError,
};
use crate::domain::{
  door::DoorDefinition,
  ids::{ActorAddress, DoorKind, FireId, SubscriptionId},
  signal::{SenderMetadata, SignalContent, SignalMessage, SignalSubscription},
};

/// Send a request and wait for its reply, giving up when `cancel` fires
async fn call<M, T, E>(
  tx: &mpsc::Sender<Envelope<M>>,
  cancel: &CancellationToken,
  build: impl FnOnce(Reply<T, E>) -> M,
) -> Result<Result<T, E>, SendError> {
  if cancel.is_cancelled() {
    return Err(SendError::Cancelled);
  }

  let (reply_tx, reply_rx) = oneshot::channel();
  let envelope = Envelope {
    cancel: cancel.clone(),
    payload: build(reply_tx),
  };

  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(SendError::Cancelled),
    sent = tx.send(envelope) => {
      sent.map_err(|_| SendError::ActorGone)?;
      tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SendError::Cancelled),
        reply = reply_rx => reply.map_err(|_| SendError::ActorGone),
      }
    }
  }
}

// ============================================================================
// Signal Handle
// ============================================================================

/// Handle to communicate with a SignalHandlerActor
#[derive(Clone, Debug)]
pub struct SignalHandle {
  uid: Uuid,
  tx: mpsc::Sender<Envelope<SignalRequest>>,
  stop: CancellationToken,
}

impl SignalHandle {
  pub(crate) fn new(uid: Uuid, tx: mpsc::Sender<Envelope<SignalRequest>>, stop: CancellationToken) -> Self {
    Self { uid, tx, stop }
  }

  pub fn uid(&self) -> Uuid {
    self.uid
  }

  pub fn address(&self) -> ActorAddress {
    ActorAddress::signal(self.uid)
  }

  pub async fn subscribe(&self, target: ActorAddress, cancel: &CancellationToken) -> Result<SubscriptionId, SignalError> {
    call(&self.tx, cancel, |reply| SignalRequest::Subscribe { target, reply }).await?
  }

  /// Returns true if the subscription existed
  pub async fn unsubscribe(&self, id: SubscriptionId, cancel: &CancellationToken) -> Result<bool, SignalError> {
    call(&self.tx, cancel, |reply| SignalRequest::Unsubscribe { id, reply }).await?
  }

  pub async fn unsubscribe_target(&self, target: ActorAddress, cancel: &CancellationToken) -> Result<bool, SignalError> {
    call(&self.tx, cancel, |reply| SignalRequest::UnsubscribeTarget { target, reply }).await?
  }

  /// Fire without payload
  pub async fn fire(
    &self,
    fire_id: FireId,
    source_address: Option<ActorAddress>,
    metadata: Option<SenderMetadata>,
    cancel: &CancellationToken,
  ) -> Result<FireId, SignalError> {
    let request = FireRequest::new(fire_id).from_address(source_address).with_metadata(metadata);
    self.fire_request(request, cancel).await
  }

  /// Fire carrying `data` as the payload
  pub async fn fire_with<T: Serialize>(
    &self,
    fire_id: FireId,
    source_address: Option<ActorAddress>,
    data: &T,
    metadata: Option<SenderMetadata>,
    cancel: &CancellationToken,
  ) -> Result<FireId, SignalError> {
    let content = SignalContent::from_value(data).map_err(SignalError::Content)?;
    let request = FireRequest::new(fire_id)
      .from_address(source_address)
      .with_metadata(metadata)
      .with_content(content);
    self.fire_request(request, cancel).await
  }

  pub async fn fire_request(&self, request: FireRequest, cancel: &CancellationToken) -> Result<FireId, SignalError> {
    call(&self.tx, cancel, |reply| SignalRequest::Fire { request, reply }).await?
  }

  pub async fn subscriptions(&self, cancel: &CancellationToken) -> Result<Vec<SignalSubscription>, SignalError> {
    call(&self.tx, cancel, |reply| SignalRequest::Subscriptions { reply }).await?
  }

  /// Stop the actor. Pending requests fail with `ActorGone`.
  pub fn shutdown(&self) {
    self.stop.cancel();
  }

  pub fn is_alive(&self) -> bool {
    !self.tx.is_closed() && !self.stop.is_cancelled()
  }
}

// ============================================================================
// Door Handle
// ============================================================================

/// Handle to communicate with a DoorActor
#[derive(Clone, Debug)]
pub struct DoorHandle {
  kind: DoorKind,
  uid: Uuid,
  tx: mpsc::Sender<Envelope<DoorRequest>>,
  stop: CancellationToken,
}

impl DoorHandle {
  pub(crate) fn new(kind: DoorKind, uid: Uuid, tx: mpsc::Sender<Envelope<DoorRequest>>, stop: CancellationToken) -> Self {
    Self { kind, uid, tx, stop }
  }

  pub fn uid(&self) -> Uuid {
    self.uid
  }

  pub fn kind(&self) -> &DoorKind {
    &self.kind
  }

  pub fn address(&self) -> ActorAddress {
    ActorAddress::door(self.kind.clone(), self.uid)
  }

  /// Bind the door to `definition`. Applying an identical definition is a no-op.
  pub async fn update(&self, definition: DoorDefinition, cancel: &CancellationToken) -> Result<UpdateOutcome, DoorError> {
    call(&self.tx, cancel, |reply| DoorRequest::Update {
      definition: Box::new(definition),
      reply,
    })
    .await?
  }

  pub async fn receive(&self, message: SignalMessage, cancel: &CancellationToken) -> Result<ReceiveOutcome, DoorError> {
    call(&self.tx, cancel, |reply| DoorRequest::Receive { message, reply }).await?
  }

  /// Re-evaluate the door without new input
  pub async fn stimulate(&self, cancel: &CancellationToken) -> Result<ReceiveOutcome, DoorError> {
    call(&self.tx, cancel, |reply| DoorRequest::Stimulate { reply: Some(reply) }).await?
  }

  /// Queue a stimulation without waiting for it
  pub(crate) fn try_stimulate(&self) -> Result<(), SendError> {
    let envelope = Envelope {
      cancel: CancellationToken::new(),
      payload: DoorRequest::Stimulate { reply: None },
    };
    self.tx.try_send(envelope).map_err(|_| SendError::ActorGone)
  }

  pub async fn subscribe(&self, target: ActorAddress, cancel: &CancellationToken) -> Result<SubscriptionId, DoorError> {
    call(&self.tx, cancel, |reply| DoorRequest::Subscribe { target, reply }).await?
  }

  pub async fn unsubscribe(&self, id: SubscriptionId, cancel: &CancellationToken) -> Result<bool, DoorError> {
    call(&self.tx, cancel, |reply| DoorRequest::Unsubscribe { id, reply }).await?
  }

  pub async fn unsubscribe_target(&self, target: ActorAddress, cancel: &CancellationToken) -> Result<bool, DoorError> {
    call(&self.tx, cancel, |reply| DoorRequest::UnsubscribeTarget { target, reply }).await?
  }

  /// Read-only snapshot of the door's state
  pub async fn status(&self, cancel: &CancellationToken) -> Result<DoorSnapshot, DoorError> {
    call(&self.tx, cancel, |reply| DoorRequest::Status { reply }).await?
  }

  pub fn shutdown(&self) {
    self.stop.cancel();
  }

  pub fn is_alive(&self) -> bool {
    !self.tx.is_closed() && !self.stop.is_cancelled()
  }
}

// ============================================================================
// Receivers
// ============================================================================

/// Anything that can be subscribed to a signal or a door
#[async_trait]
pub trait SignalReceiver: Send + Sync + std::fmt::Debug {
  async fn receive_signal(&self, message: SignalMessage, cancel: &CancellationToken) -> Result<(), DeliveryError>;
}

#[async_trait]
impl SignalReceiver for DoorHandle {
  async fn receive_signal(&self, message: SignalMessage, cancel: &CancellationToken) -> Result<(), DeliveryError> {
    match self.receive(message, cancel).await {
      Ok(_) => Ok(()),
      Err(DoorError::Cancelled) => Err(DeliveryError::Cancelled),
      Err(DoorError::Send(SendError::ActorGone)) => Err(DeliveryError::ActorGone),
      Err(e) => Err(DeliveryError::Rejected(e.to_string())),
    }
  }
}

// ============================================================================
// Errors
// ============================================================================

/// Error when sending to an actor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
  #[error("Actor has shut down")]
  ActorGone,
  #[error("Request cancelled")]
  Cancelled,
}

/// Error delivering one message to one subscriber
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
  #[error("Receiver has shut down")]
  ActorGone,
  #[error("Delivery cancelled")]
  Cancelled,
  #[error("Delivery timed out after {0:?}")]
  Timeout(Duration),
  #[error("Receiver rejected the message: {0}")]
  Rejected(String),
  #[error(transparent)]
  Unresolved(#[from] super::directory::DirectoryError),
}
