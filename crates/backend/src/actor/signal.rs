//! SignalHandlerActor - owns one signal's subscriber list and fires it
//!
//! The actor initializes lazily on its first request: it resolves its own
//! definition through the [`DefinitionProvider`](crate::definition::DefinitionProvider),
//! caches the parent handler and loads the persisted subscriptions.
//! Initialization failures are returned to the caller and retried on the
//! next request.
//!
//! Firing builds the occurrence inside the actor, then hands delivery to a
//! spawned task: the mailbox keeps serving while subscribers and the
//! parent chain are notified, and the caller's reply is sent once both are
//! done.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{
  directory::{ActorDirectory, ActorRuntime},
  emitter::fan_out,
  handle::{SendError, SignalHandle},
  message::{Envelope, FireRequest, SignalRequest},
};
use crate::{
  definition::DefinitionError,
  domain::{
    ids::{ActorAddress, FireId, SubscriptionId},
    signal::{SignalDefinition, SignalMessage, SignalSource, SignalSubscription, SubscriptionSet},
  },
  state::StoreError,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
  #[error("Signal definition not found: {0}")]
  SignalNotFound(Uuid),
  #[error("Relay chain exceeded {max} hops at signal {uid}")]
  RelayDepthExceeded { uid: Uuid, max: usize },
  #[error("Relay to parent signal {parent} failed: {source}")]
  Relay {
    parent: Uuid,
    #[source]
    source: Box<SignalError>,
  },
  #[error("Failed to serialize signal content: {0}")]
  Content(#[source] serde_json::Error),
  #[error(transparent)]
  Definition(#[from] DefinitionError),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Send(SendError),
  #[error("Operation cancelled")]
  Cancelled,
}

impl From<SendError> for SignalError {
  fn from(e: SendError) -> Self {
    match e {
      SendError::Cancelled => SignalError::Cancelled,
      other => SignalError::Send(other),
    }
  }
}

// ============================================================================
// State
// ============================================================================

/// Durable state of a signal handler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalHandlerState {
  #[serde(default)]
  pub subscriptions: SubscriptionSet,
}

struct Initialized {
  definition: SignalDefinition,
  parent: Option<SignalHandle>,
  state: SignalHandlerState,
}

// ============================================================================
// Actor
// ============================================================================

pub struct SignalHandlerActor {
  uid: Uuid,
  address: ActorAddress,
  runtime: Arc<ActorRuntime>,
  directory: Weak<ActorDirectory>,
  rx: mpsc::Receiver<Envelope<SignalRequest>>,
  stop: CancellationToken,
  init: Option<Initialized>,
}

impl SignalHandlerActor {
  /// Spawn the actor and return its handle
  pub fn spawn(
    uid: Uuid,
    runtime: Arc<ActorRuntime>,
    directory: Weak<ActorDirectory>,
    stop: CancellationToken,
  ) -> SignalHandle {
    let (tx, rx) = mpsc::channel(runtime.settings.mailbox_capacity);
    let handle = SignalHandle::new(uid, tx, stop.clone());

    let actor = Self {
      uid,
      address: ActorAddress::signal(uid),
      runtime,
      directory,
      rx,
      stop,
      init: None,
    };
    tokio::spawn(actor.run());

    handle
  }

  async fn run(mut self) {
    debug!(signal = %self.uid, "SignalHandlerActor started");

    loop {
      tokio::select! {
        // Check cancellation first (biased)
        biased;

        _ = self.stop.cancelled() => {
          debug!(signal = %self.uid, "SignalHandlerActor shutting down (cancelled)");
          break;
        }

        msg = self.rx.recv() => {
          match msg {
            Some(envelope) => self.handle_message(envelope).await,
            None => {
              debug!(signal = %self.uid, "SignalHandlerActor shutting down (channel closed)");
              break;
            }
          }
        }
      }
    }
  }

  async fn handle_message(&mut self, envelope: Envelope<SignalRequest>) {
    let Envelope { cancel, payload } = envelope;

    match payload {
      SignalRequest::Subscribe { target, reply } => {
        let _ = reply.send(self.subscribe(target, &cancel).await);
      }
      SignalRequest::Unsubscribe { id, reply } => {
        let _ = reply.send(self.unsubscribe(id, &cancel).await);
      }
      SignalRequest::UnsubscribeTarget { target, reply } => {
        let _ = reply.send(self.unsubscribe_target(target, &cancel).await);
      }
      SignalRequest::Subscriptions { reply } => {
        let result = self
          .ensure_initialized()
          .await
          .map(|init| init.state.subscriptions.as_slice().to_vec());
        let _ = reply.send(result);
      }
      SignalRequest::Fire { request, reply } => {
        let prepared = self.prepare_fire(request, &cancel).await;
        match prepared {
          Ok(job) => {
            tokio::spawn(async move {
              let _ = reply.send(job.run(&cancel).await);
            });
          }
          Err(e) => {
            let _ = reply.send(Err(e));
          }
        }
      }
    }
  }

  /// Resolve the definition, parent and persisted state on first use
  async fn ensure_initialized(&mut self) -> Result<&mut Initialized, SignalError> {
    if self.init.is_none() {
      let mut definitions = self.runtime.provider.signals_by_uid(self.uid).await?;
      if definitions.is_empty() {
        return Err(SignalError::SignalNotFound(self.uid));
      }
      if definitions.len() > 1 {
        let names: Vec<String> = definitions.iter().map(|d| d.signal_id.name_or_uid()).collect();
        warn!(signal = %self.uid, names = ?names, "Multiple signal definitions share this uid, using the first");
      }
      let definition = definitions.swap_remove(0);

      let parent = match definition.parent_uid() {
        Some(parent_uid) => Some(self.directory()?.signal(parent_uid)),
        None => None,
      };

      let state = self
        .runtime
        .store
        .load_as::<SignalHandlerState>(&self.address.state_key())
        .await?
        .unwrap_or_default();

      info!(
        signal = %definition.signal_id,
        parent = ?definition.parent_uid(),
        subscribers = state.subscriptions.len(),
        "Signal handler initialized"
      );
      self.init = Some(Initialized {
        definition,
        parent,
        state,
      });
    }

    self.init.as_mut().ok_or(SignalError::SignalNotFound(self.uid))
  }

  fn directory(&self) -> Result<Arc<ActorDirectory>, SignalError> {
    self.directory.upgrade().ok_or(SignalError::Send(SendError::ActorGone))
  }

  /// Apply `change` to a copy of the state and commit it unless cancelled
  async fn mutate<T>(
    &mut self,
    cancel: &CancellationToken,
    change: impl FnOnce(&mut SignalHandlerState) -> T,
  ) -> Result<T, SignalError> {
    let key = self.address.state_key();
    let store = Arc::clone(&self.runtime.store);
    let init = self.ensure_initialized().await?;

    let mut next = init.state.clone();
    let result = change(&mut next);

    if cancel.is_cancelled() {
      return Err(SignalError::Cancelled);
    }
    if next != init.state {
      store.save_as(&key, &next).await?;
      init.state = next;
    }
    Ok(result)
  }

  async fn subscribe(&mut self, target: ActorAddress, cancel: &CancellationToken) -> Result<SubscriptionId, SignalError> {
    let id = self
      .mutate(cancel, |state| state.subscriptions.add_or_update(target.clone()))
      .await?;
    debug!(signal = %self.uid, target = %target, subscription = %id, "Subscribed");
    Ok(id)
  }

  async fn unsubscribe(&mut self, id: SubscriptionId, cancel: &CancellationToken) -> Result<bool, SignalError> {
    let removed = self.mutate(cancel, |state| state.subscriptions.remove(id)).await?;
    debug!(signal = %self.uid, subscription = %id, removed, "Unsubscribed");
    Ok(removed)
  }

  async fn unsubscribe_target(&mut self, target: ActorAddress, cancel: &CancellationToken) -> Result<bool, SignalError> {
    let removed = self
      .mutate(cancel, |state| state.subscriptions.remove_target(&target))
      .await?;
    debug!(signal = %self.uid, target = %target, removed, "Unsubscribed target");
    Ok(removed)
  }

  /// Build the occurrence and everything the delivery task needs
  async fn prepare_fire(&mut self, request: FireRequest, cancel: &CancellationToken) -> Result<FireJob, SignalError> {
    if cancel.is_cancelled() {
      return Err(SignalError::Cancelled);
    }

    let max_depth = self.runtime.settings.max_relay_depth;
    let timeout = self.runtime.settings.delivery_timeout;
    let now = self.runtime.clock.now();
    let directory = self.directory()?;
    let address = self.address.clone();
    let uid = self.uid;

    let init = self.ensure_initialized().await?;

    if request.depth > max_depth {
      return Err(SignalError::RelayDepthExceeded { uid, max: max_depth });
    }

    let source = SignalSource {
      fire_id: request.fire_id,
      signal_id: init.definition.signal_id.clone(),
      is_door: false,
      send_utc: now,
      source_address: request.source_address.clone(),
      metadata: request.metadata.clone(),
      content: request.content.clone(),
      origins: Vec::new(),
    };

    trace!(
      signal = %init.definition.signal_id,
      fire_id = %request.fire_id,
      depth = request.depth,
      subscribers = init.state.subscriptions.len(),
      "Firing"
    );

    Ok(FireJob {
      directory,
      address,
      targets: init.state.subscriptions.targets(),
      message: SignalMessage::new(source, now),
      parent: init.parent.clone(),
      relay: request.relayed(),
      timeout,
    })
  }
}

/// Delivery half of a fire, run outside the actor
struct FireJob {
  directory: Arc<ActorDirectory>,
  address: ActorAddress,
  targets: Vec<ActorAddress>,
  message: SignalMessage,
  parent: Option<SignalHandle>,
  relay: FireRequest,
  timeout: std::time::Duration,
}

impl FireJob {
  async fn run(self, cancel: &CancellationToken) -> Result<FireId, SignalError> {
    let fire_id = self.message.source.fire_id;

    // Local subscribers and the parent are independent edges
    fan_out(&self.directory, &self.address, self.targets, self.message, self.timeout, cancel).await;

    if let Some(parent) = self.parent {
      if cancel.is_cancelled() {
        return Err(SignalError::Cancelled);
      }
      let parent_uid = parent.uid();
      parent
        .fire_request(self.relay, cancel)
        .await
        .map_err(|source| match source {
          SignalError::Cancelled => SignalError::Cancelled,
          source => SignalError::Relay {
            parent: parent_uid,
            source: Box::new(source),
          },
        })?;
    }

    Ok(fire_id)
  }
}
