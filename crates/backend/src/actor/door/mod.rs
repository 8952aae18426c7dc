//! DoorActor - aggregates sources into a gated emission of its own signal
//!
//! The actor is generic over the door's behavior: a [`DoorFactory`] from
//! the [`DoorKindRegistry`](super::registry::DoorKindRegistry) turns a
//! definition into a [`DoorLogic`], which decides on every received message
//! (or stimulation) whether the door emits.
//!
//! Each mutating request works on a copy of the durable state. The copy is
//! persisted and swapped in only if the request was not cancelled, so a
//! cancelled request leaves no trace. Emissions are delivered from a
//! spawned task; the reply is sent once every subscriber has been served.

pub mod logical;
pub mod relay;

use std::{
  collections::BTreeMap,
  sync::{Arc, Weak},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{
  directory::{ActorDirectory, ActorRuntime, DirectoryError},
  emitter::{DeliveryReport, fan_out},
  handle::{DoorHandle, SendError},
  message::{DoorRequest, Envelope, Reply},
  signal::SignalError,
};
use crate::{
  domain::{
    door::{BuildError, DoorDefinition, ValidationError},
    ids::{ActorAddress, DoorKind, FireId, SignalId, SubscriptionId},
    signal::{SenderMetadata, SignalContent, SignalMessage, SignalSource, SubscriptionSet},
    status::{DoorHandlerState, RetentionPolicy},
  },
  formula::{FormulaCache, FormulaError},
  state::StoreError,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DoorError {
  #[error("Door {0} has no definition")]
  NotBound(Uuid),
  #[error("Definition for door {got} sent to door {expected}")]
  IdentityMismatch { expected: Uuid, got: Uuid },
  #[error("Door kind '{kind}' cannot run a {behavior} definition")]
  BehaviorMismatch { kind: DoorKind, behavior: &'static str },
  #[error("Failed to subscribe to source {source_uid}: {reason}")]
  Subscribe { source_uid: Uuid, reason: String },
  #[error(transparent)]
  Build(#[from] BuildError),
  #[error(transparent)]
  Formula(#[from] FormulaError),
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error(transparent)]
  Directory(#[from] DirectoryError),
  #[error(transparent)]
  Signal(Box<SignalError>),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Send(SendError),
  #[error("Operation cancelled")]
  Cancelled,
}

impl From<SendError> for DoorError {
  fn from(e: SendError) -> Self {
    match e {
      SendError::Cancelled => DoorError::Cancelled,
      other => DoorError::Send(other),
    }
  }
}

impl From<SignalError> for DoorError {
  fn from(e: SignalError) -> Self {
    match e {
      SignalError::Cancelled => DoorError::Cancelled,
      SignalError::Send(e) => DoorError::Send(e),
      SignalError::Store(e) => DoorError::Store(e),
      other => DoorError::Signal(Box::new(other)),
    }
  }
}

// ============================================================================
// Behavior seam
// ============================================================================

/// What a door emits when its logic says so
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Emission {
  pub content: Option<SignalContent>,
  pub metadata: Option<SenderMetadata>,
  /// Occurrences responsible for the emission
  pub origins: Vec<SignalSource>,
}

/// Decision logic of one door kind, built from a definition
pub trait DoorLogic: Send + Sync + std::fmt::Debug {
  /// Record `message` into `state` and decide whether the door emits
  fn on_receive(&self, state: &mut DoorHandlerState, message: &SignalMessage, now: DateTime<Utc>) -> Option<Emission>;

  /// Re-evaluate without new input
  fn on_stimulate(&self, _state: &mut DoorHandlerState, _now: DateTime<Utc>) -> Option<Emission> {
    None
  }

  /// When the door should next re-evaluate on its own, if ever
  fn rearm_at(&self, _state: &DoorHandlerState, _now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    None
  }
}

/// Builds the [`DoorLogic`] of one door kind
#[async_trait]
pub trait DoorFactory: Send + Sync {
  async fn build(&self, definition: &DoorDefinition, formulas: &FormulaCache) -> Result<Box<dyn DoorLogic>, DoorError>;
}

// ============================================================================
// State and replies
// ============================================================================

/// Durable state of a door
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoorState {
  #[serde(default)]
  pub definition: Option<DoorDefinition>,
  #[serde(default)]
  pub subscriptions: SubscriptionSet,
  #[serde(default)]
  pub statuses: DoorHandlerState,
  /// Our subscriptions on each source, by source uid
  #[serde(default)]
  pub source_subscriptions: BTreeMap<Uuid, SubscriptionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
  /// The definition was already applied
  Unchanged,
  Applied,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveOutcome {
  /// Set when the door emitted
  pub fired: Option<FireId>,
  pub delivery: DeliveryReport,
}

/// Read-only view of a door
#[derive(Debug, Clone, PartialEq)]
pub struct DoorSnapshot {
  pub address: ActorAddress,
  pub state: DoorState,
}

// ============================================================================
// Actor
// ============================================================================

pub struct DoorActor {
  uid: Uuid,
  address: ActorAddress,
  factory: Arc<dyn DoorFactory>,
  runtime: Arc<ActorRuntime>,
  directory: Weak<ActorDirectory>,
  rx: mpsc::Receiver<Envelope<DoorRequest>>,
  stop: CancellationToken,
  /// Sender side of our own mailbox, for the rearm timer
  handle: DoorHandle,

  state: Option<DoorState>,
  logic: Option<Box<dyn DoorLogic>>,
  rearm: Option<JoinHandle<()>>,
}

impl DoorActor {
  pub fn spawn(
    kind: DoorKind,
    uid: Uuid,
    factory: Arc<dyn DoorFactory>,
    runtime: Arc<ActorRuntime>,
    directory: Weak<ActorDirectory>,
    stop: CancellationToken,
  ) -> DoorHandle {
    let (tx, rx) = mpsc::channel(runtime.settings.mailbox_capacity);
    let handle = DoorHandle::new(kind.clone(), uid, tx, stop.clone());

    let actor = Self {
      uid,
      address: ActorAddress::door(kind, uid),
      factory,
      runtime,
      directory,
      rx,
      stop,
      handle: handle.clone(),
      state: None,
      logic: None,
      rearm: None,
    };
    tokio::spawn(actor.run());

    handle
  }

  async fn run(mut self) {
    debug!(door = %self.address, "DoorActor started");

    loop {
      tokio::select! {
        // Check cancellation first (biased)
        biased;

        _ = self.stop.cancelled() => {
          debug!(door = %self.address, "DoorActor shutting down (cancelled)");
          break;
        }

        msg = self.rx.recv() => {
          match msg {
            Some(envelope) => self.handle_message(envelope).await,
            None => {
              debug!(door = %self.address, "DoorActor shutting down (channel closed)");
              break;
            }
          }
        }
      }
    }

    if let Some(timer) = self.rearm.take() {
      timer.abort();
    }
  }

  async fn handle_message(&mut self, envelope: Envelope<DoorRequest>) {
    let Envelope { cancel, payload } = envelope;

    match payload {
      DoorRequest::Update { definition, reply } => {
        let _ = reply.send(self.update(*definition, &cancel).await);
      }
      DoorRequest::Receive { message, reply } => {
        let prepared = self.receive(message, &cancel).await;
        self.dispatch(prepared, Some(reply), cancel);
      }
      DoorRequest::Stimulate { reply } => {
        let prepared = self.stimulate(&cancel).await;
        self.dispatch(prepared, reply, cancel);
      }
      DoorRequest::Subscribe { target, reply } => {
        let result = self
          .mutate(&cancel, |state| state.subscriptions.add_or_update(target.clone()))
          .await;
        debug!(door = %self.address, target = %target, ok = result.is_ok(), "Subscribe");
        let _ = reply.send(result);
      }
      DoorRequest::Unsubscribe { id, reply } => {
        let _ = reply.send(self.mutate(&cancel, |state| state.subscriptions.remove(id)).await);
      }
      DoorRequest::UnsubscribeTarget { target, reply } => {
        let result = self
          .mutate(&cancel, |state| state.subscriptions.remove_target(&target))
          .await;
        let _ = reply.send(result);
      }
      DoorRequest::Status { reply } => {
        let address = self.address.clone();
        let result = self.ensure_loaded().await.map(|state| DoorSnapshot {
          address,
          state: state.clone(),
        });
        let _ = reply.send(result);
      }
    }
  }

  /// Send the reply now, or after delivering the emission
  fn dispatch(
    &mut self,
    prepared: Result<Option<EmitJob>, DoorError>,
    reply: Option<Reply<ReceiveOutcome, DoorError>>,
    cancel: CancellationToken,
  ) {
    self.schedule_rearm();

    match prepared {
      Ok(Some(job)) => {
        tokio::spawn(async move {
          let outcome = job.run(&cancel).await;
          if let Some(reply) = reply {
            let _ = reply.send(Ok(outcome));
          }
        });
      }
      Ok(None) => {
        if let Some(reply) = reply {
          let _ = reply.send(Ok(ReceiveOutcome::default()));
        }
      }
      Err(e) => match reply {
        Some(reply) => {
          let _ = reply.send(Err(e));
        }
        None => warn!(door = %self.address, error = %e, "Door stimulation failed"),
      },
    }
  }

  // --------------------------------------------------------------------------
  // State
  // --------------------------------------------------------------------------

  /// Load the persisted state, rebinding to its definition if any
  async fn ensure_loaded(&mut self) -> Result<&mut DoorState, DoorError> {
    if self.state.is_none() {
      let key = self.address.state_key();
      let state = self
        .runtime
        .store
        .load_as::<DoorState>(&key)
        .await?
        .unwrap_or_else(|| DoorState {
          statuses: DoorHandlerState::new(self.uid, &[]),
          ..DoorState::default()
        });

      if let Some(definition) = &state.definition {
        match self.factory.build(definition, &self.runtime.formulas).await {
          Ok(logic) => {
            info!(door = %definition.door_id, kind = %definition.kind, "Door resumed from persisted definition");
            self.logic = Some(logic);
          }
          Err(e) => warn!(door = %self.address, error = %e, "Persisted door definition no longer builds"),
        }
      }
      self.state = Some(state);
    }

    self.state.as_mut().ok_or(DoorError::NotBound(self.uid))
  }

  /// Bind from the definition source when nothing was persisted yet
  async fn ensure_bound(&mut self, cancel: &CancellationToken) -> Result<(), DoorError> {
    self.ensure_loaded().await?;
    if self.logic.is_some() {
      return Ok(());
    }

    let definition = self
      .runtime
      .provider
      .door_by_uid(self.uid)
      .await
      .map_err(DirectoryError::from)?
      .ok_or(DoorError::NotBound(self.uid))?;
    self.update(definition, cancel).await.map(|_| ())
  }

  async fn mutate<T>(
    &mut self,
    cancel: &CancellationToken,
    change: impl FnOnce(&mut DoorState) -> T,
  ) -> Result<T, DoorError> {
    let key = self.address.state_key();
    let store = Arc::clone(&self.runtime.store);
    let state = self.ensure_loaded().await?;

    let mut next = state.clone();
    let result = change(&mut next);

    if cancel.is_cancelled() {
      return Err(DoorError::Cancelled);
    }
    if next != *state {
      store.save_as(&key, &next).await?;
      *state = next;
    }
    Ok(result)
  }

  async fn commit(&mut self, next: DoorState, cancel: &CancellationToken) -> Result<(), DoorError> {
    if cancel.is_cancelled() {
      return Err(DoorError::Cancelled);
    }
    self
      .runtime
      .store
      .save_as(&self.address.state_key(), &next)
      .await?;
    self.state = Some(next);
    Ok(())
  }

  fn directory(&self) -> Result<Arc<ActorDirectory>, DoorError> {
    self.directory.upgrade().ok_or(DoorError::Send(SendError::ActorGone))
  }

  // --------------------------------------------------------------------------
  // Update
  // --------------------------------------------------------------------------

  async fn update(&mut self, definition: DoorDefinition, cancel: &CancellationToken) -> Result<UpdateOutcome, DoorError> {
    if definition.uid() != self.uid {
      return Err(DoorError::IdentityMismatch {
        expected: self.uid,
        got: definition.uid(),
      });
    }

    let current = self.ensure_loaded().await?.clone();
    if self.logic.is_some()
      && current
        .definition
        .as_ref()
        .is_some_and(|existing| existing.is_identical(&definition))
    {
      trace!(door = %definition.door_id, "Definition unchanged");
      return Ok(UpdateOutcome::Unchanged);
    }

    definition.validate(self.runtime.settings.validation_mode)?;
    let logic = self.factory.build(&definition, &self.runtime.formulas).await?;

    let mut next = current;
    next.statuses.initialize(self.uid, &definition.source_uids());
    next.source_subscriptions = self
      .sync_source_subscriptions(&definition, &next.source_subscriptions, cancel)
      .await?;
    next.definition = Some(definition);

    self.commit(next, cancel).await?;
    self.logic = Some(logic);

    if let Some(definition) = self.state.as_ref().and_then(|s| s.definition.as_ref()) {
      info!(
        door = %definition.door_id,
        kind = %definition.kind,
        sources = definition.source_uids().len(),
        "Door definition applied"
      );
    }
    Ok(UpdateOutcome::Applied)
  }

  /// Subscribe to every declared source and drop subscriptions on sources
  /// that are no longer declared
  async fn sync_source_subscriptions(
    &self,
    definition: &DoorDefinition,
    existing: &BTreeMap<Uuid, SubscriptionId>,
    cancel: &CancellationToken,
  ) -> Result<BTreeMap<Uuid, SubscriptionId>, DoorError> {
    let directory = self.directory()?;
    let me = self.address.clone();
    let mut subscriptions = BTreeMap::new();

    for signal in &definition.signal_sources {
      let id = directory
        .signal(signal.uid)
        .subscribe(me.clone(), cancel)
        .await
        .map_err(|e| subscribe_error(signal.uid, DoorError::from(e)))?;
      subscriptions.insert(signal.uid, id);
    }
    for door in &definition.door_sources {
      let subscribed = match directory.door_by_uid(door.uid).await {
        Ok(source) => source.subscribe(me.clone(), cancel).await,
        Err(e) => Err(DoorError::from(e)),
      };
      let id = subscribed.map_err(|e| subscribe_error(door.uid, e))?;
      subscriptions.insert(door.uid, id);
    }

    let declared: Vec<Uuid> = definition.source_uids();
    for removed in existing.keys().filter(|uid| !declared.contains(uid)) {
      let result = match directory.door_by_uid(*removed).await {
        Ok(door) => door.unsubscribe_target(me.clone(), cancel).await.map(|_| ()),
        Err(_) => directory
          .signal(*removed)
          .unsubscribe_target(me.clone(), cancel)
          .await
          .map(|_| ())
          .map_err(DoorError::from),
      };
      if let Err(e) = result {
        warn!(door = %self.address, source = %removed, error = %e, "Failed to unsubscribe from removed source");
      }
    }

    Ok(subscriptions)
  }

  // --------------------------------------------------------------------------
  // Receive and stimulate
  // --------------------------------------------------------------------------

  async fn receive(&mut self, message: SignalMessage, cancel: &CancellationToken) -> Result<Option<EmitJob>, DoorError> {
    self.evaluate(cancel, |logic, statuses, now| logic.on_receive(statuses, &message, now))
      .await
  }

  async fn stimulate(&mut self, cancel: &CancellationToken) -> Result<Option<EmitJob>, DoorError> {
    self.evaluate(cancel, |logic, statuses, now| logic.on_stimulate(statuses, now))
      .await
  }

  async fn evaluate(
    &mut self,
    cancel: &CancellationToken,
    decide: impl FnOnce(&dyn DoorLogic, &mut DoorHandlerState, DateTime<Utc>) -> Option<Emission>,
  ) -> Result<Option<EmitJob>, DoorError> {
    if cancel.is_cancelled() {
      return Err(DoorError::Cancelled);
    }
    self.ensure_bound(cancel).await?;

    let now = self.runtime.clock.now();
    let mut next = self.ensure_loaded().await?.clone();
    let definition = next.definition.clone().ok_or(DoorError::NotBound(self.uid))?;
    let logic = self.logic.as_deref().ok_or(DoorError::NotBound(self.uid))?;

    let emission = decide(logic, &mut next.statuses, now);

    let emitted = emission.map(|emission| {
      let source = SignalSource {
        fire_id: FireId::new(),
        signal_id: SignalId::from(&definition.door_id),
        is_door: true,
        send_utc: now,
        source_address: Some(self.address.clone()),
        metadata: emission.metadata,
        content: emission.content,
        origins: emission.origins,
      };
      next.statuses.record_own_fire(source.clone(), definition.keeps_history());
      source
    });
    next.statuses.apply_retention(now, RetentionPolicy::from(&definition));

    let targets = next.subscriptions.targets();
    self.commit(next, cancel).await?;

    let Some(source) = emitted else {
      return Ok(None);
    };

    info!(
      door = %definition.door_id,
      fire_id = %source.fire_id,
      origins = source.origins.len(),
      subscribers = targets.len(),
      "Door fired"
    );

    Ok(Some(EmitJob {
      directory: self.directory()?,
      address: self.address.clone(),
      targets,
      message: SignalMessage::new(source, now),
      timeout: self.runtime.settings.delivery_timeout,
    }))
  }

  /// Arrange a stimulation for when the logic wants one. A previously
  /// scheduled timer is always replaced.
  fn schedule_rearm(&mut self) {
    if let Some(timer) = self.rearm.take() {
      timer.abort();
    }

    let (Some(logic), Some(state)) = (self.logic.as_deref(), self.state.as_ref()) else {
      return;
    };
    let now = self.runtime.clock.now();
    let Some(at) = logic.rearm_at(&state.statuses, now) else {
      return;
    };

    let delay = (at - now).to_std().unwrap_or_default() + self.runtime.settings.rearm_grace;
    let handle = self.handle.clone();
    trace!(door = %self.address, delay_ms = delay.as_millis() as u64, "Rearm scheduled");

    self.rearm = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if let Err(e) = handle.try_stimulate() {
        debug!(door = %handle.address(), error = %e, "Rearm stimulation dropped");
      }
    }));
  }
}

fn subscribe_error(source_uid: Uuid, e: DoorError) -> DoorError {
  match e {
    DoorError::Cancelled => DoorError::Cancelled,
    other => DoorError::Subscribe {
      source_uid,
      reason: other.to_string(),
    },
  }
}

/// Delivery of one door emission, run outside the actor
struct EmitJob {
  directory: Arc<ActorDirectory>,
  address: ActorAddress,
  targets: Vec<ActorAddress>,
  message: SignalMessage,
  timeout: std::time::Duration,
}

impl EmitJob {
  async fn run(self, cancel: &CancellationToken) -> ReceiveOutcome {
    let fired = Some(self.message.source.fire_id);
    let delivery = fan_out(&self.directory, &self.address, self.targets, self.message, self.timeout, cancel).await;
    ReceiveOutcome { fired, delivery }
  }
}
