//! ActorDirectory - maps logical actor addresses to live handles
//!
//! Signal handlers and doors are activated lazily the first time they are
//! addressed. Tables are `DashMap`s keyed by identity; concurrent first
//! accesses race through the entry API so only one actor per address is
//! ever kept.
//!
//! Actors hold a `Weak` reference back to the directory for delivery, so
//! dropping the directory (after `shutdown_all`) frees everything.

use std::{
  sync::{Arc, Weak},
  time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
  door::DoorActor,
  handle::{DoorHandle, SignalHandle, SignalReceiver},
  registry::DoorKindRegistry,
  signal::SignalHandlerActor,
};
use crate::{
  definition::{DefinitionError, DefinitionProvider},
  domain::{
    clock::Clock,
    config::Config,
    door::ValidationMode,
    ids::{ActorAddress, ActorKind, DoorKind},
  },
  formula::FormulaCache,
  state::StateStore,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
  #[error("No door behavior registered for kind '{0}'")]
  UnknownKind(DoorKind),
  #[error("No door definition with uid {0}")]
  UnknownDoor(Uuid),
  #[error("No listener registered with uid {0}")]
  UnknownListener(Uuid),
  #[error("{0} cannot receive signals")]
  NotAReceiver(ActorAddress),
  #[error("Directory has shut down")]
  Gone,
  #[error(transparent)]
  Definition(#[from] DefinitionError),
}

// ============================================================================
// Runtime services
// ============================================================================

/// Tunables shared by every actor of a node
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
  pub mailbox_capacity: usize,
  pub delivery_timeout: Duration,
  pub max_relay_depth: usize,
  pub rearm_grace: Duration,
  pub validation_mode: ValidationMode,
  pub formula_cache_capacity: u64,
}

impl Default for RuntimeSettings {
  fn default() -> Self {
    Self::from(&Config::default())
  }
}

impl From<&Config> for RuntimeSettings {
  fn from(config: &Config) -> Self {
    Self {
      mailbox_capacity: config.node.mailbox_capacity.max(1),
      delivery_timeout: Duration::from_millis(config.signals.delivery_timeout_ms),
      max_relay_depth: config.signals.max_relay_depth,
      rearm_grace: Duration::from_millis(config.doors.rearm_grace_ms),
      validation_mode: config.doors.validation_mode(),
      formula_cache_capacity: config.doors.formula_cache_capacity,
    }
  }
}

/// Services every actor needs, shared via `Arc`
#[derive(Debug)]
pub struct ActorRuntime {
  pub provider: Arc<dyn DefinitionProvider>,
  pub store: Arc<dyn StateStore>,
  pub clock: Arc<dyn Clock>,
  pub formulas: FormulaCache,
  pub settings: RuntimeSettings,
}

impl ActorRuntime {
  pub fn new(
    provider: Arc<dyn DefinitionProvider>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    settings: RuntimeSettings,
  ) -> Arc<Self> {
    Arc::new(Self {
      provider,
      store,
      clock,
      formulas: FormulaCache::new(settings.formula_cache_capacity),
      settings,
    })
  }
}

// ============================================================================
// ActorDirectory
// ============================================================================

pub struct ActorDirectory {
  runtime: Arc<ActorRuntime>,
  registry: DoorKindRegistry,

  signals: DashMap<Uuid, SignalHandle>,
  doors: DashMap<(DoorKind, Uuid), DoorHandle>,
  listeners: DashMap<Uuid, Arc<dyn SignalReceiver>>,

  /// Each spawned actor gets a child token
  cancel: CancellationToken,
  self_ref: Weak<ActorDirectory>,
}

impl ActorDirectory {
  pub fn new(runtime: Arc<ActorRuntime>, registry: DoorKindRegistry, cancel: CancellationToken) -> Arc<Self> {
    Arc::new_cyclic(|self_ref| Self {
      runtime,
      registry,
      signals: DashMap::new(),
      doors: DashMap::new(),
      listeners: DashMap::new(),
      cancel,
      self_ref: self_ref.clone(),
    })
  }

  pub fn runtime(&self) -> &Arc<ActorRuntime> {
    &self.runtime
  }

  pub fn registry(&self) -> &DoorKindRegistry {
    &self.registry
  }

  // --------------------------------------------------------------------------
  // Signals
  // --------------------------------------------------------------------------

  /// Get or activate the signal handler for `uid`
  pub fn signal(&self, uid: Uuid) -> SignalHandle {
    // Fast path: handler already running
    if let Some(handle) = self.signals.get(&uid)
      && handle.is_alive()
    {
      return handle.value().clone();
    }

    let handle = SignalHandlerActor::spawn(
      uid,
      Arc::clone(&self.runtime),
      self.self_ref.clone(),
      self.cancel.child_token(),
    );

    match self.signals.entry(uid) {
      Entry::Occupied(mut existing) => {
        if existing.get().is_alive() {
          // Another task won the race - use their handle
          debug!(signal = %uid, "Race condition: using existing signal handler");
          handle.shutdown();
          existing.get().clone()
        } else {
          existing.insert(handle.clone());
          handle
        }
      }
      Entry::Vacant(vacant) => {
        debug!(signal = %uid, "Activated signal handler");
        vacant.insert(handle.clone());
        handle
      }
    }
  }

  // --------------------------------------------------------------------------
  // Doors
  // --------------------------------------------------------------------------

  /// Get or activate the door actor for `(kind, uid)`
  pub fn door(&self, kind: &DoorKind, uid: Uuid) -> Result<DoorHandle, DirectoryError> {
    let key = (kind.clone(), uid);
    if let Some(handle) = self.doors.get(&key)
      && handle.is_alive()
    {
      return Ok(handle.value().clone());
    }

    let factory = self
      .registry
      .resolve(kind)
      .ok_or_else(|| DirectoryError::UnknownKind(kind.clone()))?;

    self.retire_other_kinds(kind, uid);

    let handle = DoorActor::spawn(
      kind.clone(),
      uid,
      factory,
      Arc::clone(&self.runtime),
      self.self_ref.clone(),
      self.cancel.child_token(),
    );

    let handle = match self.doors.entry(key) {
      Entry::Occupied(mut existing) => {
        if existing.get().is_alive() {
          debug!(door = %uid, kind = %kind, "Race condition: using existing door actor");
          handle.shutdown();
          existing.get().clone()
        } else {
          existing.insert(handle.clone());
          handle
        }
      }
      Entry::Vacant(vacant) => {
        debug!(door = %uid, kind = %kind, "Activated door actor");
        vacant.insert(handle.clone());
        handle
      }
    };
    Ok(handle)
  }

  /// Get the door actor for `uid`, looking its kind up in the definitions
  /// when it is not active yet
  pub async fn door_by_uid(&self, uid: Uuid) -> Result<DoorHandle, DirectoryError> {
    let active = self
      .doors
      .iter()
      .find(|entry| entry.key().1 == uid && entry.value().is_alive())
      .map(|entry| entry.value().clone());
    if let Some(handle) = active {
      return Ok(handle);
    }

    let definition = self
      .runtime
      .provider
      .door_by_uid(uid)
      .await?
      .ok_or(DirectoryError::UnknownDoor(uid))?;
    self.door(&definition.kind, uid)
  }

  /// A door changed kind: the actor of the previous kind must not keep
  /// receiving under the same uid
  fn retire_other_kinds(&self, kind: &DoorKind, uid: Uuid) {
    self.doors.retain(|(k, u), handle| {
      let stale = *u == uid && k != kind;
      if stale {
        info!(door = %uid, old_kind = %k, new_kind = %kind, "Retiring door actor of previous kind");
        handle.shutdown();
      }
      !stale
    });
  }

  // --------------------------------------------------------------------------
  // Listeners
  // --------------------------------------------------------------------------

  /// Register an external receiver and return its address
  pub fn register_listener(&self, receiver: Arc<dyn SignalReceiver>) -> ActorAddress {
    let uid = Uuid::new_v4();
    self.listeners.insert(uid, receiver);
    debug!(listener = %uid, "Registered listener");
    ActorAddress::listener(uid)
  }

  pub fn remove_listener(&self, uid: Uuid) -> bool {
    self.listeners.remove(&uid).is_some()
  }

  /// Resolve a subscription target to something that accepts messages
  pub fn receiver(&self, address: &ActorAddress) -> Result<Arc<dyn SignalReceiver>, DirectoryError> {
    match &address.kind {
      ActorKind::Door(kind) => Ok(Arc::new(self.door(kind, address.uid)?)),
      ActorKind::Listener => self
        .listeners
        .get(&address.uid)
        .map(|r| Arc::clone(r.value()))
        .ok_or(DirectoryError::UnknownListener(address.uid)),
      ActorKind::Signal => Err(DirectoryError::NotAReceiver(address.clone())),
    }
  }

  // --------------------------------------------------------------------------
  // Introspection and shutdown
  // --------------------------------------------------------------------------

  pub fn active_signals(&self) -> Vec<Uuid> {
    self.signals.iter().map(|e| *e.key()).collect()
  }

  pub fn active_doors(&self) -> Vec<ActorAddress> {
    self
      .doors
      .iter()
      .map(|e| ActorAddress::door(e.key().0.clone(), e.key().1))
      .collect()
  }

  /// Stop every actor and forget all handles and listeners
  pub fn shutdown_all(&self) {
    let signals = self.signals.len();
    let doors = self.doors.len();
    if signals + doors == 0 {
      return;
    }

    info!(signals, doors, "Shutting down all actors");

    for entry in self.signals.iter() {
      entry.value().shutdown();
    }
    for entry in self.doors.iter() {
      entry.value().shutdown();
    }
    self.signals.clear();
    self.doors.clear();
    self.listeners.clear();

    info!("All actors shut down");
  }
}

impl Drop for ActorDirectory {
  fn drop(&mut self) {
    if !self.signals.is_empty() || !self.doors.is_empty() {
      warn!("ActorDirectory dropped with live actors");
      self.shutdown_all();
    }
  }
}

impl std::fmt::Debug for ActorDirectory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActorDirectory")
      .field("signals", &self.signals.len())
      .field("doors", &self.doors.len())
      .field("listeners", &self.listeners.len())
      .finish()
  }
}
