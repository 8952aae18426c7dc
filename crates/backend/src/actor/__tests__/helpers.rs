//! Test helpers for actor integration tests.
//!
//! Provides `TestNetwork`, a directory wired to an in-memory provider, an
//! in-memory state store and a manual clock, plus helpers to listen on and
//! fire signals.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
  actor::{
    directory::{ActorDirectory, ActorRuntime, RuntimeSettings},
    door::UpdateOutcome,
    handle::DoorHandle,
    listener::ChannelListener,
    registry::DoorKindRegistry,
  },
  definition::{DefinitionSet, InMemoryDefinitionProvider},
  domain::{
    clock::{Clock, ManualClock},
    door::DoorDefinition,
    ids::{ActorAddress, FireId},
    signal::{SignalDefinition, SignalMessage},
  },
  state::MemoryStateStore,
};

pub fn t0() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// A complete actor network for one test.
pub struct TestNetwork {
  pub clock: ManualClock,
  pub store: Arc<MemoryStateStore>,
  pub provider: Arc<InMemoryDefinitionProvider>,
  pub settings: RuntimeSettings,
  pub directory: Arc<ActorDirectory>,
  pub cancel: CancellationToken,
}

impl TestNetwork {
  pub fn new(signals: Vec<SignalDefinition>, doors: Vec<DoorDefinition>) -> Self {
    Self::with_settings(signals, doors, RuntimeSettings::default())
  }

  pub fn with_settings(signals: Vec<SignalDefinition>, doors: Vec<DoorDefinition>, settings: RuntimeSettings) -> Self {
    let provider = InMemoryDefinitionProvider::new(DefinitionSet::new(signals, doors));
    Self::assemble(
      ManualClock::new(t0()),
      Arc::new(MemoryStateStore::new()),
      provider,
      settings,
    )
  }

  fn assemble(
    clock: ManualClock,
    store: Arc<MemoryStateStore>,
    provider: Arc<InMemoryDefinitionProvider>,
    settings: RuntimeSettings,
  ) -> Self {
    let runtime = ActorRuntime::new(
      provider.clone(),
      store.clone(),
      Arc::new(clock.clone()),
      settings.clone(),
    );
    let cancel = CancellationToken::new();
    let directory = ActorDirectory::new(runtime, DoorKindRegistry::builtin(), cancel.clone());

    Self {
      clock,
      store,
      provider,
      settings,
      directory,
      cancel,
    }
  }

  /// Stop every actor and start a fresh directory over the same store,
  /// provider and clock
  pub fn restart(self) -> Self {
    self.cancel.cancel();
    self.directory.shutdown_all();
    Self::assemble(
      self.clock.clone(),
      Arc::clone(&self.store),
      Arc::clone(&self.provider),
      self.settings.clone(),
    )
  }

  /// Register a channel listener and return its address and receiver
  pub fn listener(&self) -> (ActorAddress, mpsc::Receiver<SignalMessage>) {
    let (listener, rx) = ChannelListener::new(64);
    (self.directory.register_listener(Arc::new(listener)), rx)
  }

  /// Listen on a signal
  pub async fn listen_signal(&self, signal: &SignalDefinition) -> mpsc::Receiver<SignalMessage> {
    let (address, rx) = self.listener();
    self
      .directory
      .signal(signal.uid())
      .subscribe(address, &self.cancel)
      .await
      .expect("subscribe listener to signal");
    rx
  }

  /// Listen on a door
  pub async fn listen_door(&self, door: &DoorDefinition) -> mpsc::Receiver<SignalMessage> {
    let (address, rx) = self.listener();
    self
      .door(door)
      .subscribe(address, &self.cancel)
      .await
      .expect("subscribe listener to door");
    rx
  }

  pub fn door(&self, door: &DoorDefinition) -> DoorHandle {
    self.directory.door(&door.kind, door.uid()).expect("door kind is registered")
  }

  /// Apply a definition directly to its door actor
  pub async fn apply(&self, door: &DoorDefinition) -> UpdateOutcome {
    self
      .door(door)
      .update(door.clone(), &self.cancel)
      .await
      .expect("apply door definition")
  }

  pub async fn fire(&self, signal: &SignalDefinition) -> FireId {
    self
      .directory
      .signal(signal.uid())
      .fire(FireId::new(), None, None, &self.cancel)
      .await
      .expect("fire signal")
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  pub fn advance(&self, secs: i64) {
    self.clock.advance(chrono::Duration::seconds(secs));
  }
}

impl Drop for TestNetwork {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

/// Next message, failing the test if none arrives
pub async fn recv(rx: &mut mpsc::Receiver<SignalMessage>) -> SignalMessage {
  tokio::time::timeout(Duration::from_secs(2), rx.recv())
    .await
    .expect("timeout waiting for signal")
    .expect("listener channel closed")
}

/// Number of messages already delivered
pub fn drain(rx: &mut mpsc::Receiver<SignalMessage>) -> usize {
  let mut count = 0;
  while rx.try_recv().is_ok() {
    count += 1;
  }
  count
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if condition().await {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  false
}
