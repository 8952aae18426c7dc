//! Node assembly and lifecycle
//!
//! A node is one process hosting the actor network. It wires the state
//! store, definition provider, actor directory and background tasks
//! together from a [`Config`].
//!
//! # Architecture
//!
//! ```text
//! RunningNode (Supervisor)
//!   ├── ActorDirectory
//!   │     ├── SignalHandlerActor (per signal, activated on demand)
//!   │     └── DoorActor (per door)
//!   ├── DoorLifecycleManager (refresh on definition change)
//!   └── DefinitionWatcher (optional, reloads the definitions file)
//! ```
//!
//! # Lifecycle
//!
//! 1. Create master `CancellationToken`
//! 2. Open the state store and load definitions
//! 3. Create `ActorDirectory` with child token
//! 4. Run an initial door refresh so every door is subscribed
//! 5. Spawn the lifecycle manager and watcher
//! 6. Graceful shutdown: cancel children, wait for tasks, stop actors

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tokio::{signal, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  actor::{
    ActorDirectory, ActorRuntime, ChannelListener, DefinitionWatcher, DirectoryError, DoorError, DoorKindRegistry,
    DoorLifecycleManager, RuntimeSettings, SignalError, WatcherError,
  },
  definition::{DefinitionError, DefinitionSet, InMemoryDefinitionProvider, file::DefinitionFile},
  dirs,
  domain::{
    clock::{Clock, SystemClock},
    config::{Config, StateBackend},
    ids::{ActorAddress, FireId},
    signal::{SenderMetadata, SignalMessage},
  },
  state::{FileStateStore, MemoryStateStore, StateStore, StoreError},
};

#[derive(Error, Debug)]
pub enum NodeError {
  #[error(transparent)]
  Definition(#[from] DefinitionError),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Watcher(#[from] WatcherError),
  #[error(transparent)]
  Directory(#[from] DirectoryError),
  #[error(transparent)]
  Signal(#[from] SignalError),
  #[error(transparent)]
  Door(#[from] DoorError),
  #[error("No signal or door named '{0}'")]
  UnknownReference(String),
}

// ============================================================================
// Node
// ============================================================================

/// Node builder. Nothing runs until [`Node::start`].
#[derive(Debug)]
pub struct Node {
  config: Config,
  registry: DoorKindRegistry,
  clock: Arc<dyn Clock>,
  store: Option<Arc<dyn StateStore>>,
  definitions: Option<DefinitionSet>,
}

impl Node {
  pub fn from_config(config: Config) -> Self {
    Self {
      config,
      registry: DoorKindRegistry::builtin(),
      clock: Arc::new(SystemClock),
      store: None,
      definitions: None,
    }
  }

  /// Replace the door kinds the node can run
  pub fn with_registry(mut self, registry: DoorKindRegistry) -> Self {
    self.registry = registry;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Use `store` instead of the configured backend
  pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
    self.store = Some(store);
    self
  }

  /// Use `set` instead of loading the configured definitions file
  pub fn with_definitions(mut self, set: DefinitionSet) -> Self {
    self.definitions = Some(set);
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  async fn open_store(&self) -> Result<Arc<dyn StateStore>, NodeError> {
    if let Some(store) = &self.store {
      return Ok(Arc::clone(store));
    }
    match self.config.node.state_backend {
      StateBackend::Memory => Ok(Arc::new(MemoryStateStore::new())),
      StateBackend::File => {
        let dir = dirs::state_dir(&self.config.data_dir());
        info!(dir = %dir.display(), "Opening file state store");
        Ok(Arc::new(FileStateStore::open(dir).await?))
      }
    }
  }

  fn load_definitions(&mut self) -> Result<DefinitionSet, NodeError> {
    if let Some(set) = self.definitions.take() {
      return Ok(set);
    }
    let Some(path) = &self.config.node.definitions else {
      info!("No definitions file configured, starting with an empty network");
      return Ok(DefinitionSet::default());
    };

    let (set, issues) = DefinitionFile::load_validated(path, self.config.doors.validation_mode())?;
    for issue in &issues {
      warn!(file = %path.display(), "{}", issue);
    }
    info!(
      file = %path.display(),
      signals = set.signals().len(),
      doors = set.doors().len(),
      "Definitions loaded"
    );
    Ok(set)
  }

  pub async fn start(mut self) -> Result<RunningNode, NodeError> {
    info!("Starting signalgate node");

    // Master cancellation token - propagates to all children
    let cancel = CancellationToken::new();

    let store = self.open_store().await?;
    let provider = InMemoryDefinitionProvider::new(self.load_definitions()?);
    let runtime = ActorRuntime::new(
      provider.clone(),
      store,
      Arc::clone(&self.clock),
      RuntimeSettings::from(&self.config),
    );
    let directory = ActorDirectory::new(runtime, self.registry, cancel.child_token());

    let lifecycle = DoorLifecycleManager::new(Arc::clone(&directory));
    let report = lifecycle.refresh(&cancel).await;
    debug!(?report, "Initial door refresh");

    let mut tasks = vec![tokio::spawn(Arc::clone(&lifecycle).run(cancel.child_token()))];

    if self.config.node.watch_definitions
      && let Some(path) = self.config.node.definitions.clone()
    {
      let task = DefinitionWatcher::spawn(
        path,
        Arc::clone(&provider),
        self.config.doors.validation_mode(),
        Duration::from_millis(self.config.node.watcher_debounce_ms),
        cancel.child_token(),
      )?;
      tasks.push(task);
    }

    info!(doors = directory.active_doors().len(), "Node started");

    Ok(RunningNode {
      directory,
      provider,
      lifecycle,
      mailbox_capacity: self.config.node.mailbox_capacity,
      cancel,
      tasks,
    })
  }
}

// ============================================================================
// RunningNode
// ============================================================================

pub struct RunningNode {
  directory: Arc<ActorDirectory>,
  provider: Arc<InMemoryDefinitionProvider>,
  lifecycle: Arc<DoorLifecycleManager>,
  mailbox_capacity: usize,
  cancel: CancellationToken,
  tasks: Vec<JoinHandle<()>>,
}

impl RunningNode {
  pub fn directory(&self) -> &Arc<ActorDirectory> {
    &self.directory
  }

  pub fn provider(&self) -> &Arc<InMemoryDefinitionProvider> {
    &self.provider
  }

  pub fn lifecycle(&self) -> &Arc<DoorLifecycleManager> {
    &self.lifecycle
  }

  pub fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Resolve a name or uid against the current definitions
  pub async fn resolve(&self, reference: &str) -> Result<Uuid, NodeError> {
    self
      .provider
      .snapshot()
      .await
      .resolve_uid(reference)
      .ok_or_else(|| NodeError::UnknownReference(reference.to_string()))
  }

  /// Fire a signal by name or uid
  pub async fn fire(&self, reference: &str, metadata: Option<SenderMetadata>) -> Result<FireId, NodeError> {
    let uid = self.resolve(reference).await?;
    let fire_id = self
      .directory
      .signal(uid)
      .fire(FireId::new(), None, metadata, &self.cancel)
      .await?;
    Ok(fire_id)
  }

  /// Fire a signal carrying `data` as its payload
  pub async fn fire_with<T: Serialize>(
    &self,
    reference: &str,
    data: &T,
    metadata: Option<SenderMetadata>,
  ) -> Result<FireId, NodeError> {
    let uid = self.resolve(reference).await?;
    let fire_id = self
      .directory
      .signal(uid)
      .fire_with(FireId::new(), None, data, metadata, &self.cancel)
      .await?;
    Ok(fire_id)
  }

  /// Subscribe a channel to a signal or door, by name or uid
  pub async fn subscribe_listener(
    &self,
    reference: &str,
  ) -> Result<(ActorAddress, mpsc::Receiver<SignalMessage>), NodeError> {
    let uid = self.resolve(reference).await?;
    let (listener, rx) = ChannelListener::new(self.mailbox_capacity);
    let address = self.directory.register_listener(Arc::new(listener));

    if let Err(e) = self.attach(&address, uid).await {
      self.directory.remove_listener(address.uid);
      return Err(e);
    }
    debug!(%address, reference, "Listener subscribed");
    Ok((address, rx))
  }

  /// Subscribe one channel to every defined door
  pub async fn subscribe_all_doors(&self) -> Result<(ActorAddress, mpsc::Receiver<SignalMessage>), NodeError> {
    let (listener, rx) = ChannelListener::new(self.mailbox_capacity);
    let address = self.directory.register_listener(Arc::new(listener));

    for door in self.provider.snapshot().await.doors() {
      if let Err(e) = self.attach(&address, door.uid()).await {
        self.directory.remove_listener(address.uid);
        return Err(e);
      }
    }
    Ok((address, rx))
  }

  async fn attach(&self, address: &ActorAddress, uid: Uuid) -> Result<(), NodeError> {
    if self.provider.snapshot().await.door_by_uid(uid).is_some() {
      let door = self.directory.door_by_uid(uid).await?;
      door.subscribe(address.clone(), &self.cancel).await?;
    } else {
      self.directory.signal(uid).subscribe(address.clone(), &self.cancel).await?;
    }
    Ok(())
  }

  /// Run until ctrl-c or until the node is cancelled, then shut down
  pub async fn run_until_ctrl_c(self) {
    let cancel_for_signal = self.cancel.clone();
    tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        return;
      }
      info!("Received ctrl-c, shutting down...");
      cancel_for_signal.cancel();
    });

    self.cancel.cancelled().await;
    self.shutdown().await;
  }

  pub async fn shutdown(self) {
    info!("Shutting down...");
    self.cancel.cancel();

    for task in self.tasks {
      if let Err(e) = task.await {
        warn!("Background task failed: {}", e);
      }
    }
    self.directory.shutdown_all();
    info!("Node shutdown complete");
  }
}

impl std::fmt::Debug for RunningNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RunningNode")
      .field("doors", &self.directory.active_doors().len())
      .field("tasks", &self.tasks.len())
      .finish()
  }
}
