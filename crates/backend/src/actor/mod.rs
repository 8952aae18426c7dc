//! Actor runtime of the event network
//!
//! Signal handlers and doors are long-lived tokio tasks that own their
//! state and serve an `mpsc` mailbox. Callers talk to them through cheap,
//! cloneable handles; every request carries a `CancellationToken` and a
//! oneshot reply channel.
//!
//! # Architecture
//!
//! - One actor per identity, activated on first use by the [`ActorDirectory`]
//! - At most one request mutates an actor's state at a time
//! - State is persisted through the [`StateStore`](crate::state::StateStore)
//!   after every mutation, and only if the request was not cancelled
//! - Delivery to subscribers runs outside the mailbox, so reads keep being
//!   served while a fire is in flight
//!
//! # Actors
//!
//! - [`SignalHandlerActor`]: subscriber list of one signal, fans out fires
//!   and relays them to the parent signal
//! - [`DoorActor`]: gates its sources through a [`DoorLogic`] built by the
//!   [`DoorKindRegistry`], and is itself subscribable
//! - [`DoorLifecycleManager`]: keeps doors in sync with their definitions
//! - [`DefinitionWatcher`]: reloads the definitions file on change
//!
//! ```text
//! fire ─▶ SignalHandler ──▶ Door ──▶ Door ──▶ Listener
//!              │
//!              └─▶ parent SignalHandler ─▶ ...
//! ```

pub mod directory;
pub mod door;
pub mod emitter;
pub mod handle;
pub mod lifecycle;
pub mod listener;
pub mod message;
pub mod registry;
pub mod signal;
pub mod watcher;

#[cfg(test)]
mod __tests__;

pub use directory::{ActorDirectory, ActorRuntime, DirectoryError, RuntimeSettings};
pub use door::{DoorActor, DoorError, DoorFactory, DoorLogic, Emission};
pub use emitter::DeliveryReport;
pub use handle::{DeliveryError, DoorHandle, SendError, SignalHandle, SignalReceiver};
pub use lifecycle::{DoorLifecycleManager, RefreshReport};
pub use listener::ChannelListener;
pub use registry::DoorKindRegistry;
pub use signal::{SignalError, SignalHandlerActor};
pub use watcher::{DefinitionWatcher, WatcherError};
