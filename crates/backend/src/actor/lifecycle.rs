//! Door lifecycle manager
//!
//! Background service that keeps one live door actor per known door
//! definition. A refresh pass fetches every definition and sends it to the
//! actor for its `(kind, uid)`; doors apply definitions idempotently, so an
//! unchanged door costs one round trip.
//!
//! Passes never overlap: a pass holds the manager's lock for its whole
//! duration and later callers queue behind it. Change notifications arrive
//! over a `watch` channel, which folds bursts into a single pending pass.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
  directory::ActorDirectory,
  door::{DoorError, UpdateOutcome},
};
use crate::definition::DefinitionProvider;

/// Outcome of one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
  /// Doors that applied a new definition
  pub updated: usize,
  /// Doors already running the current definition
  pub unchanged: usize,
  pub failed: usize,
  /// The pass stopped early
  pub cancelled: bool,
}

pub struct DoorLifecycleManager {
  directory: Arc<ActorDirectory>,
  provider: Arc<dyn DefinitionProvider>,
  lock: Mutex<()>,
}

impl DoorLifecycleManager {
  pub fn new(directory: Arc<ActorDirectory>) -> Arc<Self> {
    let provider = Arc::clone(&directory.runtime().provider);
    Arc::new(Self {
      directory,
      provider,
      lock: Mutex::new(()),
    })
  }

  /// Materialize every known door definition into its actor
  pub async fn refresh(&self, cancel: &CancellationToken) -> RefreshReport {
    // A pass queued behind another one gives up when cancelled
    let _guard = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        debug!("Refresh cancelled while waiting for the previous pass");
        return RefreshReport {
          cancelled: true,
          ..RefreshReport::default()
        };
      }
      guard = self.lock.lock() => guard,
    };
    let mut report = RefreshReport::default();

    let doors = match self.provider.all_doors().await {
      Ok(doors) => doors,
      Err(e) => {
        error!(error = %e, "Failed to fetch door definitions");
        report.failed = 1;
        return report;
      }
    };

    debug!(doors = doors.len(), "Refreshing doors");

    for definition in doors {
      if cancel.is_cancelled() {
        report.cancelled = true;
        break;
      }

      let uid = definition.uid();
      let kind = definition.kind.clone();

      let handle = match self.directory.door(&kind, uid) {
        Ok(handle) => handle,
        Err(e) => {
          error!(door = %definition.door_id, kind = %kind, error = %e, "Failed to materialize door");
          report.failed += 1;
          continue;
        }
      };

      match handle.update(definition, cancel).await {
        Ok(UpdateOutcome::Applied) => report.updated += 1,
        Ok(UpdateOutcome::Unchanged) => report.unchanged += 1,
        Err(DoorError::Cancelled) => {
          report.cancelled = true;
          break;
        }
        Err(e) => {
          error!(door = %uid, kind = %kind, error = %e, "Failed to update door");
          report.failed += 1;
        }
      }
    }

    info!(
      updated = report.updated,
      unchanged = report.unchanged,
      failed = report.failed,
      cancelled = report.cancelled,
      "Door refresh complete"
    );
    report
  }

  /// Refresh once, then again on every definition change until cancelled
  pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
    let mut changes = self.provider.changes();
    changes.borrow_and_update();

    info!("Door lifecycle manager started");
    self.refresh(&cancel).await;

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Door lifecycle manager shutting down (cancelled)");
          break;
        }

        changed = changes.changed() => {
          if changed.is_err() {
            info!("Door lifecycle manager shutting down (definition source closed)");
            break;
          }
          let version = *changes.borrow_and_update();
          debug!(version, "Definitions changed");
          self.refresh(&cancel).await;
        }
      }
    }
  }
}

impl std::fmt::Debug for DoorLifecycleManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DoorLifecycleManager").finish_non_exhaustive()
  }
}
