//! DefinitionWatcher - reloads the definitions file when it changes
//!
//! # Design
//!
//! The watcher bridges notify's sync callbacks with the async runtime:
//! 1. notify's callback uses `blocking_send` to forward events to a channel
//! 2. The async task consumes events and keeps only those for the watched file
//! 3. Bursts (editors write, rename and chmod in quick succession) are
//!    debounced into a single reload
//! 4. The reloaded file is built and validated before it replaces the
//!    provider's definitions
//!
//! The parent directory is watched rather than the file itself so that
//! atomic saves (write to temp, rename over) keep being observed.
//!
//! A file that fails to parse or validate is logged and the previous
//! definitions stay in place.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::{Duration, Instant},
};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
  definition::{DefinitionError, InMemoryDefinitionProvider, file::DefinitionFile},
  domain::door::ValidationMode,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("Failed to watch path: {0}")]
  Watch(#[source] notify::Error),
}

// ============================================================================
// DefinitionWatcher
// ============================================================================

pub struct DefinitionWatcher {
  path: PathBuf,
  provider: Arc<InMemoryDefinitionProvider>,
  mode: ValidationMode,
  debounce: Duration,
  cancel: CancellationToken,
  // The notify watcher must be held to keep it alive
  _watcher: RecommendedWatcher,
  event_rx: mpsc::Receiver<Result<Event, notify::Error>>,
}

impl DefinitionWatcher {
  /// Start watching `path`. The task is not started until `run()` is called.
  pub fn new(
    path: impl Into<PathBuf>,
    provider: Arc<InMemoryDefinitionProvider>,
    mode: ValidationMode,
    debounce: Duration,
    cancel: CancellationToken,
  ) -> Result<Self, WatcherError> {
    let path = path.into();
    let dir = match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
      _ => PathBuf::from("."),
    };

    let (event_tx, event_rx) = mpsc::channel::<Result<Event, notify::Error>>(64);

    let mut watcher = RecommendedWatcher::new(
      move |res| {
        // Runs on notify's thread; a full or closed channel drops the event
        let _ = event_tx.blocking_send(res);
      },
      Config::default(),
    )
    .map_err(WatcherError::Init)?;

    watcher
      .watch(&dir, RecursiveMode::NonRecursive)
      .map_err(WatcherError::Watch)?;

    info!(file = %path.display(), "Definition watcher initialized");

    Ok(Self {
      path,
      provider,
      mode,
      debounce,
      cancel,
      _watcher: watcher,
      event_rx,
    })
  }

  pub fn spawn(
    path: impl Into<PathBuf>,
    provider: Arc<InMemoryDefinitionProvider>,
    mode: ValidationMode,
    debounce: Duration,
    cancel: CancellationToken,
  ) -> Result<tokio::task::JoinHandle<()>, WatcherError> {
    let task = Self::new(path, provider, mode, debounce, cancel)?;
    Ok(tokio::spawn(task.run()))
  }

  pub async fn run(mut self) {
    info!(file = %self.path.display(), "DefinitionWatcher started");

    // Time of the last relevant event not yet acted upon
    let mut pending: Option<Instant> = None;
    let mut tick = tokio::time::interval(self.debounce.max(Duration::from_millis(10)));

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          info!("DefinitionWatcher shutting down (cancelled)");
          break;
        }

        event = self.event_rx.recv() => {
          match event {
            Some(Ok(event)) => {
              if self.is_relevant(&event) {
                trace!(kind = ?event.kind, "Definitions file event");
                pending = Some(Instant::now());
              }
            }
            Some(Err(e)) => {
              warn!(error = %e, "Watcher error");
            }
            None => {
              info!("DefinitionWatcher shutting down (channel closed)");
              break;
            }
          }
        }

        _ = tick.tick() => {
          if pending.is_some_and(|at| at.elapsed() >= self.debounce) {
            pending = None;
            self.reload_logged().await;
          }
        }
      }
    }
  }

  fn is_relevant(&self, event: &Event) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
      return false;
    }
    event.paths.iter().any(|p| same_file(p, &self.path))
  }

  /// Reload the file into the provider, returning the number of doors
  pub async fn reload(&self) -> Result<usize, DefinitionError> {
    let (set, issues) = DefinitionFile::load_validated(&self.path, self.mode)?;
    let doors = set.doors().len();
    let signals = set.signals().len();

    self.provider.replace(set).await;
    info!(
      file = %self.path.display(),
      signals,
      doors,
      warnings = issues.len(),
      "Definitions reloaded"
    );
    Ok(doors)
  }

  async fn reload_logged(&self) {
    match self.reload().await {
      Ok(doors) => debug!(doors, "Reload applied"),
      Err(e) => error!(file = %self.path.display(), error = %e, "Invalid definitions file, keeping previous definitions"),
    }
  }
}

/// Compare by file name within the watched directory; notify may report
/// canonical paths while `path` is relative
fn same_file(event_path: &Path, watched: &Path) -> bool {
  if event_path == watched {
    return true;
  }
  match (event_path.file_name(), watched.file_name()) {
    (Some(a), Some(b)) if a == b => match (event_path.parent(), watched.parent()) {
      (Some(pa), Some(pb)) => match (pa.canonicalize(), pb.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => true,
      },
      _ => true,
    },
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::TempDir;

  use super::*;
  use crate::definition::{DefinitionProvider, DefinitionSet};

  const TWO_SIGNALS: &str = r#"
[[signals]]
name = "a"

[[signals]]
name = "b"

[[doors]]
name = "both"
signals = ["a", "b"]
operator = "and"
active_window_ms = 60000
"#;

  #[test]
  fn test_same_file() {
    assert!(same_file(Path::new("/tmp/x/defs.toml"), Path::new("/tmp/x/defs.toml")));
    assert!(!same_file(Path::new("/tmp/x/other.toml"), Path::new("/tmp/x/defs.toml")));
  }

  #[tokio::test]
  async fn test_reload_replaces_definitions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("defs.toml");
    fs::write(&path, TWO_SIGNALS).unwrap();

    let provider = InMemoryDefinitionProvider::new(DefinitionSet::default());
    let watcher = DefinitionWatcher::new(
      &path,
      Arc::clone(&provider),
      ValidationMode::Lenient,
      Duration::from_millis(20),
      CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(watcher.reload().await.unwrap(), 1);
    assert_eq!(provider.all_doors().await.unwrap().len(), 1);
    assert_eq!(provider.version(), 1);
  }

  #[tokio::test]
  async fn test_invalid_file_keeps_previous() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("defs.toml");
    fs::write(&path, TWO_SIGNALS).unwrap();

    let provider = InMemoryDefinitionProvider::new(DefinitionSet::default());
    let watcher = DefinitionWatcher::new(
      &path,
      Arc::clone(&provider),
      ValidationMode::Lenient,
      Duration::from_millis(20),
      CancellationToken::new(),
    )
    .unwrap();
    watcher.reload().await.unwrap();

    fs::write(&path, "[[doors]]\nname = \"broken\"\nformula = \"A &\"\n").unwrap();
    assert!(watcher.reload().await.is_err());
    assert_eq!(provider.all_doors().await.unwrap().len(), 1);
    assert_eq!(provider.version(), 1);
  }

  #[tokio::test]
  async fn test_file_change_triggers_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("defs.toml");
    fs::write(&path, "").unwrap();

    let provider = InMemoryDefinitionProvider::new(DefinitionSet::default());
    let mut changes = provider.changes();
    let cancel = CancellationToken::new();
    let task = DefinitionWatcher::spawn(
      &path,
      Arc::clone(&provider),
      ValidationMode::Lenient,
      Duration::from_millis(20),
      cancel.clone(),
    )
    .unwrap();

    // Give the watcher time to initialize
    tokio::time::sleep(Duration::from_millis(100)).await;
    fs::write(&path, TWO_SIGNALS).unwrap();

    tokio::time::timeout(Duration::from_secs(5), changes.changed())
      .await
      .expect("timeout waiting for reload")
      .unwrap();
    assert_eq!(provider.all_doors().await.unwrap().len(), 1);

    cancel.cancel();
    task.await.unwrap();
  }
}
