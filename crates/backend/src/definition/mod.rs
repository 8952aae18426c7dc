//! Signal and door definitions: where they come from and whether the
//! network they describe is sound.
//!
//! - [`DefinitionSet`] - a full network, with cross-definition validation
//! - [`DefinitionProvider`] - the source actors and the lifecycle manager read from
//! - [`InMemoryDefinitionProvider`] - provider backed by a swappable set
//! - [`file`] - TOML definitions file

pub mod builder;
pub mod file;

use std::{
  collections::{HashMap, HashSet},
  path::PathBuf,
  sync::Arc,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::domain::{
  door::{BuildError, DoorDefinition, IssueCode, ValidationError, ValidationIssue, ValidationMode},
  signal::SignalDefinition,
};

#[derive(Error, Debug)]
pub enum DefinitionError {
  #[error("failed to read definitions from {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to parse definitions: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("invalid door '{door}': {source}")]
  Build {
    door: String,
    #[source]
    source: BuildError,
  },
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error("definition source unavailable: {0}")]
  Unavailable(String),
}

// ============================================================================
// DefinitionSet
// ============================================================================

/// A complete network description
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefinitionSet {
  signals: Vec<SignalDefinition>,
  doors: Vec<DoorDefinition>,
}

impl DefinitionSet {
  pub fn new(signals: Vec<SignalDefinition>, doors: Vec<DoorDefinition>) -> Self {
    Self { signals, doors }
  }

  pub fn signals(&self) -> &[SignalDefinition] {
    &self.signals
  }

  pub fn doors(&self) -> &[DoorDefinition] {
    &self.doors
  }

  /// Every signal definition carrying `uid` (normally at most one)
  pub fn signals_by_uid(&self, uid: Uuid) -> Vec<SignalDefinition> {
    self.signals.iter().filter(|s| s.uid() == uid).cloned().collect()
  }

  pub fn door_by_uid(&self, uid: Uuid) -> Option<DoorDefinition> {
    self.doors.iter().find(|d| d.uid() == uid).cloned()
  }

  /// Resolve a signal or door by uid string or by name
  pub fn resolve_uid(&self, reference: &str) -> Option<Uuid> {
    if let Ok(uid) = reference.parse::<Uuid>() {
      return Some(uid);
    }
    self
      .signals
      .iter()
      .map(|s| &s.signal_id)
      .find(|id| id.name.as_deref() == Some(reference))
      .map(|id| id.uid)
      .or_else(|| {
        self
          .doors
          .iter()
          .map(|d| &d.door_id)
          .find(|id| id.name.as_deref() == Some(reference))
          .map(|id| id.uid)
      })
  }

  pub fn upsert_signal(&mut self, signal: SignalDefinition) {
    match self.signals.iter_mut().find(|s| s.signal_id == signal.signal_id) {
      Some(existing) => *existing = signal,
      None => self.signals.push(signal),
    }
  }

  pub fn upsert_door(&mut self, door: DoorDefinition) {
    match self.doors.iter_mut().find(|d| d.door_id == door.door_id) {
      Some(existing) => *existing = door,
      None => self.doors.push(door),
    }
  }

  /// Validate every door plus the cross-definition rules:
  /// duplicate signal uids, parent cycles, door cycles and dangling sources.
  pub fn validate(&self, mode: ValidationMode) -> Result<Vec<ValidationIssue>, ValidationError> {
    let mut issues = Vec::new();

    for door in &self.doors {
      let door_issues = match door.validate(ValidationMode::Lenient) {
        Ok(issues) => issues,
        Err(e) => e.issues,
      };
      issues.extend(door_issues.into_iter().map(|mut issue| {
        issue.message = format!("door {}: {}", door.door_id, issue.message);
        issue
      }));
    }

    issues.extend(self.duplicate_signals());
    issues.extend(self.parent_cycles());
    issues.extend(self.door_cycles());
    issues.extend(self.unknown_sources());

    ValidationIssue::resolve(issues, mode)
  }

  fn duplicate_signals(&self) -> Vec<ValidationIssue> {
    let mut names: HashMap<Uuid, Vec<String>> = HashMap::new();
    for signal in &self.signals {
      names
        .entry(signal.uid())
        .or_default()
        .push(signal.signal_id.name_or_uid());
    }

    let mut issues: Vec<ValidationIssue> = names
      .into_iter()
      .filter(|(_, names)| names.len() > 1)
      .map(|(uid, names)| {
        ValidationIssue::warning(
          IssueCode::DuplicateSignal,
          format!("signal uid {} is defined {} times ({})", uid, names.len(), names.join(", ")),
        )
      })
      .collect();
    issues.sort_by(|a, b| a.message.cmp(&b.message));
    issues
  }

  fn parent_cycles(&self) -> Vec<ValidationIssue> {
    let parents: HashMap<Uuid, Uuid> = self
      .signals
      .iter()
      .filter_map(|s| s.parent_uid().map(|p| (s.uid(), p)))
      .collect();

    let mut reported: HashSet<Uuid> = HashSet::new();
    let mut issues = Vec::new();

    for signal in &self.signals {
      let start = signal.uid();
      let mut seen = vec![start];
      let mut current = start;
      while let Some(parent) = parents.get(&current).copied() {
        if let Some(pos) = seen.iter().position(|uid| *uid == parent) {
          let cycle = &seen[pos..];
          // Report each cycle once
          if cycle.iter().all(|uid| !reported.contains(uid)) {
            reported.extend(cycle.iter().copied());
            issues.push(ValidationIssue::error(
              IssueCode::ParentCycle,
              format!("parent signal chain is cyclic: {}", self.describe_path(cycle)),
            ));
          }
          break;
        }
        seen.push(parent);
        current = parent;
      }
    }
    issues
  }

  fn door_cycles(&self) -> Vec<ValidationIssue> {
    let graph: HashMap<Uuid, Vec<Uuid>> = self
      .doors
      .iter()
      .map(|d| (d.uid(), d.door_sources.iter().map(|s| s.uid).collect()))
      .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
      Visiting,
      Done,
    }

    fn visit(
      node: Uuid,
      graph: &HashMap<Uuid, Vec<Uuid>>,
      marks: &mut HashMap<Uuid, Mark>,
      stack: &mut Vec<Uuid>,
      cycles: &mut Vec<Vec<Uuid>>,
    ) {
      match marks.get(&node) {
        Some(Mark::Done) => return,
        Some(Mark::Visiting) => {
          if let Some(pos) = stack.iter().position(|uid| *uid == node) {
            cycles.push(stack[pos..].to_vec());
          }
          return;
        }
        None => {}
      }

      marks.insert(node, Mark::Visiting);
      stack.push(node);
      for next in graph.get(&node).into_iter().flatten() {
        visit(*next, graph, marks, stack, cycles);
      }
      stack.pop();
      marks.insert(node, Mark::Done);
    }

    let mut marks = HashMap::new();
    let mut cycles = Vec::new();
    for door in &self.doors {
      visit(door.uid(), &graph, &mut marks, &mut Vec::new(), &mut cycles);
    }

    cycles
      .into_iter()
      .map(|cycle| {
        ValidationIssue::error(
          IssueCode::DoorCycle,
          format!("door sources are cyclic: {}", self.describe_path(&cycle)),
        )
      })
      .collect()
  }

  fn unknown_sources(&self) -> Vec<ValidationIssue> {
    let signals: HashSet<Uuid> = self.signals.iter().map(|s| s.uid()).collect();
    let doors: HashSet<Uuid> = self.doors.iter().map(|d| d.uid()).collect();

    let mut issues = Vec::new();
    for door in &self.doors {
      for source in door.signal_sources.iter().filter(|s| !signals.contains(&s.uid)) {
        issues.push(ValidationIssue::warning(
          IssueCode::UnknownSource,
          format!("door {} listens to undefined signal {}", door.door_id, source),
        ));
      }
      for source in door.door_sources.iter().filter(|s| !doors.contains(&s.uid)) {
        issues.push(ValidationIssue::warning(
          IssueCode::UnknownSource,
          format!("door {} listens to undefined door {}", door.door_id, source),
        ));
      }
    }
    for signal in &self.signals {
      if let Some(parent) = signal.parent_uid().filter(|p| !signals.contains(p)) {
        issues.push(ValidationIssue::warning(
          IssueCode::UnknownSource,
          format!("signal {} has undefined parent {}", signal.signal_id, parent),
        ));
      }
    }
    issues
  }

  fn describe_path(&self, uids: &[Uuid]) -> String {
    let name_of = |uid: &Uuid| {
      self
        .signals
        .iter()
        .map(|s| &s.signal_id)
        .find(|id| id.uid == *uid)
        .map(|id| id.name_or_uid())
        .or_else(|| {
          self
            .doors
            .iter()
            .map(|d| &d.door_id)
            .find(|id| id.uid == *uid)
            .map(|id| id.name_or_uid())
        })
        .unwrap_or_else(|| uid.to_string())
    };
    let mut parts: Vec<String> = uids.iter().map(name_of).collect();
    if let Some(first) = uids.first() {
      parts.push(name_of(first));
    }
    parts.join(" -> ")
  }
}

// ============================================================================
// Provider
// ============================================================================

/// Source of definitions for signal handlers and the lifecycle manager
#[async_trait]
pub trait DefinitionProvider: Send + Sync + std::fmt::Debug {
  /// All signal definitions sharing `uid`
  async fn signals_by_uid(&self, uid: Uuid) -> Result<Vec<SignalDefinition>, DefinitionError>;

  async fn door_by_uid(&self, uid: Uuid) -> Result<Option<DoorDefinition>, DefinitionError>;

  async fn all_doors(&self) -> Result<Vec<DoorDefinition>, DefinitionError>;

  /// Change counter, bumped whenever the definitions change
  fn changes(&self) -> watch::Receiver<u64>;
}

/// Provider over an in-memory [`DefinitionSet`] that can be swapped at runtime
#[derive(Debug)]
pub struct InMemoryDefinitionProvider {
  set: RwLock<DefinitionSet>,
  version: watch::Sender<u64>,
}

impl InMemoryDefinitionProvider {
  pub fn new(set: DefinitionSet) -> Arc<Self> {
    let (version, _) = watch::channel(0);
    Arc::new(Self {
      set: RwLock::new(set),
      version,
    })
  }

  pub async fn snapshot(&self) -> DefinitionSet {
    self.set.read().await.clone()
  }

  pub async fn replace(&self, set: DefinitionSet) {
    *self.set.write().await = set;
    self.bump();
  }

  pub async fn upsert_signal(&self, signal: SignalDefinition) {
    self.set.write().await.upsert_signal(signal);
    self.bump();
  }

  pub async fn upsert_door(&self, door: DoorDefinition) {
    self.set.write().await.upsert_door(door);
    self.bump();
  }

  pub fn version(&self) -> u64 {
    *self.version.borrow()
  }

  fn bump(&self) {
    self.version.send_modify(|v| *v += 1);
  }
}

#[async_trait]
impl DefinitionProvider for InMemoryDefinitionProvider {
  async fn signals_by_uid(&self, uid: Uuid) -> Result<Vec<SignalDefinition>, DefinitionError> {
    Ok(self.set.read().await.signals_by_uid(uid))
  }

  async fn door_by_uid(&self, uid: Uuid) -> Result<Option<DoorDefinition>, DefinitionError> {
    Ok(self.set.read().await.door_by_uid(uid))
  }

  async fn all_doors(&self) -> Result<Vec<DoorDefinition>, DefinitionError> {
    Ok(self.set.read().await.doors().to_vec())
  }

  fn changes(&self) -> watch::Receiver<u64> {
    self.version.subscribe()
  }
}
