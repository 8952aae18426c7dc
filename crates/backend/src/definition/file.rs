//! Definitions file format
//!
//! Signals and doors are declared in TOML and reference each other by name
//! (or by uid when one is given explicitly):
//!
//! ```toml
//! [[signals]]
//! name = "order-placed"
//!
//! [[signals]]
//! name = "order-paid"
//! parent = "order-placed"
//!
//! [[doors]]
//! name = "ready-to-ship"
//! signals = ["order-placed", "order-paid"]
//! active_window_ms = 60000
//! formula = "placed & paid & !this"
//! variables = { placed = "order-placed", paid = "order-paid" }
//! use_this = true
//!
//! [[doors]]
//! name = "big-orders"
//! signals = ["order-paid"]
//! condition = { type = "field_greater_than", field = "total", value = 100.0 }
//! ```
//!
//! Uids are derived from names unless set. The door kind is inferred from
//! the entry (`formula`/`operator` means logical, `condition` means relay
//! filter) and can be overridden with `kind`.

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
  DefinitionError, DefinitionSet,
  builder::{DoorBuilder, LogicOperator},
};
use crate::domain::{
  condition::FilterCondition,
  door::{BuildError, DoorDefinition, THIS_VARIABLE, ValidationIssue, ValidationMode},
  ids::{DoorId, DoorKind, SignalId},
  signal::{SignalBuilder, SignalDefinition},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionFile {
  #[serde(default)]
  pub signals: Vec<SignalEntry>,
  #[serde(default)]
  pub doors: Vec<DoorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEntry {
  pub name: String,
  #[serde(default)]
  pub uid: Option<Uuid>,
  /// Name or uid of the parent signal
  #[serde(default)]
  pub parent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorEntry {
  And,
  Or,
  Xor,
}

impl From<&OperatorEntry> for LogicOperator {
  fn from(op: &OperatorEntry) -> Self {
    match op {
      OperatorEntry::And => LogicOperator::And,
      OperatorEntry::Or => LogicOperator::Or,
      OperatorEntry::Xor => LogicOperator::Xor,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorEntry {
  pub name: String,
  #[serde(default)]
  pub uid: Option<Uuid>,
  #[serde(default)]
  pub kind: Option<String>,
  /// Names or uids of source signals
  #[serde(default)]
  pub signals: Vec<String>,
  /// Names or uids of source doors
  #[serde(default)]
  pub doors: Vec<String>,
  #[serde(default)]
  pub active_window_ms: Option<u64>,
  /// Omitted keeps the default of one day; 0 disables the age bound
  #[serde(default)]
  pub retention_max_delay_ms: Option<u64>,
  /// Omitted keeps the default of 0 (no history)
  #[serde(default)]
  pub history_max_retention: Option<u32>,
  #[serde(default)]
  pub unbounded_history: bool,
  #[serde(default)]
  pub not_consumed_max_retention: Option<u32>,

  // logical doors
  #[serde(default)]
  pub formula: Option<String>,
  /// Variable name to source name or uid
  #[serde(default)]
  pub variables: BTreeMap<String, String>,
  #[serde(default)]
  pub use_this: bool,
  #[serde(default)]
  pub operator: Option<OperatorEntry>,

  // relay filter doors
  #[serde(default)]
  pub condition: Option<FilterCondition>,
  #[serde(default)]
  pub dont_relay_content: bool,
}

impl DefinitionFile {
  pub fn parse(content: &str) -> Result<Self, DefinitionError> {
    Ok(toml::from_str(content)?)
  }

  pub fn load(path: &Path) -> Result<Self, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content)
  }

  /// Load, build and validate a definitions file in one go
  pub fn load_validated(path: &Path, mode: ValidationMode) -> Result<(DefinitionSet, Vec<ValidationIssue>), DefinitionError> {
    let set = Self::load(path)?.into_set()?;
    let issues = set.validate(mode)?;
    Ok((set, issues))
  }

  /// Resolve names and build every definition
  pub fn into_set(self) -> Result<DefinitionSet, DefinitionError> {
    let resolver = Resolver::new(&self);

    let signals = self
      .signals
      .iter()
      .map(|entry| {
        let mut builder = SignalBuilder::new(entry.name.clone()).uid(resolver.signal_uid(&entry.name));
        if let Some(parent) = &entry.parent {
          builder = builder.parent_id(resolver.signal(parent));
        }
        builder.build()
      })
      .collect::<Vec<SignalDefinition>>();

    let doors = self
      .doors
      .iter()
      .map(|entry| {
        build_door(entry, &resolver).map_err(|source| DefinitionError::Build {
          door: entry.name.clone(),
          source,
        })
      })
      .collect::<Result<Vec<DoorDefinition>, DefinitionError>>()?;

    Ok(DefinitionSet::new(signals, doors))
  }
}

/// Maps names used in the file to identities
struct Resolver {
  signals: BTreeMap<String, Uuid>,
  doors: BTreeMap<String, Uuid>,
}

impl Resolver {
  fn new(file: &DefinitionFile) -> Self {
    let signals = file
      .signals
      .iter()
      .map(|s| (s.name.clone(), s.uid.unwrap_or_else(|| SignalId::named(s.name.clone()).uid)))
      .collect();
    let doors = file
      .doors
      .iter()
      .map(|d| (d.name.clone(), d.uid.unwrap_or_else(|| DoorId::named(d.name.clone()).uid)))
      .collect();
    Self { signals, doors }
  }

  fn signal_uid(&self, reference: &str) -> Uuid {
    self.signal(reference).uid
  }

  fn signal(&self, reference: &str) -> SignalId {
    if let Ok(uid) = reference.parse::<Uuid>() {
      return SignalId::from_uid(uid);
    }
    match self.signals.get(reference) {
      Some(uid) => SignalId::new(*uid, reference),
      None => SignalId::named(reference),
    }
  }

  fn door(&self, reference: &str) -> DoorId {
    if let Ok(uid) = reference.parse::<Uuid>() {
      return DoorId::from_uid(uid);
    }
    match self.doors.get(reference) {
      Some(uid) => DoorId::new(*uid, reference),
      None => DoorId::named(reference),
    }
  }

  /// A variable target may name a signal or a door
  fn source_uid(&self, reference: &str) -> Uuid {
    if let Ok(uid) = reference.parse::<Uuid>() {
      return uid;
    }
    if let Some(uid) = self.signals.get(reference) {
      return *uid;
    }
    if let Some(uid) = self.doors.get(reference) {
      return *uid;
    }
    SignalId::named(reference).uid
  }
}

fn build_door(entry: &DoorEntry, resolver: &Resolver) -> Result<DoorDefinition, BuildError> {
  let mut builder = DoorBuilder::new(entry.name.clone()).uid(resolver.door(&entry.name).uid);
  for signal in &entry.signals {
    builder = builder.listen_signal(resolver.signal(signal));
  }
  for door in &entry.doors {
    builder = builder.listen_door(resolver.door(door));
  }

  if let Some(delay) = entry.retention_max_delay_ms {
    builder = builder.retention_max_delay((delay > 0).then(|| Duration::from_millis(delay)));
  }
  if entry.unbounded_history {
    builder = builder.history_max_retention(None);
  } else if let Some(max) = entry.history_max_retention {
    builder = builder.history_max_retention(Some(max));
  }
  if let Some(max) = entry.not_consumed_max_retention {
    builder = builder.not_consumed_max_retention(max);
  }

  let window = entry.active_window_ms.map(Duration::from_millis);

  let mut door = if let Some(condition) = &entry.condition {
    let mut relay = builder.relay_filter(condition.clone());
    if entry.dont_relay_content {
      relay = relay.dont_relay_content();
    }
    relay.build()?
  } else if let (Some(op), None) = (&entry.operator, &entry.formula) {
    builder.logical_aggregator(op.into(), window.ok_or(BuildError::MissingActiveWindow)?)?
  } else {
    let mut logical = builder.logical().formula(entry.formula.clone().unwrap_or_default());
    if let Some(window) = window {
      logical = logical.active_window(window);
    }
    for (name, target) in &entry.variables {
      if target.eq_ignore_ascii_case(THIS_VARIABLE) {
        logical = logical.assign_variable_this(name.clone());
      } else {
        logical = logical.assign_variable(name.clone(), resolver.source_uid(target));
      }
    }
    if entry.use_this {
      logical = logical.use_variable_this();
    }
    logical.build()?
  };

  if let Some(kind) = &entry.kind {
    door.kind = DoorKind::new(kind.clone());
  }
  Ok(door)
}
