//! Door definitions
//!
//! A door listens to a set of signals and/or other doors and emits its own
//! signal when its behavior says so. The common part of a definition
//! (identity, sources, window and retention) is shared by all behaviors;
//! [`DoorBehavior`] carries what is specific to each kind.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::warn;
use uuid::Uuid;

use super::{
  condition::FilterCondition,
  ids::{DoorId, DoorKind, SignalId},
};
use crate::formula::{self, FormulaError};

/// Name of the variable bound to the door's own emission
pub const THIS_VARIABLE: &str = "this";

/// Default maximum age of stored occurrences
pub const DEFAULT_RETENTION_MAX_DELAY: Duration = Duration::from_secs(24 * 3600);

fn default_retention_max_delay() -> Option<Duration> {
  Some(DEFAULT_RETENTION_MAX_DELAY)
}

fn default_history_max_retention() -> Option<u32> {
  Some(0)
}

// ============================================================================
// Definition
// ============================================================================

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoorDefinition {
  pub door_id: DoorId,
  /// Registry key of the behavior implementing this door
  pub kind: DoorKind,
  #[serde(default)]
  pub signal_sources: Vec<SignalId>,
  #[serde(default)]
  pub door_sources: Vec<DoorId>,
  /// Window in which an occurrence counts as active; `None` means no limit
  #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
  #[serde(default, rename = "active_window_ms")]
  pub active_window: Option<Duration>,
  #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
  #[serde(default = "default_retention_max_delay", rename = "retention_max_delay_ms")]
  pub retention_max_delay: Option<Duration>,
  /// Max consumed occurrences kept per source
  #[serde(default = "default_history_max_retention")]
  pub history_max_retention: Option<u32>,
  /// Max not-yet-consumed occurrences kept per source
  #[serde(default)]
  pub not_consumed_max_retention: Option<u32>,
  pub behavior: DoorBehavior,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DoorBehavior {
  BooleanLogic(LogicalDoorSettings),
  RelayFilter(RelayFilterSettings),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalDoorSettings {
  pub formula: String,
  /// Variable name to source uid. `this` (or any name bound to the door's
  /// own uid) refers to the door's last emission.
  pub variables: BTreeMap<String, Uuid>,
  /// True when `this` participates in the formula
  #[serde(default)]
  pub use_current_door_status: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayFilterSettings {
  pub condition: FilterCondition,
  /// Relay without the original payload
  #[serde(default)]
  pub dont_relay_content: bool,
}

impl DoorDefinition {
  pub fn uid(&self) -> Uuid {
    self.door_id.uid
  }

  /// Distinct source uids, signals first
  pub fn source_uids(&self) -> Vec<Uuid> {
    let mut uids: Vec<Uuid> = Vec::with_capacity(self.signal_sources.len() + self.door_sources.len());
    let all = self
      .signal_sources
      .iter()
      .map(|s| s.uid)
      .chain(self.door_sources.iter().map(|d| d.uid));
    for uid in all {
      if !uids.contains(&uid) {
        uids.push(uid);
      }
    }
    uids
  }

  /// Whether the history of consumed occurrences is kept at all
  pub fn keeps_history(&self) -> bool {
    self.history_max_retention != Some(0)
  }

  /// Structural equality including display names
  pub fn is_identical(&self, other: &DoorDefinition) -> bool {
    match (serde_json::to_value(self), serde_json::to_value(other)) {
      (Ok(a), Ok(b)) => a == b,
      _ => false,
    }
  }

  pub fn logical(&self) -> Option<&LogicalDoorSettings> {
    match &self.behavior {
      DoorBehavior::BooleanLogic(settings) => Some(settings),
      DoorBehavior::RelayFilter(_) => None,
    }
  }

  pub fn relay_filter(&self) -> Option<&RelayFilterSettings> {
    match &self.behavior {
      DoorBehavior::RelayFilter(settings) => Some(settings),
      DoorBehavior::BooleanLogic(_) => None,
    }
  }

  /// Validate the definition, logging every warning.
  ///
  /// Critical problems are always errors. Missing sources and unbounded
  /// retention are warnings, promoted to errors in strict mode.
  pub fn validate(&self, mode: ValidationMode) -> Result<Vec<ValidationIssue>, ValidationError> {
    let mut issues = Vec::new();

    if self.door_id.uid.is_nil() {
      issues.push(ValidationIssue::error(IssueCode::EmptyDoorUid, "door uid is empty"));
    }
    if self.kind.is_empty() {
      issues.push(ValidationIssue::error(IssueCode::EmptyKind, "door kind is empty"));
    }

    let has_sources = !self.signal_sources.is_empty() || !self.door_sources.is_empty();
    if !has_sources {
      issues.push(ValidationIssue::warning(IssueCode::NoSources, "door listens to no source"));
    }
    if self.history_max_retention.is_none() && self.retention_max_delay.is_none() {
      issues.push(ValidationIssue::warning(
        IssueCode::UnboundedHistory,
        "no history retention bound: consumed history grows without limit",
      ));
    }
    if self.not_consumed_max_retention.is_none() && self.retention_max_delay.is_none() {
      issues.push(ValidationIssue::warning(
        IssueCode::UnboundedNotConsumed,
        "no not-consumed retention bound: pending occurrences grow without limit",
      ));
    }

    // Behavior checks only make sense once the door has sources
    if has_sources && let DoorBehavior::BooleanLogic(settings) = &self.behavior {
      if let Err(e) = settings.check(self) {
        issues.push(ValidationIssue::error(IssueCode::InvalidBehavior, e.to_string()));
      }
    }

    for issue in issues.iter().filter(|i| i.severity == Severity::Warning) {
      warn!(door = %self.door_id, code = ?issue.code, "{}", issue.message);
    }

    ValidationIssue::resolve(issues, mode)
  }
}

impl LogicalDoorSettings {
  /// Ordered variable names, as compiled
  pub fn variable_names(&self) -> Vec<String> {
    self.variables.keys().cloned().collect()
  }

  pub fn is_this(name: &str) -> bool {
    name.eq_ignore_ascii_case(THIS_VARIABLE)
  }

  /// Variables bound to the door's own emission
  pub fn self_variables(&self, door_uid: Uuid) -> impl Iterator<Item = &String> {
    self
      .variables
      .iter()
      .filter(move |(_, uid)| **uid == door_uid)
      .map(|(name, _)| name)
  }

  /// Check the formula and variable bindings against the door's sources
  pub fn check(&self, door: &DoorDefinition) -> Result<(), BuildError> {
    if door.active_window.is_none() {
      return Err(BuildError::MissingActiveWindow);
    }
    if self.formula.trim().is_empty() {
      return Err(BuildError::EmptyFormula);
    }

    let sources = door.source_uids();
    if sources.is_empty() {
      return Err(BuildError::NoSources);
    }

    let door_uid = door.uid();
    if let Some((name, _)) = self
      .variables
      .iter()
      .find(|(name, uid)| Self::is_this(name) && **uid != door_uid)
    {
      return Err(BuildError::ThisNotSelf(name.clone()));
    }

    let bound: Vec<(&String, &Uuid)> = self.variables.iter().filter(|(_, uid)| **uid != door_uid).collect();
    if bound.len() != sources.len() {
      return Err(BuildError::VariableCountMismatch {
        sources: sources.len(),
        variables: bound.len(),
      });
    }
    for (name, uid) in &bound {
      if !sources.contains(uid) {
        return Err(BuildError::UnknownSource {
          variable: (*name).clone(),
          uid: **uid,
        });
      }
    }
    for source in &sources {
      if !bound.iter().any(|(_, uid)| *uid == source) {
        return Err(BuildError::UnassignedSource(*source));
      }
    }

    let lower_formula = self.formula.to_lowercase();
    if let Some(unused) = self.variables.keys().find(|v| !lower_formula.contains(&v.to_lowercase())) {
      return Err(BuildError::UnusedVariable(unused.clone()));
    }

    formula::can_build(&self.formula, &self.variable_names())?;
    Ok(())
  }
}

// ============================================================================
// Build errors
// ============================================================================

/// Configuration errors raised while building or checking a door
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
  #[error("Active window interval is required")]
  MissingActiveWindow,

  #[error("Formula must not be empty")]
  EmptyFormula,

  #[error("At least one signal or door source is required")]
  NoSources,

  #[error("Source count ({sources}) does not match assigned variable count ({variables})")]
  VariableCountMismatch { sources: usize, variables: usize },

  #[error("Variable '{variable}' is bound to {uid}, which is not a declared source")]
  UnknownSource { variable: String, uid: Uuid },

  #[error("Source {0} has no assigned variable")]
  UnassignedSource(Uuid),

  #[error("Variable '{0}' is not used in the formula")]
  UnusedVariable(String),

  #[error("Variable '{0}' is assigned more than once")]
  DuplicateVariable(String),

  #[error("Variable '{0}' must be bound to the door itself")]
  ThisNotSelf(String),

  #[error("Invalid variable name '{0}': only letters are allowed")]
  InvalidVariableName(String),

  #[error("Not-consumed retention must be at least 1")]
  InvalidNotConsumedRetention,

  #[error("Invalid formula: {0}")]
  Formula(#[from] FormulaError),
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
  /// Warnings are reported but do not fail validation
  #[default]
  Lenient,
  /// Warnings fail validation
  Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Warning,
  Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
  EmptyDoorUid,
  EmptyKind,
  NoSources,
  UnboundedHistory,
  UnboundedNotConsumed,
  InvalidBehavior,
  DuplicateSignal,
  ParentCycle,
  DoorCycle,
  UnknownSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
  pub severity: Severity,
  pub code: IssueCode,
  pub message: String,
}

impl ValidationIssue {
  pub fn warning(code: IssueCode, message: impl Into<String>) -> Self {
    Self {
      severity: Severity::Warning,
      code,
      message: message.into(),
    }
  }

  pub fn error(code: IssueCode, message: impl Into<String>) -> Self {
    Self {
      severity: Severity::Error,
      code,
      message: message.into(),
    }
  }

  /// Fail if any issue counts as an error under `mode`, else return them all
  pub fn resolve(issues: Vec<ValidationIssue>, mode: ValidationMode) -> Result<Vec<ValidationIssue>, ValidationError> {
    let failing = issues
      .iter()
      .any(|i| i.severity == Severity::Error || mode == ValidationMode::Strict);
    if failing {
      Err(ValidationError { issues })
    } else {
      Ok(issues)
    }
  }
}

impl std::fmt::Display for ValidationIssue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let level = match self.severity {
      Severity::Warning => "warning",
      Severity::Error => "error",
    };
    write!(f, "{}: {}", level, self.message)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation failed: {}", .issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; "))]
pub struct ValidationError {
  pub issues: Vec<ValidationIssue>,
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn logical_door(formula: &str) -> DoorDefinition {
    let a = SignalId::named("a");
    let b = SignalId::named("b");
    DoorDefinition {
      door_id: DoorId::named("door"),
      kind: DoorKind::logical(),
      signal_sources: vec![a.clone(), b.clone()],
      door_sources: vec![],
      active_window: Some(Duration::from_secs(60)),
      retention_max_delay: default_retention_max_delay(),
      history_max_retention: Some(0),
      not_consumed_max_retention: None,
      behavior: DoorBehavior::BooleanLogic(LogicalDoorSettings {
        formula: formula.into(),
        variables: BTreeMap::from([("A".to_string(), a.uid), ("B".to_string(), b.uid)]),
        use_current_door_status: false,
      }),
    }
  }

  #[test]
  fn test_valid_door_has_no_issues() {
    let door = logical_door("A & B");
    assert_eq!(door.validate(ValidationMode::Strict).unwrap(), vec![]);
  }

  #[test]
  fn test_critical_errors() {
    let mut door = logical_door("A & B");
    door.door_id = DoorId::from_uid(Uuid::nil());
    door.kind = DoorKind::new(" ");

    let err = door.validate(ValidationMode::Lenient).unwrap_err();
    let codes: Vec<IssueCode> = err.issues.iter().map(|i| i.code).collect();
    assert!(codes.contains(&IssueCode::EmptyDoorUid));
    assert!(codes.contains(&IssueCode::EmptyKind));
  }

  #[test]
  fn test_unbounded_retention_is_warning_unless_strict() {
    let mut door = logical_door("A & B");
    door.retention_max_delay = None;
    door.history_max_retention = None;

    let issues = door.validate(ValidationMode::Lenient).unwrap();
    let codes: Vec<IssueCode> = issues.iter().map(|i| i.code).collect();
    assert_eq!(codes, vec![IssueCode::UnboundedHistory, IssueCode::UnboundedNotConsumed]);

    assert!(door.validate(ValidationMode::Strict).is_err());
  }

  #[test]
  fn test_no_sources_is_warning() {
    let mut door = logical_door("A & B");
    door.signal_sources.clear();
    let issues = door.validate(ValidationMode::Lenient).unwrap();
    assert_eq!(issues[0].code, IssueCode::NoSources);
  }

  #[test]
  fn test_invalid_formula_is_error() {
    let door = logical_door("A & B & C");
    let err = door.validate(ValidationMode::Lenient).unwrap_err();
    assert_eq!(err.issues[0].code, IssueCode::InvalidBehavior);
  }

  #[test]
  fn test_source_uids_are_distinct() {
    let mut door = logical_door("A & B");
    door.signal_sources.push(SignalId::named("a"));
    assert_eq!(door.source_uids().len(), 2);
  }

  #[test]
  fn test_is_identical_sees_renames() {
    let door = logical_door("A & B");
    let mut renamed = door.clone();
    renamed.door_id.name = Some("other".into());
    assert_eq!(door, renamed);
    assert!(!door.is_identical(&renamed));
  }

  #[test]
  fn test_json_round_trip_keeps_unbounded_fields() {
    let mut door = logical_door("A & B");
    door.retention_max_delay = None;
    door.history_max_retention = None;

    let json = serde_json::to_string(&door).unwrap();
    let back: DoorDefinition = serde_json::from_str(&json).unwrap();
    assert!(back.is_identical(&door));
  }

  #[test]
  fn test_missing_retention_fields_use_defaults() {
    let json = serde_json::json!({
      "door_id": {"uid": Uuid::new_v4()},
      "kind": "relay-filter",
      "behavior": {"type": "relay_filter", "condition": {"type": "always"}}
    });
    let door: DoorDefinition = serde_json::from_value(json).unwrap();
    assert_eq!(door.retention_max_delay, Some(DEFAULT_RETENTION_MAX_DELAY));
    assert_eq!(door.history_max_retention, Some(0));
    assert_eq!(door.not_consumed_max_retention, None);
    assert!(!door.keeps_history());
  }
}
