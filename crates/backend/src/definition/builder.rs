//! Fluent builders for door definitions
//!
//! ```ignore
//! let door = DoorBuilder::new("checkout-ready")
//!   .listen_signal(cart.signal_id.clone())
//!   .listen_signal(payment.signal_id.clone())
//!   .logical()
//!   .active_window(Duration::from_secs(60))
//!   .assign_variable("cart", cart.uid())
//!   .assign_variable("paid", payment.uid())
//!   .use_variable_this()
//!   .formula("cart & paid & !this")
//!   .build()?;
//! ```
//!
//! Building fails fast on configuration errors (see [`BuildError`]);
//! retention warnings are left to [`DoorDefinition::validate`].

use std::{collections::BTreeMap, time::Duration};

use uuid::Uuid;

use crate::domain::{
  condition::FilterCondition,
  door::{
    BuildError, DEFAULT_RETENTION_MAX_DELAY, DoorBehavior, DoorDefinition, LogicalDoorSettings, RelayFilterSettings,
    THIS_VARIABLE,
  },
  ids::{DoorId, DoorKind, SignalId},
  signal::SignalDefinition,
};

/// Operator joining every source for [`DoorBuilder::logical_aggregator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOperator {
  And,
  Or,
  Xor,
}

impl LogicOperator {
  pub fn symbol(self) -> char {
    match self {
      LogicOperator::And => '&',
      LogicOperator::Or => '|',
      LogicOperator::Xor => '^',
    }
  }
}

/// Letters-only variable name for a source index: A..Z, AA..AZ, ...
pub fn variable_name(index: usize) -> String {
  let mut name = Vec::new();
  let mut n = index + 1;
  while n > 0 {
    let rem = (n - 1) % 26;
    name.push(b'A' + rem as u8);
    n = (n - 1) / 26;
  }
  name.reverse();
  String::from_utf8_lossy(&name).into_owned()
}

// ============================================================================
// Common builder
// ============================================================================

#[derive(Debug, Clone)]
pub struct DoorBuilder {
  name: String,
  uid: Option<Uuid>,
  signals: Vec<SignalId>,
  doors: Vec<DoorId>,
  retention_max_delay: Option<Duration>,
  history_max_retention: Option<u32>,
  not_consumed_max_retention: Option<u32>,
  error: Option<BuildError>,
}

impl DoorBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      uid: None,
      signals: Vec::new(),
      doors: Vec::new(),
      retention_max_delay: Some(DEFAULT_RETENTION_MAX_DELAY),
      history_max_retention: Some(0),
      not_consumed_max_retention: None,
      error: None,
    }
  }

  /// Fix the door uid instead of deriving it from the name
  pub fn uid(mut self, uid: Uuid) -> Self {
    self.uid = Some(uid);
    self
  }

  pub fn listen_signal(mut self, signal: SignalId) -> Self {
    if !self.signals.contains(&signal) {
      self.signals.push(signal);
    }
    self
  }

  pub fn listen(self, signal: &SignalDefinition) -> Self {
    self.listen_signal(signal.signal_id.clone())
  }

  pub fn listen_door(mut self, door: DoorId) -> Self {
    if !self.doors.contains(&door) {
      self.doors.push(door);
    }
    self
  }

  /// Max age of stored occurrences; `None` for no age limit
  pub fn retention_max_delay(mut self, delay: Option<Duration>) -> Self {
    self.retention_max_delay = delay;
    self
  }

  /// Max consumed occurrences kept per source; `None` for no count limit
  pub fn history_max_retention(mut self, max: Option<u32>) -> Self {
    self.history_max_retention = max;
    self
  }

  /// Max not-yet-consumed occurrences kept per source (at least 1)
  pub fn not_consumed_max_retention(mut self, max: u32) -> Self {
    if max < 1 {
      self.error = Some(BuildError::InvalidNotConsumedRetention);
    } else {
      self.not_consumed_max_retention = Some(max);
    }
    self
  }

  pub fn door_id(&self) -> DoorId {
    match self.uid {
      Some(uid) => DoorId::new(uid, self.name.clone()),
      None => DoorId::named(self.name.clone()),
    }
  }

  pub fn logical(self) -> LogicalDoorBuilder {
    LogicalDoorBuilder {
      base: self,
      active_window: None,
      variables: Vec::new(),
      this_name: None,
      formula: None,
    }
  }

  /// Logical door joining every source with `op`, variables named A, B, C...
  pub fn logical_aggregator(self, op: LogicOperator, active_window: Duration) -> Result<DoorDefinition, BuildError> {
    let sources: Vec<Uuid> = self
      .signals
      .iter()
      .map(|s| s.uid)
      .chain(self.doors.iter().map(|d| d.uid))
      .collect();
    let names: Vec<String> = (0..sources.len()).map(variable_name).collect();
    let formula = names.join(&format!(" {} ", op.symbol()));

    let mut builder = self.logical().active_window(active_window).formula(formula);
    for (name, uid) in names.into_iter().zip(sources) {
      builder = builder.assign_variable(name, uid);
    }
    builder.build()
  }

  pub fn relay_filter(self, condition: FilterCondition) -> RelayFilterDoorBuilder {
    RelayFilterDoorBuilder {
      base: self,
      condition,
      dont_relay_content: false,
    }
  }

  fn finish(self, kind: DoorKind, active_window: Option<Duration>, behavior: DoorBehavior) -> Result<DoorDefinition, BuildError> {
    if let Some(error) = self.error {
      return Err(error);
    }

    Ok(DoorDefinition {
      door_id: self.door_id(),
      kind,
      signal_sources: self.signals,
      door_sources: self.doors,
      active_window,
      retention_max_delay: self.retention_max_delay,
      history_max_retention: self.history_max_retention,
      not_consumed_max_retention: self.not_consumed_max_retention,
      behavior,
    })
  }
}

// ============================================================================
// Logical door
// ============================================================================

#[derive(Debug, Clone)]
pub struct LogicalDoorBuilder {
  base: DoorBuilder,
  active_window: Option<Duration>,
  variables: Vec<(String, Uuid)>,
  this_name: Option<String>,
  formula: Option<String>,
}

impl LogicalDoorBuilder {
  pub fn active_window(mut self, window: Duration) -> Self {
    self.active_window = Some(window);
    self
  }

  /// Bind a formula variable to a source uid
  pub fn assign_variable(mut self, name: impl Into<String>, source: Uuid) -> Self {
    self.variables.push((name.into(), source));
    self
  }

  /// Make the door's own emission available as `this`
  pub fn use_variable_this(self) -> Self {
    self.assign_variable_this(THIS_VARIABLE)
  }

  /// Make the door's own emission available under a custom name
  pub fn assign_variable_this(mut self, name: impl Into<String>) -> Self {
    self.this_name = Some(name.into());
    self
  }

  pub fn formula(mut self, formula: impl Into<String>) -> Self {
    self.formula = Some(formula.into());
    self
  }

  pub fn build(self) -> Result<DoorDefinition, BuildError> {
    let door_uid = self.base.door_id().uid;

    let mut variables: BTreeMap<String, Uuid> = BTreeMap::new();
    let this = self.this_name.iter().map(|name| (name.clone(), door_uid));
    for (name, uid) in self.variables.into_iter().chain(this) {
      if name.is_empty() || !name.chars().all(char::is_alphabetic) {
        return Err(BuildError::InvalidVariableName(name));
      }
      if variables.keys().any(|existing| existing.eq_ignore_ascii_case(&name)) {
        return Err(BuildError::DuplicateVariable(name));
      }
      variables.insert(name, uid);
    }

    let use_current_door_status = self.this_name.is_some();
    let formula = self.formula.unwrap_or_default();
    let settings = LogicalDoorSettings {
      formula,
      variables,
      use_current_door_status,
    };

    let door = self
      .base
      .finish(DoorKind::logical(), self.active_window, DoorBehavior::BooleanLogic(settings))?;
    if let Some(settings) = door.logical() {
      settings.check(&door)?;
    }
    Ok(door)
  }
}

// ============================================================================
// Relay filter door
// ============================================================================

#[derive(Debug, Clone)]
pub struct RelayFilterDoorBuilder {
  base: DoorBuilder,
  condition: FilterCondition,
  dont_relay_content: bool,
}

impl RelayFilterDoorBuilder {
  /// Relay matching signals without their payload
  pub fn dont_relay_content(mut self) -> Self {
    self.dont_relay_content = true;
    self
  }

  pub fn build(self) -> Result<DoorDefinition, BuildError> {
    let settings = RelayFilterSettings {
      condition: self.condition,
      dont_relay_content: self.dont_relay_content,
    };
    self
      .base
      .finish(DoorKind::relay_filter(), None, DoorBehavior::RelayFilter(settings))
  }
}
