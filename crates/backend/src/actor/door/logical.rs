//! Boolean logic door
//!
//! Every source is one variable of the formula. A variable is true when its
//! source has a not-consumed occurrence sent inside the active window; a
//! variable bound to the door itself is true while the door's own last
//! emission is inside the window. When the formula holds, the door emits
//! and every active occurrence is consumed.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;
use uuid::Uuid;

use super::{DoorError, DoorFactory, DoorLogic, Emission};
use crate::{
  domain::{
    door::DoorDefinition,
    signal::{SignalMessage, SignalSource},
    status::{DoorHandlerState, window_start},
  },
  formula::{CompiledFormula, FormulaCache},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogicalDoorFactory;

#[async_trait]
impl DoorFactory for LogicalDoorFactory {
  async fn build(&self, definition: &DoorDefinition, formulas: &FormulaCache) -> Result<Box<dyn DoorLogic>, DoorError> {
    let settings = definition.logical().ok_or_else(|| DoorError::BehaviorMismatch {
      kind: definition.kind.clone(),
      behavior: "relay filter",
    })?;
    settings.check(definition)?;

    let names = settings.variable_names();
    let formula = formulas.get_or_compile(&settings.formula, &names).await?;

    Ok(Box::new(LogicalDoor {
      door_uid: definition.uid(),
      window: definition.active_window,
      bindings: settings
        .variables
        .iter()
        .map(|(name, uid)| (name.to_lowercase(), *uid))
        .collect(),
      formula,
      uses_self: settings.use_current_door_status || settings.self_variables(definition.uid()).next().is_some(),
      keep_history: definition.keeps_history(),
    }))
  }
}

#[derive(Debug)]
pub struct LogicalDoor {
  door_uid: Uuid,
  window: Option<Duration>,
  /// Lowercased variable name to source uid
  bindings: Vec<(String, Uuid)>,
  formula: Arc<CompiledFormula>,
  uses_self: bool,
  keep_history: bool,
}

impl LogicalDoor {
  fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    self.window.and_then(|w| window_start(now, w))
  }

  fn binding(&self, name: &str) -> Option<Uuid> {
    let lower = name.to_lowercase();
    self.bindings.iter().find(|(n, _)| *n == lower).map(|(_, uid)| *uid)
  }

  fn evaluate(&self, state: &mut DoorHandlerState, now: DateTime<Utc>) -> Option<Emission> {
    let since = self.since(now);
    let active = state.last_active_since(since);
    let this_active = state.own_status().is_some_and(|s| s.received_since(since));

    let result = self.formula.evaluate_with(|name| match self.binding(name) {
      Some(uid) if uid == self.door_uid => this_active,
      Some(uid) => active.contains_key(&uid),
      None => false,
    });

    trace!(
      door = %self.door_uid,
      formula = self.formula.source(),
      active = active.len(),
      this_active,
      result,
      "Formula evaluated"
    );

    if !result {
      return None;
    }

    let mut origins: Vec<SignalSource> = active.into_values().collect();
    origins.sort_by_key(|s| s.send_utc);
    for source in &origins {
      state.mark_as_used(source, self.keep_history);
    }

    Some(Emission {
      content: None,
      metadata: None,
      origins,
    })
  }
}

impl DoorLogic for LogicalDoor {
  fn on_receive(&self, state: &mut DoorHandlerState, message: &SignalMessage, now: DateTime<Utc>) -> Option<Emission> {
    if !state.push(&message.source) {
      trace!(door = %self.door_uid, source = %message.source.signal_id, "Ignored occurrence (unknown source or duplicate)");
      return None;
    }
    self.evaluate(state, now)
  }

  fn on_stimulate(&self, state: &mut DoorHandlerState, now: DateTime<Utc>) -> Option<Emission> {
    self.evaluate(state, now)
  }

  /// Re-evaluate once our own last emission leaves the window, so formulas
  /// negating the door's own status can fire without new input
  fn rearm_at(&self, state: &DoorHandlerState, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !self.uses_self {
      return None;
    }
    let window = chrono::Duration::from_std(self.window?).ok()?;
    let last = state.own_status()?.last_received()?;
    let at = last.checked_add_signed(window)?;
    (at > now).then_some(at)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration as ChronoDuration, TimeZone};
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::{
    definition::builder::{DoorBuilder, LogicOperator},
    domain::{
      ids::{FireId, SignalId},
      signal::SignalDefinition,
    },
  };

  fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
  }

  fn occurrence(signal: &SignalDefinition, at: DateTime<Utc>) -> SignalMessage {
    let source = SignalSource {
      fire_id: FireId::new(),
      signal_id: signal.signal_id.clone(),
      is_door: false,
      send_utc: at,
      source_address: None,
      metadata: None,
      content: None,
      origins: vec![],
    };
    SignalMessage::new(source, at)
  }

  async fn build(definition: &DoorDefinition) -> (Box<dyn DoorLogic>, DoorHandlerState) {
    let logic = LogicalDoorFactory
      .build(definition, &FormulaCache::default())
      .await
      .unwrap();
    let state = DoorHandlerState::new(definition.uid(), &definition.source_uids());
    (logic, state)
  }

  /// Mirror of what the actor does after an emission
  fn record(state: &mut DoorHandlerState, definition: &DoorDefinition, emission: &Emission, at: DateTime<Utc>) {
    let source = SignalSource {
      fire_id: FireId::new(),
      signal_id: SignalId::from(&definition.door_id),
      is_door: true,
      send_utc: at,
      source_address: None,
      metadata: None,
      content: None,
      origins: emission.origins.clone(),
    };
    state.record_own_fire(source, definition.keeps_history());
  }

  #[tokio::test]
  async fn test_and_within_window_fires_once() {
    let a = SignalDefinition::builder("a").build();
    let b = SignalDefinition::builder("b").build();
    let door = DoorBuilder::new("both")
      .listen(&a)
      .listen(&b)
      .logical_aggregator(LogicOperator::And, std::time::Duration::from_secs(60))
      .unwrap();
    let (logic, mut state) = build(&door).await;

    assert_eq!(logic.on_receive(&mut state, &occurrence(&a, t0()), t0()), None);

    let later = t0() + ChronoDuration::seconds(30);
    let emission = logic.on_receive(&mut state, &occurrence(&b, later), later).unwrap();
    assert_eq!(emission.origins.len(), 2);
    assert_eq!(emission.origins[0].signal_id, a.signal_id);

    // Both occurrences are consumed
    assert!(state.not_consumed().is_empty());
    assert_eq!(logic.on_stimulate(&mut state, later), None);
  }

  #[tokio::test]
  async fn test_and_outside_window_does_not_fire() {
    let a = SignalDefinition::builder("a").build();
    let b = SignalDefinition::builder("b").build();
    let door = DoorBuilder::new("both")
      .listen(&a)
      .listen(&b)
      .logical_aggregator(LogicOperator::And, std::time::Duration::from_secs(60))
      .unwrap();
    let (logic, mut state) = build(&door).await;

    assert_eq!(logic.on_receive(&mut state, &occurrence(&a, t0()), t0()), None);

    let later = t0() + ChronoDuration::seconds(61);
    assert_eq!(logic.on_receive(&mut state, &occurrence(&b, later), later), None);
  }

  #[tokio::test]
  async fn test_not_this_suppresses_refire_within_window() {
    let a = SignalDefinition::builder("a").build();
    let door = DoorBuilder::new("once")
      .listen(&a)
      .logical()
      .active_window(std::time::Duration::from_secs(60))
      .assign_variable("A", a.uid())
      .use_variable_this()
      .formula("A & !this")
      .build()
      .unwrap();
    let (logic, mut state) = build(&door).await;

    let emission = logic.on_receive(&mut state, &occurrence(&a, t0()), t0()).unwrap();
    record(&mut state, &door, &emission, t0());

    let soon = t0() + ChronoDuration::seconds(10);
    assert_eq!(logic.on_receive(&mut state, &occurrence(&a, soon), soon), None);
    assert_eq!(logic.rearm_at(&state, soon), Some(t0() + ChronoDuration::seconds(60)));

    let next_window = t0() + ChronoDuration::seconds(75);
    assert!(logic.on_receive(&mut state, &occurrence(&a, next_window), next_window).is_some());
  }

  #[tokio::test]
  async fn test_stimulate_after_window_fires_pending() {
    let a = SignalDefinition::builder("a").build();
    let door = DoorBuilder::new("once")
      .listen(&a)
      .logical()
      .active_window(std::time::Duration::from_secs(60))
      .assign_variable("A", a.uid())
      .use_variable_this()
      .formula("A & !this")
      .build()
      .unwrap();
    let (logic, mut state) = build(&door).await;

    let emission = logic.on_receive(&mut state, &occurrence(&a, t0()), t0()).unwrap();
    record(&mut state, &door, &emission, t0());

    // Arrives while suppressed, still inside its own window when rearmed
    let pending_at = t0() + ChronoDuration::seconds(40);
    assert_eq!(logic.on_receive(&mut state, &occurrence(&a, pending_at), pending_at), None);

    let rearm = t0() + ChronoDuration::seconds(61);
    let emission = logic.on_stimulate(&mut state, rearm).unwrap();
    assert_eq!(emission.origins[0].send_utc, pending_at);
  }

  #[tokio::test]
  async fn test_unknown_source_is_ignored() {
    let a = SignalDefinition::builder("a").build();
    let stranger = SignalDefinition::builder("stranger").build();
    let door = DoorBuilder::new("d")
      .listen(&a)
      .logical_aggregator(LogicOperator::Or, std::time::Duration::from_secs(60))
      .unwrap();
    let (logic, mut state) = build(&door).await;

    assert_eq!(logic.on_receive(&mut state, &occurrence(&stranger, t0()), t0()), None);
    assert!(state.not_consumed().is_empty());
  }

  #[tokio::test]
  async fn test_xor_consumes_only_active_sources() {
    let a = SignalDefinition::builder("a").build();
    let b = SignalDefinition::builder("b").build();
    let door = DoorBuilder::new("either")
      .listen(&a)
      .listen(&b)
      .logical_aggregator(LogicOperator::Xor, std::time::Duration::from_secs(60))
      .unwrap();
    let (logic, mut state) = build(&door).await;

    let emission = logic.on_receive(&mut state, &occurrence(&a, t0()), t0()).unwrap();
    assert_eq!(emission.origins.len(), 1);
    assert!(state.status(b.uid()).unwrap().not_consumed().is_empty());
  }

  #[tokio::test]
  async fn test_relay_definition_is_rejected() {
    let a = SignalDefinition::builder("a").build();
    let door = DoorBuilder::new("relay")
      .listen(&a)
      .relay_filter(crate::domain::condition::FilterCondition::Always)
      .build()
      .unwrap();

    let err = LogicalDoorFactory
      .build(&door, &FormulaCache::default())
      .await
      .unwrap_err();
    assert!(matches!(err, DoorError::BehaviorMismatch { .. }));
  }
}
