//! Relay filter door
//!
//! Re-emits each incoming occurrence that satisfies the door's condition,
//! carrying over the sender metadata and (unless disabled) the content.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;

use super::{DoorError, DoorFactory, DoorLogic, Emission};
use crate::{
  domain::{
    condition::FilterCondition,
    door::DoorDefinition,
    signal::SignalMessage,
    status::DoorHandlerState,
  },
  formula::FormulaCache,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct RelayFilterDoorFactory;

#[async_trait]
impl DoorFactory for RelayFilterDoorFactory {
  async fn build(&self, definition: &DoorDefinition, _formulas: &FormulaCache) -> Result<Box<dyn DoorLogic>, DoorError> {
    let settings = definition.relay_filter().ok_or_else(|| DoorError::BehaviorMismatch {
      kind: definition.kind.clone(),
      behavior: "boolean logic",
    })?;

    Ok(Box::new(RelayFilterDoor {
      condition: settings.condition.clone(),
      relay_content: !settings.dont_relay_content,
      keep_history: definition.keeps_history(),
    }))
  }
}

#[derive(Debug)]
pub struct RelayFilterDoor {
  condition: FilterCondition,
  relay_content: bool,
  keep_history: bool,
}

impl DoorLogic for RelayFilterDoor {
  fn on_receive(&self, state: &mut DoorHandlerState, message: &SignalMessage, _now: DateTime<Utc>) -> Option<Emission> {
    let source = &message.source;
    // Undeclared sources
    if !state.push(source) {
      trace!(door = %state.door_uid(), source = %source.signal_id, "Ignored occurrence");
      return None;
    }

    let matched = self.condition.evaluate(message);
    // Rejected occurrences are dropped, relayed ones go to history
    state.mark_as_used(source, matched && self.keep_history);

    trace!(door = %state.door_uid(), source = %source.signal_id, matched, "Condition evaluated");
    if !matched {
      return None;
    }

    Some(Emission {
      content: if self.relay_content { source.content.clone() } else { None },
      metadata: source.metadata.clone(),
      origins: vec![source.clone()],
    })
  }
}
