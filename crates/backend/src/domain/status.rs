//! Per-source bookkeeping held in a door's durable state
//!
//! Every source a door listens to gets a [`DoorSignalReceivedStatus`]:
//! occurrences that have not yet been folded into an emission wait in the
//! not-consumed queue, consumed ones move to the history. Both lists are
//! kept ordered by send time (oldest first), so retention always drops
//! from the front.
//!
//! [`DoorHandlerState`] groups the statuses of one door, plus a status for
//! the door itself that records its own emissions (the `this` variable).

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{door::DoorDefinition, ids::FireId, signal::SignalSource};

/// Start of the window ending at `now`, or `None` when the window reaches
/// further back than time can represent.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
  chrono::Duration::from_std(window)
    .ok()
    .and_then(|d| now.checked_sub_signed(d))
}

// ============================================================================
// DoorSignalReceivedStatus
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoorSignalReceivedStatus {
  signal_uid: Uuid,
  #[serde(default)]
  not_consumed: Vec<SignalSource>,
  #[serde(default)]
  history: Vec<SignalSource>,
  #[serde(default)]
  last_received: Option<DateTime<Utc>>,
}

impl DoorSignalReceivedStatus {
  pub fn new(signal_uid: Uuid) -> Self {
    Self {
      signal_uid,
      not_consumed: Vec::new(),
      history: Vec::new(),
      last_received: None,
    }
  }

  pub fn signal_uid(&self) -> Uuid {
    self.signal_uid
  }

  /// Send time of the newest occurrence ever received
  pub fn last_received(&self) -> Option<DateTime<Utc>> {
    self.last_received
  }

  pub fn not_consumed(&self) -> &[SignalSource] {
    &self.not_consumed
  }

  pub fn history(&self) -> &[SignalSource] {
    &self.history
  }

  /// Most recent occurrence not yet consumed
  pub fn last_not_consumed(&self) -> Option<&SignalSource> {
    self.not_consumed.last()
  }

  /// Queue an occurrence. Re-deliveries of the same fire are ignored.
  pub fn push(&mut self, source: SignalSource) -> bool {
    if self.not_consumed.iter().any(|s| s.fire_id == source.fire_id) {
      return false;
    }

    if self.last_received.is_none_or(|last| source.send_utc > last) {
      self.last_received = Some(source.send_utc);
    }

    insert_ordered(&mut self.not_consumed, source);
    true
  }

  /// Record an occurrence that is never queued, only remembered
  pub fn record(&mut self, source: SignalSource, keep_history: bool) {
    if self.last_received.is_none_or(|last| source.send_utc > last) {
      self.last_received = Some(source.send_utc);
    }
    if keep_history {
      insert_ordered(&mut self.history, source);
    }
  }

  /// Oldest not-consumed occurrence sent after `since` (any when `None`)
  pub fn first_active_since(&self, since: Option<DateTime<Utc>>) -> Option<&SignalSource> {
    self
      .not_consumed
      .iter()
      .find(|s| since.is_none_or(|since| s.send_utc > since))
  }

  /// Whether the newest occurrence ever received was sent after `since`
  pub fn received_since(&self, since: Option<DateTime<Utc>>) -> bool {
    match (self.last_received, since) {
      (None, _) => false,
      (Some(_), None) => true,
      (Some(last), Some(since)) => last > since,
    }
  }

  /// Move an occurrence out of the not-consumed queue
  pub fn mark_as_used(&mut self, fire_id: FireId, keep_history: bool) -> bool {
    let Some(index) = self.not_consumed.iter().position(|s| s.fire_id == fire_id) else {
      return false;
    };

    let source = self.not_consumed.remove(index);
    if keep_history {
      insert_ordered(&mut self.history, source);
    }
    true
  }

  /// Keep only the `max` most recent history entries
  pub fn clear_history(&mut self, max: usize) {
    truncate_front(&mut self.history, max);
  }

  /// Keep only the `max` most recent not-consumed entries
  pub fn clear_not_consumed(&mut self, max: usize) {
    truncate_front(&mut self.not_consumed, max);
  }

  /// Drop every entry sent at or before `cutoff`
  pub fn clear_older_than(&mut self, cutoff: DateTime<Utc>) {
    self.history.retain(|s| s.send_utc > cutoff);
    self.not_consumed.retain(|s| s.send_utc > cutoff);
  }
}

fn insert_ordered(list: &mut Vec<SignalSource>, source: SignalSource) {
  // After any entry with the same send time, so arrival order breaks ties
  let index = list.partition_point(|s| s.send_utc <= source.send_utc);
  list.insert(index, source);
}

fn truncate_front(list: &mut Vec<SignalSource>, max: usize) {
  if list.len() > max {
    let excess = list.len() - max;
    list.drain(..excess);
  }
}

// ============================================================================
// Retention
// ============================================================================

/// Count and age bounds applied after every receive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
  pub max_delay: Option<Duration>,
  pub history_max: Option<u32>,
  pub not_consumed_max: Option<u32>,
}

impl From<&DoorDefinition> for RetentionPolicy {
  fn from(door: &DoorDefinition) -> Self {
    Self {
      max_delay: door.retention_max_delay,
      history_max: door.history_max_retention,
      not_consumed_max: door.not_consumed_max_retention,
    }
  }
}

// ============================================================================
// DoorHandlerState
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoorHandlerState {
  door_uid: Uuid,
  #[serde(default)]
  statuses: BTreeMap<Uuid, DoorSignalReceivedStatus>,
}

impl DoorHandlerState {
  pub fn new(door_uid: Uuid, sources: &[Uuid]) -> Self {
    let mut state = Self {
      door_uid,
      statuses: BTreeMap::new(),
    };
    state.initialize(door_uid, sources);
    state
  }

  /// Align the statuses with a (possibly changed) source list, keeping
  /// what was recorded for sources that are still declared
  pub fn initialize(&mut self, door_uid: Uuid, sources: &[Uuid]) {
    if self.door_uid != door_uid {
      self.statuses.clear();
      self.door_uid = door_uid;
    }

    self
      .statuses
      .retain(|uid, _| *uid == door_uid || sources.contains(uid));
    for uid in sources.iter().copied().chain(std::iter::once(door_uid)) {
      self
        .statuses
        .entry(uid)
        .or_insert_with(|| DoorSignalReceivedStatus::new(uid));
    }
  }

  pub fn door_uid(&self) -> Uuid {
    self.door_uid
  }

  /// Record an occurrence. Unknown sources are ignored and return false.
  pub fn push(&mut self, source: &SignalSource) -> bool {
    if source.uid() == self.door_uid {
      return false;
    }
    match self.statuses.get_mut(&source.uid()) {
      Some(status) => status.push(source.clone()),
      None => false,
    }
  }

  pub fn status(&self, uid: Uuid) -> Option<&DoorSignalReceivedStatus> {
    self.statuses.get(&uid)
  }

  /// Status tracking the door's own emissions
  pub fn own_status(&self) -> Option<&DoorSignalReceivedStatus> {
    self.statuses.get(&self.door_uid)
  }

  /// Remember an emission of the door itself
  pub fn record_own_fire(&mut self, source: SignalSource, keep_history: bool) {
    let door_uid = self.door_uid;
    self
      .statuses
      .entry(door_uid)
      .or_insert_with(|| DoorSignalReceivedStatus::new(door_uid))
      .record(source, keep_history);
  }

  /// Oldest active not-consumed occurrence of every source that has one
  pub fn last_active_since(&self, since: Option<DateTime<Utc>>) -> BTreeMap<Uuid, SignalSource> {
    self
      .statuses
      .iter()
      .filter(|(uid, _)| **uid != self.door_uid)
      .filter_map(|(uid, status)| status.first_active_since(since).map(|s| (*uid, s.clone())))
      .collect()
  }

  /// All not-consumed occurrences across sources, oldest first
  pub fn not_consumed(&self) -> Vec<SignalSource> {
    let mut all: Vec<SignalSource> = self
      .statuses
      .values()
      .flat_map(|s| s.not_consumed().iter().cloned())
      .collect();
    all.sort_by_key(|s| s.send_utc);
    all
  }

  pub fn mark_as_used(&mut self, source: &SignalSource, keep_history: bool) -> bool {
    match self.statuses.get_mut(&source.uid()) {
      Some(status) => status.mark_as_used(source.fire_id, keep_history),
      None => false,
    }
  }

  pub fn apply_retention(&mut self, now: DateTime<Utc>, policy: RetentionPolicy) {
    let cutoff = policy.max_delay.and_then(|delay| window_start(now, delay));

    for status in self.statuses.values_mut() {
      if let Some(cutoff) = cutoff {
        status.clear_older_than(cutoff);
      }
      if let Some(max) = policy.history_max {
        status.clear_history(max as usize);
      }
      if let Some(max) = policy.not_consumed_max {
        status.clear_not_consumed(max as usize);
      }
    }
  }

  pub fn statuses(&self) -> impl Iterator<Item = &DoorSignalReceivedStatus> {
    self.statuses.values()
  }
}
