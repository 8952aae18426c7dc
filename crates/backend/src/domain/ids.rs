//! Identity types for the signal network.
//!
//! Signals and doors share the same shape: a uid plus an optional display
//! name. Equality and hashing only look at the uid, so a renamed definition
//! still addresses the same actor.

use std::{
  fmt,
  hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for name-derived signal uids
const SIGNAL_NAMESPACE: Uuid = Uuid::from_u128(0x5d1f_0c3a_8e2b_4f6d_9a71_2c4e_b8d3_0f15);

/// Namespace for name-derived door uids
const DOOR_NAMESPACE: Uuid = Uuid::from_u128(0x9b27_e4d0_13c6_4a58_b0f2_7e91_d5a3_6c48);

macro_rules! named_id {
  ($(#[$meta:meta])* $name:ident, $namespace:expr) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct $name {
      pub uid: Uuid,
      #[serde(default, skip_serializing_if = "Option::is_none")]
      pub name: Option<String>,
    }

    impl $name {
      pub fn new(uid: Uuid, name: impl Into<String>) -> Self {
        Self {
          uid,
          name: Some(name.into()),
        }
      }

      /// Identity without a display name
      pub fn from_uid(uid: Uuid) -> Self {
        Self { uid, name: None }
      }

      /// Stable identity derived from the name (uuid v5)
      pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
          uid: Uuid::new_v5(&$namespace, name.as_bytes()),
          name: Some(name),
        }
      }

      pub fn name_or_uid(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.uid.to_string())
      }
    }

    impl PartialEq for $name {
      fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
      }
    }

    impl Eq for $name {}

    impl Hash for $name {
      fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
          Some(name) => write!(f, "{} ({})", name, self.uid),
          None => write!(f, "{}", self.uid),
        }
      }
    }
  };
}

named_id!(
  /// Identity of a signal stream
  SignalId,
  SIGNAL_NAMESPACE
);

named_id!(
  /// Identity of a door. A door that fires is addressable as a signal source
  /// under the same uid.
  DoorId,
  DOOR_NAMESPACE
);

impl From<&DoorId> for SignalId {
  fn from(door: &DoorId) -> Self {
    SignalId {
      uid: door.uid,
      name: door.name.clone(),
    }
  }
}

/// Correlation id of one firing event, threaded through the whole relay chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FireId(pub Uuid);

impl FireId {
  pub fn new() -> Self {
    Self(Uuid::now_v7())
  }
}

impl Default for FireId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for FireId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }
}

impl Default for SubscriptionId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for SubscriptionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Registry key selecting which door behavior implements a definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoorKind(String);

impl DoorKind {
  pub const LOGICAL: &'static str = "logical";
  pub const RELAY_FILTER: &'static str = "relay-filter";

  pub fn new(key: impl Into<String>) -> Self {
    Self(key.into())
  }

  pub fn logical() -> Self {
    Self::new(Self::LOGICAL)
  }

  pub fn relay_filter() -> Self {
    Self::new(Self::RELAY_FILTER)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.trim().is_empty()
  }
}

impl fmt::Display for DoorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// The kind half of an actor table key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "kind", rename_all = "snake_case")]
pub enum ActorKind {
  Signal,
  Door(DoorKind),
  /// External receiver registered with the directory
  Listener,
}

/// Logical address of an actor: `(kind, uid)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorAddress {
  pub kind: ActorKind,
  pub uid: Uuid,
}

impl ActorAddress {
  pub fn signal(uid: Uuid) -> Self {
    Self {
      kind: ActorKind::Signal,
      uid,
    }
  }

  pub fn door(kind: DoorKind, uid: Uuid) -> Self {
    Self {
      kind: ActorKind::Door(kind),
      uid,
    }
  }

  pub fn listener(uid: Uuid) -> Self {
    Self {
      kind: ActorKind::Listener,
      uid,
    }
  }

  pub fn is_door(&self) -> bool {
    matches!(self.kind, ActorKind::Door(_))
  }

  /// Storage key for the actor's durable state
  pub fn state_key(&self) -> String {
    self.to_string()
  }
}

impl fmt::Display for ActorAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.kind {
      ActorKind::Signal => write!(f, "signal/{}", self.uid),
      ActorKind::Door(kind) => write!(f, "door/{}/{}", kind, self.uid),
      ActorKind::Listener => write!(f, "listener/{}", self.uid),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_equality_ignores_name() {
    let uid = Uuid::new_v4();
    assert_eq!(SignalId::new(uid, "a"), SignalId::new(uid, "b"));
    assert_eq!(SignalId::from_uid(uid), SignalId::new(uid, "a"));
  }

  #[test]
  fn test_named_ids_are_stable() {
    assert_eq!(SignalId::named("orders").uid, SignalId::named("orders").uid);
    assert_ne!(SignalId::named("orders").uid, SignalId::named("refunds").uid);
    // Signals and doors with the same name do not collide
    assert_ne!(SignalId::named("x").uid, DoorId::named("x").uid);
  }

  #[test]
  fn test_address_display() {
    let uid = Uuid::nil();
    assert_eq!(
      ActorAddress::door(DoorKind::logical(), uid).to_string(),
      format!("door/logical/{}", uid)
    );
    assert_eq!(ActorAddress::signal(uid).to_string(), format!("signal/{}", uid));
  }

  #[test]
  fn test_address_serde() {
    let address = ActorAddress::door(DoorKind::relay_filter(), Uuid::new_v4());
    let json = serde_json::to_string(&address).unwrap();
    let parsed: ActorAddress = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, address);
  }
}
