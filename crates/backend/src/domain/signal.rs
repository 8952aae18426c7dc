//! Signal definitions and the records produced when a signal fires.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{ActorAddress, FireId, SignalId, SubscriptionId};

/// Free-form metadata supplied by whoever fires a signal
pub type SenderMetadata = BTreeMap<String, String>;

// ============================================================================
// Definition
// ============================================================================

/// Static description of a signal. Signals form a tree through `parent`;
/// firing a signal always attempts to relay toward its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDefinition {
  pub signal_id: SignalId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent: Option<SignalId>,
}

impl SignalDefinition {
  pub fn builder(name: impl Into<String>) -> SignalBuilder {
    SignalBuilder::new(name)
  }

  pub fn uid(&self) -> Uuid {
    self.signal_id.uid
  }

  /// Parent uid, ignoring nil placeholders
  pub fn parent_uid(&self) -> Option<Uuid> {
    self.parent.as_ref().map(|p| p.uid).filter(|uid| !uid.is_nil())
  }
}

/// Builder for [`SignalDefinition`]
#[derive(Debug, Clone)]
pub struct SignalBuilder {
  name: String,
  uid: Option<Uuid>,
  parent: Option<SignalId>,
}

impl SignalBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      uid: None,
      parent: None,
    }
  }

  /// Fix the uid instead of deriving it from the name
  pub fn uid(mut self, uid: Uuid) -> Self {
    self.uid = Some(uid);
    self
  }

  pub fn parent(mut self, parent: &SignalDefinition) -> Self {
    self.parent = Some(parent.signal_id.clone());
    self
  }

  pub fn parent_id(mut self, parent: SignalId) -> Self {
    self.parent = Some(parent);
    self
  }

  pub fn build(self) -> SignalDefinition {
    let signal_id = match self.uid {
      Some(uid) => SignalId::new(uid, self.name),
      None => SignalId::named(self.name),
    };
    SignalDefinition {
      signal_id,
      parent: self.parent,
    }
  }
}

// ============================================================================
// Fire records
// ============================================================================

/// Typed payload attached to a fire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalContent {
  /// Rust type name of the value that was serialized
  pub type_name: String,
  pub value: serde_json::Value,
}

impl SignalContent {
  pub fn from_value<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
    Ok(Self {
      type_name: std::any::type_name::<T>().to_string(),
      value: serde_json::to_value(data)?,
    })
  }

  /// Deserialize the payload back into a concrete type
  pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    serde_json::from_value(self.value.clone())
  }
}

/// One occurrence of a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSource {
  pub fire_id: FireId,
  pub signal_id: SignalId,
  /// True when a door produced this occurrence
  #[serde(default)]
  pub is_door: bool,
  pub send_utc: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_address: Option<ActorAddress>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata: Option<SenderMetadata>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content: Option<SignalContent>,
  /// Source occurrences that caused a door emission
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub origins: Vec<SignalSource>,
}

impl SignalSource {
  pub fn uid(&self) -> Uuid {
    self.signal_id.uid
  }
}

/// Envelope delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
  pub uid: Uuid,
  pub send_utc: DateTime<Utc>,
  pub source: SignalSource,
}

impl SignalMessage {
  pub fn new(source: SignalSource, send_utc: DateTime<Utc>) -> Self {
    Self {
      uid: Uuid::new_v4(),
      send_utc,
      source,
    }
  }
}

// ============================================================================
// Subscriptions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSubscription {
  pub id: SubscriptionId,
  pub target: ActorAddress,
}

/// Subscriber list, keyed by target address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSet {
  #[serde(default)]
  subscriptions: Vec<SignalSubscription>,
}

impl SubscriptionSet {
  /// Add a subscription for `target`, or return the existing one. A door
  /// that changed kind takes over the subscription of its previous kind.
  pub fn add_or_update(&mut self, target: ActorAddress) -> SubscriptionId {
    if let Some(existing) = self.subscriptions.iter().find(|s| s.target == target) {
      return existing.id;
    }
    if let Some(existing) = self
      .subscriptions
      .iter_mut()
      .find(|s| s.target.uid == target.uid && s.target.is_door() && target.is_door())
    {
      existing.target = target;
      return existing.id;
    }

    let id = SubscriptionId::new();
    self.subscriptions.push(SignalSubscription { id, target });
    id
  }

  /// Returns true if a subscription was removed
  pub fn remove(&mut self, id: SubscriptionId) -> bool {
    let before = self.subscriptions.len();
    self.subscriptions.retain(|s| s.id != id);
    before != self.subscriptions.len()
  }

  pub fn remove_target(&mut self, target: &ActorAddress) -> bool {
    let before = self.subscriptions.len();
    self.subscriptions.retain(|s| &s.target != target);
    before != self.subscriptions.len()
  }

  pub fn targets(&self) -> Vec<ActorAddress> {
    self.subscriptions.iter().map(|s| s.target.clone()).collect()
  }

  pub fn as_slice(&self) -> &[SignalSubscription] {
    &self.subscriptions
  }

  pub fn len(&self) -> usize {
    self.subscriptions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.subscriptions.is_empty()
  }
}
