//! Message types for actor communication
//!
//! Every request carries a oneshot reply and the caller's cancellation
//! token. Actors check the token before persisting, so a cancelled request
//! leaves durable state untouched.

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{
  door::{DoorError, DoorSnapshot, ReceiveOutcome, UpdateOutcome},
  signal::SignalError,
};
use crate::domain::{
  door::DoorDefinition,
  ids::{ActorAddress, FireId, SubscriptionId},
  signal::{SenderMetadata, SignalContent, SignalMessage, SignalSubscription},
};

/// A request plus the token that may cancel it
#[derive(Debug)]
pub struct Envelope<P> {
  pub cancel: CancellationToken,
  pub payload: P,
}

pub type Reply<T, E> = oneshot::Sender<Result<T, E>>;

// ============================================================================
// Signal handler
// ============================================================================

/// Everything needed to fire a signal once
#[derive(Debug, Clone)]
pub struct FireRequest {
  pub fire_id: FireId,
  pub source_address: Option<ActorAddress>,
  pub metadata: Option<SenderMetadata>,
  /// `None` is the no-payload form
  pub content: Option<SignalContent>,
  /// Number of parent hops already taken
  pub depth: usize,
}

impl FireRequest {
  pub fn new(fire_id: FireId) -> Self {
    Self {
      fire_id,
      source_address: None,
      metadata: None,
      content: None,
      depth: 0,
    }
  }

  pub fn from_address(mut self, address: impl Into<Option<ActorAddress>>) -> Self {
    self.source_address = address.into();
    self
  }

  pub fn with_metadata(mut self, metadata: impl Into<Option<SenderMetadata>>) -> Self {
    self.metadata = metadata.into();
    self
  }

  pub fn with_content(mut self, content: SignalContent) -> Self {
    self.content = Some(content);
    self
  }

  /// The same fire, one hop further up the parent chain
  pub fn relayed(&self) -> Self {
    Self {
      depth: self.depth + 1,
      ..self.clone()
    }
  }
}

#[derive(Debug)]
pub enum SignalRequest {
  Subscribe {
    target: ActorAddress,
    reply: Reply<SubscriptionId, SignalError>,
  },
  Unsubscribe {
    id: SubscriptionId,
    reply: Reply<bool, SignalError>,
  },
  UnsubscribeTarget {
    target: ActorAddress,
    reply: Reply<bool, SignalError>,
  },
  Fire {
    request: FireRequest,
    reply: Reply<FireId, SignalError>,
  },
  Subscriptions {
    reply: Reply<Vec<SignalSubscription>, SignalError>,
  },
}

// ============================================================================
// Door
// ============================================================================

#[derive(Debug)]
pub enum DoorRequest {
  Update {
    definition: Box<DoorDefinition>,
    reply: Reply<UpdateOutcome, DoorError>,
  },
  Receive {
    message: SignalMessage,
    reply: Reply<ReceiveOutcome, DoorError>,
  },
  /// Re-evaluate without new input
  Stimulate {
    reply: Option<Reply<ReceiveOutcome, DoorError>>,
  },
  Subscribe {
    target: ActorAddress,
    reply: Reply<SubscriptionId, DoorError>,
  },
  Unsubscribe {
    id: SubscriptionId,
    reply: Reply<bool, DoorError>,
  },
  UnsubscribeTarget {
    target: ActorAddress,
    reply: Reply<bool, DoorError>,
  },
  Status {
    reply: Reply<DoorSnapshot, DoorError>,
  },
}
