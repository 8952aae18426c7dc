//! End-to-end tests of signals and doors wired through the directory.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;
  use serde::{Deserialize, Serialize};
  use tokio_util::sync::CancellationToken;
  use uuid::Uuid;

  use crate::{
    actor::{
      __tests__::helpers::{TestNetwork, drain, recv},
      directory::RuntimeSettings,
      door::{DoorError, UpdateOutcome},
      message::FireRequest,
      signal::SignalError,
    },
    definition::builder::{DoorBuilder, LogicOperator},
    domain::{
      condition::FilterCondition,
      door::DoorDefinition,
      ids::{ActorAddress, FireId},
      signal::{SenderMetadata, SignalContent, SignalDefinition},
    },
    state::StateStore,
  };

  const MINUTE: Duration = Duration::from_secs(60);

  fn single_source_door(name: &str, source: &SignalDefinition) -> DoorDefinition {
    DoorBuilder::new(name)
      .listen(source)
      .logical()
      .active_window(MINUTE)
      .assign_variable("X", source.uid())
      .formula("X")
      .build()
      .unwrap()
  }

  fn once_per_window(name: &str, source: &SignalDefinition) -> DoorDefinition {
    DoorBuilder::new(name)
      .listen(source)
      .logical()
      .active_window(MINUTE)
      .assign_variable("A", source.uid())
      .use_variable_this()
      .formula("A & !this")
      .build()
      .unwrap()
  }

  // ==========================================================================
  // Signal handler
  // ==========================================================================

  #[tokio::test]
  async fn test_subscriptions_are_net_effect() {
    let s = SignalDefinition::builder("s").build();
    let net = TestNetwork::new(vec![s.clone()], vec![]);
    let handle = net.directory.signal(s.uid());

    let (a, _ra) = net.listener();
    let (b, _rb) = net.listener();
    let (c, _rc) = net.listener();

    let id_a = handle.subscribe(a.clone(), &net.cancel).await.unwrap();
    assert_eq!(handle.subscribe(a.clone(), &net.cancel).await.unwrap(), id_a);
    let id_b = handle.subscribe(b.clone(), &net.cancel).await.unwrap();
    handle.subscribe(c.clone(), &net.cancel).await.unwrap();

    assert!(handle.unsubscribe(id_b, &net.cancel).await.unwrap());
    assert!(!handle.unsubscribe(id_b, &net.cancel).await.unwrap());
    assert!(handle.unsubscribe_target(c, &net.cancel).await.unwrap());

    let subscriptions = handle.subscriptions(&net.cancel).await.unwrap();
    let targets: Vec<ActorAddress> = subscriptions.into_iter().map(|s| s.target).collect();
    assert_eq!(targets, vec![a]);
  }

  #[tokio::test]
  async fn test_subscriptions_survive_restart() {
    let s = SignalDefinition::builder("s").build();
    let net = TestNetwork::new(vec![s.clone()], vec![]);
    let (a, _ra) = net.listener();
    net.directory.signal(s.uid()).subscribe(a.clone(), &net.cancel).await.unwrap();

    let net = net.restart();
    let subscriptions = net.directory.signal(s.uid()).subscriptions(&net.cancel).await.unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].target, a);
  }

  #[tokio::test]
  async fn test_cancelled_subscribe_leaves_state_unchanged() {
    let s = SignalDefinition::builder("s").build();
    let net = TestNetwork::new(vec![s.clone()], vec![]);
    let handle = net.directory.signal(s.uid());
    let (a, _ra) = net.listener();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = handle.subscribe(a, &cancelled).await.unwrap_err();
    assert!(matches!(err, SignalError::Cancelled));

    assert!(handle.subscriptions(&net.cancel).await.unwrap().is_empty());
    assert!(net.store.is_empty());
  }

  #[tokio::test]
  async fn test_unknown_signal_fails() {
    let net = TestNetwork::new(vec![], vec![]);
    let uid = Uuid::new_v4();

    let err = net
      .directory
      .signal(uid)
      .fire(FireId::new(), None, None, &net.cancel)
      .await
      .unwrap_err();
    assert!(matches!(err, SignalError::SignalNotFound(u) if u == uid));
  }

  #[tokio::test]
  async fn test_failed_delivery_does_not_stop_fan_out() {
    let s = SignalDefinition::builder("s").build();
    let net = TestNetwork::new(vec![s.clone()], vec![]);
    let handle = net.directory.signal(s.uid());

    // A listener that was never registered
    handle
      .subscribe(ActorAddress::listener(Uuid::new_v4()), &net.cancel)
      .await
      .unwrap();
    let mut rx = net.listen_signal(&s).await;

    let fire_id = net.fire(&s).await;
    assert_eq!(recv(&mut rx).await.source.fire_id, fire_id);
  }

  // ==========================================================================
  // Parent relay
  // ==========================================================================

  #[tokio::test]
  async fn test_parent_relay_keeps_fire_id() {
    let s1 = SignalDefinition::builder("s1").build();
    let s2 = SignalDefinition::builder("s2").parent(&s1).build();
    let net = TestNetwork::new(vec![s1.clone(), s2.clone()], vec![]);

    let mut parent_rx = net.listen_signal(&s1).await;

    // s2 has no subscribers of its own; the relay still happens
    let fire_id = FireId::new();
    let returned = net
      .directory
      .signal(s2.uid())
      .fire(fire_id, None, None, &net.cancel)
      .await
      .unwrap();
    assert_eq!(returned, fire_id);

    let message = recv(&mut parent_rx).await;
    assert_eq!(message.source.fire_id, fire_id);
    assert_eq!(message.source.signal_id, s1.signal_id);
    assert_eq!(drain(&mut parent_rx), 0);
  }

  #[tokio::test]
  async fn test_fire_request_carries_sender_details_up_the_chain() {
    let s1 = SignalDefinition::builder("s1").build();
    let s2 = SignalDefinition::builder("s2").parent(&s1).build();
    let net = TestNetwork::new(vec![s1.clone(), s2.clone()], vec![]);

    let mut child_rx = net.listen_signal(&s2).await;
    let mut parent_rx = net.listen_signal(&s1).await;

    let sender = ActorAddress::listener(Uuid::new_v4());
    let metadata = SenderMetadata::from([("origin".to_string(), "checkout".to_string())]);
    let content = SignalContent::from_value(&serde_json::json!({ "total": 42 })).unwrap();
    let request = FireRequest::new(FireId::new())
      .from_address(sender.clone())
      .with_metadata(metadata.clone())
      .with_content(content.clone());

    net
      .directory
      .signal(s2.uid())
      .fire_request(request, &net.cancel)
      .await
      .unwrap();

    for message in [recv(&mut child_rx).await, recv(&mut parent_rx).await] {
      assert_eq!(message.source.source_address, Some(sender.clone()));
      assert_eq!(message.source.metadata, Some(metadata.clone()));
      assert_eq!(message.source.content, Some(content.clone()));
    }
  }

  #[tokio::test]
  async fn test_fire_with_keeps_metadata() {
    let s = SignalDefinition::builder("s").build();
    let net = TestNetwork::new(vec![s.clone()], vec![]);
    let mut rx = net.listen_signal(&s).await;

    let metadata = SenderMetadata::from([("user".to_string(), "ada".to_string())]);
    net
      .directory
      .signal(s.uid())
      .fire_with(FireId::new(), None, &vec![1, 2, 3], Some(metadata.clone()), &net.cancel)
      .await
      .unwrap();

    let message = recv(&mut rx).await;
    assert_eq!(message.source.metadata, Some(metadata));
    assert_eq!(message.source.source_address, None);
    let values: Vec<i32> = message.source.content.unwrap().decode().unwrap();
    assert_eq!(values, vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn test_relay_depth_is_bounded() {
    let s1 = SignalDefinition::builder("s1").build();
    let s2 = SignalDefinition::builder("s2").parent(&s1).build();
    let s3 = SignalDefinition::builder("s3").parent(&s2).build();
    let settings = RuntimeSettings {
      max_relay_depth: 1,
      ..RuntimeSettings::default()
    };
    let net = TestNetwork::with_settings(vec![s1.clone(), s2.clone(), s3.clone()], vec![], settings);

    // One hop is fine
    net.fire(&s2).await;

    let err = net
      .directory
      .signal(s3.uid())
      .fire(FireId::new(), None, None, &net.cancel)
      .await
      .unwrap_err();
    match err {
      SignalError::Relay { parent, source } => {
        assert_eq!(parent, s2.uid());
        assert!(matches!(*source, SignalError::Relay { .. }));
      }
      other => panic!("expected relay error, got {other:?}"),
    }
  }

  // ==========================================================================
  // Logical doors
  // ==========================================================================

  #[tokio::test]
  async fn test_door_fires_its_own_signal() {
    let s1 = SignalDefinition::builder("s1").build();
    let d1 = single_source_door("d1", &s1);
    let net = TestNetwork::new(vec![s1.clone()], vec![d1.clone()]);

    assert_eq!(net.apply(&d1).await, UpdateOutcome::Applied);
    assert_eq!(net.apply(&d1).await, UpdateOutcome::Unchanged);
    let mut rx = net.listen_door(&d1).await;

    let fire_id = net.fire(&s1).await;

    let message = recv(&mut rx).await;
    assert_eq!(message.source.signal_id.uid, d1.uid());
    assert!(message.source.is_door);
    assert_eq!(message.source.origins.len(), 1);
    assert_eq!(message.source.origins[0].fire_id, fire_id);
    assert_eq!(drain(&mut rx), 0);
  }

  #[tokio::test]
  async fn test_door_binds_itself_on_first_message() {
    let s1 = SignalDefinition::builder("s1").build();
    let d1 = single_source_door("d1", &s1);
    let net = TestNetwork::new(vec![s1.clone()], vec![d1.clone()]);

    // Subscribing does not bind; the first stimulation pulls the definition
    let mut rx = net.listen_door(&d1).await;
    net.door(&d1).stimulate(&net.cancel).await.unwrap();

    net.fire(&s1).await;
    assert_eq!(recv(&mut rx).await.source.signal_id.uid, d1.uid());
  }

  #[tokio::test]
  async fn test_and_door_respects_window() {
    let a = SignalDefinition::builder("a").build();
    let b = SignalDefinition::builder("b").build();
    let door = DoorBuilder::new("both")
      .listen(&a)
      .listen(&b)
      .logical_aggregator(LogicOperator::And, MINUTE)
      .unwrap();
    let net = TestNetwork::new(vec![a.clone(), b.clone()], vec![door.clone()]);
    net.apply(&door).await;
    let mut rx = net.listen_door(&door).await;

    // Within the window: exactly one emission
    net.fire(&a).await;
    net.advance(30);
    net.fire(&b).await;
    assert_eq!(drain(&mut rx), 1);

    // Too far apart: nothing
    net.advance(600);
    net.fire(&a).await;
    net.advance(61);
    net.fire(&b).await;
    assert_eq!(drain(&mut rx), 0);
  }

  #[tokio::test]
  async fn test_not_this_suppresses_within_window() {
    let a = SignalDefinition::builder("a").build();
    let door = once_per_window("once", &a);
    let net = TestNetwork::new(vec![a.clone()], vec![door.clone()]);
    net.apply(&door).await;
    let mut rx = net.listen_door(&door).await;

    net.fire(&a).await;
    assert_eq!(drain(&mut rx), 1);

    net.advance(10);
    net.fire(&a).await;
    assert_eq!(drain(&mut rx), 0);

    net.advance(65);
    net.fire(&a).await;
    assert_eq!(drain(&mut rx), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_suppressed_door_rearms_after_window() {
    let a = SignalDefinition::builder("a").build();
    let door = once_per_window("once", &a);
    let net = TestNetwork::new(vec![a.clone()], vec![door.clone()]);
    net.apply(&door).await;
    let mut rx = net.listen_door(&door).await;

    net.fire(&a).await;
    assert_eq!(drain(&mut rx), 1);

    // Suppressed, but still active once the door's own emission expires
    net.advance(10);
    let pending = net.fire(&a).await;
    assert_eq!(drain(&mut rx), 0);

    net.advance(55);
    tokio::time::sleep(Duration::from_secs(61)).await;

    let message = recv(&mut rx).await;
    assert_eq!(message.source.origins[0].fire_id, pending);
  }

  #[tokio::test]
  async fn test_door_listening_to_door() {
    let s = SignalDefinition::builder("s").build();
    let relay = DoorBuilder::new("relay")
      .listen(&s)
      .relay_filter(FilterCondition::Always)
      .build()
      .unwrap();
    let outer = DoorBuilder::new("outer")
      .listen_door(relay.door_id.clone())
      .logical()
      .active_window(MINUTE)
      .assign_variable("R", relay.uid())
      .formula("R")
      .build()
      .unwrap();
    let net = TestNetwork::new(vec![s.clone()], vec![relay.clone(), outer.clone()]);
    net.apply(&relay).await;
    net.apply(&outer).await;
    let mut rx = net.listen_door(&outer).await;

    let fire_id = net.fire(&s).await;

    let message = recv(&mut rx).await;
    assert_eq!(message.source.signal_id.uid, outer.uid());
    let relayed = &message.source.origins[0];
    assert_eq!(relayed.signal_id.uid, relay.uid());
    assert_eq!(relayed.origins[0].fire_id, fire_id);
  }

  // ==========================================================================
  // Relay filter doors
  // ==========================================================================

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct Order {
    id: u32,
    total: f64,
  }

  #[tokio::test]
  async fn test_relay_filter_passes_matching_content() {
    let orders = SignalDefinition::builder("orders").build();
    let big = DoorBuilder::new("big-orders")
      .listen(&orders)
      .relay_filter(FilterCondition::field_greater_than("total", 100.0))
      .build()
      .unwrap();
    let net = TestNetwork::new(vec![orders.clone()], vec![big.clone()]);
    net.apply(&big).await;
    let mut rx = net.listen_door(&big).await;

    let handle = net.directory.signal(orders.uid());
    for (id, total) in [(1, 50.0), (2, 150.0), (3, 99.0)] {
      handle
        .fire_with(FireId::new(), None, &Order { id, total }, None, &net.cancel)
        .await
        .unwrap();
    }

    let message = recv(&mut rx).await;
    let order: Order = message.source.content.as_ref().unwrap().decode().unwrap();
    assert_eq!(order, Order { id: 2, total: 150.0 });
    assert_eq!(drain(&mut rx), 0);
  }

  // ==========================================================================
  // State
  // ==========================================================================

  #[tokio::test]
  async fn test_door_state_survives_restart() {
    let a = SignalDefinition::builder("a").build();
    let b = SignalDefinition::builder("b").build();
    let door = DoorBuilder::new("both")
      .listen(&a)
      .listen(&b)
      .history_max_retention(Some(5))
      .logical_aggregator(LogicOperator::And, MINUTE)
      .unwrap();
    let net = TestNetwork::new(vec![a.clone(), b.clone()], vec![door.clone()]);
    net.apply(&door).await;
    net.fire(&a).await;
    net.fire(&a).await;

    let before = net.door(&door).status(&net.cancel).await.unwrap().state;
    assert_eq!(before.statuses.status(a.uid()).unwrap().not_consumed().len(), 2);

    let net = net.restart();
    let after = net.door(&door).status(&net.cancel).await.unwrap().state;
    assert_eq!(after, before);

    // The resumed door still listens and completes the pending combination
    let mut rx = net.listen_door(&door).await;
    net.fire(&b).await;
    assert_eq!(drain(&mut rx), 1);
  }

  #[tokio::test]
  async fn test_history_keeps_most_recent() {
    let s = SignalDefinition::builder("s").build();
    let door = DoorBuilder::new("relay")
      .listen(&s)
      .history_max_retention(Some(2))
      .relay_filter(FilterCondition::Always)
      .build()
      .unwrap();
    let net = TestNetwork::new(vec![s.clone()], vec![door.clone()]);
    net.apply(&door).await;
    let mut rx = net.listen_door(&door).await;

    let mut fired = Vec::new();
    for _ in 0..5 {
      net.advance(1);
      fired.push(net.fire(&s).await);
    }

    let state = net.door(&door).status(&net.cancel).await.unwrap().state;
    let history: Vec<FireId> = state
      .statuses
      .status(s.uid())
      .unwrap()
      .history()
      .iter()
      .map(|h| h.fire_id)
      .collect();
    assert_eq!(history, fired[3..].to_vec());
    assert_eq!(state.statuses.own_status().unwrap().history().len(), 2);
  }

  #[tokio::test]
  async fn test_old_occurrences_expire() {
    let a = SignalDefinition::builder("a").build();
    let b = SignalDefinition::builder("b").build();
    let door = DoorBuilder::new("both")
      .listen(&a)
      .listen(&b)
      .retention_max_delay(Some(Duration::from_secs(10)))
      .logical_aggregator(LogicOperator::And, MINUTE)
      .unwrap();
    let net = TestNetwork::new(vec![a.clone(), b.clone()], vec![door.clone()]);
    net.apply(&door).await;

    net.fire(&a).await;
    net.advance(20);
    let latest = net.fire(&a).await;

    let state = net.door(&door).status(&net.cancel).await.unwrap().state;
    let pending: Vec<FireId> = state
      .statuses
      .status(a.uid())
      .unwrap()
      .not_consumed()
      .iter()
      .map(|s| s.fire_id)
      .collect();
    assert_eq!(pending, vec![latest]);
  }

  #[tokio::test]
  async fn test_unmatched_occurrences_keep_most_recent() {
    let a = SignalDefinition::builder("a").build();
    let b = SignalDefinition::builder("b").build();
    let door = DoorBuilder::new("both")
      .listen(&a)
      .listen(&b)
      .not_consumed_max_retention(3)
      .logical_aggregator(LogicOperator::And, MINUTE)
      .unwrap();
    let net = TestNetwork::new(vec![a.clone(), b.clone()], vec![door.clone()]);
    net.apply(&door).await;
    let mut rx = net.listen_door(&door).await;

    let mut fired = Vec::new();
    for _ in 0..5 {
      fired.push(net.fire(&a).await);
      net.advance(1);
    }

    let state = net.door(&door).status(&net.cancel).await.unwrap().state;
    let pending: Vec<FireId> = state
      .statuses
      .status(a.uid())
      .unwrap()
      .not_consumed()
      .iter()
      .map(|s| s.fire_id)
      .collect();
    assert_eq!(pending, fired[2..].to_vec());
    assert_eq!(drain(&mut rx), 0);
  }

  #[tokio::test]
  async fn test_cancelled_receive_leaves_door_unchanged() {
    let a = SignalDefinition::builder("a").build();
    let door = single_source_door("d", &a);
    let net = TestNetwork::new(vec![a.clone()], vec![door.clone()]);
    net.apply(&door).await;

    let handle = net.door(&door);
    let before = handle.status(&net.cancel).await.unwrap().state;
    let key = handle.address().state_key();
    let persisted = net.store.load(&key).await.unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let message = crate::domain::signal::SignalMessage::new(
      crate::domain::signal::SignalSource {
        fire_id: FireId::new(),
        signal_id: a.signal_id.clone(),
        is_door: false,
        send_utc: net.now(),
        source_address: None,
        metadata: None,
        content: None,
        origins: vec![],
      },
      net.now(),
    );
    let err = handle.receive(message, &cancelled).await.unwrap_err();
    assert!(matches!(err, DoorError::Cancelled));

    assert_eq!(handle.status(&net.cancel).await.unwrap().state, before);
    assert_eq!(net.store.load(&key).await.unwrap(), persisted);
  }

  #[tokio::test]
  async fn test_update_rejects_other_identity() {
    let a = SignalDefinition::builder("a").build();
    let door = single_source_door("d", &a);
    let other = single_source_door("other", &a);
    let net = TestNetwork::new(vec![a.clone()], vec![door.clone()]);

    let err = net.door(&door).update(other, &net.cancel).await.unwrap_err();
    assert!(matches!(err, DoorError::IdentityMismatch { .. }));
  }

  #[tokio::test]
  async fn test_update_fails_for_undefined_source() {
    let known = SignalDefinition::builder("known").build();
    let ghost = SignalDefinition::builder("ghost").build();
    let door = single_source_door("d", &ghost);
    let net = TestNetwork::new(vec![known], vec![door.clone()]);

    let err = net.door(&door).update(door.clone(), &net.cancel).await.unwrap_err();
    assert!(matches!(err, DoorError::Subscribe { source_uid, .. } if source_uid == ghost.uid()));
    assert!(net.store.is_empty());
  }
}
