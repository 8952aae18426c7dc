//! Door lifecycle manager tests: refresh passes, change notifications and
//! cancellation.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;
  use tokio_util::sync::CancellationToken;

  use crate::{
    actor::{
      __tests__::helpers::{TestNetwork, drain, wait_for},
      lifecycle::{DoorLifecycleManager, RefreshReport},
    },
    definition::builder::{DoorBuilder, LogicOperator},
    domain::{
      condition::FilterCondition,
      door::DoorDefinition,
      ids::{ActorAddress, DoorKind},
      signal::SignalDefinition,
    },
  };

  fn relay(name: &str, source: &SignalDefinition) -> DoorDefinition {
    DoorBuilder::new(name)
      .listen(source)
      .relay_filter(FilterCondition::Always)
      .build()
      .unwrap()
  }

  #[tokio::test]
  async fn test_refresh_materializes_every_door() {
    let a = SignalDefinition::builder("a").build();
    let b = SignalDefinition::builder("b").build();
    let both = DoorBuilder::new("both")
      .listen(&a)
      .listen(&b)
      .logical_aggregator(LogicOperator::And, Duration::from_secs(60))
      .unwrap();
    let pass = relay("pass", &a);
    let net = TestNetwork::new(vec![a.clone(), b.clone()], vec![both.clone(), pass.clone()]);
    let manager = DoorLifecycleManager::new(Arc::clone(&net.directory));

    let report = manager.refresh(&net.cancel).await;
    assert_eq!(
      report,
      RefreshReport {
        updated: 2,
        ..RefreshReport::default()
      }
    );

    let mut active = net.directory.active_doors();
    active.sort_by_key(|address| address.uid);
    let mut expected = vec![
      ActorAddress::door(both.kind.clone(), both.uid()),
      ActorAddress::door(pass.kind.clone(), pass.uid()),
    ];
    expected.sort_by_key(|address| address.uid);
    assert_eq!(active, expected);

    // Doors are live: they subscribed to their sources
    let mut rx = net.listen_door(&pass).await;
    net.fire(&a).await;
    assert_eq!(drain(&mut rx), 1);

    // A second pass changes nothing
    let report = manager.refresh(&net.cancel).await;
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.updated, 0);
  }

  #[tokio::test]
  async fn test_unknown_kind_does_not_abort_refresh() {
    let a = SignalDefinition::builder("a").build();
    let mut audit = relay("audit", &a);
    audit.kind = DoorKind::new("audit");
    let pass = relay("pass", &a);
    let net = TestNetwork::new(vec![a.clone()], vec![audit, pass]);
    let manager = DoorLifecycleManager::new(Arc::clone(&net.directory));

    let report = manager.refresh(&net.cancel).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 1);
  }

  #[tokio::test]
  async fn test_invalid_door_is_counted_as_failed() {
    let a = SignalDefinition::builder("a").build();
    let ghost = SignalDefinition::builder("ghost").build();
    // Its source has no definition, so subscribing fails
    let orphan = relay("orphan", &ghost);
    let pass = relay("pass", &a);
    let net = TestNetwork::new(vec![a.clone()], vec![orphan, pass]);
    let manager = DoorLifecycleManager::new(Arc::clone(&net.directory));

    let report = manager.refresh(&net.cancel).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 1);
  }

  #[tokio::test]
  async fn test_cancelled_refresh_stops_early() {
    let a = SignalDefinition::builder("a").build();
    let net = TestNetwork::new(vec![a.clone()], vec![relay("one", &a), relay("two", &a)]);
    let manager = DoorLifecycleManager::new(Arc::clone(&net.directory));

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let report = manager.refresh(&cancelled).await;
    assert!(report.cancelled);
    assert_eq!(report.updated, 0);
    assert!(net.store.is_empty());
  }

  #[tokio::test]
  async fn test_definition_change_triggers_refresh() {
    let a = SignalDefinition::builder("a").build();
    let first = relay("first", &a);
    let net = TestNetwork::new(vec![a.clone()], vec![first.clone()]);
    let manager = DoorLifecycleManager::new(Arc::clone(&net.directory));

    let task = tokio::spawn(Arc::clone(&manager).run(net.cancel.child_token()));

    let directory = Arc::clone(&net.directory);
    let first_uid = first.uid();
    assert!(
      wait_for(Duration::from_secs(2), || {
        let directory = Arc::clone(&directory);
        async move { directory.active_doors().iter().any(|d| d.uid == first_uid) }
      })
      .await,
      "initial refresh should activate the first door"
    );

    let second = relay("second", &a);
    net.provider.upsert_door(second.clone()).await;

    let second_uid = second.uid();
    assert!(
      wait_for(Duration::from_secs(2), || {
        let directory = Arc::clone(&directory);
        async move { directory.active_doors().iter().any(|d| d.uid == second_uid) }
      })
      .await,
      "change notification should activate the new door"
    );

    net.cancel.cancel();
    task.await.unwrap();
  }

  #[tokio::test]
  async fn test_kind_change_retires_previous_actor() {
    let a = SignalDefinition::builder("a").build();
    let door = relay("door", &a);
    let net = TestNetwork::new(vec![a.clone()], vec![door.clone()]);
    let manager = DoorLifecycleManager::new(Arc::clone(&net.directory));
    manager.refresh(&net.cancel).await;

    let old = net.door(&door);
    let logical = DoorBuilder::new("door")
      .listen(&a)
      .logical_aggregator(LogicOperator::Or, Duration::from_secs(60))
      .unwrap();
    net.provider.upsert_door(logical.clone()).await;

    let report = manager.refresh(&net.cancel).await;
    assert_eq!(report.updated, 1);
    assert!(!old.is_alive());
    assert_eq!(
      net.directory.active_doors(),
      vec![ActorAddress::door(DoorKind::logical(), logical.uid())]
    );
  }
}
