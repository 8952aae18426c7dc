//! Door kind registry
//!
//! Maps the `kind` string of a door definition to the factory that builds
//! its behavior. Built once at node startup; a definition naming a kind
//! that is not registered fails when its actor is activated.

use std::{collections::HashMap, sync::Arc};

use super::door::{DoorFactory, logical::LogicalDoorFactory, relay::RelayFilterDoorFactory};
use crate::domain::ids::DoorKind;

#[derive(Clone)]
pub struct DoorKindRegistry {
  factories: HashMap<DoorKind, Arc<dyn DoorFactory>>,
}

impl DoorKindRegistry {
  /// Registry without any kind
  pub fn empty() -> Self {
    Self {
      factories: HashMap::new(),
    }
  }

  /// Registry with the `logical` and `relay-filter` kinds
  pub fn builtin() -> Self {
    let mut registry = Self::empty();
    registry.register(DoorKind::logical(), Arc::new(LogicalDoorFactory));
    registry.register(DoorKind::relay_filter(), Arc::new(RelayFilterDoorFactory));
    registry
  }

  /// Register (or replace) the factory for `kind`
  pub fn register(&mut self, kind: DoorKind, factory: Arc<dyn DoorFactory>) -> &mut Self {
    self.factories.insert(kind, factory);
    self
  }

  pub fn resolve(&self, kind: &DoorKind) -> Option<Arc<dyn DoorFactory>> {
    self.factories.get(kind).cloned()
  }

  pub fn contains(&self, kind: &DoorKind) -> bool {
    self.factories.contains_key(kind)
  }

  pub fn kinds(&self) -> Vec<DoorKind> {
    let mut kinds: Vec<DoorKind> = self.factories.keys().cloned().collect();
    kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    kinds
  }
}

impl Default for DoorKindRegistry {
  fn default() -> Self {
    Self::builtin()
  }
}

impl std::fmt::Debug for DoorKindRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DoorKindRegistry").field("kinds", &self.kinds()).finish()
  }
}
