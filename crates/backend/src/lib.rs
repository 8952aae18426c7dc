pub mod actor;
pub mod definition;
pub mod dirs;
pub mod formula;
pub mod node;
pub mod state;

mod domain;
pub use domain::{clock, condition, config, door, ids, signal, status};

pub use node::{Node, NodeError, RunningNode};
