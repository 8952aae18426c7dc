//! Domain types - core entities of the signal network
//!
//! These types describe signals, doors and the records they exchange. They
//! are independent of the actor runtime and of persistence.

pub mod clock;
pub mod condition;
pub mod config;
pub mod door;
pub mod ids;
pub mod signal;
pub mod status;
