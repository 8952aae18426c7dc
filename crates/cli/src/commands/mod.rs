//! CLI command implementations

mod config;
mod fire;
mod run;
mod validate;

pub use config::{cmd_config_init, cmd_config_show};
pub use fire::cmd_fire;
pub use run::cmd_run;
pub use validate::cmd_validate;
