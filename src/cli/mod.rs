// CLI command implementations

pub mod completions;
pub mod config_cmd;
pub mod list;
pub mod run;
pub mod verify;
pub mod wait;
