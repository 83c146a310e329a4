// Library interface for composeprobe
// Exposes the harness building blocks for integration tests and the CLI

pub mod bolt;
pub mod cli;
pub mod clock;
pub mod compose;
pub mod config;
pub mod errors;
pub mod logging;
pub mod probe;
pub mod scenario;
pub mod verify;
pub mod workspace;
