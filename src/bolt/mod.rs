// Minimal Bolt client used for connectivity checks

pub mod chunk;
pub mod connection;
pub mod packstream;

pub use connection::{BoltConnection, BoltVersion, Response};
pub use packstream::Value;
