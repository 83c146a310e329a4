// Docker compose orchestration for acceptance tests
// Launch compositions, resolve published ports, stream logs, tear down

pub mod backend;
pub mod container;
pub mod env;
pub mod logs;
pub mod ports;

pub use backend::{ComposeBackend, ComposeProject, DockerCompose};
pub use container::{Composition, RunningComposition};
pub use env::EnvBindings;
pub use ports::{ExposedPort, ServiceEndpoint};
