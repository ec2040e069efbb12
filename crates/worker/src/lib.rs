pub mod handler;
pub mod lifecycle;
pub mod service;
pub mod tasks;

pub use handler::{HandlerRegistry, TaskHandler};
pub use lifecycle::{JobLifecycle, JobOutcome, ProcessExit, StdProcessExit, EXIT_CODE_RETRY};
pub use service::{WorkerExit, WorkerService};
pub use tasks::CheckTimeTask;
