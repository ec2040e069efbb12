pub mod config;
pub mod errors;
pub mod logger;
pub mod models;
pub mod notifier;
pub mod registry;

pub use config::AppConfig;
pub use errors::{NotAllowed, TaskqError, TaskqResult};
pub use logger::{LogLevel, LogSink, MessageLogger, TracingSink};
pub use notifier::{ErrorNotifier, TracingNotifier};
pub use registry::Registry;
