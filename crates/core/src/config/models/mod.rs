pub mod app_config;
pub mod broker;
pub mod drainer;
pub mod logging;
pub mod sequence;

pub use app_config::AppConfig;
pub use broker::{BrokerConfig, BrokerKind, ServerAddress};
pub use drainer::DrainerConfig;
pub use logging::LoggingConfig;
pub use sequence::SequenceConfig;
