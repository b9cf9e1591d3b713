pub mod confidentiality;
pub mod config;
pub mod constant;
pub mod error;
pub mod logging;

// alias of log handler or logger in the config file
pub(crate) type AppLogAlias = std::sync::Arc<String>;
