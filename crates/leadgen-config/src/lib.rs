//! Core configuration, paths, and logging for the leadgen client.

mod config;
mod error;
mod json_layer;
mod logging;
mod paths;

pub use config::{Config, Endpoints, DEFAULT_API_BASE_URL, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
