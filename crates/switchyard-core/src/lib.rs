pub mod config;
pub mod types;

pub use config::{ConfigError, SwitchyardConfig, parse_duration};
pub use types::*;
