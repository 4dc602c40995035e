pub mod config;
pub mod duration;
pub mod error;

pub use config::{Config, EngineSettings};
pub use duration::parse_duration;
pub use error::*;
