// llm-mux Configuration System

pub mod loader;
pub mod types;

pub use loader::{load, load_from, ConfigError};
pub use types::*;
