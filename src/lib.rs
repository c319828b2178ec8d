// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod market;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod shutdown;
pub mod strategy;

// Re-export commonly used types
pub use config::Settings;
pub use error::{Error, Result};
pub use models::*;
pub use pipeline::Pipeline;
