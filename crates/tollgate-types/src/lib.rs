//! Shared types and error hierarchy for Tollgate.

pub mod error;
pub mod message;
pub mod provider;
pub mod util;

pub use error::{ApiError, ConfigError};
pub use message::*;
pub use provider::Provider;
