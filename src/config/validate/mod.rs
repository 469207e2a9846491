//! Configuration validation
//!
//! Validates incremental run specifications before any stage executes.

mod error;
mod validator;


pub use error::ValidationError;
pub use validator::validate_config;
