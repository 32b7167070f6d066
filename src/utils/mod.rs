//! Utility functions for the AutoAudit pipeline
//!
//! Provides environment variable handling, validation, and logging setup.

pub mod env;
pub mod logging;

pub use env::{
    env_millis, env_opt, env_parse, env_secs, get_and_validate_access_token, load_env,
    validate_access_token,
};
pub use logging::init_tracing;
