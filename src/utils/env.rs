//! Environment variable management
//!
//! Handles loading of the `.env` file, typed lookups with defaults, and
//! validation of the Graph access token.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const ACCESS_TOKEN_ENV: &str = "GRAPH_ACCESS_TOKEN";

/// Load environment variables from .env file
///
/// Does not fail if .env file doesn't exist (optional configuration).
pub fn load_env() -> Result<()> {
    dotenv::dotenv().ok();
    Ok(())
}

/// Optional string variable; empty values count as unset
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parse a variable, falling back to `default` when unset
///
/// # Errors
/// Returns error if the variable is set but does not parse
pub fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

pub fn env_secs(key: &str, default: Duration) -> Result<Duration> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

pub fn env_millis(key: &str, default: Duration) -> Result<Duration> {
    env_parse(key, default.as_millis() as u64).map(Duration::from_millis)
}

/// Get GRAPH_ACCESS_TOKEN from environment
///
/// # Errors
/// Returns error if GRAPH_ACCESS_TOKEN environment variable is not set
pub fn get_access_token() -> Result<String> {
    env_opt(ACCESS_TOKEN_ENV).with_context(|| {
        format!(
            "{} environment variable not set. Please set it in .env or your environment.",
            ACCESS_TOKEN_ENV
        )
    })
}

/// Validate bearer token shape
///
/// Checks that the token:
/// - Is not empty
/// - Is at least 20 characters long
/// - Contains no whitespace
///
/// # Errors
/// Returns error if token doesn't meet validation requirements
pub fn validate_access_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(anyhow!("Access token cannot be empty"));
    }
    if token.len() < 20 {
        return Err(anyhow!(
            "Access token appears invalid (too short). Expected >= 20 characters, got {}",
            token.len()
        ));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(anyhow!("Access token appears invalid (contains whitespace)"));
    }
    Ok(())
}

/// Get and validate GRAPH_ACCESS_TOKEN
pub fn get_and_validate_access_token() -> Result<String> {
    let token = get_access_token()?;
    validate_access_token(&token)?;
    Ok(token)
}
