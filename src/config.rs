//! Configuration management for the ensemble server.
//!
//! Configuration can be set via environment variables:
//! - `CEREBRAS_API_KEYS` - Comma-separated Cerebras API keys.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Server configuration.
///
/// An empty key list is not a startup error: requests fail with HTTP 500
/// until keys are provided, so the server can come up before credentials do.
#[derive(Debug, Clone)]
pub struct Config {
    /// Provider API keys, in environment order.
    pub api_keys: Vec<String>,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_keys = std::env::var("CEREBRAS_API_KEYS")
            .map(|raw| parse_key_list(&raw))
            .unwrap_or_default();

        if api_keys.is_empty() {
            tracing::warn!("CEREBRAS_API_KEYS is empty; chat requests will fail until keys are set");
        }

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        Ok(Self {
            api_keys,
            host,
            port,
        })
    }
}

/// Split a comma-separated key list, trimming entries and discarding empty ones.
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_list() {
        assert_eq!(parse_key_list("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(parse_key_list(" a , ,b,"), vec!["a", "b"]);
        assert!(parse_key_list("").is_empty());
        assert!(parse_key_list(" , ,").is_empty());
    }
}
