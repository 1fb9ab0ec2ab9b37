//! Connection settings for the hosted backend.

use std::time::Duration;

use crate::BackendError;

/// Default timeout for establishing HTTP connections.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a whole HTTP request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Path of the realtime websocket endpoint relative to the backend URL.
const REALTIME_PATH: &str = "/realtime/v1/websocket";

/// Settings shared by the REST client and the realtime transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Base URL of the backend, e.g. `https://project.example.co`.
    pub url: String,
    /// Public API key sent with every request.
    pub api_key: String,
    /// Explicit realtime endpoint. Derived from `url` when unset.
    pub realtime_url: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl BackendConfig {
    /// Create a config for the given backend URL and API key.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            realtime_url: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the realtime websocket endpoint.
    pub fn with_realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = Some(url.into());
        self
    }

    /// Override the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check that the config can be used to build clients.
    pub fn validate(&self) -> Result<(), BackendError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(BackendError::InvalidConfig(format!(
                "backend url must be http(s): {}",
                self.url
            )));
        }
        if self.api_key.is_empty() {
            return Err(BackendError::InvalidConfig("api key is empty".to_string()));
        }
        Ok(())
    }

    /// The websocket endpoint, including the API key query parameter.
    pub fn realtime_endpoint(&self) -> String {
        let base = match &self.realtime_url {
            Some(url) => url.clone(),
            None => {
                let ws = if let Some(rest) = self.url.strip_prefix("https://") {
                    format!("wss://{}", rest)
                } else if let Some(rest) = self.url.strip_prefix("http://") {
                    format!("ws://{}", rest)
                } else {
                    self.url.clone()
                };
                format!("{}{}", ws, REALTIME_PATH)
            }
        };
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}apikey={}", base, separator, self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = BackendConfig::new("https://db.example.co/", "key");
        assert_eq!(config.url, "https://db.example.co");
    }

    #[test]
    fn test_realtime_endpoint_derived() {
        let config = BackendConfig::new("https://db.example.co", "anon");
        assert_eq!(
            config.realtime_endpoint(),
            "wss://db.example.co/realtime/v1/websocket?apikey=anon"
        );

        let local = BackendConfig::new("http://localhost:54321", "anon");
        assert_eq!(
            local.realtime_endpoint(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=anon"
        );
    }

    #[test]
    fn test_realtime_endpoint_override() {
        let config = BackendConfig::new("https://db.example.co", "anon")
            .with_realtime_url("ws://127.0.0.1:4000/socket?vsn=1");
        assert_eq!(
            config.realtime_endpoint(),
            "ws://127.0.0.1:4000/socket?vsn=1&apikey=anon"
        );
    }

    #[test]
    fn test_validate() {
        assert!(BackendConfig::new("https://db.example.co", "k").validate().is_ok());
        assert!(BackendConfig::new("ftp://db.example.co", "k").validate().is_err());
        assert!(BackendConfig::new("https://db.example.co", "").validate().is_err());
    }
}
