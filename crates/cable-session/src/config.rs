//! Session configuration.

use std::time::Duration;

use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Default interval between keepalive pings.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Default bound on a single keepalive ping.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Default kernel type.
pub const DEFAULT_KERNEL: &str = "python3";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("kernel name is required")]
    MissingKernelName,
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid gateway endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Settings for one kernel session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Gateway base URL (`http`, `https`, `ws` or `wss`).
    pub endpoint: Url,
    /// Kernel type to provision.
    pub kernel_name: String,
    /// Attach to this kernel instead of provisioning a new one.
    pub kernel_id: Option<Uuid>,
    /// Username written into outbound headers.
    pub user: String,
    /// Session label written into outbound headers; generated when empty.
    pub session: String,
    /// Keepalive interval; `None` disables the watchdog.
    pub keepalive: Option<Duration>,
    /// Bound on each keepalive ping.
    pub ping_timeout: Duration,
    /// Gateway auth token.
    pub token: Option<String>,
}

impl SessionConfig {
    /// Configuration for a new `kernel_name` kernel behind `endpoint`.
    #[must_use]
    pub fn new(endpoint: Url, kernel_name: impl Into<String>) -> Self {
        Self {
            endpoint,
            kernel_name: kernel_name.into(),
            kernel_id: None,
            user: String::new(),
            session: String::new(),
            keepalive: Some(DEFAULT_KEEPALIVE),
            ping_timeout: DEFAULT_PING_TIMEOUT,
            token: None,
        }
    }

    /// Attach to an existing kernel.
    #[must_use]
    pub const fn with_kernel_id(mut self, id: Uuid) -> Self {
        self.kernel_id = Some(id);
        self
    }

    /// Set the username and session label for outbound headers.
    #[must_use]
    pub fn with_identity(mut self, user: impl Into<String>, session: impl Into<String>) -> Self {
        self.user = user.into();
        self.session = session.into();
        self
    }

    /// Set the keepalive interval; `None` or zero disables it.
    #[must_use]
    pub const fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    #[must_use]
    pub const fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Load from `CABLE_*` environment variables.
    ///
    /// # Errors
    /// Returns error if the gateway URL is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (same keys as [`Self::from_env`]).
    ///
    /// Keys: `CABLE_GATEWAY_URL` (required), `CABLE_KERNEL`,
    /// `CABLE_KERNEL_ID`, `CABLE_USER`, `CABLE_SESSION`,
    /// `CABLE_KEEPALIVE_SECS` (`0` disables), `CABLE_GATEWAY_TOKEN`.
    ///
    /// # Errors
    /// Returns error if the gateway URL is missing or a value is malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_url = get("CABLE_GATEWAY_URL").ok_or(ConfigError::Missing("CABLE_GATEWAY_URL"))?;
        let endpoint = Url::parse(raw_url.trim()).map_err(|e| ConfigError::Invalid {
            key: "CABLE_GATEWAY_URL",
            reason: e.to_string(),
        })?;
        let kernel = get("CABLE_KERNEL").unwrap_or_else(|| DEFAULT_KERNEL.to_string());
        let mut config = Self::new(endpoint, kernel);

        if let Some(raw) = get("CABLE_KERNEL_ID") {
            let id = Uuid::parse_str(raw.trim()).map_err(|e| ConfigError::Invalid {
                key: "CABLE_KERNEL_ID",
                reason: e.to_string(),
            })?;
            config.kernel_id = Some(id);
        }
        if let Some(raw) = get("CABLE_KEEPALIVE_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key: "CABLE_KEEPALIVE_SECS",
                reason: e.to_string(),
            })?;
            config.keepalive = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config.user = get("CABLE_USER").unwrap_or_default();
        config.session = get("CABLE_SESSION").unwrap_or_default();
        config.token = get("CABLE_GATEWAY_TOKEN");
        Ok(config)
    }

    /// Check preconditions that must hold before any network I/O.
    ///
    /// # Errors
    /// Returns error on an empty kernel name or an unusable endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kernel_name.trim().is_empty() {
            return Err(ConfigError::MissingKernelName);
        }
        if !matches!(self.endpoint.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::InvalidEndpoint(format!(
                "unsupported scheme {:?}",
                self.endpoint.scheme()
            )));
        }
        if self.endpoint.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidEndpoint(format!(
                "{} has no host",
                self.endpoint
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[("CABLE_GATEWAY_URL", "http://gw:8888")])).unwrap();
        assert_eq!(config.endpoint.as_str(), "http://gw:8888/");
        assert_eq!(config.kernel_name, "python3");
        assert_eq!(config.kernel_id, None);
        assert_eq!(config.keepalive, Some(DEFAULT_KEEPALIVE));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let config = SessionConfig::from_lookup(lookup(&[
            ("CABLE_GATEWAY_URL", "https://gw.example.com"),
            ("CABLE_KERNEL", "ir"),
            ("CABLE_KERNEL_ID", &id_str),
            ("CABLE_USER", "alice"),
            ("CABLE_KEEPALIVE_SECS", "0"),
            ("CABLE_GATEWAY_TOKEN", "t0k"),
        ]))
        .unwrap();
        assert_eq!(config.kernel_name, "ir");
        assert_eq!(config.kernel_id, Some(id));
        assert_eq!(config.user, "alice");
        assert_eq!(config.keepalive, None);
        assert_eq!(config.token.as_deref(), Some("t0k"));
    }

    #[test]
    fn test_from_lookup_missing_url() {
        let err = SessionConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CABLE_GATEWAY_URL")));
    }

    #[test]
    fn test_from_lookup_bad_keepalive() {
        let err = SessionConfig::from_lookup(lookup(&[
            ("CABLE_GATEWAY_URL", "http://gw"),
            ("CABLE_KEEPALIVE_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CABLE_KEEPALIVE_SECS", .. }));
    }

    #[test]
    fn test_validate_rejects_empty_name_and_bad_endpoint() {
        let endpoint = Url::parse("http://gw").unwrap();
        let err = SessionConfig::new(endpoint, "  ").validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingKernelName));

        let endpoint = Url::parse("mailto:ops@example.com").unwrap();
        let err = SessionConfig::new(endpoint, "python3").validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint(_)));
    }
}
