//! Server configuration.

use rand::RngCore;
use std::net::SocketAddr;
use std::time::Duration;
use tasksync_protocol::DEFAULT_CSRF_HEADER;

/// Configuration for the record store.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Whether task routes require a bearer token.
    pub require_auth: bool,
    /// Whether mutating task routes require the anti-forgery header.
    pub require_csrf: bool,
    /// Secret for signing bearer and anti-forgery tokens.
    pub secret: Vec<u8>,
    /// Lifetime of bearer tokens.
    pub token_expiry: Duration,
    /// Header carrying the anti-forgery token.
    pub csrf_header: String,
}

impl ServerConfig {
    /// Creates a configuration with authentication enabled and a random
    /// secret.
    pub fn new(bind_addr: SocketAddr) -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            bind_addr,
            require_auth: true,
            require_csrf: true,
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
            csrf_header: DEFAULT_CSRF_HEADER.to_string(),
        }
    }

    /// Signs tokens with `secret`, so they stay valid across restarts.
    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Sets the bearer token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Serves every route without bearer or anti-forgery checks.
    pub fn without_auth(mut self) -> Self {
        self.require_auth = false;
        self.require_csrf = false;
        self
    }

    /// Enables or disables the anti-forgery check.
    pub fn with_csrf(mut self, required: bool) -> Self {
        self.require_csrf = required;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert!(config.require_auth);
        assert!(config.require_csrf);
        assert_eq!(config.secret.len(), 32);
        assert_eq!(config.csrf_header, "x-csrf-token");
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_secret(b"shared".to_vec())
            .with_csrf(false);
        assert_eq!(config.secret, b"shared");
        assert!(config.require_auth);
        assert!(!config.require_csrf);

        let open = config.without_auth();
        assert!(!open.require_auth);
    }

    #[test]
    fn secrets_are_random() {
        assert_ne!(ServerConfig::default().secret, ServerConfig::default().secret);
    }
}
