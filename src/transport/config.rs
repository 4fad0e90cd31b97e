//! Transport configuration.
//!
//! Recognized environment options:
//! - `NETWORK_USE_SSL` (bool)
//! - `NETWORK_SSL_KEYSTORE` / `NETWORK_SSL_KEYSTORE_PASSWORD`
//! - `NETWORK_SSL_TRUSTSTORE` / `NETWORK_SSL_TRUSTSTORE_PASSWORD`
//!
//! Keystore and truststore are PEM files on the filesystem: the keystore
//! holds the server certificate chain and private key, the truststore the
//! root certificates a client trusts.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use super::errors::{TransportError, TransportResult};

/// Transport configuration, immutable after the factory is built.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Use TLS for peer sockets
    pub use_ssl: bool,

    /// PEM file with the server certificate chain and private key
    pub keystore: Option<PathBuf>,

    /// Keystore password; encrypted PEM is not supported, so any value
    /// here fails factory construction explicitly
    pub keystore_password: Option<String>,

    /// PEM file with trusted root certificates for outbound connections
    pub truststore: Option<PathBuf>,

    /// Truststore password; same restriction as the keystore password
    pub truststore_password: Option<String>,

    /// Deadline for establishing a peer connection
    pub connect_timeout: Duration,

    /// Deadline for a single peer read; bounds how long a stalled peer can
    /// hold a reader task
    pub read_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            use_ssl: false,
            keystore: None,
            keystore_password: None,
            truststore: None,
            truststore_password: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build a configuration from the recognized environment variables,
    /// starting from defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("NETWORK_USE_SSL") {
            config.use_ssl = matches!(v.as_str(), "true" | "TRUE" | "1" | "yes");
        }
        if let Ok(v) = env::var("NETWORK_SSL_KEYSTORE") {
            config.keystore = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("NETWORK_SSL_KEYSTORE_PASSWORD") {
            config.keystore_password = Some(v);
        }
        if let Ok(v) = env::var("NETWORK_SSL_TRUSTSTORE") {
            config.truststore = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("NETWORK_SSL_TRUSTSTORE_PASSWORD") {
            config.truststore_password = Some(v);
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> TransportResult<()> {
        if self.use_ssl && self.keystore.is_none() && self.truststore.is_none() {
            return Err(TransportError::Configuration(
                "NETWORK_USE_SSL is set but neither keystore nor truststore is configured"
                    .to_string(),
            ));
        }
        if !self.use_ssl && (self.keystore.is_some() || self.truststore.is_some()) {
            return Err(TransportError::Configuration(
                "keystore/truststore configured but NETWORK_USE_SSL is off".to_string(),
            ));
        }
        Ok(())
    }
}
