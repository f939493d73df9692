//! Connection parameters and session tunables.
//!
//! Both structures deserialize from JSON with `serde-json-core`, so a device
//! can keep its provisioning record in the same resource store that holds
//! its certificates:
//!
//! ```rust
//! use libiot_connect::config::{ConnectionConfig, SessionType};
//!
//! let config = ConnectionConfig::from_json(
//!     r#"{"host":"mqtt.example.com","port":8883,"client_id":"dev-1","session":"continue"}"#,
//! ).unwrap();
//! assert_eq!(config.port, 8883);
//! assert_eq!(config.session, SessionType::Continue);
//! assert_eq!(config.keepalive_secs, 60);
//! ```

use heapless::String;
use serde::Deserialize;

pub use crate::network::application::mqtt::backoff::BackoffConfig;
use crate::storage::DEFAULT_CA_CERTIFICATES;
use crate::{Error, Result};

/// Longest broker host name.
pub const MAX_HOST_LEN: usize = 128;
/// Longest client identifier.
pub const MAX_CLIENT_ID_LEN: usize = 128;
/// Longest user name.
pub const MAX_USERNAME_LEN: usize = 128;
/// Longest password; large enough for an ES256 JWT.
pub const MAX_PASSWORD_LEN: usize = 512;
/// Longest resource name in the certificate store.
pub const MAX_RESOURCE_NAME_LEN: usize = 32;

/// Whether the broker should keep state across connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    /// Discard any previous session (CONNECT clean-session flag set).
    #[default]
    Clean,
    /// Resume the previous session if the broker has one.
    Continue,
}

/// Where to connect and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    /// Broker host name, also used for TLS server name indication.
    pub host: String<MAX_HOST_LEN>,
    /// Broker port, usually 8883.
    pub port: u16,
    /// MQTT client identifier.
    pub client_id: String<MAX_CLIENT_ID_LEN>,
    /// Optional user name.
    #[serde(default)]
    pub username: Option<String<MAX_USERNAME_LEN>>,
    /// Optional password (often a JWT).
    #[serde(default)]
    pub password: Option<String<MAX_PASSWORD_LEN>>,
    /// Clean or continued session.
    #[serde(default)]
    pub session: SessionType,
    /// Keep-alive interval in seconds. Zero disables keep-alive.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u16,
    /// Upper bound for socket connect, TLS handshake and CONNACK together.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u16,
    /// Resource holding the CA bundle.
    #[serde(default = "default_ca_certificates")]
    pub ca_certificates: String<MAX_RESOURCE_NAME_LEN>,
}

fn default_keepalive_secs() -> u16 {
    60
}

fn default_connection_timeout_secs() -> u16 {
    10
}

fn default_ca_certificates() -> String<MAX_RESOURCE_NAME_LEN> {
    let mut name = String::new();
    // The default name is shorter than the capacity.
    let _ = name.push_str(DEFAULT_CA_CERTIFICATES);
    name
}

fn bounded<const N: usize>(value: &str) -> Result<String<N>> {
    let mut s = String::new();
    s.push_str(value).map_err(|_| Error::BufferTooSmall)?;
    Ok(s)
}

impl ConnectionConfig {
    /// Configuration with default session type, timeouts and CA resource.
    ///
    /// # Errors
    ///
    /// [`Error::BufferTooSmall`] if a string exceeds its capacity.
    pub fn new(host: &str, port: u16, client_id: &str) -> Result<Self> {
        Ok(Self {
            host: bounded(host)?,
            port,
            client_id: bounded(client_id)?,
            username: None,
            password: None,
            session: SessionType::Clean,
            keepalive_secs: default_keepalive_secs(),
            connection_timeout_secs: default_connection_timeout_secs(),
            ca_certificates: default_ca_certificates(),
        })
    }

    /// Sets user name and password.
    pub fn with_credentials(mut self, username: Option<&str>, password: Option<&str>) -> Result<Self> {
        self.username = username.map(bounded).transpose()?;
        self.password = password.map(bounded).transpose()?;
        Ok(self)
    }

    /// Sets the session type.
    pub fn with_session(mut self, session: SessionType) -> Self {
        self.session = session;
        self
    }

    /// Sets the keep-alive interval in seconds.
    pub fn with_keepalive(mut self, secs: u16) -> Self {
        self.keepalive_secs = secs;
        self
    }

    /// Sets the connection timeout in seconds.
    pub fn with_connection_timeout(mut self, secs: u16) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    /// Sets the CA bundle resource name.
    pub fn with_ca_certificates(mut self, resource: &str) -> Result<Self> {
        self.ca_certificates = bounded(resource)?;
        Ok(self)
    }

    /// Parses a JSON provisioning record.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] for malformed JSON or missing fields.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json_core::from_str::<Self>(json)
            .map(|(config, _)| config)
            .map_err(|_| Error::InvalidParameter)
    }

    /// Rejects configurations that can never connect.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() || self.port == 0 || self.client_id.is_empty() {
            return Err(Error::InvalidParameter);
        }
        if self.connection_timeout_secs == 0 {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

/// Timeouts, retry ceilings and backoff shape for one context.
///
/// None of these are fixed by the protocol. The defaults suit a device on a
/// cellular or Wi-Fi link talking to a cloud broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time to wait for PUBACK/PUBREC/PUBCOMP before retransmitting.
    pub qos_retry_timeout_ms: u32,
    /// Retransmissions before a QoS 1/2 publish is reported failed.
    pub qos_max_retries: u8,
    /// Time to wait for PINGRESP after a PINGREQ.
    pub ping_grace_ms: u32,
    /// Time allowed for DISCONNECT to flush during a graceful close.
    pub close_timeout_ms: u32,
    /// Longest single readiness wait of the event loop.
    pub max_idle_ms: u32,
    /// Reconnection delay policy.
    pub backoff: BackoffConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            qos_retry_timeout_ms: 10_000,
            qos_max_retries: 3,
            ping_grace_ms: 10_000,
            close_timeout_ms: 5_000,
            max_idle_ms: 1_000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parses tunables from JSON; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json_core::from_str::<Self>(json)
            .map(|(config, _)| config)
            .map_err(|_| Error::InvalidParameter)
    }

    /// Rejects settings that would stall the event loop.
    pub fn validate(&self) -> Result<()> {
        if self.qos_retry_timeout_ms == 0 || self.max_idle_ms == 0 || self.ping_grace_ms == 0 {
            return Err(Error::InvalidParameter);
        }
        self.backoff.validate()
    }
}
