//! # Gateway Configuration
//!
//! Everything the bridge needs to know about the broker and the topic layout.
//! Values are borrowed for the lifetime of the gateway, which on a device is
//! usually `'static` (constants baked in with `env!`).

use embassy_net::IpAddress;
use embassy_time::Duration;
use heapless::{String, Vec};

/// Maximum length of a publish or subscribe prefix.
pub const MAX_PREFIX_LEN: usize = 64;

/// Maximum length of the MQTT client identifier.
pub const MAX_CLIENT_ID_LEN: usize = 64;

/// Maximum number of CA certificates accepted for broker validation.
pub const MAX_TRUST_ANCHORS: usize = 3;

/// Errors detected while building a [`GatewayConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A topic prefix exceeds [`MAX_PREFIX_LEN`].
    PrefixTooLong,
    /// A topic prefix is empty, ends with `/` or contains a wildcard.
    InvalidPrefix,
    /// The client id is empty or exceeds [`MAX_CLIENT_ID_LEN`].
    InvalidClientId,
    /// CA validation was requested without any certificate.
    MissingTrustAnchor,
    /// More than [`MAX_TRUST_ANCHORS`] certificates were given.
    TooManyTrustAnchors,
}

/// A validated topic prefix. Guaranteed short enough for every encoded topic
/// to fit into a [`crate::codec::TopicPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPrefix(String<MAX_PREFIX_LEN>);

impl TopicPrefix {
    pub fn new(prefix: &str) -> Result<Self, ConfigError> {
        if prefix.len() > MAX_PREFIX_LEN {
            return Err(ConfigError::PrefixTooLong);
        }
        if prefix.is_empty() || prefix.ends_with('/') || prefix.contains(['+', '#']) {
            return Err(ConfigError::InvalidPrefix);
        }
        let mut inner = String::new();
        inner
            .push_str(prefix)
            .map_err(|_| ConfigError::PrefixTooLong)?;
        Ok(Self(inner))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Where the broker lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broker<'a> {
    /// Host name, resolved through DNS at every session-open attempt.
    Host(&'a str),
    /// Literal address.
    Ip(IpAddress),
}

/// Username / password sent in the CONNECT packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// One to three PEM encoded CA certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchors<'a> {
    certificates: Vec<&'a str, MAX_TRUST_ANCHORS>,
}

impl<'a> TrustAnchors<'a> {
    pub fn new(certificates: &[&'a str]) -> Result<Self, ConfigError> {
        if certificates.is_empty() {
            return Err(ConfigError::MissingTrustAnchor);
        }
        let certificates =
            Vec::from_slice(certificates).map_err(|_| ConfigError::TooManyTrustAnchors)?;
        Ok(Self { certificates })
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.certificates.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// Client certificate and key for mutual authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIdentity<'a> {
    pub certificate: &'a str,
    pub private_key: &'a str,
}

/// Transport security applied by the transport when the session is opened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Security<'a> {
    /// Plain TCP, or TLS without validating the broker certificate.
    #[default]
    None,
    /// Broker certificate pinned by its fingerprint.
    Fingerprint(&'a str),
    /// Broker certificate validated against a CA list.
    CaList(TrustAnchors<'a>),
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig<'a> {
    pub broker: Broker<'a>,
    pub port: u16,
    pub client_id: &'a str,
    pub credentials: Option<Credentials<'a>>,
    pub publish_prefix: TopicPrefix,
    pub subscribe_prefix: TopicPrefix,
    /// Retain actuator values and battery reports on the broker.
    pub retain: bool,
    pub security: Security<'a>,
    pub client_identity: Option<ClientIdentity<'a>>,
    pub keep_alive: Duration,
    /// Minimum delay between two failed session-open attempts.
    pub reconnect_backoff: Duration,
}

impl<'a> GatewayConfig<'a> {
    pub const DEFAULT_PORT: u16 = 1883;
    pub const DEFAULT_PUBLISH_PREFIX: &'static str = "mygateway1-out";
    pub const DEFAULT_SUBSCRIBE_PREFIX: &'static str = "mygateway1-in";

    /// Creates a configuration with the default port, prefixes and timings.
    pub fn new(broker: Broker<'a>, client_id: &'a str) -> Result<Self, ConfigError> {
        if client_id.is_empty() || client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(ConfigError::InvalidClientId);
        }
        Ok(Self {
            broker,
            port: Self::DEFAULT_PORT,
            client_id,
            credentials: None,
            publish_prefix: TopicPrefix::new(Self::DEFAULT_PUBLISH_PREFIX)?,
            subscribe_prefix: TopicPrefix::new(Self::DEFAULT_SUBSCRIBE_PREFIX)?,
            retain: true,
            security: Security::None,
            client_identity: None,
            keep_alive: Duration::from_secs(15),
            reconnect_backoff: Duration::from_secs(1),
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, username: &'a str, password: &'a str) -> Self {
        self.credentials = Some(Credentials { username, password });
        self
    }

    pub fn with_prefixes(mut self, publish: &str, subscribe: &str) -> Result<Self, ConfigError> {
        self.publish_prefix = TopicPrefix::new(publish)?;
        self.subscribe_prefix = TopicPrefix::new(subscribe)?;
        Ok(self)
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn with_security(mut self, security: Security<'a>) -> Self {
        self.security = security;
        self
    }

    pub fn with_client_identity(mut self, certificate: &'a str, private_key: &'a str) -> Self {
        self.client_identity = Some(ClientIdentity {
            certificate,
            private_key,
        });
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GatewayConfig::new(Broker::Host("broker.local"), "gw-1").unwrap();
        assert_eq!(config.port, 1883);
        assert_eq!(config.publish_prefix.as_str(), "mygateway1-out");
        assert_eq!(config.subscribe_prefix.as_str(), "mygateway1-in");
        assert!(config.retain);
        assert_eq!(config.security, Security::None);
        assert_eq!(config.reconnect_backoff, Duration::from_secs(1));
    }

    #[test]
    fn prefix_validation() {
        assert_eq!(TopicPrefix::new(""), Err(ConfigError::InvalidPrefix));
        assert_eq!(TopicPrefix::new("a/"), Err(ConfigError::InvalidPrefix));
        assert_eq!(TopicPrefix::new("a/+"), Err(ConfigError::InvalidPrefix));
        assert_eq!(TopicPrefix::new("a/#"), Err(ConfigError::InvalidPrefix));
        let long = "p".repeat(MAX_PREFIX_LEN + 1);
        assert_eq!(TopicPrefix::new(&long), Err(ConfigError::PrefixTooLong));
        assert_eq!(TopicPrefix::new("home/sensors").unwrap().as_str(), "home/sensors");
    }

    #[test]
    fn client_id_validation() {
        assert_eq!(
            GatewayConfig::new(Broker::Host("b"), "").unwrap_err(),
            ConfigError::InvalidClientId
        );
    }

    #[test]
    fn trust_anchor_bounds() {
        assert_eq!(
            TrustAnchors::new(&[]).unwrap_err(),
            ConfigError::MissingTrustAnchor
        );
        assert_eq!(
            TrustAnchors::new(&["a", "b", "c", "d"]).unwrap_err(),
            ConfigError::TooManyTrustAnchors
        );
        let anchors = TrustAnchors::new(&["a", "b"]).unwrap();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors.iter().last(), Some("b"));
    }

    #[test]
    fn builder_sets_security_and_identity() {
        let config = GatewayConfig::new(Broker::Host("b"), "gw")
            .unwrap()
            .with_credentials("user", "secret")
            .with_security(Security::Fingerprint("AA:BB"))
            .with_client_identity("cert", "key")
            .with_port(8883);
        assert_eq!(config.port, 8883);
        assert_eq!(
            config.credentials,
            Some(Credentials {
                username: "user",
                password: "secret"
            })
        );
        assert_eq!(config.security, Security::Fingerprint("AA:BB"));
        assert!(config.client_identity.is_some());
    }
}
