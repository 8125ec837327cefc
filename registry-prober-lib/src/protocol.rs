//! Transport descriptions.
//!
//! A [`Protocol`] names an endpoint and the ordered handler layers that a
//! connection to it goes through. Protocols are immutable and shared behind
//! an `Arc`; a redirect produces a new value rather than mutating one.

use crate::error::ProberError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Standard port for plaintext web WHOIS.
pub const HTTP_PORT: u16 = 80;
/// Standard port for TLS web WHOIS.
pub const HTTPS_PORT: u16 = 443;
/// Standard EPP-over-TLS port.
pub const EPP_PORT: u16 = 700;

/// One layer in a connection's handler pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerLayer {
    /// Wrap the stream in a TLS client session.
    Tls,
    /// HTTP/1.1 request/response framing.
    HttpCodec,
    /// Length-prefixed EPP XML framing.
    EppCodec,
}

/// Which wire codec a protocol terminates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Http,
    Epp,
}

/// Immutable description of a transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    name: String,
    host: String,
    port: u16,
    handlers: Vec<HandlerLayer>,
    persistent_connection: bool,
}

impl Protocol {
    /// Start building a protocol with the given name.
    pub fn builder<N: Into<String>>(name: N) -> ProtocolBuilder {
        ProtocolBuilder {
            name: name.into(),
            host: String::new(),
            port: 0,
            handlers: Vec::new(),
            persistent_connection: false,
        }
    }

    /// Plaintext web WHOIS on port 80.
    pub fn whois_http<H: Into<String>>(host: H) -> Self {
        Self {
            name: "whois_http".to_string(),
            host: host.into(),
            port: HTTP_PORT,
            handlers: vec![HandlerLayer::HttpCodec],
            persistent_connection: false,
        }
    }

    /// TLS web WHOIS on port 443.
    pub fn whois_https<H: Into<String>>(host: H) -> Self {
        Self {
            name: "whois_https".to_string(),
            host: host.into(),
            port: HTTPS_PORT,
            handlers: vec![HandlerLayer::Tls, HandlerLayer::HttpCodec],
            persistent_connection: false,
        }
    }

    /// EPP over TLS.
    pub fn epp<H: Into<String>>(host: H, port: u16, persistent: bool) -> Self {
        Self {
            name: "epp".to_string(),
            host: host.into(),
            port,
            handlers: vec![HandlerLayer::Tls, HandlerLayer::EppCodec],
            persistent_connection: persistent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn handlers(&self) -> &[HandlerLayer] {
        &self.handlers
    }

    pub fn persistent_connection(&self) -> bool {
        self.persistent_connection
    }

    /// Whether connections built from this protocol are TLS-wrapped.
    pub fn uses_tls(&self) -> bool {
        self.handlers.contains(&HandlerLayer::Tls)
    }

    /// The codec this protocol terminates in.
    ///
    /// Validation guarantees exactly one codec layer, so the fallback arm
    /// is unreachable for protocols built through the public API.
    pub fn codec_kind(&self) -> CodecKind {
        if self.handlers.contains(&HandlerLayer::EppCodec) {
            CodecKind::Epp
        } else {
            CodecKind::Http
        }
    }

    /// A copy of this protocol pointed at a different endpoint.
    pub fn with_target<H: Into<String>>(&self, host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..self.clone()
        }
    }

    fn validate(&self) -> Result<(), ProberError> {
        if self.name.trim().is_empty() {
            return Err(ProberError::config("Protocol name cannot be empty"));
        }

        let codecs: Vec<usize> = self
            .handlers
            .iter()
            .enumerate()
            .filter(|(_, layer)| **layer != HandlerLayer::Tls)
            .map(|(i, _)| i)
            .collect();

        if codecs.len() != 1 {
            return Err(ProberError::config(format!(
                "Protocol '{}' must have exactly one codec layer, found {}",
                self.name,
                codecs.len()
            )));
        }

        let codec_index = codecs[0];
        if let Some(tls_index) = self.handlers.iter().position(|l| *l == HandlerLayer::Tls) {
            if tls_index > codec_index {
                return Err(ProberError::config(format!(
                    "Protocol '{}' has a TLS layer after its codec",
                    self.name
                )));
            }
        }

        if self.handlers.iter().filter(|l| **l == HandlerLayer::Tls).count() > 1 {
            return Err(ProberError::config(format!(
                "Protocol '{}' has more than one TLS layer",
                self.name
            )));
        }

        Ok(())
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.name, self.host, self.port)
    }
}

/// Builder for [`Protocol`] values that validates the layer order.
#[derive(Debug, Clone)]
pub struct ProtocolBuilder {
    name: String,
    host: String,
    port: u16,
    handlers: Vec<HandlerLayer>,
    persistent_connection: bool,
}

impl ProtocolBuilder {
    pub fn host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Append a handler layer. Layers apply in insertion order.
    pub fn layer(mut self, layer: HandlerLayer) -> Self {
        self.handlers.push(layer);
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent_connection = persistent;
        self
    }

    pub fn build(self) -> Result<Protocol, ProberError> {
        let protocol = Protocol {
            name: self.name,
            host: self.host,
            port: self.port,
            handlers: self.handlers,
            persistent_connection: self.persistent_connection,
        };
        protocol.validate()?;
        Ok(protocol)
    }
}

/// Protocols indexed by URL scheme, consulted when a redirect switches
/// transport.
#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    by_scheme: HashMap<String, Arc<Protocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            by_scheme: HashMap::new(),
        }
    }

    /// Registry with the two web WHOIS transports.
    pub fn web_whois() -> Self {
        let mut registry = Self::new();
        registry.register("http", Protocol::whois_http(""));
        registry.register("https", Protocol::whois_https(""));
        registry
    }

    pub fn register<S: Into<String>>(&mut self, scheme: S, protocol: Protocol) {
        self.by_scheme
            .insert(scheme.into().to_ascii_lowercase(), Arc::new(protocol));
    }

    /// The protocol template for a scheme, if one is registered.
    pub fn for_scheme(&self, scheme: &str) -> Option<Arc<Protocol>> {
        self.by_scheme.get(&scheme.to_ascii_lowercase()).cloned()
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::web_whois()
    }
}
