//! Probe targets.
//!
//! A [`Token`] owns the identity of the current pass: which host or domain
//! is being probed, and how outbound messages are personalised for it.
//! Tokens never do I/O.

use crate::error::ProberError;
use crate::message::OutboundMessage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest second-level label derived from a transaction id.
pub const MAX_DOMAIN_PART_LENGTH: usize = 50;

static TRID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Supplies the current probe target and advances between passes.
pub trait Token: Send + Sync + fmt::Debug {
    /// Identifier of the current target, used in reports and metrics.
    fn target(&self) -> &str;

    /// Host to connect to, when the token rather than the protocol decides it.
    fn host(&self) -> Option<&str>;

    /// Personalise a message template for the current target.
    fn prepare(&mut self, message: &OutboundMessage) -> Result<OutboundMessage, ProberError>;

    /// Move on to the next target. Called after every pass.
    fn next(&mut self);
}

/// The population of targets a token walks through.
pub trait TargetSource: Send + Sync + fmt::Debug {
    fn current(&self) -> &str;
    fn advance(&mut self);
}

/// Cycles through a fixed list.
#[derive(Debug, Clone)]
pub struct Rotation {
    items: Vec<String>,
    index: usize,
}

impl Rotation {
    pub fn new(items: Vec<String>) -> Result<Self, ProberError> {
        if items.is_empty() {
            return Err(ProberError::config("Target rotation cannot be empty"));
        }
        Ok(Self { items, index: 0 })
    }
}

impl TargetSource for Rotation {
    fn current(&self) -> &str {
        &self.items[self.index]
    }

    fn advance(&mut self) {
        self.index = (self.index + 1) % self.items.len();
    }
}

/// Web WHOIS token: probes `prefix + tld` for each TLD in turn.
#[derive(Debug)]
pub struct WebWhoisToken {
    prefix: String,
    tlds: Box<dyn TargetSource>,
    host: String,
}

impl WebWhoisToken {
    pub fn new<P: Into<String>>(prefix: P, tlds: Box<dyn TargetSource>) -> Self {
        let prefix = prefix.into();
        let host = format!("{}{}", prefix, tlds.current());
        Self { prefix, tlds, host }
    }

    /// Convenience constructor over a fixed TLD list.
    pub fn rotating<P: Into<String>>(prefix: P, tlds: Vec<String>) -> Result<Self, ProberError> {
        Ok(Self::new(prefix, Box::new(Rotation::new(tlds)?)))
    }
}

impl Token for WebWhoisToken {
    fn target(&self) -> &str {
        &self.host
    }

    fn host(&self) -> Option<&str> {
        Some(&self.host)
    }

    fn prepare(&mut self, message: &OutboundMessage) -> Result<OutboundMessage, ProberError> {
        match message {
            OutboundMessage::Http(request) => {
                Ok(OutboundMessage::Http(request.clone().with_host(&self.host)?))
            }
            OutboundMessage::Epp(_) => Err(ProberError::internal(
                "Web WHOIS token cannot prepare an EPP message",
            )),
        }
    }

    fn next(&mut self) {
        self.tlds.advance();
        self.host = format!("{}{}", self.prefix, self.tlds.current());
    }
}

/// EPP token: fresh client transaction ids and a per-pass domain name.
#[derive(Debug, Clone)]
pub struct EppToken {
    tld: String,
    client_host: String,
    current_domain: String,
}

impl EppToken {
    /// `client_host` identifies this prober instance inside transaction ids.
    pub fn new<T: Into<String>, H: Into<String>>(tld: T, client_host: H) -> Self {
        let mut token = Self {
            tld: tld.into(),
            client_host: client_host.into(),
            current_domain: String::new(),
        };
        token.current_domain = token.domain_for(&token.new_trid());
        token
    }

    pub fn tld(&self) -> &str {
        &self.tld
    }

    /// A process-unique client transaction id.
    ///
    /// Cleanup tooling splits on dashes and expects the timestamp in the
    /// third position, so the layout must not change.
    pub fn new_trid(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let counter = TRID_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("prober-{}-{}-{}", self.client_host, millis, counter)
    }

    fn domain_for(&self, trid: &str) -> String {
        let sld = match trid.char_indices().rev().nth(MAX_DOMAIN_PART_LENGTH - 1) {
            Some((start, _)) => &trid[start..],
            None => trid,
        };
        format!("{}.{}", sld, self.tld)
    }
}

impl Token for EppToken {
    fn target(&self) -> &str {
        &self.current_domain
    }

    fn host(&self) -> Option<&str> {
        None
    }

    fn prepare(&mut self, message: &OutboundMessage) -> Result<OutboundMessage, ProberError> {
        match message {
            OutboundMessage::Epp(request) => Ok(OutboundMessage::Epp(
                request.render(&self.new_trid(), &self.current_domain)?,
            )),
            OutboundMessage::Http(_) => Err(ProberError::internal(
                "EPP token cannot prepare an HTTP message",
            )),
        }
    }

    fn next(&mut self) {
        self.current_domain = self.domain_for(&self.new_trid());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EppCommand, EppRequest, HttpRequest};
    use crate::templates::TemplateStore;

    #[test]
    fn test_rotation_cycles() {
        let mut rotation = Rotation::new(vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(rotation.current(), "a");
        rotation.advance();
        assert_eq!(rotation.current(), "b");
        rotation.advance();
        assert_eq!(rotation.current(), "a");
        assert!(Rotation::new(vec![]).is_err());
    }

    #[test]
    fn test_web_whois_token_sets_host() {
        let mut token =
            WebWhoisToken::rotating("whois.nic.", vec!["app".into(), "dev".into()]).unwrap();
        assert_eq!(token.host(), Some("whois.nic.app"));

        let template = OutboundMessage::Http(HttpRequest::get("placeholder", "/").unwrap());
        match token.prepare(&template).unwrap() {
            OutboundMessage::Http(request) => assert_eq!(request.host(), Some("whois.nic.app")),
            other => panic!("unexpected message {:?}", other),
        }

        token.next();
        assert_eq!(token.target(), "whois.nic.dev");
        token.next();
        assert_eq!(token.target(), "whois.nic.app");
    }

    #[test]
    fn test_epp_trid_layout() {
        let token = EppToken::new("example", "probe1");
        let trid = token.new_trid();
        let parts: Vec<&str> = trid.split('-').collect();
        assert_eq!(parts[0], "prober");
        assert_eq!(parts[1], "probe1");
        assert!(parts[2].parse::<u128>().is_ok());
        assert!(parts[3].parse::<u64>().is_ok());
        assert_ne!(trid, token.new_trid());
    }

    #[test]
    fn test_epp_domain_is_truncated_trid() {
        let token = EppToken::new("example", "a-rather-long-hostname-for-testing-purposes.internal");
        let domain = token.target();
        let (sld, tld) = domain.rsplit_once('.').unwrap();
        assert_eq!(tld, "example");
        assert_eq!(sld.chars().count(), MAX_DOMAIN_PART_LENGTH);
    }

    #[test]
    fn test_epp_token_prepare_uses_fresh_trid_per_message() {
        let mut token = EppToken::new("example", "localhost");
        let store = TemplateStore::builtin();
        let create = OutboundMessage::Epp(store.request(EppCommand::Create));

        let first = token.prepare(&create).unwrap();
        let second = token.prepare(&create).unwrap();
        let (first, second) = match (first, second) {
            (OutboundMessage::Epp(a), OutboundMessage::Epp(b)) => (a, b),
            _ => panic!("expected EPP messages"),
        };
        assert_ne!(first.cl_trid(), second.cl_trid());
        assert_eq!(first.domain(), Some(token.target()));
        assert_eq!(second.domain(), Some(token.target()));

        let before = token.target().to_string();
        token.next();
        assert_ne!(token.target(), before);
    }

    #[test]
    fn test_tokens_reject_foreign_messages() {
        let mut web = WebWhoisToken::rotating("whois.", vec!["x".into()]).unwrap();
        assert!(web
            .prepare(&OutboundMessage::Epp(EppRequest::hello()))
            .unwrap_err()
            .is_internal());

        let mut epp = EppToken::new("x", "h");
        let get = OutboundMessage::Http(HttpRequest::get("h", "/").unwrap());
        assert!(epp.prepare(&get).unwrap_err().is_internal());
    }
}
