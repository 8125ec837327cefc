//! Static step descriptions.

use crate::action::ProbingAction;
use crate::connection::ConnectionContext;
use crate::error::ProberError;
use crate::handler::ActionHandler;
use crate::message::OutboundMessage;
use crate::protocol::{CodecKind, Protocol, ProtocolRegistry, HTTPS_PORT, HTTP_PORT};
use crate::token::Token;
use crate::types::ResponseKind;
use http::Method;
use std::sync::Arc;
use std::time::Duration;

/// One step of a sequence: what to send, over what, and what to expect back.
#[derive(Debug, Clone)]
pub struct ProbingStep {
    name: String,
    protocol: Arc<Protocol>,
    message: OutboundMessage,
    expected: ResponseKind,
    delay: Duration,
    handler: Arc<ActionHandler>,
}

impl ProbingStep {
    pub fn builder<N: Into<String>>(name: N) -> ProbingStepBuilder {
        ProbingStepBuilder {
            name: name.into(),
            protocol: None,
            message: None,
            expected: None,
            delay: Duration::ZERO,
            assertions: Vec::new(),
            registry: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn message(&self) -> &OutboundMessage {
        &self.message
    }

    pub fn expected(&self) -> ResponseKind {
        self.expected
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Build the action for this step from the token's current target.
    pub fn generate_action(
        &self,
        token: &mut dyn Token,
        timeout: Option<Duration>,
        requires_existing: bool,
    ) -> Result<ProbingAction, ProberError> {
        let message = token.prepare(&self.message)?;
        let host = token.host().unwrap_or(self.protocol.host()).to_string();
        let port = self.protocol.port();

        let protocol = if host == self.protocol.host() {
            self.protocol.clone()
        } else {
            Arc::new(self.protocol.with_target(host.clone(), port))
        };
        let path = match &message {
            OutboundMessage::Http(request) => request.path().to_string(),
            OutboundMessage::Epp(_) => String::new(),
        };

        Ok(ProbingAction {
            protocol,
            message,
            handler: self.handler.clone(),
            host,
            port,
            path,
            delay: self.delay,
            timeout,
            target: token.target().to_string(),
            step: self.name.clone(),
            requires_existing,
        })
    }

    /// Re-issue `previous` at the location a redirect pointed to.
    ///
    /// The message keeps its method and body unless `rewrite_to_get` is set.
    /// No delay applies between redirect hops.
    pub fn redirect_action(
        &self,
        previous: &ProbingAction,
        context: ConnectionContext,
        rewrite_to_get: bool,
    ) -> Result<ProbingAction, ProberError> {
        let message = match &previous.message {
            OutboundMessage::Http(request) => {
                let mut request = request
                    .clone()
                    .with_path(context.path.clone())
                    .with_host(host_header(&context))?;
                if rewrite_to_get {
                    request = request.with_method(Method::GET).without_body();
                }
                OutboundMessage::Http(request)
            }
            OutboundMessage::Epp(_) => {
                return Err(ProberError::internal(format!(
                    "Step '{}' cannot follow a redirect on an EPP connection",
                    self.name
                )))
            }
        };

        Ok(ProbingAction {
            protocol: context.protocol,
            message,
            handler: previous.handler.clone(),
            host: context.host,
            port: context.port,
            path: context.path,
            delay: Duration::ZERO,
            timeout: previous.timeout,
            target: previous.target.clone(),
            step: self.name.clone(),
            requires_existing: false,
        })
    }
}

fn host_header(context: &ConnectionContext) -> String {
    let default_port = if context.protocol.uses_tls() {
        HTTPS_PORT
    } else {
        HTTP_PORT
    };
    if context.port == default_port {
        context.host.clone()
    } else {
        format!("{}:{}", context.host, context.port)
    }
}

/// Builder for [`ProbingStep`] that checks the pieces fit together.
#[derive(Debug)]
pub struct ProbingStepBuilder {
    name: String,
    protocol: Option<Protocol>,
    message: Option<OutboundMessage>,
    expected: Option<ResponseKind>,
    delay: Duration,
    assertions: Vec<String>,
    registry: Option<Arc<ProtocolRegistry>>,
}

impl ProbingStepBuilder {
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn message(mut self, message: OutboundMessage) -> Self {
        self.message = Some(message);
        self
    }

    pub fn expect(mut self, expected: ResponseKind) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Extra selector the response must match (EPP only).
    pub fn assertion<S: Into<String>>(mut self, selector: S) -> Self {
        self.assertions.push(selector.into());
        self
    }

    /// Protocols available to redirects. Defaults to plain and TLS web WHOIS.
    pub fn redirect_registry(mut self, registry: Arc<ProtocolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<ProbingStep, ProberError> {
        let name = self.name;
        if name.trim().is_empty() {
            return Err(ProberError::config("Step name cannot be empty"));
        }
        let protocol = self
            .protocol
            .ok_or_else(|| ProberError::config(format!("Step '{}' has no protocol", name)))?;
        let message = self
            .message
            .ok_or_else(|| ProberError::config(format!("Step '{}' has no message", name)))?;
        let expected = self.expected.ok_or_else(|| {
            ProberError::config(format!("Step '{}' has no expected response kind", name))
        })?;

        let consistent = match (protocol.codec_kind(), &message, expected) {
            (CodecKind::Http, OutboundMessage::Http(_), ResponseKind::WebWhois) => true,
            (CodecKind::Epp, OutboundMessage::Epp(request), ResponseKind::Greeting) => {
                request.command().writes_nothing()
            }
            (CodecKind::Epp, OutboundMessage::Epp(request), ResponseKind::Success)
            | (CodecKind::Epp, OutboundMessage::Epp(request), ResponseKind::Failure) => {
                !request.command().writes_nothing()
            }
            _ => false,
        };
        if !consistent {
            return Err(ProberError::config(format!(
                "Step '{}' combines {} over '{}' with an expected {:?} response",
                name,
                message.describe(),
                protocol.name(),
                expected
            )));
        }

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ProtocolRegistry::web_whois()));
        let handler = ActionHandler::for_kind(expected, registry, &self.assertions)?;

        Ok(ProbingStep {
            name,
            protocol: Arc::new(protocol),
            message,
            expected,
            delay: self.delay,
            handler: Arc::new(handler),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EppCommand, EppRequest, HttpRequest};
    use crate::templates::TemplateStore;
    use crate::token::{EppToken, WebWhoisToken};

    fn web_step() -> ProbingStep {
        ProbingStep::builder("web-whois")
            .protocol(Protocol::whois_http(""))
            .message(OutboundMessage::Http(
                HttpRequest::new(Method::POST, "/").with_body("q=1"),
            ))
            .expect(ResponseKind::WebWhois)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_mismatched_pieces() {
        let http_over_epp = ProbingStep::builder("bad")
            .protocol(Protocol::epp("epp.example", 700, true))
            .message(OutboundMessage::Http(HttpRequest::new(Method::GET, "/")))
            .expect(ResponseKind::WebWhois)
            .build();
        assert!(http_over_epp.is_err());

        let greeting_for_login = ProbingStep::builder("bad")
            .protocol(Protocol::epp("epp.example", 700, true))
            .message(OutboundMessage::Epp(
                TemplateStore::builtin().request(EppCommand::Login),
            ))
            .expect(ResponseKind::Greeting)
            .build();
        assert!(greeting_for_login.is_err());

        let missing_message = ProbingStep::builder("bad")
            .protocol(Protocol::whois_http("x"))
            .expect(ResponseKind::WebWhois)
            .build();
        assert!(missing_message.is_err());
    }

    #[test]
    fn test_generate_action_uses_token_host() {
        let step = web_step();
        let mut token = WebWhoisToken::rotating("whois.nic.", vec!["app".into()]).unwrap();

        let action = step
            .generate_action(&mut token, Some(Duration::from_secs(1)), false)
            .unwrap();
        assert_eq!(action.host, "whois.nic.app");
        assert_eq!(action.port, 80);
        assert_eq!(action.protocol.host(), "whois.nic.app");
        assert_eq!(action.path, "/");
        assert_eq!(action.target, "whois.nic.app");
        match &action.message {
            OutboundMessage::Http(request) => assert_eq!(request.host(), Some("whois.nic.app")),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_generate_action_for_epp_uses_protocol_host() {
        let step = ProbingStep::builder("hello")
            .protocol(Protocol::epp("epp.example", 700, true))
            .message(OutboundMessage::Epp(EppRequest::hello()))
            .expect(ResponseKind::Greeting)
            .build()
            .unwrap();
        let mut token = EppToken::new("example", "localhost");

        let action = step.generate_action(&mut token, None, false).unwrap();
        assert_eq!(action.host, "epp.example");
        assert_eq!(action.port, 700);
        assert!(action.path.is_empty());
        assert!(Arc::ptr_eq(&action.protocol, step.protocol()));
    }

    #[test]
    fn test_redirect_action_rewrites_target() {
        let step = web_step();
        let mut token = WebWhoisToken::rotating("whois.nic.", vec!["app".into()]).unwrap();
        let previous = step.generate_action(&mut token, None, false).unwrap();

        let context = ConnectionContext {
            protocol: Arc::new(Protocol::whois_https("whois.example").with_target("whois.example", 8443)),
            host: "whois.example".to_string(),
            port: 8443,
            path: "/lookup?q=1".to_string(),
            target: previous.target.clone(),
            step: previous.step.clone(),
        };

        let redirected = step.redirect_action(&previous, context.clone(), false).unwrap();
        assert_eq!(redirected.host, "whois.example");
        assert_eq!(redirected.port, 8443);
        assert_eq!(redirected.delay, Duration::ZERO);
        match &redirected.message {
            OutboundMessage::Http(request) => {
                assert_eq!(request.host(), Some("whois.example:8443"));
                assert_eq!(request.path(), "/lookup?q=1");
                assert_eq!(request.method(), Method::POST);
                assert!(request.body().is_some());
            }
            other => panic!("unexpected message {:?}", other),
        }

        let see_other = step.redirect_action(&previous, context, true).unwrap();
        match &see_other.message {
            OutboundMessage::Http(request) => {
                assert_eq!(request.method(), Method::GET);
                assert!(request.body().is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
