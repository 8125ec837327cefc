//! Response classification.
//!
//! An [`ActionHandler`] decides what one decoded response means: the step
//! succeeded, the probe must follow a redirect, or an assertion failed.

use crate::connection::ConnectionContext;
use crate::error::ProberError;
use crate::message::xml::{element_value, Selector};
use crate::message::{InboundMessage, OutboundMessage};
use crate::protocol::{ProtocolRegistry, HTTPS_PORT, HTTP_PORT};
use crate::types::ResponseKind;
use http::StatusCode;
use std::sync::Arc;
use url::Url;

const GREETING: &str = "//eppns:greeting";
const CL_TRID: &str = "//eppns:clTRID";
const RESULT: &str = "//eppns:result";
const SUCCESS_RESULT: &str = "//eppns:result[@code>='1000'][@code<'2000']";
const FAILURE_RESULT: &str = "//eppns:result[@code>='2000']";

/// What the driver should do after a response was classified.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// The step met its expectations.
    Success,
    /// Re-issue the step at the location described by `context`.
    Redirect {
        context: ConnectionContext,
        /// A 303 turns the follow-up request into a body-less GET.
        rewrite_to_get: bool,
    },
}

/// Per-step response handler, selected by the step's expected response kind.
#[derive(Debug, Clone)]
pub enum ActionHandler {
    WebWhois(WebWhoisHandler),
    Epp(EppHandler),
}

impl ActionHandler {
    /// Build the handler for `expected`.
    ///
    /// `assertions` are extra selectors an EPP response must match.
    pub fn for_kind(
        expected: ResponseKind,
        registry: Arc<ProtocolRegistry>,
        assertions: &[String],
    ) -> Result<Self, ProberError> {
        match expected {
            ResponseKind::WebWhois => {
                if !assertions.is_empty() {
                    return Err(ProberError::config(
                        "Web WHOIS steps do not support XML assertions",
                    ));
                }
                Ok(ActionHandler::WebWhois(WebWhoisHandler::new(registry)))
            }
            kind => Ok(ActionHandler::Epp(EppHandler::new(kind, assertions)?)),
        }
    }

    pub fn classify(
        &self,
        context: &ConnectionContext,
        request: &OutboundMessage,
        response: InboundMessage,
    ) -> Result<HandlerOutcome, ProberError> {
        match self {
            ActionHandler::WebWhois(handler) => handler.classify(context, response),
            ActionHandler::Epp(handler) => handler.classify(request, response),
        }
    }
}

/// Accepts 2xx and follows redirects, switching transport by URL scheme.
#[derive(Debug, Clone)]
pub struct WebWhoisHandler {
    registry: Arc<ProtocolRegistry>,
}

impl WebWhoisHandler {
    pub fn new(registry: Arc<ProtocolRegistry>) -> Self {
        Self { registry }
    }

    fn classify(
        &self,
        context: &ConnectionContext,
        response: InboundMessage,
    ) -> Result<HandlerOutcome, ProberError> {
        let response = match response {
            InboundMessage::Http(response) => response,
            InboundMessage::Epp(_) => {
                return Err(ProberError::internal(
                    "Web WHOIS handler received an EPP frame",
                ))
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(HandlerOutcome::Success);
        }

        if !is_redirect(status) {
            return Err(ProberError::validation(
                "status code",
                format!("received {} from {}", status, context.host),
            ));
        }

        let location = response.location().ok_or_else(|| {
            ProberError::validation(
                "redirect location",
                format!("{} from {} has no Location header", status, context.host),
            )
        })?;

        Ok(HandlerOutcome::Redirect {
            context: self.redirect_context(context, location)?,
            rewrite_to_get: status == StatusCode::SEE_OTHER,
        })
    }

    fn redirect_context(
        &self,
        context: &ConnectionContext,
        location: &str,
    ) -> Result<ConnectionContext, ProberError> {
        let current = current_url(context)?;
        let next = current.join(location)?;

        let template = self.registry.for_scheme(next.scheme()).ok_or_else(|| {
            ProberError::validation(
                "redirect scheme",
                format!("unsupported scheme in redirect to {}", next),
            )
        })?;
        let host = next
            .host_str()
            .ok_or_else(|| {
                ProberError::validation("redirect location", format!("no host in {}", next))
            })?
            .to_string();
        let port = next.port_or_known_default().unwrap_or(template.port());

        let mut path = next.path().to_string();
        if let Some(query) = next.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(ConnectionContext {
            protocol: Arc::new(template.with_target(host.clone(), port)),
            host,
            port,
            path,
            target: context.target.clone(),
            step: context.step.clone(),
        })
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn current_url(context: &ConnectionContext) -> Result<Url, ProberError> {
    let (scheme, default_port) = if context.protocol.uses_tls() {
        ("https", HTTPS_PORT)
    } else {
        ("http", HTTP_PORT)
    };
    let authority = if context.port == default_port {
        context.host.clone()
    } else {
        format!("{}:{}", context.host, context.port)
    };
    let path = if context.path.is_empty() { "/" } else { &context.path };

    Url::parse(&format!("{}://{}{}", scheme, authority, path)).map_err(|e| {
        ProberError::internal(format!("Current endpoint is not a valid URL: {}", e))
    })
}

/// Validates EPP greetings and command responses.
#[derive(Debug, Clone)]
pub struct EppHandler {
    expected: ResponseKind,
    greeting: Selector,
    cl_trid: Selector,
    result: Selector,
    result_check: Selector,
    assertions: Vec<Selector>,
}

impl EppHandler {
    pub fn new(expected: ResponseKind, assertions: &[String]) -> Result<Self, ProberError> {
        let result_check = match expected {
            ResponseKind::Failure => FAILURE_RESULT,
            ResponseKind::Greeting | ResponseKind::Success => SUCCESS_RESULT,
            ResponseKind::WebWhois => {
                return Err(ProberError::internal(
                    "EPP handler cannot expect a web WHOIS response",
                ))
            }
        };

        Ok(Self {
            expected,
            greeting: Selector::parse(GREETING)?,
            cl_trid: Selector::parse(CL_TRID)?,
            result: Selector::parse(RESULT)?,
            result_check: Selector::parse(result_check)?,
            assertions: assertions
                .iter()
                .map(|expr| Selector::parse(expr))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn expected(&self) -> ResponseKind {
        self.expected
    }

    fn classify(
        &self,
        request: &OutboundMessage,
        response: InboundMessage,
    ) -> Result<HandlerOutcome, ProberError> {
        let response = match response {
            InboundMessage::Epp(response) => response,
            InboundMessage::Http(_) => {
                return Err(ProberError::internal(
                    "EPP handler received an HTTP response",
                ))
            }
        };
        let doc = response.parse()?;

        if self.expected == ResponseKind::Greeting {
            if !self.greeting.matches(&doc) {
                return Err(ProberError::validation(
                    "greeting",
                    "first message from the server is not an EPP greeting",
                ));
            }
        } else {
            let sent_trid = match request {
                OutboundMessage::Epp(request) => request.cl_trid(),
                OutboundMessage::Http(_) => None,
            }
            .ok_or_else(|| {
                ProberError::internal("EPP request was sent without a client transaction id")
            })?;

            if !self.result_check.matches(&doc) {
                let code = self
                    .result
                    .find(&doc)
                    .and_then(|node| node.attribute("code"))
                    .unwrap_or("none");
                let assertion = if self.expected == ResponseKind::Failure {
                    "failure result code"
                } else {
                    "success result code"
                };
                return Err(ProberError::validation(
                    assertion,
                    format!("got result code {}", code),
                ));
            }

            let received = element_value(&doc, &self.cl_trid);
            if received.as_deref() != Some(sent_trid) {
                return Err(ProberError::validation(
                    "transaction id",
                    format!(
                        "expected clTRID {}, got {}",
                        sent_trid,
                        received.as_deref().unwrap_or("none")
                    ),
                ));
            }
        }

        for assertion in &self.assertions {
            if !assertion.matches(&doc) {
                return Err(ProberError::validation(
                    assertion.as_str(),
                    "no matching element in response",
                ));
            }
        }

        Ok(HandlerOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EppCommand, EppResponse, HttpResponse};
    use crate::protocol::Protocol;
    use crate::templates::TemplateStore;
    use http::{HeaderMap, HeaderValue};

    fn web_context() -> ConnectionContext {
        ConnectionContext {
            protocol: Arc::new(Protocol::whois_http("whois.nic.app")),
            host: "whois.nic.app".to_string(),
            port: 80,
            path: "/lookup".to_string(),
            target: "whois.nic.app".to_string(),
            step: "web-whois".to_string(),
        }
    }

    fn http(status: u16, location: Option<&str>) -> InboundMessage {
        let mut headers = HeaderMap::new();
        if let Some(location) = location {
            headers.insert(http::header::LOCATION, HeaderValue::from_str(location).unwrap());
        }
        InboundMessage::Http(HttpResponse::new(
            StatusCode::from_u16(status).unwrap(),
            headers,
            bytes::Bytes::new(),
        ))
    }

    fn web_handler() -> ActionHandler {
        ActionHandler::for_kind(
            ResponseKind::WebWhois,
            Arc::new(ProtocolRegistry::web_whois()),
            &[],
        )
        .unwrap()
    }

    fn get() -> OutboundMessage {
        OutboundMessage::Http(crate::message::HttpRequest::get("whois.nic.app", "/").unwrap())
    }

    #[test]
    fn test_web_whois_success() {
        let outcome = web_handler()
            .classify(&web_context(), &get(), http(200, None))
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Success);
    }

    #[test]
    fn test_web_whois_redirect_switches_to_tls() {
        let outcome = web_handler()
            .classify(
                &web_context(),
                &get(),
                http(301, Some("https://whois.nic.example/")),
            )
            .unwrap();

        match outcome {
            HandlerOutcome::Redirect {
                context,
                rewrite_to_get,
            } => {
                assert!(context.protocol.uses_tls());
                assert_eq!(context.host, "whois.nic.example");
                assert_eq!(context.port, 443);
                assert_eq!(context.path, "/");
                assert_eq!(context.protocol.host(), "whois.nic.example");
                assert!(!rewrite_to_get);
            }
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    #[test]
    fn test_relative_redirect_keeps_transport_and_query() {
        let outcome = web_handler()
            .classify(&web_context(), &get(), http(303, Some("next?q=1")))
            .unwrap();

        match outcome {
            HandlerOutcome::Redirect {
                context,
                rewrite_to_get,
            } => {
                assert!(!context.protocol.uses_tls());
                assert_eq!(context.host, "whois.nic.app");
                assert_eq!(context.port, 80);
                assert_eq!(context.path, "/next?q=1");
                assert!(rewrite_to_get);
            }
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    #[test]
    fn test_redirect_with_explicit_port() {
        let outcome = web_handler()
            .classify(
                &web_context(),
                &get(),
                http(307, Some("https://whois.nic.app:8443/x")),
            )
            .unwrap();
        match outcome {
            HandlerOutcome::Redirect { context, .. } => assert_eq!(context.port, 8443),
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    #[test]
    fn test_web_whois_failures() {
        let handler = web_handler();

        let err = handler
            .classify(&web_context(), &get(), http(404, None))
            .unwrap_err();
        assert_eq!(err.assertion(), Some("status code"));

        let err = handler
            .classify(&web_context(), &get(), http(302, None))
            .unwrap_err();
        assert_eq!(err.assertion(), Some("redirect location"));

        let err = handler
            .classify(&web_context(), &get(), http(301, Some("ftp://files.example/")))
            .unwrap_err();
        assert_eq!(err.assertion(), Some("redirect scheme"));
    }

    fn epp_response(code: u16, trid: &str) -> InboundMessage {
        InboundMessage::Epp(EppResponse::new(format!(
            "<?xml version='1.0' encoding='UTF-8'?><epp xmlns='urn:ietf:params:xml:ns:epp-1.0'>\
             <response><result code='{}'><msg>m</msg></result>\
             <trID><clTRID>{}</clTRID><svTRID>s</svTRID></trID></response></epp>",
            code, trid
        )))
    }

    fn login(trid: &str) -> OutboundMessage {
        let request = TemplateStore::builtin()
            .request(EppCommand::Login)
            .with_credentials("id", "pw")
            .unwrap()
            .render(trid, "")
            .unwrap();
        OutboundMessage::Epp(request)
    }

    fn epp_handler(kind: ResponseKind) -> ActionHandler {
        ActionHandler::for_kind(kind, Arc::new(ProtocolRegistry::new()), &[]).unwrap()
    }

    #[test]
    fn test_epp_success_requires_code_and_trid() {
        let handler = epp_handler(ResponseKind::Success);
        let ctx = web_context();

        assert_eq!(
            handler
                .classify(&ctx, &login("t-1"), epp_response(1000, "t-1"))
                .unwrap(),
            HandlerOutcome::Success
        );

        let err = handler
            .classify(&ctx, &login("t-1"), epp_response(2500, "t-1"))
            .unwrap_err();
        assert_eq!(err.assertion(), Some("success result code"));

        let err = handler
            .classify(&ctx, &login("t-1"), epp_response(1000, "t-2"))
            .unwrap_err();
        assert_eq!(err.assertion(), Some("transaction id"));
    }

    #[test]
    fn test_epp_failure_expectation() {
        let handler = epp_handler(ResponseKind::Failure);
        let ctx = web_context();

        assert!(handler
            .classify(&ctx, &login("t"), epp_response(2303, "t"))
            .is_ok());
        let err = handler
            .classify(&ctx, &login("t"), epp_response(1000, "t"))
            .unwrap_err();
        assert_eq!(err.assertion(), Some("failure result code"));
        assert!(handler
            .classify(&ctx, &login("t"), epp_response(2303, "other"))
            .is_err());
    }

    #[test]
    fn test_greeting_ignores_transaction_id() {
        let handler = epp_handler(ResponseKind::Greeting);
        let greeting = InboundMessage::Epp(EppResponse::new(
            "<epp xmlns='urn:ietf:params:xml:ns:epp-1.0'><greeting><svID>x</svID></greeting></epp>",
        ));
        let hello = OutboundMessage::Epp(crate::message::EppRequest::hello());
        assert!(handler.classify(&web_context(), &hello, greeting).is_ok());

        let err = handler
            .classify(&web_context(), &hello, epp_response(1000, "t"))
            .unwrap_err();
        assert_eq!(err.assertion(), Some("greeting"));
    }

    #[test]
    fn test_extra_assertions() {
        let handler = ActionHandler::for_kind(
            ResponseKind::Success,
            Arc::new(ProtocolRegistry::new()),
            &["//domainns:name[@avail='1']".to_string()],
        )
        .unwrap();
        let err = handler
            .classify(&web_context(), &login("t"), epp_response(1000, "t"))
            .unwrap_err();
        assert_eq!(err.assertion(), Some("//domainns:name[@avail='1']"));
    }

    #[test]
    fn test_malformed_epp_names_assertion() {
        let err = epp_handler(ResponseKind::Success)
            .classify(
                &web_context(),
                &login("t"),
                InboundMessage::Epp(EppResponse::new("<epp>")),
            )
            .unwrap_err();
        assert_eq!(err.assertion(), Some("well-formed XML"));
    }
}
