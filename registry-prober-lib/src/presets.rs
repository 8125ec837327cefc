//! Named, pre-wired probing sequences.
//!
//! Each preset turns a [`ProberConfig`] into a ready-to-run
//! [`ProbingSequence`]: the protocol, the steps with their templates and
//! expectations, and the token that drives them.

use crate::connector::Connector;
use crate::error::ProberError;
use crate::message::{EppCommand, EppRequest, HttpRequest, OutboundMessage};
use crate::metrics::MetricsSink;
use crate::protocol::{Protocol, ProtocolRegistry};
use crate::sequence::{ProbingSequence, ProbingSequenceBuilder};
use crate::step::ProbingStep;
use crate::templates::TemplateStore;
use crate::token::{EppToken, WebWhoisToken};
use crate::types::{ProberConfig, ResponseKind};
use http::Method;
use std::sync::Arc;
use std::time::Duration;

pub const WEB_WHOIS: &str = "web-whois";
pub const EPP_LOGIN_LOGOUT: &str = "epp-login-logout";
pub const EPP_LOGIN_CREATE_DELETE_LOGOUT: &str = "epp-login-create-delete-logout";
pub const EPP_LOGIN_CREATE_CHECK_DELETE_CHECK_LOGOUT: &str =
    "epp-login-create-check-delete-check-logout";
pub const EPP_LOGIN_CLAIMSCHECK_LOGOUT: &str = "epp-login-claimscheck-logout";

const DOMAIN_TAKEN: &str = "//domainns:name[@avail='0']";
const DOMAIN_FREE: &str = "//domainns:name[@avail='1']";

/// Names of every sequence this build can run.
#[allow(clippy::vec_init_then_push)]
pub fn get_available_sequences() -> Vec<&'static str> {
    let mut sequences = Vec::new();

    #[cfg(feature = "web-whois")]
    sequences.push(WEB_WHOIS);

    #[cfg(feature = "epp")]
    sequences.extend([
        EPP_LOGIN_LOGOUT,
        EPP_LOGIN_CREATE_DELETE_LOGOUT,
        EPP_LOGIN_CREATE_CHECK_DELETE_CHECK_LOGOUT,
        EPP_LOGIN_CLAIMSCHECK_LOGOUT,
    ]);

    sequences
}

/// Whether `name` is a sequence this build can run.
pub fn is_available(name: &str) -> bool {
    get_available_sequences().iter().any(|available| *available == name)
}

/// One-line description of a sequence, for listings.
pub fn describe_sequence(name: &str) -> Option<&'static str> {
    match name {
        WEB_WHOIS => Some("GET the web WHOIS page, following redirects (plaintext and TLS)"),
        EPP_LOGIN_LOGOUT => Some("Greeting, login and logout over one EPP session"),
        EPP_LOGIN_CREATE_DELETE_LOGOUT => Some("Login, create a probe domain, delete it, logout"),
        EPP_LOGIN_CREATE_CHECK_DELETE_CHECK_LOGOUT => {
            Some("Create and delete a probe domain, checking availability after each")
        }
        EPP_LOGIN_CLAIMSCHECK_LOGOUT => Some("Login, run a launch claims check, logout"),
        _ => None,
    }
}

/// Build the named sequence.
pub fn build_sequence(
    name: &str,
    config: &ProberConfig,
    connector: Arc<dyn Connector>,
    templates: &TemplateStore,
    metrics: Arc<dyn MetricsSink>,
) -> Result<ProbingSequence, ProberError> {
    if !is_available(name) {
        return Err(ProberError::config(format!(
            "Unknown sequence '{}'. Available: {}",
            name,
            get_available_sequences().join(", ")
        )));
    }

    let builder = match name {
        WEB_WHOIS => web_whois(config, connector)?,
        _ => {
            let commands: Vec<(EppCommand, ResponseKind, Option<&str>)> = match name {
                EPP_LOGIN_LOGOUT => Vec::new(),
                EPP_LOGIN_CREATE_DELETE_LOGOUT => vec![
                    (EppCommand::Create, ResponseKind::Success, None),
                    (EppCommand::Delete, ResponseKind::Success, None),
                ],
                EPP_LOGIN_CREATE_CHECK_DELETE_CHECK_LOGOUT => vec![
                    (EppCommand::Create, ResponseKind::Success, None),
                    (EppCommand::Check, ResponseKind::Success, Some(DOMAIN_TAKEN)),
                    (EppCommand::Delete, ResponseKind::Success, None),
                    (EppCommand::Check, ResponseKind::Success, Some(DOMAIN_FREE)),
                ],
                EPP_LOGIN_CLAIMSCHECK_LOGOUT => {
                    vec![(EppCommand::ClaimsCheck, ResponseKind::Success, None)]
                }
                _ => {
                    return Err(ProberError::internal(format!(
                        "Sequence '{}' is listed but not wired",
                        name
                    )))
                }
            };
            epp(name, config, connector, templates, &commands)?
        }
    };

    builder
        .step_timeout(config.step_timeout)
        .max_redirects(config.max_redirects)
        .metrics(metrics)
        .build()
}

fn web_whois(
    config: &ProberConfig,
    connector: Arc<dyn Connector>,
) -> Result<ProbingSequenceBuilder, ProberError> {
    let web = &config.web_whois;
    let token = WebWhoisToken::rotating(web.prefix.clone(), web.tlds.clone())?;

    // The token supplies the host and Host header for every pass.
    let step = ProbingStep::builder(WEB_WHOIS)
        .protocol(Protocol::whois_http(""))
        .message(OutboundMessage::Http(HttpRequest::new(
            Method::GET,
            web.path.clone(),
        )))
        .expect(ResponseKind::WebWhois)
        .redirect_registry(Arc::new(ProtocolRegistry::web_whois()))
        .build()?;

    Ok(ProbingSequence::builder(WEB_WHOIS, Box::new(token), connector).add_step(step))
}

fn epp(
    name: &str,
    config: &ProberConfig,
    connector: Arc<dyn Connector>,
    templates: &TemplateStore,
    middle: &[(EppCommand, ResponseKind, Option<&str>)],
) -> Result<ProbingSequenceBuilder, ProberError> {
    let epp = &config.epp;
    let protocol = Protocol::epp(epp.host.clone(), epp.port, true);
    let token = EppToken::new(epp.tld.clone(), epp.client_host.clone());

    let login = templates
        .request(EppCommand::Login)
        .with_credentials(&epp.client_id, &epp.password)?;

    let mut builder = ProbingSequence::builder(name, Box::new(token), connector)
        .add_step(epp_step(
            "hello",
            &protocol,
            EppRequest::hello(),
            ResponseKind::Greeting,
            None,
            Duration::ZERO,
        )?)
        .add_step(epp_step(
            "login",
            &protocol,
            login,
            ResponseKind::Success,
            None,
            config.step_delay,
        )?);

    for (command, expected, assertion) in middle {
        builder = builder.add_step(epp_step(
            command.template_name(),
            &protocol,
            templates.request(*command),
            *expected,
            *assertion,
            config.step_delay,
        )?);
    }

    Ok(builder.add_step(epp_step(
        "logout",
        &protocol,
        templates.request(EppCommand::Logout),
        ResponseKind::Success,
        None,
        config.step_delay,
    )?))
}

fn epp_step(
    name: &str,
    protocol: &Protocol,
    request: EppRequest,
    expected: ResponseKind,
    assertion: Option<&str>,
    delay: Duration,
) -> Result<ProbingStep, ProberError> {
    let mut builder = ProbingStep::builder(name)
        .protocol(protocol.clone())
        .message(OutboundMessage::Epp(request))
        .expect(expected)
        .delay(delay);
    if let Some(assertion) = assertion {
        builder = builder.assertion(assertion);
    }
    builder.build()
}
