//! Core data types for registry probing.
//!
//! This module defines the reports produced by probing sequences, the
//! outcome classification handed to metrics, and the runtime configuration
//! that presets are built from.

use crate::error::{ErrorCategory, ProberError};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// What a step expects the server to answer with.
///
/// This selects the response-handling strategy for the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// EPP greeting sent by the server right after the TLS handshake
    Greeting,
    /// EPP response with a success result code
    Success,
    /// EPP response with an error result code (negative-path probe)
    Failure,
    /// HTTP response that is either 2xx or a redirect to follow
    WebWhois,
}

/// Outcome of one probed step, as reported to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The step's expectations held
    Success,
    /// The server answered but failed an assertion
    Failure,
    /// The server could not be reached or dropped the connection
    Error,
    /// The prober itself misbehaved
    InternalError,
}

impl ProbeOutcome {
    pub fn from_error(error: &ProberError) -> Self {
        match error.category() {
            ErrorCategory::Validation => ProbeOutcome::Failure,
            ErrorCategory::Transport => ProbeOutcome::Error,
            ErrorCategory::Internal => ProbeOutcome::InternalError,
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Success => write!(f, "SUCCESS"),
            ProbeOutcome::Failure => write!(f, "FAILURE"),
            ProbeOutcome::Error => write!(f, "ERROR"),
            ProbeOutcome::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// Where an action ended up talking to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}{}", self.protocol, self.host, self.port, self.path)
    }
}

/// Result of one successfully completed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Step name (e.g. "login", "web-whois")
    pub step: String,

    /// Id of the connection the final exchange ran on
    pub connection_id: u64,

    /// Time from writing the message (or waiting for a greeting) to classification
    #[serde(serialize_with = "serialize_millis", rename = "latency_ms")]
    pub latency: Duration,

    /// Endpoint of the final exchange, after any redirects
    pub endpoint: Endpoint,

    /// Number of redirects followed within this step
    pub redirects: usize,
}

/// Result of a fully successful pass over a sequence.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    pub sequence: String,
    pub target: String,
    pub steps: Vec<StepReport>,

    #[serde(serialize_with = "serialize_millis", rename = "duration_ms")]
    pub duration: Duration,

    /// Whether a persistent connection was kept for the next pass
    pub connection_kept: bool,
}

impl SequenceReport {
    /// Endpoint of the last exchange in the pass.
    pub fn final_endpoint(&self) -> Option<&Endpoint> {
        self.steps.last().map(|step| &step.endpoint)
    }
}

/// A pass that stopped at a failing step.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceFailure {
    pub sequence: String,
    pub target: String,

    /// Name of the step that failed
    pub step: String,

    /// Zero-based index of the failing step
    pub step_index: usize,

    pub outcome: ProbeOutcome,

    /// Human-readable description of the error
    pub message: String,

    /// Steps that completed before the failure
    pub completed: Vec<StepReport>,

    #[serde(skip)]
    pub error: ProberError,
}

impl fmt::Display for SequenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sequence '{}' failed at step '{}' ({}): {}",
            self.sequence, self.step, self.outcome, self.message
        )
    }
}

impl std::error::Error for SequenceFailure {}

/// Lifecycle of a pass over a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceState {
    NotStarted,
    StepExecuting { step: String },
    StepSucceeded { step: String },
    StepFailed { step: String },
    SequenceFailed,
    SequenceCompleted,
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceState::NotStarted => write!(f, "NOT_STARTED"),
            SequenceState::StepExecuting { step } => write!(f, "STEP_EXECUTING({})", step),
            SequenceState::StepSucceeded { step } => write!(f, "STEP_SUCCEEDED({})", step),
            SequenceState::StepFailed { step } => write!(f, "STEP_FAILED({})", step),
            SequenceState::SequenceFailed => write!(f, "SEQUENCE_FAILED"),
            SequenceState::SequenceCompleted => write!(f, "SEQUENCE_COMPLETED"),
        }
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Web WHOIS probing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WebWhoisConfig {
    /// Hostname prefix; the probed host is `prefix + tld`
    /// Default: "whois.nic."
    pub prefix: String,

    /// TLDs to rotate through, one per pass
    pub tlds: Vec<String>,

    /// Request path for the first request
    /// Default: "/"
    pub path: String,
}

impl Default for WebWhoisConfig {
    fn default() -> Self {
        Self {
            prefix: "whois.nic.".to_string(),
            tlds: vec!["app".to_string()],
            path: "/".to_string(),
        }
    }
}

/// EPP probing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EppConfig {
    pub host: String,

    /// Default: 700
    pub port: u16,

    pub client_id: String,
    pub password: String,

    /// TLD that probe domains are created under
    pub tld: String,

    /// Identifies this prober in client transaction ids
    pub client_host: String,

    /// PEM client certificate and key presented during the TLS handshake
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

impl Default for EppConfig {
    fn default() -> Self {
        Self {
            host: "epp.registry.example".to_string(),
            port: crate::protocol::EPP_PORT,
            client_id: "prober".to_string(),
            password: String::new(),
            tld: "app".to_string(),
            client_host: "localhost".to_string(),
            cert_path: None,
            key_path: None,
        }
    }
}

/// Configuration for building and running probing sequences.
#[derive(Debug, Clone, PartialEq)]
pub struct ProberConfig {
    /// Time between passes of each sequence
    /// Default: 60 seconds
    pub interval: Duration,

    /// Upper bound on one action (write plus read)
    /// Default: 10 seconds; `None` relies on transport idle timeouts
    pub step_timeout: Option<Duration>,

    /// Timeout for TCP connect and TLS handshake
    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Delay before each step after the first
    /// Default: zero
    pub step_delay: Duration,

    /// Redirects allowed per pass; `None` means the sequence length
    pub max_redirects: Option<usize>,

    /// Names of the preset sequences to run
    pub sequences: Vec<String>,

    /// Directory whose `<name>.xml` files override built-in EPP templates
    pub template_dir: Option<PathBuf>,

    pub web_whois: WebWhoisConfig,
    pub epp: EppConfig,
}

impl Default for ProberConfig {
    /// Create a sensible default configuration.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            step_timeout: Some(Duration::from_secs(10)),
            connect_timeout: Duration::from_secs(5),
            step_delay: Duration::ZERO,
            max_redirects: None,
            sequences: vec!["web-whois".to_string()],
            template_dir: None,
            web_whois: WebWhoisConfig::default(),
            epp: EppConfig::default(),
        }
    }
}

impl ProberConfig {
    /// Set the interval between passes.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the per-step timeout. A zero duration disables it.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = Some(max_redirects);
        self
    }

    /// Set which sequences to run.
    pub fn with_sequences(mut self, sequences: Vec<String>) -> Self {
        self.sequences = sequences;
        self
    }

    /// Set the web WHOIS TLD rotation.
    pub fn with_tlds(mut self, tlds: Vec<String>) -> Self {
        self.web_whois.tlds = tlds;
        self
    }
}
