//! # Registry Prober Library
//!
//! A blackbox probing engine for domain registry services: web WHOIS over
//! HTTP(S) and EPP over TLS.
//!
//! A probe is a [`ProbingSequence`] of [`ProbingStep`]s. Each pass opens (or
//! reuses) connections, writes one message per step, classifies every
//! response and reports per-step outcomes to a [`MetricsSink`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use registry_prober_lib::{Prober, ProberConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProberConfig::default().with_tlds(vec!["app".to_string()]);
//!     let mut prober = Prober::with_config(config)?;
//!
//!     for result in prober.run_once_all().await {
//!         match result {
//!             Ok(report) => println!("{}: {} steps ok", report.sequence, report.steps.len()),
//!             Err(failure) => println!("{}", failure),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Web WHOIS**: follows redirect chains across plaintext and TLS
//! - **EPP**: length-prefixed XML sessions with result code and transaction id checks
//! - **Persistent connections**: one EPP session shared by every step of a pass
//! - **Typed outcomes**: target failures are kept apart from prober defects

// Re-export main public API types and functions
// This makes them available as registry_prober_lib::TypeName
pub use action::{ActionResult, ProbingAction};
pub use config::{
    load_env_config, parse_duration_string, ConfigManager, DefaultsConfig, EnvConfig, EppSection,
    FileConfig, WebWhoisSection,
};
pub use connection::{Connection, ConnectionContext};
pub use connector::{AsyncStream, BoxedStream, Connector, NetworkConnector};
pub use error::{ErrorCategory, ProberError};
pub use handler::{ActionHandler, EppHandler, HandlerOutcome, WebWhoisHandler};
pub use memory::{AcceptedConnection, MemoryConnector, MemoryListener};
pub use message::{
    EppCodec, EppCommand, EppRequest, EppResponse, HttpCodec, HttpRequest, HttpResponse,
    InboundMessage, MessageCodec, OutboundMessage,
};
pub use metrics::{MemorySink, MetricsSink, ProbeMetric, TracingSink};
pub use presets::{build_sequence, describe_sequence, get_available_sequences};
pub use prober::{PassResult, Prober, ProberHandle};
pub use protocol::{HandlerLayer, Protocol, ProtocolBuilder, ProtocolRegistry};
pub use sequence::{ProbingSequence, ProbingSequenceBuilder};
pub use step::{ProbingStep, ProbingStepBuilder};
pub use templates::TemplateStore;
pub use token::{EppToken, Rotation, TargetSource, Token, WebWhoisToken};
pub use types::{
    Endpoint, EppConfig, ProbeOutcome, ProberConfig, ResponseKind, SequenceFailure,
    SequenceReport, SequenceState, StepReport, WebWhoisConfig,
};

// Public modules
pub mod message;
pub mod presets;

// Internal modules - their public items are re-exported above
mod action;
mod config;
mod connection;
mod connector;
mod error;
mod handler;
mod memory;
mod metrics;
mod prober;
mod protocol;
mod sequence;
mod step;
mod templates;
mod token;
mod types;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ProberError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Get library information for debugging or display purposes.
pub fn info() -> LibraryInfo {
    LibraryInfo {
        version: VERSION,
        author: AUTHOR,
        features: get_enabled_features(),
    }
}

/// Information about the library build and features
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub version: &'static str,
    pub author: &'static str,
    pub features: Vec<&'static str>,
}

/// Get list of enabled features at compile time
#[allow(clippy::vec_init_then_push)]
fn get_enabled_features() -> Vec<&'static str> {
    let mut features = Vec::new();

    #[cfg(feature = "web-whois")]
    features.push("web-whois");

    #[cfg(feature = "epp")]
    features.push("epp");

    features
}
