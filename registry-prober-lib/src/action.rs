//! One executable exchange.
//!
//! A [`ProbingAction`] is built fresh for every step execution (and every
//! redirect hop). It obtains a connection, writes its message, waits for one
//! response and hands that response to its [`ActionHandler`].

use crate::connection::{Connection, ConnectionContext};
use crate::connector::Connector;
use crate::error::ProberError;
use crate::handler::{ActionHandler, HandlerOutcome};
use crate::message::{InboundMessage, OutboundMessage};
use crate::protocol::Protocol;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A single exchange bound to one endpoint.
#[derive(Debug, Clone)]
pub struct ProbingAction {
    /// Transport used for this exchange
    pub protocol: Arc<Protocol>,

    /// Fully prepared message (host header set, EPP template rendered)
    pub message: OutboundMessage,

    pub handler: Arc<ActionHandler>,

    pub host: String,
    pub port: u16,

    /// Request path; empty for EPP
    pub path: String,

    /// Waited before the connection is touched
    pub delay: Duration,

    /// Bound on write plus read; `None` relies on the transport
    pub timeout: Option<Duration>,

    /// Target identifier of the current pass
    pub target: String,

    /// Name of the step this action executes
    pub step: String,

    /// Fail instead of opening a connection when none is handed in
    pub requires_existing: bool,
}

/// What an action produced.
#[derive(Debug)]
pub struct ActionResult {
    pub outcome: HandlerOutcome,

    /// The connection, when it stays open for a following step
    pub connection: Option<Connection>,

    pub connection_id: u64,

    /// Time from the write (or, for a greeting, from waiting) to classification
    pub latency: Duration,

    /// Attributes the exchange ran with
    pub context: ConnectionContext,
}

impl ProbingAction {
    /// Connection attributes for this action.
    pub fn context(&self) -> ConnectionContext {
        ConnectionContext {
            protocol: self.protocol.clone(),
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            target: self.target.clone(),
            step: self.step.clone(),
        }
    }

    /// Run the exchange.
    ///
    /// `existing` is the connection kept by a previous persistent step. The
    /// connection is closed on any error, on redirect, and after success on
    /// a non-persistent protocol.
    pub async fn call(
        &self,
        existing: Option<Connection>,
        connector: &dyn Connector,
    ) -> Result<ActionResult, ProberError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let context = self.context();
        let mut connection = match existing {
            Some(mut connection) => {
                if !connection.accepts(&self.protocol) {
                    connection.close().await;
                    return Err(ProberError::internal(format!(
                        "Step '{}' cannot reuse a connection with a different codec",
                        self.step
                    )));
                }
                connection.set_context(context.clone());
                connection
            }
            None if self.requires_existing => {
                return Err(ProberError::internal(format!(
                    "Step '{}' needs the connection opened by an earlier step, but none is open",
                    self.step
                )));
            }
            None => Connection::open(connector, context.clone()).await?,
        };
        let connection_id = connection.id();

        debug!(
            step = %self.step,
            connection_id,
            message = %self.message.describe(),
            host = %self.host,
            port = self.port,
            "executing action"
        );

        let started = Instant::now();
        let response = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, exchange(&mut connection, &self.message)).await {
                    Ok(response) => response,
                    Err(_) => Err(ProberError::timeout(format!("step '{}'", self.step), limit)),
                }
            }
            None => exchange(&mut connection, &self.message).await,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };
        let latency = started.elapsed();

        let outcome = match self.handler.classify(&context, &self.message, response) {
            Ok(outcome) => outcome,
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };

        let keep = outcome == HandlerOutcome::Success && self.protocol.persistent_connection();
        let connection = if keep {
            Some(connection)
        } else {
            connection.close().await;
            None
        };

        Ok(ActionResult {
            outcome,
            connection,
            connection_id,
            latency,
            context,
        })
    }
}

async fn exchange(
    connection: &mut Connection,
    message: &OutboundMessage,
) -> Result<InboundMessage, ProberError> {
    if !message.writes_nothing() {
        connection.send(message.clone()).await?;
    }
    connection.receive().await
}
