//! Open connections and the attributes carried on them.

use crate::connector::{BoxedStream, Connector};
use crate::error::ProberError;
use crate::message::{InboundMessage, MessageCodec, OutboundMessage};
use crate::protocol::{CodecKind, HandlerLayer, Protocol};
use crate::types::Endpoint;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::codec::Framed;
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Attributes describing what a connection is currently being used for.
///
/// Replaced as a whole whenever an action takes over the connection or a
/// redirect moves the probe elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionContext {
    pub protocol: Arc<Protocol>,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub target: String,
    pub step: String,
}

impl ConnectionContext {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            protocol: self.protocol.name().to_string(),
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
        }
    }
}

/// A framed connection owned by exactly one sequence.
pub struct Connection {
    id: u64,
    framed: Framed<BoxedStream, MessageCodec>,
    context: ConnectionContext,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open a connection by applying the protocol's layers in order.
    pub async fn open(
        connector: &dyn Connector,
        context: ConnectionContext,
    ) -> Result<Self, ProberError> {
        let host = context.host.clone();
        let port = context.port;

        let mut stream = connector.open(&host, port).await?;
        let mut codec = None;
        for layer in context.protocol.handlers() {
            match layer {
                HandlerLayer::Tls => stream = connector.secure(stream, &host).await?,
                HandlerLayer::HttpCodec => codec = Some(MessageCodec::for_kind(CodecKind::Http)),
                HandlerLayer::EppCodec => codec = Some(MessageCodec::for_kind(CodecKind::Epp)),
            }
        }
        let codec = codec.ok_or_else(|| {
            ProberError::internal(format!(
                "Protocol '{}' has no codec layer",
                context.protocol.name()
            ))
        })?;

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            connection_id = id,
            host = %host,
            port,
            protocol = context.protocol.name(),
            "connection opened"
        );

        Ok(Self {
            id,
            framed: Framed::new(stream, codec),
            context,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Replace the connection's attributes wholesale.
    pub fn set_context(&mut self, context: ConnectionContext) {
        self.context = context;
    }

    /// Whether this connection speaks the given protocol's codec.
    pub fn accepts(&self, protocol: &Protocol) -> bool {
        self.framed.codec().kind() == protocol.codec_kind()
    }

    pub async fn send(&mut self, message: OutboundMessage) -> Result<(), ProberError> {
        self.framed.send(message).await
    }

    /// Wait for the next decoded message.
    pub async fn receive(&mut self) -> Result<InboundMessage, ProberError> {
        match self.framed.next().await {
            Some(result) => result,
            None => Err(ProberError::connection_closed(format!(
                "{}:{} closed the connection before responding",
                self.context.host, self.context.port
            ))),
        }
    }

    /// Flush and shut down the write side, then drop the connection.
    pub async fn close(mut self) {
        if let Err(e) = self.framed.close().await {
            debug!(connection_id = self.id, error = %e, "error while closing connection");
        }
        debug!(connection_id = self.id, "connection closed");
    }
}
