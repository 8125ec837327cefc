//! In-process transport for exercising sequences without a network.
//!
//! A [`MemoryConnector`] routes `open` calls to listeners registered by
//! host and port, handing each side one end of a tokio duplex pipe. The
//! TLS step is recorded but performs no handshake.

use crate::connector::{BoxedStream, Connector};
use crate::error::ProberError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Default)]
struct MemoryState {
    endpoints: HashMap<(String, u16), mpsc::UnboundedSender<AcceptedConnection>>,
    opened: Vec<(String, u16)>,
    secured: Vec<String>,
}

/// Connector over in-memory pipes.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

/// The server side of one accepted in-memory connection.
#[derive(Debug)]
pub struct AcceptedConnection {
    pub host: String,
    pub port: u16,
    pub stream: DuplexStream,
}

/// Receives connections opened against one endpoint.
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<AcceptedConnection>,
}

impl MemoryListener {
    /// Wait for the next connection. `None` once the connector is gone.
    pub async fn accept(&mut self) -> Option<AcceptedConnection> {
        self.incoming.recv().await
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an endpoint. Opening an unregistered endpoint is refused.
    pub fn listen<H: Into<String>>(&self, host: H, port: u16) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().endpoints.insert((host.into(), port), tx);
        MemoryListener { incoming: rx }
    }

    /// Number of streams opened so far.
    pub fn opened(&self) -> usize {
        self.state().opened.len()
    }

    /// Endpoints in the order they were opened.
    pub fn opened_endpoints(&self) -> Vec<(String, u16)> {
        self.state().opened.clone()
    }

    /// Hosts whose streams went through the TLS layer.
    pub fn secured_hosts(&self) -> Vec<String> {
        self.state().secured.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, host: &str, port: u16) -> Result<BoxedStream, ProberError> {
        let mut state = self.state();
        let sender = state
            .endpoints
            .get(&(host.to_string(), port))
            .cloned()
            .ok_or_else(|| {
                ProberError::transport(format!("Connection refused by {}:{}", host, port))
            })?;

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        sender
            .send(AcceptedConnection {
                host: host.to_string(),
                port,
                stream: server,
            })
            .map_err(|_| ProberError::transport(format!("Connection refused by {}:{}", host, port)))?;

        state.opened.push((host.to_string(), port));
        debug!(host, port, "memory connection opened");
        Ok(Box::new(client))
    }

    async fn secure(&self, stream: BoxedStream, host: &str) -> Result<BoxedStream, ProberError> {
        self.state().secured.push(host.to_string());
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_open_routes_to_listener() {
        let connector = MemoryConnector::new();
        let mut listener = connector.listen("epp.example", 700);

        let mut client = connector.open("epp.example", 700).await.unwrap();
        let mut accepted = listener.accept().await.unwrap();
        assert_eq!(accepted.host, "epp.example");

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        accepted.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_refused() {
        let connector = MemoryConnector::new();
        let err = match connector.open("nowhere.example", 80).await {
            Err(e) => e,
            Ok(_) => panic!("unknown endpoint should be refused"),
        };
        assert!(err.is_transport());
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_secure_is_recorded() {
        let connector = MemoryConnector::new();
        let _listener = connector.listen("whois.example", 443);
        let stream = connector.open("whois.example", 443).await.unwrap();
        let _ = connector.secure(stream, "whois.example").await.unwrap();
        assert_eq!(connector.secured_hosts(), vec!["whois.example".to_string()]);
    }
}
