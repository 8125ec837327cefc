//! Connection factories.
//!
//! A [`Connector`] knows how to open a byte stream to an endpoint and how
//! to wrap an existing stream in TLS. The protocol's handler layers decide
//! which of the two operations are applied and in what order.

use crate::error::ProberError;
use async_trait::async_trait;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Anything a connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens and secures streams.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Open a plaintext stream to `host:port`.
    async fn open(&self, host: &str, port: u16) -> Result<BoxedStream, ProberError>;

    /// Run a TLS client handshake over `stream`, verifying `host`.
    async fn secure(&self, stream: BoxedStream, host: &str) -> Result<BoxedStream, ProberError>;
}

/// TCP + rustls connector used against real registries.
#[derive(Clone)]
pub struct NetworkConnector {
    connect_timeout: Duration,
    tls: Arc<ClientConfig>,
}

impl fmt::Debug for NetworkConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConnector")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl NetworkConnector {
    /// Connector trusting the webpki root set, without a client certificate.
    pub fn new(connect_timeout: Duration) -> Result<Self, ProberError> {
        let config = tls_builder()?
            .with_root_certificates(root_store())
            .with_no_client_auth();

        Ok(Self {
            connect_timeout,
            tls: Arc::new(config),
        })
    }

    /// Connector presenting a client certificate, as EPP servers require.
    ///
    /// Both files are PEM encoded and read immediately.
    pub fn with_client_certificate<C: AsRef<Path>, K: AsRef<Path>>(
        connect_timeout: Duration,
        cert_path: C,
        key_path: K,
    ) -> Result<Self, ProberError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let certs = rustls_pemfile::certs(&mut open_pem(cert_path)?)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                ProberError::file_error(
                    cert_path.to_string_lossy(),
                    format!("Invalid certificate PEM: {}", e),
                )
            })?;
        if certs.is_empty() {
            return Err(ProberError::file_error(
                cert_path.to_string_lossy(),
                "No certificates found",
            ));
        }

        let key = rustls_pemfile::private_key(&mut open_pem(key_path)?)
            .map_err(|e| {
                ProberError::file_error(
                    key_path.to_string_lossy(),
                    format!("Invalid private key PEM: {}", e),
                )
            })?
            .ok_or_else(|| {
                ProberError::file_error(key_path.to_string_lossy(), "No private key found")
            })?;

        let config = tls_builder()?
            .with_root_certificates(root_store())
            .with_client_auth_cert(certs, key)
            .map_err(|e| ProberError::config(format!("Unusable client certificate: {}", e)))?;

        Ok(Self {
            connect_timeout,
            tls: Arc::new(config),
        })
    }
}

fn tls_builder() -> Result<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>, ProberError>
{
    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ProberError::config(format!("TLS configuration error: {}", e)))
}

fn root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn open_pem(path: &Path) -> Result<BufReader<File>, ProberError> {
    File::open(path).map(BufReader::new).map_err(|e| {
        ProberError::file_error(path.to_string_lossy(), format!("Failed to open: {}", e))
    })
}

#[async_trait]
impl Connector for NetworkConnector {
    async fn open(&self, host: &str, port: u16) -> Result<BoxedStream, ProberError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                ProberError::timeout(format!("connect to {}:{}", host, port), self.connect_timeout)
            })?
            .map_err(|e| {
                ProberError::transport_with_source(
                    format!("Failed to connect to {}:{}", host, port),
                    e.to_string(),
                )
            })?;

        // Probes write one small message at a time.
        let _ = stream.set_nodelay(true);
        debug!(host, port, "tcp connection established");
        Ok(Box::new(stream))
    }

    async fn secure(&self, stream: BoxedStream, host: &str) -> Result<BoxedStream, ProberError> {
        let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
            ProberError::transport_with_source(format!("Invalid TLS server name '{}'", host), e.to_string())
        })?;

        let connector = TlsConnector::from(self.tls.clone());
        let tls_stream = tokio::time::timeout(self.connect_timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| ProberError::timeout(format!("TLS handshake with {}", host), self.connect_timeout))?
            .map_err(|e| {
                ProberError::transport_with_source(
                    format!("TLS handshake with {} failed", host),
                    e.to_string(),
                )
            })?;

        debug!(host, "tls session established");
        Ok(Box::new(tls_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_network_connector_builds() {
        let connector = NetworkConnector::new(Duration::from_secs(5)).unwrap();
        assert!(format!("{:?}", connector).contains("connect_timeout"));
    }

    #[test]
    fn test_client_certificate_files_are_validated() {
        let dir = TempDir::new().unwrap();
        let missing = NetworkConnector::with_client_certificate(
            Duration::from_secs(1),
            dir.path().join("cert.pem"),
            dir.path().join("key.pem"),
        );
        assert!(matches!(missing, Err(ProberError::FileError { .. })));

        let empty_cert = dir.path().join("empty.pem");
        std::fs::write(&empty_cert, "not a pem file").unwrap();
        let result = NetworkConnector::with_client_certificate(
            Duration::from_secs(1),
            &empty_cert,
            &empty_cert,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = NetworkConnector::new(Duration::from_secs(2)).unwrap();
        let err = match connector.open("127.0.0.1", port).await {
            Err(e) => e,
            Ok(_) => panic!("closed port should refuse the connection"),
        };
        assert!(err.is_transport());
    }
}
