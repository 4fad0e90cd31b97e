//! Socket factory and the plain/TLS stream abstraction.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use super::config::TransportConfig;
use super::errors::{TransportError, TransportResult};

/// A peer byte stream: plain TCP or TLS over TCP.
pub enum PeerStream {
    /// Plain TCP connection
    Tcp(TcpStream),
    /// TLS-encrypted connection, client or server side
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for PeerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            PeerStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            PeerStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for PeerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            PeerStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            PeerStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            PeerStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            PeerStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            PeerStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            PeerStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Explicitly constructed socket factory; no global default instance.
pub struct SocketFactory {
    config: TransportConfig,
    acceptor: Option<TlsAcceptor>,
    connector: Option<TlsConnector>,
}

impl SocketFactory {
    /// Build a factory from a validated configuration. TLS material is
    /// loaded eagerly so misconfiguration fails at startup, not on the
    /// first connection.
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        config.validate()?;

        let mut acceptor = None;
        let mut connector = None;

        if config.use_ssl {
            if config.keystore_password.is_some() || config.truststore_password.is_some() {
                return Err(TransportError::Configuration(
                    "encrypted PEM stores are not supported; provide unencrypted PEM files"
                        .to_string(),
                ));
            }
            if let Some(keystore) = &config.keystore {
                acceptor = Some(Self::build_acceptor(keystore)?);
            }
            if let Some(truststore) = &config.truststore {
                connector = Some(Self::build_connector(truststore)?);
            }
        }

        Ok(Self {
            config,
            acceptor,
            connector,
        })
    }

    /// Whether this factory produces TLS sockets.
    pub fn is_ssl(&self) -> bool {
        self.config.use_ssl
    }

    /// Configured read deadline for peer sockets.
    pub fn read_timeout(&self) -> std::time::Duration {
        self.config.read_timeout
    }

    fn build_acceptor(keystore: &Path) -> TransportResult<TlsAcceptor> {
        let mut reader = BufReader::new(File::open(keystore)?);
        let certs: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut reader).collect::<Result<_, _>>()?;

        let mut reader = BufReader::new(File::open(keystore)?);
        let key = rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
            TransportError::Configuration(format!(
                "keystore {} contains no private key",
                keystore.display()
            ))
        })?;

        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(TlsAcceptor::from(Arc::new(server_config)))
    }

    fn build_connector(truststore: &Path) -> TransportResult<TlsConnector> {
        let mut reader = BufReader::new(File::open(truststore)?);
        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut reader) {
            roots.add(cert?)?;
        }

        let client_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(client_config)))
    }

    /// Connect to a peer, honoring the connect timeout.
    pub async fn connect(&self, address: &str) -> TransportResult<PeerStream> {
        let tcp = timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                TransportError::timeout(
                    format!("connect to {}", address),
                    self.config.connect_timeout,
                )
            })??;
        let _ = tcp.set_nodelay(true);

        if !self.config.use_ssl {
            return Ok(PeerStream::Tcp(tcp));
        }

        let connector = self.connector.as_ref().ok_or_else(|| {
            TransportError::Configuration(
                "outbound TLS requires a configured truststore".to_string(),
            )
        })?;
        let host = address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(address);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::invalid_address(address, e.to_string()))?;

        let tls = connector.connect(server_name, tcp).await?;
        Ok(PeerStream::Tls(Box::new(TlsStream::from(tls))))
    }

    /// Bind a peer listener.
    pub async fn bind(&self, address: &str) -> TransportResult<PeerListener> {
        let listener = TcpListener::bind(address).await?;

        let acceptor = if self.config.use_ssl {
            Some(self.acceptor.clone().ok_or_else(|| {
                TransportError::Configuration(
                    "inbound TLS requires a configured keystore".to_string(),
                )
            })?)
        } else {
            None
        };

        Ok(PeerListener { listener, acceptor })
    }
}

/// Listener producing [`PeerStream`] connections.
pub struct PeerListener {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

impl PeerListener {
    /// Accept one peer connection, completing the TLS handshake when
    /// configured.
    pub async fn accept(&self) -> TransportResult<(PeerStream, SocketAddr)> {
        let (tcp, addr) = self.listener.accept().await?;
        let _ = tcp.set_nodelay(true);

        match &self.acceptor {
            None => Ok((PeerStream::Tcp(tcp), addr)),
            Some(acceptor) => {
                let tls = acceptor.accept(tcp).await?;
                Ok((PeerStream::Tls(Box::new(TlsStream::from(tls))), addr))
            }
        }
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
