//! QUIC transport implementation using quinn
//!
//! # Connection Flow
//!
//! ```text
//! Client                                 Server
//!   │                                      │
//!   │── QUIC handshake (TLS 1.3) ─────────>│
//!   │<─────────────────────────────────────│
//!   │                                      │
//!   │== Streams 0..N (client bidi) =======>│  Upload phase
//!   │                                      │
//!   │<====== Streams 0..N (server bidi) ===│  Download phase
//!   │<====== or server uni streams ========│
//!   │                                      │
//! ```
//!
//! Server certificates are not verified: benchmark servers run with
//! throwaway self-signed certificates. Handshake signatures are still checked.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quinn::{
    ClientConfig, Connection, Endpoint, IdleTimeout, ServerConfig, TransportConfig, VarInt,
    crypto::rustls::{QuicClientConfig, QuicServerConfig},
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, info};

use super::{RecvStream, SendStream, Session, StreamError, TransportError};
use crate::net::AddressFamily;

/// Port on which benchmark servers speak HTTP/3
pub const H3_PORT: u16 = 4448;

/// ALPN for raw QUIC benchmark servers
pub const RAW_ALPN: &[u8] = b"quic-echo-example";

/// Peer-initiated streams the client allows in flight, per direction
pub const MAX_INCOMING_STREAMS: u32 = 150;

/// Pick ALPN identifiers for the target port
pub fn alpn_for_port(port: u16) -> Vec<Vec<u8>> {
    if port == H3_PORT {
        ["h3", "h3-29", "h3-30", "h3-31"]
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect()
    } else {
        vec![RAW_ALPN.to_vec()]
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn transport_config(idle_timeout: Duration) -> Result<TransportConfig, TransportError> {
    let idle = IdleTimeout::try_from(idle_timeout)
        .map_err(|e| TransportError::Connect(format!("invalid idle timeout: {}", e)))?;

    let mut transport = TransportConfig::default();
    transport.max_concurrent_bidi_streams(VarInt::from_u32(MAX_INCOMING_STREAMS));
    transport.max_concurrent_uni_streams(VarInt::from_u32(MAX_INCOMING_STREAMS));
    transport.max_idle_timeout(Some(idle));
    Ok(transport)
}

/// Connection parameters for [`QuicSession::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub addr: SocketAddr,
    /// TLS server name; IP literals are accepted
    pub server_name: String,
    pub alpn: Vec<Vec<u8>>,
    pub idle_timeout: Duration,
}

/// Create a QUIC client endpoint
pub fn client_endpoint(options: &ConnectOptions) -> Result<Endpoint, TransportError> {
    let provider = crypto_provider();
    let mut crypto = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Connect(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
        .with_no_client_auth();
    crypto.alpn_protocols = options.alpn.clone();

    let quic_crypto =
        QuicClientConfig::try_from(crypto).map_err(|e| TransportError::Connect(e.to_string()))?;
    let mut client_config = ClientConfig::new(Arc::new(quic_crypto));
    client_config.transport_config(Arc::new(transport_config(options.idle_timeout)?));

    // Match the socket family to the resolved peer address
    let bind_addr = if options.addr.is_ipv6() {
        AddressFamily::V6Only.bind_addr(0)
    } else {
        AddressFamily::V4Only.bind_addr(0)
    };

    let mut endpoint =
        Endpoint::client(bind_addr).map_err(|e| TransportError::Connect(e.to_string()))?;
    endpoint.set_default_client_config(client_config);

    Ok(endpoint)
}

/// Create a QUIC server endpoint with a throwaway self-signed certificate.
///
/// Used to stand up a loopback benchmark peer.
pub fn server_endpoint(addr: SocketAddr, alpn: Vec<Vec<u8>>) -> anyhow::Result<Endpoint> {
    let (cert, key) = generate_self_signed_cert()?;

    let mut crypto = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(cert, key)?;
    crypto.alpn_protocols = alpn;

    let quic_crypto = QuicServerConfig::try_from(crypto)?;
    let mut server_config = ServerConfig::with_crypto(Arc::new(quic_crypto));
    server_config.transport_config(Arc::new(transport_config(Duration::from_secs(30))?));

    let endpoint = Endpoint::server(server_config, addr)?;
    info!("QUIC peer listening on {}", endpoint.local_addr()?);

    Ok(endpoint)
}

fn generate_self_signed_cert()
-> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let key = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
    let cert_der = cert.cert.der().clone();
    Ok((vec![cert_der], key))
}

/// Accepts any server certificate, but still verifies handshake signatures
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// A connected QUIC session
pub struct QuicSession {
    endpoint: Endpoint,
    connection: Connection,
}

impl QuicSession {
    /// Dial the peer and complete the handshake
    pub async fn connect(options: &ConnectOptions) -> Result<Self, TransportError> {
        let endpoint = client_endpoint(options)?;
        let connection = endpoint
            .connect(options.addr, &options.server_name)
            .map_err(|e| TransportError::Connect(e.to_string()))?
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!("QUIC connected to {}", options.addr);

        Ok(Self {
            endpoint,
            connection,
        })
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close the connection and wait for the endpoint to drain
    pub async fn close(&self) {
        self.connection.close(VarInt::from_u32(0), b"done");
        self.endpoint.wait_idle().await;
    }
}

#[async_trait]
impl Session for QuicSession {
    type Send = quinn::SendStream;
    type Recv = quinn::RecvStream;

    async fn open_duplex(&self) -> Result<(Self::Send, Self::Recv), TransportError> {
        self.connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Open(e.to_string()))
    }

    async fn accept_duplex(&self) -> Result<(Self::Send, Self::Recv), TransportError> {
        self.connection
            .accept_bi()
            .await
            .map_err(|e| TransportError::Accept(e.to_string()))
    }

    async fn accept_receive(&self) -> Result<Self::Recv, TransportError> {
        self.connection
            .accept_uni()
            .await
            .map_err(|e| TransportError::Accept(e.to_string()))
    }
}

#[async_trait]
impl SendStream for quinn::SendStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        quinn::SendStream::write(self, buf)
            .await
            .map_err(|e| match e {
                quinn::WriteError::Stopped(code) => StreamError::Reset(code.into_inner()),
                other => StreamError::Write(other.to_string()),
            })
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.finish().map_err(|e| StreamError::Write(e.to_string()))
    }
}

#[async_trait]
impl RecvStream for quinn::RecvStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StreamError> {
        quinn::RecvStream::read(self, buf)
            .await
            .map_err(|e| match e {
                quinn::ReadError::Reset(code) => StreamError::Reset(code.into_inner()),
                other => StreamError::Read(other.to_string()),
            })
    }
}
