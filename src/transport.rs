//! TCP dial with optional TLS upgrade

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;

/// Byte stream the engine can run over
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Dial `config.address`, upgrading to TLS if configured
pub async fn dial(config: &Config) -> Result<Box<dyn Stream>, Error> {
    let tcp = TcpStream::connect(&config.address).await?;
    debug!("TCP connected to {}", config.address);

    if !config.tls {
        return Ok(Box::new(tcp));
    }

    let tls_config = if config.tls_insecure {
        warn!("TLS certificate verification disabled for {}", config.address);
        insecure_config()
    } else {
        native_roots_config()
    };

    let host = config.host();
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::InvalidServerName(host.to_string()))?;

    let connector = TlsConnector::from(Arc::new(tls_config));
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(Error::Tls)?;

    info!("TLS handshake completed with {}", config.address);
    Ok(Box::new(tls))
}

fn native_roots_config() -> ClientConfig {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!("Error loading native certs: {}", e);
    }
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            warn!("Failed to add root cert: {}", e);
        }
    }

    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

fn insecure_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth()
}

/// Certificate verifier that accepts everything
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
