//! Rustls client configuration.
//!
//! Builds the TLS connector shared by every HTTPS connection: verified
//! against the OS trust store by default, or with verification disabled
//! when `verify_tls` is off (testing and development only).

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Build the TLS connector for client connections.
pub(crate) fn client_connector(verify_tls: bool) -> TlsConnector {
    let config = if verify_tls {
        verified_config()
    } else {
        unverified_config()
    };
    TlsConnector::from(Arc::new(config))
}

/// Client config validating peers against the OS default trust store.
fn verified_config() -> rustls::ClientConfig {
    let mut root_store = RootCertStore::empty();

    let loaded = rustls_native_certs::load_native_certs();
    for cert in loaded.certs {
        if let Err(e) = root_store.add(cert) {
            warn!("skipping unusable system root certificate: {}", e);
        }
    }
    if let Some(first_error) = loaded.errors.first() {
        warn!("errors while loading system root certificates: {}", first_error);
    }
    debug!("loaded {} system root certificates", root_store.len());

    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// Client config that skips certificate validation entirely.
fn unverified_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertVerification))
        .with_no_client_auth()
}

/// Certificate verifier that accepts any peer. Used only when the caller
/// explicitly disables `verify_tls`.
#[derive(Debug)]
struct NoCertVerification;

impl ServerCertVerifier for NoCertVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
