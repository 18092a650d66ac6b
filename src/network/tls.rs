//! TLS client configuration
//!
//! Builds a rustls client config from the PEM material named in `TlsConfig`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::config::TlsConfig;
use crate::error::{RelayError, Result};

/// Build a connector for the configured trust settings
pub fn build_connector(tls: &TlsConfig) -> Result<TlsConnector> {
    let config = if tls.accept_invalid_certs {
        tracing::warn!("TLS certificate verification is disabled");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertVerifier))
            .with_no_client_auth()
    } else {
        let path = tls
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| RelayError::Config("tls.ca_cert_path is not set".to_string()))?;
        ClientConfig::builder()
            .with_root_certificates(load_roots(path)?)
            .with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Name presented for SNI and verified against the certificate
pub fn server_name(tls: &TlsConfig, host: &str) -> Result<ServerName<'static>> {
    let name = tls.server_name.clone().unwrap_or_else(|| host.to_string());
    ServerName::try_from(name).map_err(|e| RelayError::Tls(format!("invalid server name: {}", e)))
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots
            .add(cert?)
            .map_err(|e| RelayError::Tls(format!("bad CA certificate in {}: {}", path.display(), e)))?;
    }
    if roots.is_empty() {
        return Err(RelayError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    tracing::debug!("Loaded {} CA certificate(s) from {}", roots.len(), path.display());
    Ok(roots)
}

// Accepts any server certificate. Only reachable through accept_invalid_certs.
#[derive(Debug)]
struct NoCertVerifier;

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer,
        _intermediates: &[rustls::pki_types::CertificateDer],
        _server_name: &rustls::pki_types::ServerName,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
