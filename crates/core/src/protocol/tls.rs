//! # TLS Transport
//!
//! rustls configuration for both roles, using the `ring` provider.
//!
//! - Server: certificate chain and key from PEM files; client certificates
//!   are required when a client CA is configured.
//! - Peer: verifies the server against a CA file, or accepts any certificate
//!   when `insecure_skip_verify` is set for self-signed lab deployments.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;
use crate::error::StartupError;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn credential_error(path: &Path, reason: impl ToString) -> StartupError {
    StartupError::Credential {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// All certificates in a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, StartupError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| credential_error(path, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| credential_error(path, e))?;
    if certs.is_empty() {
        return Err(credential_error(path, "no certificates found"));
    }
    Ok(certs)
}

/// First private key in a PEM file
pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, StartupError> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| credential_error(path, e))
}

fn root_store(path: &Path) -> Result<RootCertStore, StartupError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|e| credential_error(path, e))?;
    }
    Ok(roots)
}

/// Acceptor for the server role. Missing credentials are fatal.
pub fn server_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, StartupError> {
    let cert_path = config
        .cert_path
        .as_deref()
        .ok_or(StartupError::MissingCredential("tls.cert_path"))?;
    let key_path = config
        .key_path
        .as_deref()
        .ok_or(StartupError::MissingCredential("tls.key_path"))?;
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let builder = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| StartupError::Tls(e.to_string()))?;

    let builder = match config.client_ca_path.as_deref() {
        Some(ca_path) => {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(root_store(ca_path)?), provider())
                    .build()
                    .map_err(|e| StartupError::Tls(e.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let server = builder
        .with_single_cert(certs, key)
        .map_err(|e| StartupError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(server)))
}

/// Connector for the peer role
pub fn peer_connector(config: &TlsConfig) -> Result<TlsConnector, StartupError> {
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| StartupError::Tls(e.to_string()))?;

    let builder = if config.insecure_skip_verify {
        tracing::warn!("Server certificate verification disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider())))
    } else {
        let ca_path = config
            .ca_path
            .as_deref()
            .ok_or(StartupError::MissingCredential("tls.ca_path"))?;
        builder.with_root_certificates(root_store(ca_path)?)
    };

    let client = match (
        config.client_cert_path.as_deref(),
        config.client_key_path.as_deref(),
    ) {
        (Some(cert_path), Some(key_path)) => builder
            .with_client_auth_cert(load_certs(cert_path)?, load_key(key_path)?)
            .map_err(|e| StartupError::Tls(e.to_string()))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(StartupError::Config(
                "tls.client_cert_path and tls.client_key_path must be set together".to_string(),
            ))
        }
    };
    Ok(TlsConnector::from(Arc::new(client)))
}

/// Name the peer expects in the server certificate
pub fn server_name(config: &TlsConfig) -> Result<ServerName<'static>, StartupError> {
    ServerName::try_from(config.server_name.as_str())
        .map(|name| name.to_owned())
        .map_err(|e| StartupError::Tls(format!("{}: {}", config.server_name, e)))
}

/// Accepts any server certificate but still checks handshake signatures
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
