//! TLS configuration and certificate loading for broker connections.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::config::{BrokerTlsConfig, ConfigError, TlsMode};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

/// Build the connector for one broker endpoint.
///
/// A verified configuration that cannot be loaded is fatal unless
/// `fallback` is set, in which case the connection is downgraded to
/// unverified TLS.
pub fn build_connector(config: &BrokerTlsConfig) -> Result<TlsConnector, ConfigError> {
    let client = match config.mode {
        TlsMode::Unverified => unverified_config()?,
        TlsMode::Verified => match verified_config(config) {
            Ok(client) => client,
            Err(e) if config.fallback => {
                tracing::warn!(
                    error = %e,
                    "Failed to set full SSL verified mode, falling back to unverified"
                );
                unverified_config()?
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to set full SSL verified mode");
                return Err(e);
            }
        },
    };
    Ok(TlsConnector::from(Arc::new(client)))
}

fn verified_config(config: &BrokerTlsConfig) -> Result<ClientConfig, ConfigError> {
    let (Some(cert_path), Some(key_path)) = (&config.cert_path, &config.key_path) else {
        return Err(ConfigError::Tls(
            "cert, key and ca have to be supplied for verified SSL mode".into(),
        ));
    };
    if config.ca_paths.is_empty() {
        return Err(ConfigError::Tls(
            "cert, key and ca have to be supplied for verified SSL mode".into(),
        ));
    }

    let mut roots = RootCertStore::empty();
    for ca in &config.ca_paths {
        for cert in load_certs(ca)? {
            roots
                .add(cert)
                .map_err(|e| ConfigError::Tls(format!("Invalid CA certificate {}: {}", ca.display(), e)))?;
        }
    }
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| ConfigError::Tls(format!("Invalid client certificate: {}", e)))
}

fn unverified_config() -> Result<ClientConfig, ConfigError> {
    let provider = provider();
    Ok(ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        .with_no_client_auth())
}

/// Load every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let file = File::open(path)
        .map_err(|e| ConfigError::Tls(format!("Cannot find certificate file {}: {}", path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("Invalid certificate file {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(ConfigError::Tls(format!("No certificates in {}", path.display())));
    }
    Ok(certs)
}

/// Load the first private key in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let file = File::open(path)
        .map_err(|e| ConfigError::Tls(format!("Cannot find key file {}: {}", path.display(), e)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| ConfigError::Tls(format!("Invalid key file {}: {}", path.display(), e)))?
        .ok_or_else(|| ConfigError::Tls(format!("No private key in {}", path.display())))
}

/// Accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
