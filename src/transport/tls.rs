use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::debug;

use crate::Result;
use crate::config::ClientConfig;
use crate::error::Error;

fn tls_error(host: &str, message: impl Into<String>) -> Error {
    Error::Tls {
        host: host.to_owned(),
        message: message.into(),
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Builds the client-wide TLS context: OS trust roots plus any configured
/// file/directory of PEM certificates. Read-only after construction and
/// shared across all connections.
pub(crate) fn build_tls_context(config: &ClientConfig) -> Result<Arc<rustls::ClientConfig>> {
    let builder = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|error| tls_error("", error.to_string()))?;

    if !config.verify_ssl {
        let tls = builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
            .with_no_client_auth();
        return Ok(Arc::new(tls));
    }

    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for certificate in native.certs {
        // Individual unloadable platform certs are skipped, same as the
        // platform store does.
        let _ = roots.add(certificate);
    }
    if !native.errors.is_empty() {
        debug!(errors = native.errors.len(), "some platform trust anchors failed to load");
    }

    if let Some(ca_cert_file) = &config.ca_cert_file {
        add_pem_file(&mut roots, ca_cert_file)?;
    }
    if let Some(ca_cert_path) = &config.ca_cert_path {
        add_pem_directory(&mut roots, ca_cert_path)?;
    }

    // An empty store is not a construction error; verification fails at
    // handshake time instead, like the platform default paths behave.
    let tls = builder.with_root_certificates(roots).with_no_client_auth();
    Ok(Arc::new(tls))
}

fn add_pem_file(roots: &mut RootCertStore, path: &Path) -> Result<()> {
    let display = path.display().to_string();
    let file = File::open(path)
        .map_err(|error| tls_error("", format!("cannot open ca file {display}: {error}")))?;
    let mut reader = BufReader::new(file);
    let mut added = 0_usize;
    for certificate in rustls_pemfile::certs(&mut reader) {
        let certificate = certificate
            .map_err(|error| tls_error("", format!("bad certificate in {display}: {error}")))?;
        roots
            .add(certificate)
            .map_err(|error| tls_error("", format!("rejected certificate in {display}: {error}")))?;
        added += 1;
    }
    if added == 0 {
        return Err(tls_error("", format!("no certificates found in {display}")));
    }
    Ok(())
}

fn add_pem_directory(roots: &mut RootCertStore, path: &Path) -> Result<()> {
    let display = path.display().to_string();
    let entries = std::fs::read_dir(path)
        .map_err(|error| tls_error("", format!("cannot read ca path {display}: {error}")))?;
    for entry in entries {
        let entry =
            entry.map_err(|error| tls_error("", format!("cannot read ca path {display}: {error}")))?;
        let entry_path = entry.path();
        if entry_path.is_file() {
            add_pem_file(roots, &entry_path)?;
        }
    }
    Ok(())
}

pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_owned())
        .map_err(|_| tls_error(host, "host is not a valid tls server name"))
}

/// Accepts any server certificate. Installed only when `verify_ssl` is off;
/// the connection is still encrypted but the peer is unauthenticated.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl NoVerification {
    fn new() -> Self {
        Self {
            provider: crypto_provider(),
        }
    }
}

impl ServerCertVerifier for NoVerification {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
