//! TLS config construction for both sides of the wire protocol: the
//! Manager's agent-facing listener requires mutual TLS against a custom
//! CA; the Agent connects with a client certificate. Cert/key loading is
//! grounded in `examples/localplatform-homeroute/crates/hr-tunnel/src/quic.rs`,
//! adapted from quinn/QUIC crypto configs to plain `rustls::ServerConfig`
//! / `rustls::ClientConfig` for a TCP transport.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{Error, Result};

/// `tls_verify_mode` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    None,
    Optional,
    #[default]
    Required,
}

impl VerifyMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "optional" => Some(Self::Optional),
            "required" => Some(Self::Required),
            _ => None,
        }
    }
}

pub struct TlsFiles<'a> {
    pub cert_file: &'a Path,
    pub key_file: &'a Path,
    pub ca_file: Option<&'a Path>,
}

/// Ensure a crypto provider is installed before any rustls config is
/// built. Safe to call more than once; only the first call wins.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Server-side config for the Manager's agent listener: requires a
/// client certificate signed by `ca_file`, per `tls_verify_mode`.
pub fn build_server_config(files: TlsFiles<'_>, verify_mode: VerifyMode) -> Result<rustls::ServerConfig> {
    let certs = load_certs(files.cert_file)?;
    let key = load_private_key(files.key_file)?;

    let builder = rustls::ServerConfig::builder();

    let config = match verify_mode {
        VerifyMode::None => builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::config(format!("building server TLS config: {e}")))?,
        VerifyMode::Optional | VerifyMode::Required => {
            let ca_file = files
                .ca_file
                .ok_or_else(|| Error::config("tls_ca_file required for client auth"))?;
            let mut root_store = rustls::RootCertStore::empty();
            for cert in load_certs(ca_file)? {
                root_store
                    .add(cert)
                    .map_err(|e| Error::config(format!("adding CA cert: {e}")))?;
            }
            let mut verifier_builder =
                rustls::server::WebPkiClientVerifier::builder(Arc::new(root_store));
            if verify_mode == VerifyMode::Optional {
                verifier_builder = verifier_builder.allow_unauthenticated();
            }
            let verifier = verifier_builder
                .build()
                .map_err(|e| Error::config(format!("building client verifier: {e}")))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .map_err(|e| Error::config(format!("building server TLS config: {e}")))?
        }
    };

    Ok(config)
}

/// Client-side config for the Agent: presents its own certificate and
/// trusts only the configured CA.
pub fn build_client_config(files: TlsFiles<'_>) -> Result<rustls::ClientConfig> {
    let certs = load_certs(files.cert_file)?;
    let key = load_private_key(files.key_file)?;

    let ca_file = files
        .ca_file
        .ok_or_else(|| Error::config("tls_ca_file required to trust the manager"))?;
    let mut root_store = rustls::RootCertStore::empty();
    for cert in load_certs(ca_file)? {
        root_store
            .add(cert)
            .map_err(|e| Error::config(format!("adding CA cert: {e}")))?;
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_client_auth_cert(certs, key)
        .map_err(|e| Error::config(format!("building client TLS config: {e}")))?;

    Ok(config)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let bytes = std::fs::read(path).map_err(Error::Io)?;
    let mut reader = std::io::BufReader::new(bytes.as_slice());
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("parsing {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::config(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let bytes = std::fs::read(path).map_err(Error::Io)?;

    let mut reader = std::io::BufReader::new(bytes.as_slice());
    let keys: Vec<_> = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("parsing private key {}: {e}", path.display())))?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKeyDer::Pkcs8(key));
    }

    let mut reader = std::io::BufReader::new(bytes.as_slice());
    let keys: Vec<_> = rustls_pemfile::ec_private_keys(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("parsing EC key {}: {e}", path.display())))?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKeyDer::Sec1(key));
    }

    Err(Error::config(format!("no private key found in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_mode_parses_known_values() {
        assert_eq!(VerifyMode::parse("none"), Some(VerifyMode::None));
        assert_eq!(VerifyMode::parse("optional"), Some(VerifyMode::Optional));
        assert_eq!(VerifyMode::parse("required"), Some(VerifyMode::Required));
        assert_eq!(VerifyMode::parse("bogus"), None);
    }
}
