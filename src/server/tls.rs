//! TLS material for serving scrapes over https.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

/// Errors raised while loading certificates or building the TLS context.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read TLS material: {0}")]
    Io(#[from] std::io::Error),

    #[error("no certificates found in PEM input")]
    NoCertificates,

    #[error("no private key found in PEM input")]
    NoPrivateKey,

    #[error("rustls rejected the certificate: {0}")]
    Rustls(#[from] rustls::Error),
}

/// A certificate chain and its private key.
#[derive(Debug)]
pub struct TlsCertificate {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl TlsCertificate {
    /// Build from DER-encoded parts.
    pub fn new(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<Self, TlsError> {
        if chain.is_empty() {
            return Err(TlsError::NoCertificates);
        }
        Ok(Self { chain, key })
    }

    /// Parse a PEM certificate chain and a PEM private key (PKCS#8, PKCS#1 or SEC1).
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let chain = rustls_pemfile::certs(&mut &cert_pem[..]).collect::<Result<Vec<_>, _>>()?;
        let key = rustls_pemfile::private_key(&mut &key_pem[..])?.ok_or(TlsError::NoPrivateKey)?;
        Self::new(chain, key)
    }

    /// Load a PEM certificate chain and private key from disk.
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self, TlsError> {
        let cert_pem = fs::read(cert_path)?;
        let key_pem = fs::read(key_path)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Build a TLS acceptor for HTTP/1.1.
    pub(crate) fn acceptor(&self) -> Result<TlsAcceptor, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.chain.clone(), self.key.clone_key())?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn self_signed() -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    #[test]
    fn test_from_pem() {
        let (cert, key) = self_signed();
        let certificate = TlsCertificate::from_pem(cert.as_bytes(), key.as_bytes()).unwrap();
        assert_eq!(certificate.chain().len(), 1);
        assert!(certificate.acceptor().is_ok());
    }

    #[test]
    fn test_from_pem_files() {
        let (cert, key) = self_signed();
        let mut cert_file = NamedTempFile::new().unwrap();
        cert_file.write_all(cert.as_bytes()).unwrap();
        let mut key_file = NamedTempFile::new().unwrap();
        key_file.write_all(key.as_bytes()).unwrap();

        let certificate = TlsCertificate::from_pem_files(cert_file.path(), key_file.path()).unwrap();
        assert_eq!(certificate.chain().len(), 1);
    }

    #[test]
    fn test_missing_key() {
        let (cert, _) = self_signed();
        let result = TlsCertificate::from_pem(cert.as_bytes(), b"");
        assert!(matches!(result, Err(TlsError::NoPrivateKey)));
    }

    #[test]
    fn test_missing_certificate() {
        let (_, key) = self_signed();
        let result = TlsCertificate::from_pem(b"", key.as_bytes());
        assert!(matches!(result, Err(TlsError::NoCertificates)));
    }

    #[test]
    fn test_missing_files() {
        let result = TlsCertificate::from_pem_files("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(matches!(result, Err(TlsError::Io(_))));
    }
}
