// ── TLS client configuration ──
//
// Builds the rustls `ClientConfig` handed to tokio-tungstenite. Peer
// verification and the hostname check are independent switches: streaming
// subscribers are identified by their shared key, not by certificate CN, so
// the streaming role verifies the chain but skips the name check.

use std::path::PathBuf;
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::error::Error;

/// Whether the peer certificate chain is checked at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVerification {
    /// Verify the chain against the trust anchors.
    #[default]
    VerifyPeer,
    /// Accept any certificate (self-signed servers on a local network).
    AcceptAny,
}

/// TLS settings for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    pub verification: TlsVerification,
    /// Check that the certificate is valid for the host name in the URI.
    /// Ignored with [`TlsVerification::AcceptAny`].
    pub check_hostname: bool,
    /// PEM file with a custom trust anchor. Replaces the bundled web roots.
    pub ca_cert: Option<PathBuf>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verification: TlsVerification::VerifyPeer,
            check_hostname: true,
            ca_cert: None,
        }
    }
}

impl TlsOptions {
    /// Settings used by streaming tasks: chain verified, hostname not checked.
    pub fn streaming(ca_cert: Option<PathBuf>) -> Self {
        Self {
            verification: TlsVerification::VerifyPeer,
            check_hostname: false,
            ca_cert,
        }
    }

    /// Build a rustls client configuration from these options.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("unsupported protocol versions: {e}")))?;

        let config = match self.verification {
            TlsVerification::AcceptAny => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
                .with_no_client_auth(),
            TlsVerification::VerifyPeer if self.check_hostname => builder
                .with_root_certificates(self.root_store()?)
                .with_no_client_auth(),
            TlsVerification::VerifyPeer => {
                let inner =
                    WebPkiServerVerifier::builder_with_provider(Arc::new(self.root_store()?), provider)
                        .build()
                        .map_err(|e| Error::Tls(format!("failed to build verifier: {e}")))?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(SkipHostnameCheck { inner }))
                    .with_no_client_auth()
            }
        };

        Ok(Arc::new(config))
    }

    fn root_store(&self) -> Result<RootCertStore, Error> {
        let mut roots = RootCertStore::empty();
        let Some(path) = &self.ca_cert else {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            return Ok(roots);
        };

        let certs = CertificateDer::pem_file_iter(path)
            .map_err(|e| Error::Tls(format!("failed to read CA cert {}: {e}", path.display())))?;
        for cert in certs {
            let cert =
                cert.map_err(|e| Error::Tls(format!("invalid CA cert {}: {e}", path.display())))?;
            roots
                .add(cert)
                .map_err(|e| Error::Tls(format!("rejected CA cert {}: {e}", path.display())))?;
        }

        if roots.is_empty() {
            return Err(Error::Tls(format!(
                "no certificates found in {}",
                path.display()
            )));
        }
        Ok(roots)
    }
}

// ── Verifiers ────────────────────────────────────────────────────────

/// Full chain verification, but a name mismatch is not an error.
#[derive(Debug)]
struct SkipHostnameCheck {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for SkipHostnameCheck {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        // webpki checks the chain before the name, so a name error implies
        // the chain itself was accepted.
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any certificate; handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
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
        verify_tls12_signature(
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
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
