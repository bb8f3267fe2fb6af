//! rustls client configuration shared by DoT, DoH and DoQ.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::TransportError;

/// Builds a client config trusting the webpki roots, or trusting everything if `no_verify` is
/// set. `tls13_only` is needed for QUIC.
pub fn client_config(
    no_verify: bool,
    tls13_only: bool,
    alpn: &[&[u8]],
) -> Result<Arc<ClientConfig>, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone());
    let builder = if tls13_only {
        builder.with_protocol_versions(&[&rustls::version::TLS13])?
    } else {
        builder.with_safe_default_protocol_versions()?
    };

    let mut config = if no_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };
    config.alpn_protocols = alpn.iter().map(|proto| proto.to_vec()).collect();
    Ok(Arc::new(config))
}

/// The name to verify the server certificate against: the explicit TLS host if given, otherwise
/// the host part of the server address.
pub fn server_name(host: &str, tls_host: Option<&str>) -> Result<ServerName<'static>, TransportError> {
    let name = tls_host.unwrap_or(host);
    ServerName::try_from(name.to_string())
        .map_err(|_| TransportError::InvalidServer(name.to_string()))
}

/// Accepts any certificate, but still checks handshake signatures.
#[derive(Debug)]
struct NoVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerifier {
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
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::{client_config, server_name};

    #[test]
    fn alpn_is_set() {
        let config = client_config(false, true, &[b"doq"]).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"doq".to_vec()]);
        assert!(client_config(true, false, &[]).unwrap().alpn_protocols.is_empty());
    }

    #[test]
    fn tls_host_overrides_server_name() {
        let name = server_name("192.0.2.1", Some("dns.example")).unwrap();
        assert_eq!(name.to_str(), "dns.example");
        assert!(server_name("192.0.2.1", None).is_ok());
    }
}
