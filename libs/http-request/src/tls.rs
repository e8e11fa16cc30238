//! TLS configuration for the per-request connector.
//!
//! Native root certificates are loaded once and cached, since the OS
//! certificate store lookup can be slow on some platforms.

use crate::config::TlsRootConfig;
use crate::error::RequestError;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::{Arc, OnceLock};

/// Cached native root certificates.
/// Always stores Ok; empty vec means no certs found (warned, not errored).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

/// Counter for test verification that the loader only runs once.
#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs_inner() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    let certs = result.certs;
    if certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = certs.len(), "loaded native root certificates");
    }
    certs
}

/// Native root certificates, loaded lazily on first call.
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE
        .get_or_init(load_native_certs_inner)
        .as_slice()
}

/// The globally installed crypto provider, or aws-lc-rs when none is
/// installed. Never installs a provider itself.
pub fn get_crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Build a rustls `ClientConfig` trusting the cached native roots.
///
/// # Errors
///
/// Returns an error if the OS store is empty or none of its certificates
/// parse.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, String> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err("no native root CA certificates found in OS certificate store".to_owned());
    }

    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(format!(
            "no valid native root CA certificates parsed (found {}, all {} failed to parse)",
            certs.len(),
            ignored
        ));
    }

    rustls::ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| format!("failed to set TLS protocol versions: {e}"))
        .map(|builder| {
            builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        })
}

/// Verifier that accepts any server certificate.
///
/// Handshake signatures are still checked, so the peer must hold the key
/// of the certificate it presents.
#[derive(Debug)]
struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
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
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Build a rustls `ClientConfig` that skips certificate validation.
///
/// # Errors
///
/// Returns an error if the provider supports no safe protocol version.
pub fn insecure_client_config() -> Result<rustls::ClientConfig, String> {
    let provider = get_crypto_provider();
    let verifier = AcceptAnyCertificate {
        algorithms: provider.signature_verification_algorithms,
    };

    rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| format!("failed to set TLS protocol versions: {e}"))
        .map(|builder| {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier))
                .with_no_client_auth()
        })
}

/// Wrap `inner` with TLS for `https` targets; `http` targets pass through.
///
/// With `http1_only` no HTTP/2 is offered over ALPN, which the
/// case-preserving connection needs.
///
/// # Errors
///
/// Returns `RequestError::Transport` if the TLS configuration cannot be
/// built, e.g. native roots were requested but none are available.
pub fn https_connector<H>(
    inner: H,
    roots: TlsRootConfig,
    ignore_ssl_errors: bool,
    http1_only: bool,
) -> Result<HttpsConnector<H>, RequestError> {
    let builder = if ignore_ssl_errors {
        tracing::warn!("TLS certificate validation is disabled for this request");
        let config = insecure_client_config().map_err(|e| RequestError::Transport(e.into()))?;
        HttpsConnectorBuilder::new().with_tls_config(config)
    } else {
        match roots {
            TlsRootConfig::WebPki => HttpsConnectorBuilder::new()
                .with_provider_and_webpki_roots(get_crypto_provider())
                .map_err(|e| RequestError::Transport(Box::new(e)))?,
            TlsRootConfig::Native => {
                let config =
                    native_roots_client_config().map_err(|e| RequestError::Transport(e.into()))?;
                HttpsConnectorBuilder::new().with_tls_config(config)
            }
        }
    };

    let builder = builder.https_or_http();
    let connector = if http1_only {
        builder.enable_http1().wrap_connector(inner)
    } else {
        builder.enable_all_versions().wrap_connector(inner)
    };
    Ok(connector)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use hyper_util::client::legacy::connect::HttpConnector;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_native_roots_cached() {
        let initial_count = LOAD_COUNT.load(Ordering::SeqCst);

        let result1 = native_root_certs();
        let result2 = native_root_certs();

        let final_count = LOAD_COUNT.load(Ordering::SeqCst);
        assert!(
            final_count <= initial_count + 1,
            "loader should run at most once, but ran {} times since test start",
            final_count - initial_count
        );
        assert!(std::ptr::eq(result1, result2), "should return same slice");
    }

    #[test]
    fn test_insecure_config_uses_custom_verifier() {
        let config = insecure_client_config().unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_https_connector_builds_for_webpki_and_insecure() {
        assert!(https_connector(HttpConnector::new(), TlsRootConfig::WebPki, false, false).is_ok());
        assert!(https_connector(HttpConnector::new(), TlsRootConfig::WebPki, true, true).is_ok());
    }

    const SELF_SIGNED_CERT: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/self_signed.pem"));
    const SELF_SIGNED_KEY: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/self_signed.key"));

    /// HTTPS server with a self-signed certificate answering every request
    /// with `ok`. Failed handshakes are ignored.
    async fn self_signed_server() -> std::net::SocketAddr {
        use rustls_pki_types::PrivateKeyDer;
        use rustls_pki_types::pem::PemObject;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let cert = CertificateDer::from_pem_slice(SELF_SIGNED_CERT).unwrap();
        let key = PrivateKeyDer::from_pem_slice(SELF_SIGNED_KEY).unwrap();
        let mut config = rustls::ServerConfig::builder_with_provider(get_crypto_provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .unwrap();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    let mut head = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match tls.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&chunk[..n]),
                        }
                    }
                    tls.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                        .await
                        .ok();
                    tls.shutdown().await.ok();
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_self_signed_certificate_is_rejected() {
        let addr = self_signed_server().await;

        let err = crate::config::RequestSpec::builder(format!("https://{addr}/"))
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Transport(_)), "{err:?}");
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_ignore_ssl_errors_accepts_self_signed_certificate() {
        let addr = self_signed_server().await;

        let envelope = crate::config::RequestSpec::builder(format!("https://{addr}/"))
            .ignore_ssl_errors(true)
            .send()
            .await
            .unwrap()
            .into_envelope()
            .unwrap();
        assert_eq!(envelope.status(), http::StatusCode::OK);
        assert_eq!(envelope.text(), Some("ok"));
    }
}
