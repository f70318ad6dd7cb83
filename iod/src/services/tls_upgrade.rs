//! In-place TLS wrap of an already-connected virtual TCP socket (`TCP_SECURE`).
//!
//! A plain `tokio::net::TcpStream` is handed to a `tokio_rustls::TlsConnector` and the
//! resulting `TlsStream` is then treated uniformly with a plain stream by the read/send
//! pumps (see [`crate::services::tcp_stream`]), since both implement `AsyncRead + AsyncWrite`.

use std::sync::Arc;
use std::sync::OnceLock;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

/// A verifier that accepts any certificate chain. Used only when the client requests
/// `flags & 1` on `TCP_SECURE` ("skip certificate validation") — an explicit, opt-in
/// per-connection choice, not a default.
#[derive(Debug)]
struct DisabledVerifier(Arc<rustls::crypto::CryptoProvider>);

impl ServerCertVerifier for DisabledVerifier {
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

fn webpki_roots_config() -> Arc<ClientConfig> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .clone()
}

fn danger_config() -> Arc<ClientConfig> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let mut config = ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DisabledVerifier(provider)))
                .with_no_client_auth();
            config.enable_sni = true;
            Arc::new(config)
        })
        .clone()
}

/// Performs the TLS client handshake over `stream` against `hostname`.
///
/// When `skip_verification` is set (from `TCP_SECURE`'s `flags & 1`), certificate
/// validation is disabled entirely for this connection — the daemon still negotiates SNI
/// and encryption, it just does not check who it is talking to.
pub async fn upgrade(
    stream: TcpStream,
    hostname: &str,
    skip_verification: bool,
) -> std::io::Result<TlsStream<TcpStream>> {
    let config = if skip_verification {
        danger_config()
    } else {
        webpki_roots_config()
    };
    let connector = TlsConnector::from(config);
    let server_name = ServerName::try_from(hostname.to_owned())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid hostname"))?;
    connector.connect(server_name, stream).await
}
