//! `wss://` support over rustls, trusting the Mozilla root set shipped in
//! `webpki-roots`.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;

use crate::error::{Error, Result};

/// Client configuration trusting the `webpki-roots` certificates.
///
/// # Errors
///
/// Returns `Error::Tls` if the ring provider rejects the default protocol
/// versions.
pub fn default_client_config() -> Result<Arc<ClientConfig>> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Wraps client streams in TLS.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Connector using a caller-supplied rustls configuration.
    #[must_use]
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsConnector::from(config),
        }
    }

    /// Connector using [`default_client_config`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` if the configuration cannot be built.
    pub fn with_webpki_roots() -> Result<Self> {
        default_client_config().map(Self::new)
    }

    /// Run the TLS handshake for `host` over `stream`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` if `host` is not a valid server name or the TLS
    /// handshake fails.
    pub async fn connect<S>(&self, host: &str, stream: S) -> Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::Tls(format!("invalid server name: {}", host)))?;
        self.inner
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(e.to_string()))
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}
