use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use rustls::{
    ClientConfig, RootCertStore,
    pki_types::{CertificateDer, ServerName, pem::PemObject},
};

use super::{Connector, Transport, tcp::connect_tcp};
use crate::{ErrorKind, Result};

/// Where trusted root certificates come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustStore {
    /// The platform's certificate store
    #[default]
    Native,
    /// A PEM bundle on disk
    PemFile(PathBuf),
    /// An explicit list of DER certificates
    Certificates(Vec<CertificateDer<'static>>),
}

impl TrustStore {
    /// Load the configured certificates.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::InvalidTrustStore`] if a certificate cannot be
    /// read and with [`ErrorKind::MissingTrustedRoots`] if nothing usable is
    /// left.
    pub fn root_store(&self) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();
        match self {
            Self::Native => {
                let native = rustls_native_certs::load_native_certs();
                for error in native.errors {
                    log::warn!("Cannot load native certificate: {error}");
                }
                let (added, ignored) = roots.add_parsable_certificates(native.certs);
                log::debug!("Loaded {added} native root certificates ({ignored} ignored)");
            }
            Self::PemFile(path) => {
                let invalid =
                    |e: &dyn fmt::Display| ErrorKind::InvalidTrustStore(format!("{}: {e}", path.display()));
                for cert in CertificateDer::pem_file_iter(path).map_err(|e| invalid(&e))? {
                    roots.add(cert.map_err(|e| invalid(&e))?).map_err(|e| invalid(&e))?;
                }
            }
            Self::Certificates(certs) => {
                for cert in certs {
                    roots
                        .add(cert.clone())
                        .map_err(|e| ErrorKind::InvalidTrustStore(e.to_string()))?;
                }
            }
        }

        if roots.is_empty() {
            return Err(ErrorKind::MissingTrustedRoots);
        }
        Ok(roots)
    }
}

/// TCP plus TLS 1.2/1.3, verifying the server against a [`TrustStore`].
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
    connect_timeout: Duration,
}

impl TlsConnector {
    /// Build a connector trusting the roots in `trust_store`.
    ///
    /// # Errors
    ///
    /// Fails if the trust store cannot be loaded or is empty.
    pub fn new(trust_store: &TrustStore, connect_timeout: Duration) -> Result<Self> {
        let roots = trust_store.root_store()?;
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ErrorKind::InvalidTrustStore(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
            connect_timeout,
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Transport> {
        let peer = format!("{host}:{port}");
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| ErrorKind::InvalidServerName(host.to_string()))?;

        let tcp = connect_tcp(&peer, host, port, self.connect_timeout).await?;
        let tls = tokio::time::timeout(self.connect_timeout, self.inner.connect(server_name, tcp))
            .await
            .map_err(|_| ErrorKind::connection(&peer, "TLS handshake timed out", None))?
            .map_err(|e| ErrorKind::connection(&peer, format!("TLS handshake failed: {e}"), Some(e)))?;

        log::debug!("TLS session established with {peer}");
        Ok(Transport::new(peer, tls))
    }
}

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnector")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
