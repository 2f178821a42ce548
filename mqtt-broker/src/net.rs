//! TLS context construction. Builds a `rustls::ServerConfig` from the
//! configured certificate/key pair and, when mutual TLS is requested, a CA
//! bundle used to verify client certificates.

use std::{path::Path, sync::Arc};

use rustls::{
    pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    RootCertStore, ServerConfig,
};
use tokio_rustls::TlsAcceptor;

use crate::error::server::{ErrorKind, ServerError};

pub fn build_tls_acceptor(
    server_cert: &Path,
    server_key: &Path,
    ca_cert: Option<&Path>,
    require_client_cert: bool,
) -> Result<TlsAcceptor, ServerError> {
    let certs = load_certs(server_cert)?;
    let key = load_key(server_key)?;

    let builder = ServerConfig::builder();
    let config = if require_client_cert {
        let ca_path = ca_cert.ok_or_else(|| {
            ServerError::new(ErrorKind::TlsContext, "mutual TLS requires a CA bundle")
        })?;
        let mut roots = RootCertStore::empty();
        for cert in load_certs(ca_path)? {
            roots
                .add(cert)
                .map_err(|err| ServerError::new(ErrorKind::TlsContext, err.to_string()))?;
        }
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|err| ServerError::new(ErrorKind::TlsContext, err.to_string()))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|err| ServerError::new(ErrorKind::TlsContext, err.to_string()))?
    } else {
        builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|err| ServerError::new(ErrorKind::TlsContext, err.to_string()))?
    };

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    CertificateDer::pem_file_iter(path)
        .map_err(|err| ServerError::new(ErrorKind::TlsContext, format!("{}: {err}", path.display())))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ServerError::new(ErrorKind::TlsContext, err.to_string()))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    PrivateKeyDer::from_pem_file(path)
        .map_err(|err| ServerError::new(ErrorKind::TlsContext, format!("{}: {err}", path.display())))
}
