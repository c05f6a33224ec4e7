//! Authenticates the aggregating API server.
//!
//! The HTTPS server requests but does not verify client certificates. Each
//! request's certificate chain is checked against the client CA and allowed
//! names the API server publishes in the extension configuration ConfigMap,
//! so that CA rotations take effect without a restart.

use crate::{
    api::{self, Body},
    index::{ExtensionConfig, SharedExtensionConfig},
    server::PeerCertificates,
    tls,
};
use futures::future;
use http::{Request, Response};
use rustls::{
    pki_types::{pem::PemObject, CertificateDer, UnixTime},
    server::WebPkiClientVerifier,
    RootCertStore,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Clone, Debug)]
pub struct AuthenticateLayer(SharedExtensionConfig);

#[derive(Clone, Debug)]
pub struct Authenticate<S> {
    inner: S,
    config: SharedExtensionConfig,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("extension configuration does not include a client CA")]
    MissingClientCa,

    #[error("invalid client CA: {0}")]
    InvalidClientCa(String),

    #[error("invalid allowed names: {0}")]
    InvalidAllowedNames(#[source] serde_json::Error),

    #[error("client did not provide certificate")]
    NoCertificate,

    #[error("invalid client certificate: {0}")]
    InvalidCertificate(String),

    #[error("{0}")]
    Verify(#[source] rustls::Error),

    #[error("user {0:?} not allowed")]
    NotAllowed(String),
}

// === impl AuthenticateLayer ===

impl AuthenticateLayer {
    pub fn new(config: SharedExtensionConfig) -> Self {
        Self(config)
    }
}

impl<S> tower::Layer<S> for AuthenticateLayer {
    type Service = Authenticate<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Authenticate {
            inner,
            config: self.0.clone(),
        }
    }
}

// === impl Authenticate ===

impl<S, B> tower::Service<Request<B>> for Authenticate<S>
where
    S: tower::Service<Request<B>, Response = Response<Body>>,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = future::Either<future::Ready<Result<Response<Body>, S::Error>>, S::Future>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let config = self.config.read().get();
        let peer = req.extensions().get::<PeerCertificates>();
        match authenticate(config.as_ref(), peer.map(|p| &*p.0)) {
            Ok(()) => future::Either::Right(self.inner.call(req)),
            Err(error) => {
                let status = error.status();
                if status.is_server_error() {
                    error!(%error, "Could not authenticate API server");
                } else {
                    warn!(%error, "Could not authenticate API server");
                }
                let rsp = api::text_response(
                    status,
                    format!("could not authenticate API server: {error}"),
                );
                future::Either::Left(future::ok(rsp))
            }
        }
    }
}

// === impl AuthError ===

impl AuthError {
    pub fn status(&self) -> http::StatusCode {
        match self {
            Self::MissingClientCa | Self::InvalidClientCa(_) | Self::InvalidAllowedNames(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NoCertificate
            | Self::InvalidCertificate(_)
            | Self::Verify(_)
            | Self::NotAllowed(_) => http::StatusCode::UNAUTHORIZED,
        }
    }
}

/// Checks a presented certificate chain against the extension configuration.
pub fn authenticate(
    config: Option<&ExtensionConfig>,
    chain: Option<&[CertificateDer<'static>]>,
) -> Result<(), AuthError> {
    let client_ca = config
        .and_then(|c| c.client_ca.as_deref())
        .ok_or(AuthError::MissingClientCa)?;
    let allowed_names = config
        .and_then(|c| c.allowed_names.as_deref())
        .unwrap_or_default();

    let chain = chain.unwrap_or_default();
    verify_cert(chain, client_ca)?;
    verify_cn(chain, allowed_names)
}

fn verify_cert(chain: &[CertificateDer<'static>], client_ca: &str) -> Result<(), AuthError> {
    let (end_entity, intermediates) = chain.split_first().ok_or(AuthError::NoCertificate)?;

    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(client_ca.as_bytes()) {
        let cert = cert.map_err(|e| AuthError::InvalidClientCa(e.to_string()))?;
        roots
            .add(cert)
            .map_err(|e| AuthError::InvalidClientCa(e.to_string()))?;
    }
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), tls::provider())
        .build()
        .map_err(|e| AuthError::InvalidClientCa(e.to_string()))?;

    verifier
        .verify_client_cert(end_entity, intermediates, UnixTime::now())
        .map_err(AuthError::Verify)?;
    Ok(())
}

fn verify_cn(chain: &[CertificateDer<'static>], allowed_names: &str) -> Result<(), AuthError> {
    if allowed_names.is_empty() {
        return Ok(());
    }
    let allowed = serde_json::from_str::<Vec<String>>(allowed_names)
        .map_err(AuthError::InvalidAllowedNames)?;

    let end_entity = chain.first().ok_or(AuthError::NoCertificate)?;
    let (_, cert) = x509_parser::parse_x509_certificate(end_entity.as_ref())
        .map_err(|e| AuthError::InvalidCertificate(e.to_string()))?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default();

    if !allowed.iter().any(|name| name == cn) {
        return Err(AuthError::NotAllowed(cn.to_string()));
    }
    Ok(())
}
