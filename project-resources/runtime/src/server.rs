use crate::api::Body;
use anyhow::Result;
use futures::prelude::*;
use hyper::{body::Incoming, Request, Response};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto, graceful::GracefulShutdown},
    service::TowerToHyperService,
};
use rustls::{pki_types::CertificateDer, ServerConfig};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, time};
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, instrument, warn};

/// How long in-flight requests may run after shutdown is signaled. Watches
/// never complete on their own, so this bounds shutdown.
const SHUTDOWN_GRACE: time::Duration = time::Duration::from_secs(10);

/// The certificate chain a client presented during the TLS handshake, leaf
/// first. Set as a request extension on every request of the connection.
#[derive(Clone, Debug)]
pub struct PeerCertificates(pub Arc<[CertificateDer<'static>]>);

/// Serves `svc` over TLS until `shutdown` completes.
///
/// The value produced by `shutdown` is held until in-flight connections
/// finish or the grace period elapses.
#[instrument(skip_all, fields(port = %addr.port()))]
pub async fn serve<S, F>(
    addr: SocketAddr,
    tls: Arc<ServerConfig>,
    svc: S,
    shutdown: F,
) -> Result<()>
where
    S: tower::Service<Request<Incoming>, Response = Response<Body>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    F: Future,
{
    let listener = TcpListener::bind(addr).await?;
    let acceptor = TlsAcceptor::from(tls);
    let graceful = GracefulShutdown::new();
    info!(%addr, "HTTPS server listening");

    tokio::pin!(shutdown);
    let release = loop {
        let (tcp, client) = tokio::select! {
            release = &mut shutdown => break release,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(%error, "Failed to accept connection");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let svc = svc.clone();
        let watcher = graceful.watcher();
        tokio::spawn(async move {
            let tls = match acceptor.accept(tcp).await {
                Ok(tls) => tls,
                Err(error) => {
                    debug!(%error, %client, "TLS handshake failed");
                    return;
                }
            };

            let peer = tls
                .get_ref()
                .1
                .peer_certificates()
                .map(|certs| PeerCertificates(certs.into()));
            let svc = tower::service_fn(move |mut req: Request<Incoming>| {
                if let Some(peer) = peer.clone() {
                    req.extensions_mut().insert(peer);
                }
                svc.clone().oneshot(req)
            });

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection(TokioIo::new(tls), TowerToHyperService::new(svc));
            if let Err(error) = watcher.watch(conn).await {
                debug!(%error, %client, "Connection closed");
            }
        });
    };

    drop(listener);
    debug!("Draining connections");
    if time::timeout(SHUTDOWN_GRACE, graceful.shutdown())
        .await
        .is_err()
    {
        info!(timeout = ?SHUTDOWN_GRACE, "Closing connections still in flight");
    }
    drop(release);
    Ok(())
}
