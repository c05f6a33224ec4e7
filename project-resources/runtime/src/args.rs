use crate::{
    api::Api,
    authn::AuthenticateLayer,
    client::{Discover, Lister, Reviewer},
    core::fanout::Collector,
    index::{
        ExtensionConfig, ExtensionConfigIndex, NamespaceIndex, Namespaces, SchemaCache,
        SchemaMetrics,
    },
    k8s,
    metrics::HttpMetrics,
    server, tls,
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::{future, prelude::*};
use kube::runtime::{watcher, WatchStreamExt};
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, path::PathBuf};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "project-resources",
    about = "Aggregates namespaced resources by project"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "project_resources=info,warn",
        env = "PROJECT_RESOURCES_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The address on which the aggregated API is served.
    #[clap(long, default_value = "0.0.0.0:9443")]
    server_addr: SocketAddr,

    /// PEM-encoded private key of the aggregated API server.
    #[clap(long)]
    server_tls_key: Option<PathBuf>,

    /// PEM-encoded certificate chain of the aggregated API server.
    #[clap(long)]
    server_tls_certs: Option<PathBuf>,

    /// Disables the aggregated API server. Caches and the admin server still
    /// run.
    #[clap(long)]
    aggregation_disabled: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            server_addr,
            server_tls_key,
            server_tls_certs,
            aggregation_disabled,
        } = self;

        let namespaces = NamespaceIndex::shared();
        let extension_config = ExtensionConfigIndex::shared();

        let mut prom = <Registry>::default();
        let schema_metrics = SchemaMetrics::register(prom.sub_registry_with_prefix("schema"));
        let http_metrics = HttpMetrics::register(prom.sub_registry_with_prefix("http"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));
        let schema = SchemaCache::shared(schema_metrics);

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        let ns_events = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(namespaces.clone(), ns_events)
                .instrument(info_span!("namespaces")),
        );

        let cm_events = runtime.watch_namespaced::<k8s::ConfigMap>(
            k8s::EXTENSION_CONFIG_NAMESPACE,
            watcher::Config::default()
                .fields(&format!("metadata.name={}", k8s::EXTENSION_CONFIG_NAME)),
        );
        tokio::spawn(
            kubert::index::namespaced(extension_config.clone(), cm_events)
                .instrument(info_span!("extensionconfig")),
        );

        // Resource kinds change when CRDs or aggregated APIs come and go.
        let crd_events =
            runtime.watch_all::<k8s::CustomResourceDefinition>(watcher::Config::default());
        tokio::spawn(
            schema
                .clone()
                .notify_on(crd_events)
                .instrument(info_span!("customresourcedefinitions")),
        );

        let api_services = k8s::Api::<k8s::DynamicObject>::all_with(
            runtime.client(),
            &k8s::api_service_resource(),
        );
        let api_service_events = runtime.cancel_on_shutdown(
            watcher(api_services, watcher::Config::default())
                .default_backoff()
                .filter(|res| future::ready(res.is_ok())),
        );
        tokio::spawn(
            schema
                .clone()
                .notify_on(api_service_events)
                .instrument(info_span!("apiservices")),
        );

        tokio::spawn(
            schema
                .clone()
                .run(Discover::new(runtime.client()))
                .instrument(info_span!("schema")),
        );
        schema.notify();

        if aggregation_disabled {
            info!("Aggregated API disabled");
        } else if let Some(config) = initial_extension_config(&runtime.client()).await? {
            let (Some(key), Some(certs)) = (server_tls_key, server_tls_certs) else {
                bail!("--server-tls-key and --server-tls-certs must be set");
            };
            let tls = tls::load(&key, &certs)?;
            info!(
                allowed_names = config.allowed_names.as_deref().unwrap_or_default(),
                "Serving aggregated API"
            );

            let client = runtime.client();
            let svc = tower::ServiceBuilder::new()
                .layer(AuthenticateLayer::new(extension_config))
                .service(Api::new(
                    schema,
                    Collector::new(Lister::new(client.clone()), Reviewer::new(client)),
                    Namespaces::new(namespaces),
                    http_metrics,
                ));
            tokio::spawn(server::serve(
                server_addr,
                tls,
                svc,
                runtime.shutdown_handle().signaled(),
            ));
        }

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Reads the extension configuration once at startup. Returns `None` when the
/// API server has not published a client CA, in which case it cannot reach the
/// aggregated API.
async fn initial_extension_config(client: &k8s::Client) -> Result<Option<ExtensionConfig>> {
    let api =
        k8s::Api::<k8s::ConfigMap>::namespaced(client.clone(), k8s::EXTENSION_CONFIG_NAMESPACE);
    let Some(cm) = api.get_opt(k8s::EXTENSION_CONFIG_NAME).await? else {
        warn!(
            namespace = k8s::EXTENSION_CONFIG_NAMESPACE,
            name = k8s::EXTENSION_CONFIG_NAME,
            "Extension configuration not found; aggregated API disabled"
        );
        return Ok(None);
    };

    let config = ExtensionConfig::from_config_map(&cm);
    if config.client_ca.is_none() {
        warn!(
            key = k8s::CLIENT_CA_KEY,
            "Extension configuration has no client CA; aggregated API disabled"
        );
        return Ok(None);
    }
    Ok(Some(config))
}
