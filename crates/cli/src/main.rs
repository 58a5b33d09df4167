use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use skiff_api::{Connector, Link, Listener, Site};
use skiff_core::ProcessorConfig;
use skiff_watchers::{by_name, EventProcessor};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "skiff-controller", version, about = "Skiff site controller")]
struct Cli {
    /// Namespace to watch (default: all namespaces)
    #[arg(long = "ns", env = "SKIFF_NAMESPACE")]
    namespace: Option<String>,

    /// Mirror resync interval in seconds (0 disables)
    #[arg(long = "resync-secs", env = "SKIFF_RESYNC_SECS")]
    resync_secs: Option<u64>,

    /// Prometheus exporter address (host:port)
    #[arg(long = "metrics-addr", env = "SKIFF_METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Name of the site configuration ConfigMap
    #[arg(long = "config-map", default_value = "skiff-site")]
    config_map: String,
}

fn init_tracing() {
    let env = std::env::var("SKIFF_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(()) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        },
        Err(_) => warn!(addr = %addr, "invalid SKIFF_METRICS_ADDR; expected host:port"),
    }
}

fn status_of(status: Option<&skiff_api::ResourceStatus>) -> &str {
    status.and_then(|s| s.status.as_deref()).unwrap_or("Pending")
}

/// Register the watchers this controller reconciles. Handlers only log for now.
fn register(processor: &EventProcessor, namespace: Option<&str>, config_map: &str) -> Arc<skiff_watchers::Watcher<Site>> {
    let sites = processor.watch_sites(namespace, |key, site: Option<Arc<Site>>| async move {
        match site {
            Some(s) => info!(key = %key, status = %status_of(s.status.as_ref()), "site changed"),
            None => info!(key = %key, "site deleted"),
        }
        anyhow::Ok(())
    });
    processor.watch_connectors(namespace, |key, c: Option<Arc<Connector>>| async move {
        match c {
            Some(c) => info!(key = %key, routing_key = %c.spec.routing_key, port = c.spec.port, "connector changed"),
            None => info!(key = %key, "connector deleted"),
        }
        anyhow::Ok(())
    });
    processor.watch_listeners(namespace, |key, l: Option<Arc<Listener>>| async move {
        match l {
            Some(l) => info!(key = %key, routing_key = %l.spec.routing_key, host = %l.spec.host, "listener changed"),
            None => info!(key = %key, "listener deleted"),
        }
        anyhow::Ok(())
    });
    processor.watch_links(namespace, |key, l: Option<Arc<Link>>| async move {
        match l {
            Some(l) => info!(key = %key, status = %status_of(l.status.as_ref()), "link changed"),
            None => info!(key = %key, "link deleted"),
        }
        anyhow::Ok(())
    });
    processor.watch_config_maps(by_name(config_map), namespace, |key, cm| async move {
        let entries = cm.as_ref().and_then(|c| c.data.as_ref()).map(|d| d.len());
        info!(key = %key, ?entries, "site config changed");
        anyhow::Ok(())
    });
    sites
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    init_metrics(cli.metrics_addr.as_deref());

    let mut config = ProcessorConfig::from_env();
    if let Some(secs) = cli.resync_secs {
        config = config.with_resync(Duration::from_secs(secs));
    }
    info!(namespace = ?cli.namespace, resync_secs = config.resync.as_secs(), max_requeues = config.max_requeues, "starting skiff-controller");

    let client = kube::Client::try_default().await.context("building kube client")?;
    let processor = Arc::new(EventProcessor::new("skiff-controller", client, config));
    let sites = register(&processor, cli.namespace.as_deref(), &cli.config_map);

    let stop = CancellationToken::new();
    processor.start_watchers(&stop);

    tokio::select! {
        synced = processor.wait_for_cache_sync(&stop) => {
            if !synced {
                bail!("caches did not sync");
            }
        }
        _ = signal::ctrl_c() => {
            stop.cancel();
            bail!("interrupted before caches synced");
        }
    }
    info!(watchers = processor.watcher_count(), "caches synced");

    let handle = processor.start(stop.clone());
    processor.callback_after(
        Duration::ZERO,
        move |ctx| {
            let sites = Arc::clone(&sites);
            async move {
                info!(context = %ctx, sites = sites.list().len(), "initial state loaded");
                anyhow::Ok(())
            }
        },
        "startup",
    );

    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    processor.stop();
    stop.cancel();
    handle.await.context("joining event loop")?;
    Ok(())
}
