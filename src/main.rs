use std::{process, sync::Arc, time::Duration};

use tokio::{net::TcpListener, signal};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;
use vellum::{
    application::{context::NodeContext, error::AppError, repos::ContentStore, scheduler},
    cache::{CacheConfig, ChannelId},
    cluster::{DispatchWorker, HttpPeerTransport, PeerAddress, PeerTransport, StaticPeerDirectory},
    config,
    infra::{
        db::PostgresContentStore,
        error::InfraError,
        http::{self, HttpState},
        memory::InMemoryContentStore,
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Resync(args) => run_resync(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let node_id = settings.cluster.node_id;
    let (node, outbox) = build_node(node_id, &settings).await?;

    let worker = DispatchWorker::new(
        node_id,
        settings.cluster.advertised_url.clone(),
        outbox,
        Arc::new(peer_directory(&settings)),
        peer_transport(&settings)?,
    );
    let dispatch_handle = tokio::spawn(worker.run());
    let scheduler_handle =
        scheduler::spawn_scheduler(node.content.clone(), settings.scheduler.cadence);

    let result = serve_http(&settings, &node).await;

    scheduler_handle.abort();
    let _ = scheduler_handle.await;

    // Dropping the node releases the last messenger handle, so the worker
    // drains what is queued and stops.
    drop(node);
    if tokio::time::timeout(settings.server.graceful_shutdown, dispatch_handle)
        .await
        .is_err()
    {
        warn!("Cluster dispatch did not finish before the shutdown deadline");
    }

    result
}

/// Refresh the named channels everywhere. A one-off identity keeps peers
/// from mistaking these envelopes for a running node's sequence.
async fn run_resync(settings: config::Settings, args: config::ResyncArgs) -> Result<(), AppError> {
    let node_id = Uuid::new_v4();
    let (node, outbox) = build_node(node_id, &settings).await?;
    let registry = node.messenger.invalidator().registry();

    let channels: Vec<(ChannelId, &'static str)> = if args.channels.is_empty() {
        registry
            .registrations()
            .filter(|registration| !registration.local_only)
            .map(|registration| (registration.id, registration.name))
            .collect()
    } else {
        args.channels
            .iter()
            .map(|name| {
                registry
                    .find_by_name(name)
                    .map(|registration| (registration.id, registration.name))
                    .ok_or_else(|| AppError::validation(format!("unknown channel `{name}`")))
            })
            .collect::<Result<_, _>>()?
    };

    for (channel, name) in channels {
        node.messenger.refresh_all(channel)?;
        info!(channel = name, "Refresh queued");
    }

    let mut worker = DispatchWorker::new(
        node_id,
        None,
        outbox,
        Arc::new(peer_directory(&settings)),
        peer_transport(&settings)?,
    );
    let summary = worker.drain_pending().await;
    info!(
        delivered = summary.delivered,
        failed = summary.failed,
        "Resync finished"
    );
    if summary.failed > 0 {
        return Err(AppError::unexpected(format!(
            "{} deliveries failed",
            summary.failed
        )));
    }
    Ok(())
}

async fn build_node(
    node_id: Uuid,
    settings: &config::Settings,
) -> Result<
    (
        NodeContext,
        tokio::sync::mpsc::UnboundedReceiver<vellum_wire::NotificationEnvelope>,
    ),
    AppError,
> {
    let cache_config = CacheConfig::from(&settings.cache);
    let templates = settings.templates.directory.clone();

    let built = match settings.database.url.as_deref() {
        Some(url) => {
            let store = Arc::new(init_store(url, settings).await?);
            NodeContext::build(node_id, store, &cache_config, templates, Vec::new())
        }
        None => {
            warn!("No database configured; content lives in memory for this process only");
            let store = Arc::new(InMemoryContentStore::new());
            NodeContext::build(node_id, store, &cache_config, templates, Vec::new())
        }
    };
    built.map_err(AppError::from)
}

async fn init_store(
    url: &str,
    settings: &config::Settings,
) -> Result<PostgresContentStore, AppError> {
    let pool = PostgresContentStore::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresContentStore::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let store = PostgresContentStore::new(pool);
    store.health_check().await?;
    Ok(store)
}

fn peer_directory(settings: &config::Settings) -> StaticPeerDirectory {
    StaticPeerDirectory::new(
        settings
            .cluster
            .peers
            .iter()
            .cloned()
            .map(PeerAddress::new)
            .collect(),
    )
}

fn peer_transport(settings: &config::Settings) -> Result<Arc<dyn PeerTransport>, AppError> {
    let transport = HttpPeerTransport::new(settings.cluster.delivery_timeout)
        .map_err(|err| AppError::unexpected(format!("failed to build peer transport: {err}")))?;
    Ok(Arc::new(transport))
}

async fn serve_http(settings: &config::Settings, node: &NodeContext) -> Result<(), AppError> {
    let router = http::build_router(HttpState {
        receiver: Arc::clone(&node.receiver),
        store: Arc::clone(&node.store),
    });

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))?;

    info!(
        addr = %settings.server.addr,
        node_id = %node.node_id,
        peers = settings.cluster.peers.len(),
        "Node listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))
}

async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for shutdown signal");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => error!(error = %err, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(grace_secs = grace.as_secs(), "Shutdown signal received");
}
