use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{ConfigArgs, ServerConfig};
use crate::error::ServerError;
use pipeline::{
    ConnectionSupervisor, DeliveryQueue, Enricher, Ingestor, PersistenceWriter, Stats, init_store,
};

pub async fn run(args: ConfigArgs) -> Result<(), ServerError> {
    tracing::info!("bridge-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    let router = config.validate()?;
    tracing::info!(
        config = %args.config,
        broker = %config.broker,
        storage = %config.storage,
        subscriptions = config.subscriptions.len(),
        "loaded config"
    );

    // --- Remote store ---
    let retry = config.retry.policy();
    let store = config.create_store()?;
    init_store(store.as_ref(), config.retry.init_attempts, &retry).await?;

    // --- Broker ---
    let broker = config.create_broker()?;

    // --- Queue + writer ---
    let queue = Arc::new(DeliveryQueue::new(config.queue.capacity, config.queue.overflow));
    let stats = Arc::new(Stats::default());
    // stop: жёсткая остановка writer'а после grace period
    let stop = CancellationToken::new();
    // shutdown: супервизор прекращает приём сообщений
    let shutdown = CancellationToken::new();

    let writer = PersistenceWriter::new(store.clone(), queue.clone(), retry, stats.clone(), stop.clone());
    let mut writer_handle = tokio::spawn(writer.run());
    tracing::info!(
        capacity = queue.capacity(),
        overflow = ?queue.overflow(),
        "delivery queue ready"
    );

    // --- Supervisor ---
    let ingestor = Arc::new(Ingestor::new(router, Enricher::new(), queue.clone(), stats.clone()));
    let supervisor = ConnectionSupervisor::new(broker, ingestor, config.reconnect.policy());
    let mut supervisor_handle = tokio::spawn(supervisor.run(shutdown.clone()));

    tracing::info!("bridge ready");

    // --- Ожидание сигнала или отказа супервизора ---
    let outcome = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            tracing::info!("shutting down...");
            shutdown.cancel();
            supervisor_handle.await?
        }
        result = &mut supervisor_handle => {
            shutdown.cancel();
            result?
        }
    };

    // Drain: очередь закрыта для ingestion, writer дорабатывает
    // поставленные задачи и отложенные retry
    queue.close();
    let grace = config.shutdown_grace();
    if tokio::time::timeout(grace, &mut writer_handle).await.is_err() {
        tracing::warn!(
            grace_ms = grace.as_millis() as u64,
            pending = queue.len(),
            deferred = queue.deferred(),
            "drain timed out, stopping writer"
        );
        stop.cancel();
        writer_handle.await?;
    }
    store.shutdown().await;

    let s = stats.snapshot();
    tracing::info!(
        received = s.received,
        delivered = s.delivered,
        retried = s.retried,
        abandoned = s.abandoned,
        decode_failed = s.decode_failed,
        unrouted = s.unrouted,
        displaced = s.displaced,
        "shutdown complete"
    );
    Ok(outcome?)
}

/// Ctrl+C или SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> Result<(), std::io::Error> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<(), std::io::Error> {
    tokio::signal::ctrl_c().await
}
