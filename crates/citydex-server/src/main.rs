//! Citydex Server - Main entry point

use anyhow::Result;
use aws_config::BehaviorVersion;
use citydex_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

use citydex_server::{
    api,
    config::{Config, JobStatusBackend},
    features::FeatureState,
    ingest::{
        sinks::{DocumentSink, DynamoDbBatchWriter, ElasticsearchIndex, PgDocumentStore, SearchSink, WideColumnSink},
        sweep_stale_flags, DualSinkFanout, InMemoryJobStatusStore, IngestionJobCoordinator, JobLog,
        JobStatusStore, PgJobLog, PgJobStatusStore, RecordSink, SnowflakeIdAssigner, UnprocessedItemRetrier,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("citydex-server")
        .filter_directives("citydex_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .with_env_overrides()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Citydex Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let coordinator = Arc::new(build_coordinator(&config, db_pool).await?);

    // Flags this worker still holds at boot belong to jobs that died with its previous run
    let abandoned = sweep_stale_flags(
        coordinator.status_store().as_ref(),
        coordinator.job_log().as_ref(),
    )
    .await?;
    if !abandoned.is_empty() {
        info!(jobs = ?abandoned, "Marked abandoned jobs from a previous run");
    }

    let state = FeatureState {
        coordinator: Arc::clone(&coordinator),
        max_upload_bytes: config.ingest.max_upload_bytes,
    };
    let app = api::create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator
        .shutdown(Duration::from_secs(config.server.shutdown_timeout_secs))
        .await;

    info!("Server shut down gracefully");

    Ok(())
}

/// Wire the coordinator to the configured backends
async fn build_coordinator(config: &Config, pool: PgPool) -> Result<IngestionJobCoordinator> {
    let ids = Arc::new(SnowflakeIdAssigner::new(config.ingest.worker_id)?);

    let status: Arc<dyn JobStatusStore> = match config.ingest.job_status_backend {
        JobStatusBackend::Memory => {
            tracing::warn!("Job flags are process-local; crashed jobs cannot be swept after restart");
            Arc::new(InMemoryJobStatusStore::with_owner(config.ingest.worker_id))
        }
        JobStatusBackend::Postgres => {
            Arc::new(PgJobStatusStore::new(pool.clone(), config.ingest.worker_id))
        }
    };
    let job_log: Arc<dyn JobLog> = Arc::new(PgJobLog::new(pool.clone()));

    let document = DocumentSink::new(
        Arc::new(PgDocumentStore::new(pool)),
        config.ingest.document_chunk_size,
    );
    let search_index = ElasticsearchIndex::new(
        config.search.url.clone(),
        Duration::from_secs(config.search.timeout_secs),
    )?;
    let search = SearchSink::new(
        Arc::new(search_index),
        config.search.index.clone(),
        config.ingest.search_chunk_size,
    );

    let wide_column: Option<Arc<dyn RecordSink>> = if config.wide_column.enabled {
        let aws = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = aws_sdk_dynamodb::Client::new(&aws);
        let writer = DynamoDbBatchWriter::new(client, config.wide_column.table.clone());
        let retrier = UnprocessedItemRetrier::new(config.retry_policy());
        info!(table = %config.wide_column.table, "Wide-column sink enabled");
        Some(Arc::new(WideColumnSink::new(Arc::new(writer), retrier)))
    } else {
        info!("Wide-column sink disabled (WIDE_COLUMN_ENABLED=false)");
        None
    };

    let fanout = DualSinkFanout::new(Arc::new(document), Arc::new(search), wide_column);

    Ok(IngestionJobCoordinator::new(
        ids,
        status,
        job_log,
        fanout,
        config.coordinator_settings(),
    ))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
