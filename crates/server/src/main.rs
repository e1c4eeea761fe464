//! Process entry point: assembles the stack, runs the HTTP server and the
//! worker pool, and tears both down on shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use refundry_approval::ApprovalEngine;
use refundry_connector::adapters::{AchConnector, CheckoutConnector, StripeConnector};
use refundry_connector::ConnectorRegistry;
use refundry_credentials::{CredentialManager, CredentialManagerConfig, StateSecretStore};
use refundry_crypto::{parse_master_key, EnvelopeEncryptor};
use refundry_manager::RefundManagerBuilder;
use refundry_notify::{NotificationChannel, NotificationDispatcher, WebhookChannel};
use refundry_params::{catalog, ParameterResolver, ParameterResolverConfig, StaticHierarchy};
use refundry_queue::{MemoryQueue, Queue};
use refundry_server::api::{build_router, AppState};
use refundry_server::config::{Config, StateBackend};
use refundry_server::{telemetry, ServerError};
use refundry_state::{DistributedLock, StateStore};
use refundry_state_memory::{MemoryDistributedLock, MemoryStateStore};
use refundry_state_redis::{RedisConfig, RedisDistributedLock, RedisStateStore};
use refundry_worker::{WebhookIngest, WorkerContext, WorkerPool};

/// Refund processing service.
#[derive(Debug, Parser)]
#[command(name = "refundry-server", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    telemetry::init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let (state, lock): (Arc<dyn StateStore>, Arc<dyn DistributedLock>) =
        match config.state.backend {
            StateBackend::Memory => {
                info!("using in-memory state backend");
                (
                    Arc::new(MemoryStateStore::new()),
                    Arc::new(MemoryDistributedLock::new()),
                )
            }
            StateBackend::Redis => {
                let url = config.state.redis_url.clone().ok_or_else(|| {
                    ServerError::Config("state.redis_url is required for the redis backend".into())
                })?;
                let redis_config = RedisConfig {
                    url,
                    prefix: config
                        .state
                        .redis_prefix
                        .clone()
                        .unwrap_or_else(|| "refundry".into()),
                    ..RedisConfig::default()
                };
                info!("using redis state backend");
                (
                    Arc::new(
                        RedisStateStore::new(&redis_config)
                            .map_err(|e| ServerError::Config(e.to_string()))?,
                    ),
                    Arc::new(
                        RedisDistributedLock::new(&redis_config)
                            .map_err(|e| ServerError::Config(e.to_string()))?,
                    ),
                )
            }
        };

    let queue: Arc<MemoryQueue> = Arc::new(MemoryQueue::new());

    let params = Arc::new(ParameterResolver::new(
        Arc::clone(&state),
        Arc::new(StaticHierarchy::new().with_default_chain()),
        catalog::standard_definitions(),
        ParameterResolverConfig::default(),
    ));

    let approvals = Arc::new(ApprovalEngine::new(
        Arc::clone(&state),
        Arc::clone(&params),
        Vec::new(),
    ));

    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(match &config.gateways.stripe_base_url {
        Some(url) => StripeConnector::with_base_url(url),
        None => StripeConnector::new(),
    }));
    registry.register(Arc::new(match &config.gateways.checkout_base_url {
        Some(url) => CheckoutConnector::with_base_url(url),
        None => CheckoutConnector::new(),
    }));
    registry.register(Arc::new(match &config.gateways.ach_base_url {
        Some(url) => AchConnector::with_base_url(url),
        None => AchConnector::new(),
    }));
    let registry = Arc::new(registry);

    // Master key for secrets at rest; optional in development.
    let encryptor = match std::env::var("REFUNDRY_MASTER_KEY") {
        Ok(raw) => {
            let key = parse_master_key(&raw).map_err(|e| ServerError::Config(e.to_string()))?;
            Some(Arc::new(EnvelopeEncryptor::new(key)))
        }
        Err(_) => {
            warn!("REFUNDRY_MASTER_KEY not set; secrets are stored unencrypted");
            None
        }
    };

    let credentials = Arc::new(CredentialManager::new(
        Arc::new(StateSecretStore::new(Arc::clone(&state))),
        encryptor.clone(),
        CredentialManagerConfig::default(),
    ));

    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
    if let Some(url) = &config.notifications.webhook_url {
        channels.push(Arc::new(WebhookChannel::new("ops-webhook", url)));
    }
    let notifications = Arc::new(
        NotificationDispatcher::new(channels)
            .map_err(|e| ServerError::Config(e.to_string()))?,
    );

    let manager = Arc::new(
        RefundManagerBuilder::new()
            .with_state(Arc::clone(&state))
            .with_lock(Arc::clone(&lock))
            .with_queue(Arc::clone(&queue) as Arc<dyn Queue>)
            .with_approvals(Arc::clone(&approvals))
            .with_params(Arc::clone(&params))
            .with_registry(Arc::clone(&registry))
            .build()?,
    );

    let worker_ctx = Arc::new(WorkerContext::new(
        Arc::clone(&state),
        Arc::clone(&lock),
        Arc::clone(&registry),
        credentials,
        Arc::clone(&approvals),
        Arc::clone(&params),
        Arc::clone(&manager),
        Arc::clone(&queue) as Arc<dyn Queue>,
        notifications,
        config.worker_config(),
    ));

    let pool = WorkerPool::new(Arc::clone(&worker_ctx));
    let ingest = Arc::new(WebhookIngest::new(worker_ctx));

    let shutdown = CancellationToken::new();
    let timer_handle = pool.spawn_timers(shutdown.clone());
    let pool_shutdown = shutdown.clone();
    let pool_handle = tokio::spawn(async move { pool.run(pool_shutdown).await });

    let app_state = AppState {
        manager,
        approvals,
        params,
        ingest,
        encryptor,
    };
    let router = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(listen = %config.server.listen, "refundry server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await?;

    // The signal already cancelled the token; wait for workers to drain.
    shutdown.cancel();
    if let Err(e) = pool_handle.await {
        warn!(error = %e, "worker pool task failed");
    }
    if let Err(e) = timer_handle.await {
        warn!(error = %e, "timer task failed");
    }
    info!("shutdown complete");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
