use ledgersync::application::actors::reconciliation_actor::{ReconciliationActor, ReconciliationHandle};
use ledgersync::application::handlers::sync_handler::router;
use ledgersync::application::services::LedgerSyncService;
use ledgersync::config::SyncConfig;
use ledgersync::domain::repositories::erp_api::ErpApi;
use ledgersync::domain::repositories::ledger_repository::LedgerRepository;
use ledgersync::domain::services::document_resolver::DocumentResolver;
use ledgersync::domain::services::order_matcher::OrderMatcher;
use ledgersync::domain::services::reconciliation::{BackfillJob, DocumentBackfill, LinkageBackfill};
use ledgersync::domain::services::settlement::SettlementOrchestrator;
use ledgersync::infrastructure::credential_manager::{CredentialManager, OAuthTokenEndpoint};
use ledgersync::infrastructure::erp_client::ErpHttpClient;
use ledgersync::infrastructure::erp_gateway::ErpGateway;
use ledgersync::persistence::backfill_audit::{BackfillAuditRepository, SqliteBackfillAudit};
use ledgersync::persistence::credential_repository::SqliteCredentialStore;
use ledgersync::persistence::ledger_repository::SqliteLedgerRepository;
use ledgersync::persistence::{init_database, DatabaseConfig};
use ledgersync::rate_limit::{create_rate_limiter, RateLimiterConfig};
use ledgersync::secrets::{load_erp_secrets, SecretConfig};
use ledgersync::task_runner::{run_periodic, PeriodicConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledgersync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("ledgersync {} starting", env!("CARGO_PKG_VERSION"));

    let config = SyncConfig::from_env();
    config.validate()?;
    info!(
        "ERP {} (min interval {:?}, {} attempts on 429)",
        config.gateway.base_url, config.gateway.min_interval, config.gateway.max_attempts
    );

    let pool = init_database(&DatabaseConfig::from_env()).await?;

    let secrets = load_erp_secrets(&SecretConfig::from_env())?;
    let credential_store = Arc::new(SqliteCredentialStore::new(pool.clone()));
    let token_endpoint = Arc::new(OAuthTokenEndpoint::new(
        &config.credential.token_url,
        config.gateway.request_timeout,
    )?);
    let credentials = Arc::new(CredentialManager::new(
        &config.credential.scope,
        secrets.client,
        token_endpoint,
        credential_store,
        config.credential.expiry_buffer,
    ));
    if let Some(refresh_token) = secrets.bootstrap_refresh_token {
        if credentials.seed_if_empty(refresh_token).await? {
            info!("✓ Bootstrap refresh token stored");
        }
    }

    let gateway = Arc::new(ErpGateway::new(config.gateway.clone(), credentials)?);
    let erp: Arc<dyn ErpApi> = Arc::new(ErpHttpClient::new(gateway, config.matcher.search_page_size));
    let ledger: Arc<dyn LedgerRepository> = Arc::new(SqliteLedgerRepository::new(pool.clone()));
    let audit: Arc<dyn BackfillAuditRepository> = Arc::new(SqliteBackfillAudit::new(pool.clone()));

    let matcher = Arc::new(OrderMatcher::new(erp.clone(), config.matcher.clone()));
    let resolver = Arc::new(DocumentResolver::new(erp.clone(), config.resolver.clone()));
    let shutdown = CancellationToken::new();

    let reconciliation = ReconciliationActor::spawn(
        Arc::new(LinkageBackfill::new(ledger.clone(), matcher, config.backfill.clone())),
        Arc::new(DocumentBackfill::new(ledger.clone(), resolver, config.backfill.clone())),
        Some(audit),
        shutdown.child_token(),
    );

    let orchestrator = Arc::new(SettlementOrchestrator::new(erp, ledger.clone()));
    let service = LedgerSyncService::new(orchestrator, ledger, reconciliation.clone());

    let mut schedulers = Vec::new();
    if config.backfill.schedule_enabled {
        schedulers.push(spawn_scheduler(
            reconciliation.clone(),
            BackfillJob::Linkage,
            config.backfill.linkage_interval,
            shutdown.clone(),
        ));
        schedulers.push(spawn_scheduler(
            reconciliation.clone(),
            BackfillJob::Documents,
            config.backfill.documents_interval,
            shutdown.clone(),
        ));
        info!(
            "Backfills scheduled: linkage every {:?}, documents every {:?}",
            config.backfill.linkage_interval, config.backfill.documents_interval
        );
    } else {
        info!("Backfill schedule disabled, sweeps run on request only");
    }

    let limiter = create_rate_limiter(RateLimiterConfig {
        requests_per_minute: config.api.requests_per_minute,
    });
    let app = router(service, limiter);

    let listener = tokio::net::TcpListener::bind(config.api.bind_addr).await?;
    info!("Listening on {}", config.api.bind_addr);

    let server_shutdown = shutdown.clone();
    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        server_shutdown.cancel();
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutting down gracefully...");
    shutdown.cancel();
    reconciliation.shutdown().await;

    for handle in schedulers {
        match tokio::time::timeout(Duration::from_secs(10), handle).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Scheduler task ended abnormally: {}", e),
            Err(_) => warn!("Scheduler task did not stop in time"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Run one backfill job on a fixed interval through the actor.
fn spawn_scheduler(
    reconciliation: ReconciliationHandle,
    job: BackfillJob,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let task_name = format!("{}_backfill", job);
        run_periodic(&task_name, PeriodicConfig::every(interval), shutdown, || {
            let reconciliation = reconciliation.clone();
            async move {
                let report = reconciliation.run(job).await.map_err(|e| e.to_string())?;
                match report.aborted {
                    Some(reason) => Err(format!("aborted: {}", reason)),
                    None => Ok(()),
                }
            }
        })
        .await
    })
}
