use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tonic::transport::Server as GrpcServer;

use qazna_core::error::AppError;
use qazna_core::observability::logging::init_tracing;
use qazna_core::observability::metrics as obs;

use qazna_api::config::AppConfig;
use qazna_api::db::memory::{
    MemoryAuditStore, MemoryKeyStore, MemoryOAuthStore, MemoryRbacStore, MemoryRefreshTokenStore,
};
use qazna_api::db::pg::{PgAuditStore, PgKeyStore, PgOAuthStore, PgRbacStore, PgRefreshTokenStore};
use qazna_api::db::Database;
use qazna_api::grpc::{GrpcAuthLayer, QaznaGrpc};
use qazna_api::ledger::memory::MemoryLedger;
use qazna_api::ledger::postgres::PgLedger;
use qazna_api::ledger::remote::RemoteLedger;
use qazna_api::ledger::Ledger;
use qazna_api::services::audit::AuditService;
use qazna_api::services::keys::KeyManager;
use qazna_api::services::oauth::OAuthService;
use qazna_api::services::rbac::RbacService;
use qazna_api::services::tokens::TokenService;
use qazna_api::stream::StreamHub;
use qazna_api::{build_router, AppState, AuthContext, ReadyProbe, SERVICE_NAME};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{SERVICE_NAME}: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.log_level);
    obs::init();
    obs::init_build_info(VERSION, option_env!("QAZNA_BUILD_COMMIT").unwrap_or("dev"));

    let stream = StreamHub::new();
    let mut database: Option<Database> = None;

    // Ledger backend: remote gRPC wins over Postgres, which wins over the
    // in-memory store.
    let ledger: Arc<dyn Ledger> = if let Some(addr) = &config.ledger_grpc_addr {
        tracing::info!(addr = %addr, "using remote ledger");
        Arc::new(
            RemoteLedger::connect(addr)
                .await
                .map_err(|e| AppError::unavailable(format!("dial remote ledger: {e}")))?,
        )
    } else if let Some(dsn) = &config.pg_dsn {
        let db = Database::connect(dsn).await?;
        database = Some(db.clone());
        Arc::new(PgLedger::new(db.pool().clone()))
    } else {
        tracing::info!("using in-memory ledger");
        Arc::new(MemoryLedger::new())
    };

    let auth = build_auth(&config, database.as_ref()).await?;

    let readiness = match &database {
        Some(db) => ReadyProbe::with_pool(db.pool().clone()),
        None => ReadyProbe::always_ready(),
    };

    let state = AppState {
        config: config.clone(),
        version: VERSION.to_string(),
        ledger,
        auth: auth.clone(),
        stream: stream.clone(),
        readiness: readiness.clone(),
    };

    let demo = if config.stream_demo {
        Some(stream.start_demo(Duration::from_secs(3)))
    } else {
        None
    };

    // HTTP server.
    let router = build_router(state);
    let http_listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("http listen: {e}")))?;
    tracing::info!(addr = %config.http_addr, version = VERSION, "starting HTTP server");

    let shutdown = shutdown_signal();
    let http = tokio::spawn(async move {
        axum::serve(
            http_listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
    });

    // gRPC server.
    let grpc_tokens = auth.as_ref().map(|a| a.tokens.clone());
    tracing::info!(addr = %config.grpc_addr, "starting gRPC server");
    let grpc_addr = config.grpc_addr;
    let grpc_readiness = readiness.clone();
    let grpc = tokio::spawn(async move {
        GrpcServer::builder()
            .layer(GrpcAuthLayer::new(grpc_tokens))
            .add_service(QaznaGrpc::info_service(grpc_readiness.clone(), VERSION))
            .add_service(QaznaGrpc::health_service(grpc_readiness, VERSION))
            .serve_with_shutdown(grpc_addr, shutdown_signal())
            .await
    });

    // Enforce the drain deadline: once the signal lands, servers get ten
    // seconds to finish in-flight work before being aborted.
    let watchdog = {
        let http_abort = http.abort_handle();
        let grpc_abort = grpc.abort_handle();
        tokio::spawn(async move {
            shutdown_signal().await;
            tokio::time::sleep(SHUTDOWN_DEADLINE).await;
            http_abort.abort();
            grpc_abort.abort();
        })
    };

    let (http_result, grpc_result) = tokio::join!(http, grpc);
    watchdog.abort();
    if let Ok(Err(err)) = http_result {
        tracing::error!(error = %err, "http server error");
    }
    if let Ok(Err(err)) = grpc_result {
        tracing::error!(error = %err, "grpc server error");
    }

    if let Some(handle) = demo {
        handle.abort();
    }
    // The pool closes last so in-flight work can finish against it.
    if let Some(db) = database {
        db.close().await;
    }
    tracing::info!("stopped");
    Ok(())
}

/// Assemble the auth subsystem. With a database every store is persistent;
/// without one, auth is enabled only when a bootstrap keypair is supplied
/// and runs on in-memory stores.
async fn build_auth(
    config: &AppConfig,
    database: Option<&Database>,
) -> Result<Option<AuthContext>, AppError> {
    let (keys, rbac_store, refresh_store, oauth_store, audit): (
        Arc<KeyManager>,
        Arc<dyn qazna_api::services::rbac::RbacStore>,
        Arc<dyn qazna_api::services::tokens::RefreshTokenStore>,
        Arc<dyn qazna_api::services::oauth::OAuthStore>,
        AuditService,
    ) = match database {
        Some(db) => (
            Arc::new(KeyManager::new(Arc::new(PgKeyStore::new(db.pool().clone())))),
            Arc::new(PgRbacStore::new(db.pool().clone())),
            Arc::new(PgRefreshTokenStore::new(db.pool().clone())),
            Arc::new(PgOAuthStore::new(db.pool().clone())),
            AuditService::new(Arc::new(PgAuditStore::new(db.pool().clone()))),
        ),
        None => {
            if config.auth_private_key.is_none() {
                return Ok(None);
            }
            (
                Arc::new(KeyManager::new(Arc::new(MemoryKeyStore::new()))),
                Arc::new(MemoryRbacStore::new()),
                Arc::new(MemoryRefreshTokenStore::new()),
                Arc::new(MemoryOAuthStore::with_demo_client()),
                AuditService::new(Arc::new(MemoryAuditStore::new())),
            )
        }
    };

    if let (Some(private_pem), Some(public_pem)) =
        (&config.auth_private_key, &config.auth_public_key)
    {
        keys.bootstrap(config.auth_key_id.clone(), private_pem, public_pem).await?;
    }
    keys.ensure_active().await?;

    let tokens = Arc::new(TokenService::new(
        keys.clone(),
        refresh_store,
        rbac_store.clone(),
        config.issuer.clone(),
        ChronoDuration::from_std(config.access_ttl)
            .map_err(|e| AppError::bad_request(format!("access ttl: {e}")))?,
        ChronoDuration::from_std(config.refresh_ttl)
            .map_err(|e| AppError::bad_request(format!("refresh ttl: {e}")))?,
    ));

    let rbac = Arc::new(RbacService::new(rbac_store));
    rbac.ensure_builtins().await?;

    let oauth = Arc::new(OAuthService::new(oauth_store, tokens.clone()));

    Ok(Some(AuthContext { tokens, keys, rbac, oauth, audit }))
}

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
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}
