mod api;
mod middleware;

use std::sync::Arc;
use std::time::Duration;

use jobdesk_scheduler::{JobLogSink, TaskRegistry};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = jobdesk_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = jobdesk_db::PoolConfig::from_app_config(&config);
    let pool = jobdesk_db::connect_pool(&config.database_url, pool_config).await?;
    jobdesk_db::run_migrations(&pool).await?;

    let registry = Arc::new(TaskRegistry::with_builtin_tasks());
    let sink: Arc<dyn JobLogSink> = Arc::new(pool.clone());
    let scheduler = jobdesk_scheduler::start_engine(registry, sink)?;

    if config.scheduler_autostart {
        jobdesk_scheduler::load_enabled_jobs(&scheduler, &pool).await?;
    } else {
        tracing::warn!("JOBDESK_SCHEDULER_AUTOSTART=false; enabled jobs were not loaded");
    }

    let auth = AuthState::from_env(matches!(config.env, jobdesk_core::Environment::Development))?;
    let app = build_app(
        AppState {
            pool,
            scheduler: scheduler.clone(),
        },
        auth,
    );

    tracing::info!(bind_addr = %config.bind_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let drain_timeout = Duration::from_secs(config.scheduler_drain_timeout_secs);
    if !jobdesk_scheduler::drain_scheduler(&scheduler, drain_timeout).await {
        tracing::warn!(
            timeout_secs = config.scheduler_drain_timeout_secs,
            "scheduler did not drain cleanly; some job log records may be missing"
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
