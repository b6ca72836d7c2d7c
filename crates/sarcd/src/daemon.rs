//! Daemon lifecycle: startup, sweep scheduling, HTTP API, shutdown

use anyhow::{Context, Result};
use prometheus_client::registry::Registry;
use sarc_archive::{
    ArchiveManager, DirSessionStore, ManagerSettings, SqliteMetadataStore, SweepReport,
    TracingAuditSink,
};
use sarc_core::config::{SarcConfig, SweepConfig, MAX_CREATING_GRACE_SECS};
use sarc_secrets::CredStore;
use sarc_storage::{OpendalStore, RetryPolicy};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::api::ApiState;
use crate::metrics::{ArchiveMetrics, HealthState};

/// Assemble the archive manager from config, failing fast on anything that
/// would make archives unreadable or unwritable.
async fn build_manager(config: &SarcConfig) -> Result<(ArchiveManager, opendal::Operator)> {
    config.validate().context("invalid configuration")?;

    // Without the master key no archive can be sealed or opened
    let master_key = sarc_secrets::load_master_key(&config.secrets)
        .await
        .context("loading master key")?;

    let cred_store = CredStore::load_from_env()?;
    let creds = cred_store.s3.context(
        "no S3 credentials: set AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY \
         (or SARC_ACCESS_KEY_ID/SARC_SECRET_ACCESS_KEY)",
    )?;
    info!(source = %cred_store.source, "credentials loaded");

    let operator = sarc_storage::operator::build_from_core_config(
        &config.storage,
        &creds.access_key_id,
        creds.secret_access_key.expose_secret(),
    )?;

    match sarc_storage::check_health(&operator).await {
        Ok(()) => info!(endpoint = %config.storage.endpoint, "storage: connected"),
        Err(e) => warn!("storage health check failed: {e}  (archive operations will retry)"),
    }

    let metadata = SqliteMetadataStore::open(&config.metadata.db_path).with_context(|| {
        format!("opening metadata db: {}", config.metadata.db_path.display())
    })?;
    info!(path = %config.metadata.db_path.display(), "metadata: opened");

    let objects = OpendalStore::new(RetryPolicy::from_config(&config.retry))
        .with_bucket(&config.storage.bucket, operator.clone());
    let sessions = DirSessionStore::new(&config.sessions.export_dir);

    let manager = ArchiveManager::new(
        Arc::new(metadata),
        Arc::new(objects),
        Arc::new(sessions),
        Arc::new(TracingAuditSink),
        Some(Arc::new(master_key)),
        ManagerSettings::from_config(config),
    );
    Ok((manager, operator))
}

pub async fn run(config: SarcConfig) -> Result<()> {
    let (manager, operator) = build_manager(&config).await?;

    let mut registry = Registry::default();
    let metrics = ArchiveMetrics::new(&mut registry);
    let registry = Arc::new(registry);

    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: registry.clone(),
            operator: Some(operator.clone()),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server: {e}");
            }
        });
    }

    if config.sweep.enabled {
        tokio::spawn(sweep_loop(
            manager.clone(),
            metrics.clone(),
            config.sweep.clone(),
        ));
    } else {
        info!("sweep: disabled");
    }

    notify_ready();

    let state = ApiState {
        manager,
        metrics: Arc::new(metrics),
    };
    crate::api::serve(&config.daemon.listen, state, shutdown_signal()).await?;

    info!("sarcd stopped");
    Ok(())
}

/// One-shot sweep for the `sweep` subcommand.
pub async fn sweep_once(config: SarcConfig, purge_expired: bool) -> Result<SweepReport> {
    let (manager, _operator) = build_manager(&config).await?;
    let grace = creating_grace(&config.sweep);
    let report = manager
        .sweep(grace, purge_expired || config.sweep.purge_expired)
        .await?;
    Ok(report)
}

fn creating_grace(cfg: &SweepConfig) -> chrono::Duration {
    // bounded by validate(); clamp again so the conversion cannot overflow
    let secs = cfg.creating_grace_secs.min(MAX_CREATING_GRACE_SECS);
    chrono::Duration::seconds(secs as i64)
}

async fn sweep_loop(manager: ArchiveManager, metrics: ArchiveMetrics, cfg: SweepConfig) {
    let grace = creating_grace(&cfg);
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
    // first tick fires immediately; skip it so startup is not blocked on a full listing
    ticker.tick().await;
    info!(
        interval_secs = cfg.interval_secs,
        purge_expired = cfg.purge_expired,
        "sweep: scheduled"
    );

    loop {
        ticker.tick().await;
        match manager.sweep(grace, cfg.purge_expired).await {
            Ok(report) => metrics.record_sweep(&report),
            Err(e) => error!("sweep failed: {e}"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("ctrl-c handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    // Uses $NOTIFY_SOCKET env var; no-op if not set
    #[cfg(unix)]
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
