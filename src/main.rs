use std::sync::Arc;
use std::sync::atomic::Ordering;

use outbox_worker::config::WorkerConfig;
use outbox_worker::control::{ControlState, control_routes};
use outbox_worker::delivery::DeliveryExecutor;
use outbox_worker::poller;
use outbox_worker::resolver::ChannelResolver;
use outbox_worker::store::{LibSqlStore, MessageStore};
use outbox_worker::transport::{MailerFactory, SmtpMailerFactory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WorkerConfig::from_env();
    let run_once = config.run_once || std::env::args().any(|a| a == "--once");

    tracing::info!(
        db = %config.db_path,
        poll_interval = config.poll_interval_secs,
        smtp_override = config.smtp_override.is_some(),
        "Outbox worker v{} starting",
        env!("CARGO_PKG_VERSION"),
    );

    let store: Arc<dyn MessageStore> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&config.db_path)).await?,
    );

    let resolver = ChannelResolver::new(Arc::clone(&store), config.smtp_override.clone());
    let mailers: Arc<dyn MailerFactory> = Arc::new(SmtpMailerFactory);
    let executor = Arc::new(DeliveryExecutor::new(
        Arc::clone(&store),
        resolver,
        mailers,
        config.default_from.clone(),
    ));

    if run_once {
        let processed = poller::run_once(&executor).await;
        tracing::info!(processed, "Run-once complete, exiting");
        return Ok(());
    }

    // Control API and poll loop share the same store and executor.
    let state = ControlState {
        store: Arc::clone(&store),
        executor: Arc::clone(&executor),
        secret: config.control_secret.clone(),
    };
    let app = control_routes(state);
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.control_port)).await?;
    tracing::info!(port = config.control_port, "Control server listening");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    let (poll_handle, shutdown) =
        poller::spawn_poll_loop(Arc::clone(&executor), config.poll_interval_secs);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    shutdown.store(true, Ordering::Relaxed);
    poll_handle.abort();

    Ok(())
}
