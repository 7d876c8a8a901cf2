use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::{net::TcpListener, signal, time};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use power_meter_service::{
    api::{self, AppState},
    config::Config,
    control::ControlService,
    db::{self, Db},
    devices::DeviceRegistry,
    mqtt::{IngestionCoordinator, MqttEventHandler, MqttLink},
    sensors::ReadingStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent — env vars may be set externally)
    let _ = dotenvy::dotenv();

    // Initialise tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env()?;

    // Connect both logical databases (with startup backoff) and migrate the
    // registry side. Per-device reading tables are provisioned lazily.
    let database = Db::open(&config.database_url, &config.sensor_database_url).await?;
    db::run_migrations(database.registry_pool()).await?;
    info!("Databases ready");

    let registry = DeviceRegistry::new(database.registry_pool().clone());
    let store = ReadingStore::new(database.readings_pool().clone());

    // Broker link + ingestion coordinator. The coordinator is the broker's
    // event handler; the link pumps broker traffic into it.
    let (link, event_loop) = MqttLink::new(&config);
    let coordinator: Arc<dyn MqttEventHandler> = Arc::new(IngestionCoordinator::new(
        registry.clone(),
        store.clone(),
        config.mqtt_password.clone(),
    ));
    {
        let link = link.clone();
        let coordinator = coordinator.clone();
        tokio::spawn(async move { link.run(event_loop, coordinator).await });
    }

    let control = ControlService::new(Arc::new(link));

    // Database health watchdog: availability is polled, not retried
    // per-operation; transitions are logged for operators.
    {
        let database = database.clone();
        let interval = Duration::from_secs(config.db_health_interval_secs);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            let mut healthy = true;
            info!(interval_secs = interval.as_secs(), "Database health watchdog started");
            loop {
                ticker.tick().await;
                let now_healthy = database.health_check().await;
                if now_healthy != healthy {
                    if now_healthy {
                        info!("Database connectivity restored");
                    } else {
                        warn!("Database connectivity lost; ingestion will drop readings");
                    }
                    healthy = now_healthy;
                }
            }
        });
    }

    // Start HTTP server
    let state = AppState { registry, store, control, db: database.clone() };
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    database.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
