use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gyro_api::TelemetryStore;
use gyro_api_server::AppState;
use gyro_bus_mqtt::MqttBus;
use gyro_engine::{GyroEngine, attach_bus};
use gyro_storage_file::FileStore;
use gyro_storage_memory::MemoryStore;

use crate::config::{ServeArgs, ServerConfig, StoreConfig};
use crate::error::ServerError;

/// How long background tasks get after the engine has drained
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("gyro-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?.resolve(&args)?;
    tracing::info!(config = %args.config, port = config.api_port, "loaded config");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Store ---
    let store: Arc<dyn TelemetryStore> = match &config.store {
        StoreConfig::Memory(mem) => {
            tracing::info!(max_records = mem.max_records, "using memory store");
            Arc::new(MemoryStore::from_config(mem))
        }
        StoreConfig::File(file) => {
            let store = FileStore::open(file).await?;
            tracing::info!(path = %store.records_path().display(), "using file store");
            Arc::new(store)
        }
    };

    // --- Engine ---
    let engine = Arc::new(GyroEngine::start(store, config.engine_config(), token.clone()));
    engine.restore().await?;

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // --- Message bus ---
    // The bus owns the routes its poll loop dispatches to; keep it alive
    // until shutdown.
    let _bus = match &config.mqtt {
        Some(mqtt) => {
            let (bus, task) = MqttBus::connect(mqtt, token.clone());
            handles.push(task);
            attach_bus(&bus, &mqtt.topics, mqtt.qos, Arc::clone(engine.router())).await?;
            tracing::info!(topics = ?mqtt.topics, "bus ingestion enabled");
            Some(bus)
        }
        None => {
            tracing::info!("no [mqtt] section, bus ingestion disabled");
            None
        }
    };

    // --- API server (HTTP + WS) ---
    let state = AppState::new(Arc::clone(&engine), config.upload_ack).with_upload_idle(config.upload_idle());
    let api_port = config.api_port;
    let api_token = token.clone();
    let mut api_handle = tokio::spawn(async move { gyro_api_server::run(api_port, state, api_token).await });

    tracing::info!("server ready");

    // --- Wait for Ctrl+C or the API server to stop on its own ---
    let api_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
            None
        }
        result = &mut api_handle => Some(result),
    };

    // Signal all tasks to stop cooperatively
    token.cancel();

    // Drain subscriber queues and the persistence queue
    engine.shutdown(config.shutdown_grace()).await;

    for h in handles {
        join_or_abort(h).await;
    }

    let api_result = match api_result {
        Some(result) => result,
        None => match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut api_handle).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("api server did not stop in time, aborting");
                api_handle.abort();
                Ok(Ok(()))
            }
        },
    };

    tracing::info!("shutdown complete");
    match api_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServerError::Api(e)),
        Err(e) => Err(ServerError::Api(format!("api task: {e}"))),
    }
}

async fn join_or_abort(mut handle: JoinHandle<()>) {
    if tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut handle).await.is_err() {
        handle.abort();
        let _ = handle.await;
    }
}
