use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use gyro_bus_mqtt::MqttBusConfig;
use gyro_engine::{EngineConfig, PersistConfig};
use gyro_storage_file::FileStoreConfig;
use gyro_storage_memory::MemoryStoreConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "gyro-server", about = "Motion-sensor telemetry hub")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,

    /// Wipe secret; overrides `secret` from the config file
    #[arg(long, env = "GYRO_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// API port; overrides `api_port` from the config file
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Password required by `POST /clean`
    #[serde(default)]
    pub secret: String,
    /// Per-subscriber send queue capacity
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Acknowledge every upload-socket message
    #[serde(default = "default_upload_ack")]
    pub upload_ack: bool,
    /// Silence after which the upload socket is dropped and its slot freed
    #[serde(default = "default_upload_idle_secs")]
    pub upload_idle_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub persist: PersistSection,
    /// Bus ingestion is disabled without this section
    #[serde(default)]
    pub mqtt: Option<MqttBusConfig>,
}

fn default_api_port() -> u16 {
    8080
}
fn default_subscriber_buffer() -> usize {
    64
}
fn default_upload_ack() -> bool {
    true
}
fn default_upload_idle_secs() -> u64 {
    30
}
fn default_shutdown_grace_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    Memory(MemoryStoreConfig),
    File(FileStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory(MemoryStoreConfig::default())
    }
}

#[derive(Debug, Deserialize)]
pub struct PersistSection {
    #[serde(default = "default_persist_queue")]
    pub queue: usize,
    #[serde(default = "default_persist_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_persist_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_persist_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_persist_queue() -> usize {
    1024
}
fn default_persist_timeout_ms() -> u64 {
    5000
}
fn default_persist_max_retries() -> u32 {
    3
}
fn default_persist_backoff_ms() -> u64 {
    200
}

impl Default for PersistSection {
    fn default() -> Self {
        Self {
            queue: default_persist_queue(),
            timeout_ms: default_persist_timeout_ms(),
            max_retries: default_persist_max_retries(),
            backoff_ms: default_persist_backoff_ms(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply command-line overrides and reject unusable settings.
    pub fn resolve(mut self, args: &ServeArgs) -> Result<Self, ServerError> {
        if let Some(secret) = &args.secret {
            self.secret = secret.clone();
        }
        if let Some(port) = args.port {
            self.api_port = port;
        }

        if self.secret.trim().is_empty() {
            return Err(ServerError::Config {
                context: "secret",
                detail: "wipe secret is empty; set `secret`, --secret or GYRO_SECRET".into(),
            });
        }
        if self.upload_idle_secs == 0 {
            return Err(ServerError::Config {
                context: "upload_idle_secs",
                detail: "must be greater than 0".into(),
            });
        }
        if self.persist.timeout_ms == 0 {
            return Err(ServerError::Config {
                context: "persist",
                detail: "timeout_ms must be greater than 0".into(),
            });
        }
        if let Some(mqtt) = &self.mqtt {
            if mqtt.topics.is_empty() {
                return Err(ServerError::Config {
                    context: "mqtt",
                    detail: "at least one topic is required".into(),
                });
            }
        }
        Ok(self)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.secret.clone());
        config.subscriber_buffer = self.subscriber_buffer;
        config.persist = PersistConfig {
            queue: self.persist.queue,
            timeout: Duration::from_millis(self.persist.timeout_ms),
            max_retries: self.persist.max_retries,
            backoff: Duration::from_millis(self.persist.backoff_ms),
        };
        config
    }

    pub fn upload_idle(&self) -> Duration {
        Duration::from_secs(self.upload_idle_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
