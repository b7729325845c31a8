//! MQTT message-bus collaborator.
//!
//! One [`rumqttc::AsyncClient`] per process. A background task polls the
//! event loop, dispatches incoming publishes to the handler registered for
//! their topic and re-subscribes after every (re)connect, since the
//! session is not persisted by the broker.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gyro_api::{BusError, BusHandler, MessageBus, Qos};

/// Pause before polling again after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Pending requests buffered by the client
const REQUEST_CAPACITY: usize = 64;

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "gyro_hub".to_string()
}

fn default_topics() -> Vec<String> {
    vec!["sample".to_string(), "sub_data".to_string()]
}

fn default_keep_alive_secs() -> u64 {
    30
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MqttBusConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Topics the ingest router is attached to
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub qos: Qos,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for MqttBusConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            topics: default_topics(),
            qos: Qos::default(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl MqttBusConfig {
    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.client_id, &self.host, self.port);
        opts.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        if let Some(user) = &self.username {
            opts.set_credentials(user, self.password.as_deref().unwrap_or(""));
        }
        opts
    }
}

fn to_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

// ════════════════════════════════════════════════════════════════
//  Routes
// ════════════════════════════════════════════════════════════════

/// Topic → handler table shared with the event-loop task.
#[derive(Default, Clone)]
struct Routes {
    inner: Arc<RwLock<HashMap<String, (Qos, BusHandler)>>>,
}

impl Routes {
    fn insert(&self, topic: &str, qos: Qos, handler: BusHandler) {
        self.inner.write().insert(topic.to_string(), (qos, handler));
    }

    /// Run the handler of `topic`. Returns false for unrouted topics.
    fn dispatch(&self, topic: &str, payload: &[u8]) -> bool {
        let handler = self.inner.read().get(topic).map(|(_, h)| Arc::clone(h));
        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }

    fn subscriptions(&self) -> Vec<(String, Qos)> {
        self.inner
            .read()
            .iter()
            .map(|(topic, (qos, _))| (topic.clone(), *qos))
            .collect()
    }
}

// ════════════════════════════════════════════════════════════════
//  MqttBus
// ════════════════════════════════════════════════════════════════

pub struct MqttBus {
    client: AsyncClient,
    routes: Routes,
}

impl MqttBus {
    /// Create the client and start polling its event loop. The broker
    /// connection is established in the background and retried until
    /// `token` is cancelled.
    pub fn connect(config: &MqttBusConfig, token: CancellationToken) -> (Self, JoinHandle<()>) {
        let (client, eventloop) = AsyncClient::new(config.options(), REQUEST_CAPACITY);
        let routes = Routes::default();
        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "mqtt client starting"
        );
        let task = tokio::spawn(poll_loop(eventloop, client.clone(), routes.clone(), token));
        (Self { client, routes }, task)
    }
}

impl MessageBus for MqttBus {
    fn subscribe(&self, topic: &str, qos: Qos, handler: BusHandler)
        -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>
    {
        let topic = topic.to_string();
        Box::pin(async move {
            self.routes.insert(&topic, qos, handler);
            self.client
                .subscribe(topic.as_str(), to_qos(qos))
                .await
                .map_err(|e| BusError::Subscribe { topic, detail: e.to_string() })
        })
    }
}

async fn poll_loop(mut eventloop: EventLoop, client: AsyncClient, routes: Routes, token: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if !routes.dispatch(&publish.topic, &publish.payload) {
                    tracing::debug!(topic = %publish.topic, "message on unrouted topic");
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("mqtt connected");
                for (topic, qos) in routes.subscriptions() {
                    if let Err(e) = client.try_subscribe(topic.as_str(), to_qos(qos)) {
                        tracing::warn!(topic = %topic, error = %e, "re-subscribe failed");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "mqtt connection error, retrying");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    if let Err(e) = client.try_disconnect() {
        tracing::debug!(error = %e, "mqtt disconnect request not sent");
    }
    tracing::info!("mqtt client stopped");
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
