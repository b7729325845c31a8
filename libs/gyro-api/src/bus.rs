use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::BusError;

/// Delivery guarantee requested from the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn level(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// Callback invoked with the raw payload of every message on a topic.
pub type BusHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Message-bus collaborator.
pub trait MessageBus: Send + Sync {
    /// Subscribe to `topic`; `handler` runs for every message received on it.
    fn subscribe(&self, topic: &str, qos: Qos, handler: BusHandler)
        -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;
}
