//! Message-bus attachment

use std::sync::Arc;

use gyro_api::{BusError, BusHandler, MessageBus, Qos, SourceKind};

use crate::router::IngestRouter;

/// Subscribe `router` to every topic in `topics`. Each message payload is
/// ingested as a bus record; malformed payloads are logged by the router
/// and otherwise ignored.
pub async fn attach_bus(
    bus: &dyn MessageBus,
    topics: &[String],
    qos: Qos,
    router: Arc<IngestRouter>,
) -> Result<(), BusError> {
    for topic in topics {
        let router = Arc::clone(&router);
        let handler: BusHandler = Arc::new(move |payload: &[u8]| {
            let _ = router.ingest(payload, SourceKind::Bus);
        });
        bus.subscribe(topic, qos, handler).await?;
        tracing::info!(topic = %topic, qos = qos.level(), "bus topic attached");
    }
    Ok(())
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod tests;
