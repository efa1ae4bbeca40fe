use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};
use watchdog_common::{AlertRecord, PushFrame};

use crate::registry::{BroadcastReport, Registry};

/// Owns the observer registry and turns ingested alerts into pushes.
pub struct Hub {
    registry: Arc<Registry>,
}

impl Hub {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(Registry::new(write_timeout)),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Ingest one alert: log its summary, then fan it out in the background.
    ///
    /// Returning is the acknowledgement. Fan-out problems are only logged and
    /// never reach the caller. Identical ids are broadcast again; there is no
    /// deduplication.
    pub fn receive(&self, record: AlertRecord) -> JoinHandle<BroadcastReport> {
        info!("{}", record.summary_line());

        let registry = self.registry.clone();
        tokio::spawn(async move { publish(&registry, &record).await })
    }
}

/// Encode `record` as the public push frame and broadcast it.
pub async fn publish(registry: &Registry, record: &AlertRecord) -> BroadcastReport {
    let frame = match serde_json::to_string(&PushFrame::from(record)) {
        Ok(frame) => frame,
        Err(err) => {
            error!(id = %record.id, "failed to encode alert for observers: {}", err);
            return BroadcastReport::default();
        }
    };
    registry.broadcast(&frame).await
}
