//! Administrative wipe

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use gyro_api::{StoreError, TelemetryStore};

use crate::cache::LatestValueCache;
use crate::error::{AuthError, CleanError};
use crate::persist::PersistWriter;

pub struct Admin {
    secret: String,
    store: Arc<dyn TelemetryStore>,
    cache: Arc<LatestValueCache>,
    writer: PersistWriter,
    /// Deadline for the whole wipe, including appends queued ahead of it
    timeout: Duration,
}

impl Admin {
    pub fn new(
        secret: impl Into<String>,
        store: Arc<dyn TelemetryStore>,
        cache: Arc<LatestValueCache>,
        writer: PersistWriter,
        timeout: Duration,
    ) -> Self {
        Self {
            secret: secret.into(),
            store,
            cache,
            writer,
            timeout,
        }
    }

    /// Delete every persisted record, then clear the latest-value cache.
    ///
    /// Both passwords must match each other and the configured secret;
    /// otherwise nothing is touched. The delete is ordered behind records
    /// still waiting in the persistence queue. Returns the number of
    /// deleted records.
    pub async fn clean(&self, password: &str, confirm: &str) -> Result<u64, CleanError> {
        if let Err(e) = self.authorize(password, confirm) {
            tracing::warn!(at = %Utc::now(), outcome = %e, "wipe rejected");
            return Err(e.into());
        }

        let deleted = match tokio::time::timeout(self.timeout, self.delete_all()).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::error!(at = %Utc::now(), error = %e, "wipe failed");
                return Err(e.into());
            }
            Err(_) => {
                let e = StoreError::timeout(self.timeout);
                tracing::error!(at = %Utc::now(), error = %e, "wipe failed");
                return Err(e.into());
            }
        };

        let evicted = self.cache.clear();
        tracing::info!(at = %Utc::now(), deleted, evicted, "wipe completed");
        Ok(deleted)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        match self.writer.wipe().await {
            Some(result) => result,
            // Worker stopped: nothing can be queued behind the delete.
            None => self.store.delete_all().await,
        }
    }

    fn authorize(&self, password: &str, confirm: &str) -> Result<(), AuthError> {
        if password != confirm {
            return Err(AuthError::Mismatch);
        }
        if password != self.secret {
            return Err(AuthError::InvalidPassword);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "admin_test.rs"]
mod tests;
