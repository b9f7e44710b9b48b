//! View Counter
//!
//! Per-entry view counts on the distributed atomic counter. Counts are never
//! cached locally: only the distributed counter is authoritative.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::DataStorage;

/// Tracks entry view counts
#[derive(Clone)]
pub struct ViewCounter {
    storage: Arc<DataStorage>,
}

impl ViewCounter {
    pub fn new(storage: Arc<DataStorage>) -> Self {
        Self { storage }
    }

    /// Count one view and return the new total.
    ///
    /// View counts tolerate backend blips: failures are logged and yield
    /// `None` instead of failing the request.
    pub async fn record_view(&self, entry_id: Uuid, cancel: &CancellationToken) -> Option<i64> {
        let key = self.storage.keys().entry_views_key(entry_id);
        match self.storage.increment_and_get(&key, cancel).await {
            Ok(count) => Some(count),
            Err(err) => {
                warn!(%entry_id, error = %err, "Failed to record view");
                None
            }
        }
    }

    /// Current view count (0 if never viewed)
    pub async fn views(&self, entry_id: Uuid, cancel: &CancellationToken) -> Result<i64> {
        let key = self.storage.keys().entry_views_key(entry_id);
        Ok(self.storage.get::<i64>(&key, cancel).await?.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_read_views() {
        let counter = ViewCounter::new(Arc::new(DataStorage::in_memory()));
        let entry = Uuid::new_v4();
        let cancel = CancellationToken::new();

        assert_eq!(counter.views(entry, &cancel).await.unwrap(), 0);
        assert_eq!(counter.record_view(entry, &cancel).await, Some(1));
        assert_eq!(counter.record_view(entry, &cancel).await, Some(2));
        assert_eq!(counter.views(entry, &cancel).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_view_is_dropped() {
        let counter = ViewCounter::new(Arc::new(DataStorage::in_memory()));
        let entry = Uuid::new_v4();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(counter.record_view(entry, &cancel).await, None);
        assert_eq!(
            counter.views(entry, &CancellationToken::new()).await.unwrap(),
            0
        );
    }
}
