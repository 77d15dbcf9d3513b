use std::sync::Arc;

use crate::api::NotificationApi;
use crate::error::{ClientError, Result};

use super::types::{NotificationRecord, RecordDefaults};

/// One-shot loader for the most recent persisted notifications
#[derive(Clone)]
pub struct HistoryLoader {
    api: Arc<dyn NotificationApi>,
    defaults: RecordDefaults,
}

impl HistoryLoader {
    pub fn new(api: Arc<dyn NotificationApi>, defaults: RecordDefaults) -> Self {
        Self { api, defaults }
    }

    /// Fetch and map up to `limit` records, keeping the server's order
    #[tracing::instrument(name = "history.fetch_recent", skip(self))]
    pub async fn fetch_recent(&self, limit: u32) -> Result<Vec<NotificationRecord>> {
        if limit == 0 {
            return Err(ClientError::Validation(
                "history limit must be positive".to_string(),
            ));
        }

        let raw = self.api.list_notifications(limit).await?;

        let records: Vec<NotificationRecord> = raw
            .into_iter()
            .map(|r| NotificationRecord::from_history(r, &self.defaults))
            .collect();

        tracing::debug!(count = records.len(), "History loaded");
        Ok(records)
    }
}
