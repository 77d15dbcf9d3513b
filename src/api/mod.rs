//! REST access to the persisted notification list.

mod client;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::notification::{NotificationId, RawNotification};

pub use client::RestClient;

/// Body of `GET /notifications`
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse {
    pub success: bool,
    #[serde(default)]
    pub notifications: Vec<RawNotification>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `PATCH /notifications/{id}/read` and similar acknowledgements
#[derive(Debug, Clone, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Backend operations the notification bell depends on
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Most recent persisted notifications, in server order
    async fn list_notifications(&self, limit: u32) -> Result<Vec<RawNotification>>;

    /// Mark one notification as read
    async fn mark_read(&self, id: &NotificationId) -> Result<()>;

    /// Ask the server to push a test event (development aid)
    async fn emit_test(&self) -> Result<()>;
}
