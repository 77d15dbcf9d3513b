use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a persisted notification
///
/// The backend uses integers; string ids are accepted so that a schema
/// change on the server does not silently drop records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationId {
    Number(i64),
    Text(String),
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationId::Number(n) => write!(f, "{}", n),
            NotificationId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for NotificationId {
    fn from(n: i64) -> Self {
        NotificationId::Number(n)
    }
}

impl From<&str> for NotificationId {
    fn from(s: &str) -> Self {
        NotificationId::Text(s.to_string())
    }
}

/// Where a record in the working list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrigin {
    /// Fetched from the persisted notification list
    History,
    /// Pushed over the live transport
    Live,
}

/// Entry of the notification bell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Option<NotificationId>,
    pub title: String,
    pub message: String,
    /// Display-formatted time
    pub time: String,
    pub created_at: Option<DateTime<Utc>>,
    pub icon: String,
    pub color: String,
    /// Only known for persisted records
    pub is_read: Option<bool>,
    pub origin: RecordOrigin,
}

/// Fallback values for fields a record may omit
#[derive(Debug, Clone)]
pub struct RecordDefaults {
    pub title: String,
    pub message: String,
    pub icon: String,
    pub color: String,
    /// chrono format string used for display times
    pub time_format: String,
}

impl Default for RecordDefaults {
    fn default() -> Self {
        Self {
            title: "Actualización de envío".to_string(),
            message: "Se ha actualizado un envío".to_string(),
            icon: "assets/images/notification/shipping.png".to_string(),
            color: "success".to_string(),
            time_format: "%d/%m/%Y %H:%M".to_string(),
        }
    }
}

impl RecordDefaults {
    /// Format a timestamp in local time for display
    pub fn format_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&Local).format(&self.time_format).to_string()
    }
}

/// Persisted notification as returned by `GET /notifications`
#[derive(Debug, Clone, Deserialize)]
pub struct RawNotification {
    #[serde(default)]
    pub id: Option<NotificationId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, rename = "isRead", alias = "is_read")]
    pub is_read: Option<bool>,
}

/// Payload of a live `shipment-update` event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentUpdate {
    #[serde(default)]
    pub id: Option<NotificationId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

/// Why a live payload could not be turned into a record
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ShipmentUpdate {
    /// Parse a raw event payload; anything but a JSON object is rejected
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, PayloadError> {
        let kind = match &payload {
            serde_json::Value::Object(_) => return Ok(serde_json::from_value(payload)?),
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
        };
        Err(PayloadError::NotAnObject(kind))
    }
}

impl NotificationRecord {
    /// Map a persisted record, applying icon/color fallbacks
    pub fn from_history(raw: RawNotification, defaults: &RecordDefaults) -> Self {
        let created_at = raw
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let time = match (created_at, raw.created_at) {
            (Some(at), _) => defaults.format_time(at),
            // Unparsable timestamps are shown as sent
            (None, Some(text)) => text,
            (None, None) => String::new(),
        };

        Self {
            id: raw.id,
            title: raw.title.unwrap_or_default(),
            message: raw.message.unwrap_or_default(),
            time,
            created_at,
            icon: non_empty_or(raw.icon, &defaults.icon),
            color: non_empty_or(raw.color, &defaults.color),
            is_read: raw.is_read,
            origin: RecordOrigin::History,
        }
    }

    /// Build a record from a live event stamped with its local receipt time
    pub fn from_live(
        update: ShipmentUpdate,
        received_at: DateTime<Utc>,
        defaults: &RecordDefaults,
    ) -> Self {
        Self {
            id: update.id,
            title: non_empty_or(update.title, &defaults.title),
            message: non_empty_or(update.message, &defaults.message),
            time: defaults.format_time(received_at),
            created_at: Some(received_at),
            icon: non_empty_or(update.icon, &defaults.icon),
            color: non_empty_or(update.color, &defaults.color),
            is_read: None,
            origin: RecordOrigin::Live,
        }
    }

    /// Unread unless the server said otherwise
    pub fn is_unread(&self) -> bool {
        !self.is_read.unwrap_or(false)
    }
}

fn non_empty_or(value: Option<String>, fallback: &str) -> String {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => fallback.to_string(),
    }
}
