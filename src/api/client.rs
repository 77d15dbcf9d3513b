use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;

use crate::config::ApiConfig;
use crate::error::{ClientError, Result};
use crate::notification::{NotificationId, RawNotification};

use super::{AckResponse, ListResponse, NotificationApi};

/// Header carrying the admin session token
const TOKEN_HEADER: &str = "token";

/// HTTP client for the notification endpoints
#[derive(Clone)]
pub struct RestClient {
    http_client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl RestClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::Validation(format!("invalid api.base_url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Validation(format!(
                "api.base_url cannot be used as a base: {}",
                config.base_url
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// Append path segments to the base URL (segments are percent-encoded)
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl NotificationApi for RestClient {
    #[tracing::instrument(name = "api.list_notifications", skip(self))]
    async fn list_notifications(&self, limit: u32) -> Result<Vec<RawNotification>> {
        let mut url = self.endpoint(&["notifications"]);
        url.query_pairs_mut().append_pair("limit", &limit.to_string());

        let response = self.authorize(self.http_client.get(url)).send().await?;
        let body: ListResponse = Self::decode(response).await?;

        if !body.success {
            return Err(ClientError::Rejected(
                body.message
                    .unwrap_or_else(|| "notification list request failed".to_string()),
            ));
        }

        tracing::debug!(count = body.notifications.len(), "Fetched notifications");
        Ok(body.notifications)
    }

    #[tracing::instrument(name = "api.mark_read", skip(self), fields(notification_id = %id))]
    async fn mark_read(&self, id: &NotificationId) -> Result<()> {
        let id = id.to_string();
        let url = self.endpoint(&["notifications", &id, "read"]);

        let response = self.authorize(self.http_client.patch(url)).send().await?;
        let body: AckResponse = Self::decode(response).await?;

        if !body.success {
            return Err(ClientError::Rejected(
                body.message
                    .unwrap_or_else(|| format!("mark read rejected for {}", id)),
            ));
        }
        Ok(())
    }

    #[tracing::instrument(name = "api.emit_test", skip(self))]
    async fn emit_test(&self) -> Result<()> {
        let url = self.endpoint(&["notifications", "emit-test"]);
        let response = self.authorize(self.http_client.get(url)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
