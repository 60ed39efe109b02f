use super::{
    classify_http_status, classify_transport_error, order_confirmation, ChannelError,
    DispatchReceipt, NotificationDispatcher,
};
use crate::config::FcmConfig;
use crate::models::{Channel, EventEnvelope};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const FCM_API_URL: &str = "https://fcm.googleapis.com/v1/projects";

/// Push notifications through FCM topic messaging.
///
/// Each user's devices subscribe to `<topic_prefix><user_id>`, so the event's
/// user id is enough to address them.
pub struct FcmDispatcher {
    config: FcmConfig,
    client: Client,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct FcmRequest {
    message: FcmMessage,
}

#[derive(Debug, Serialize)]
struct FcmMessage {
    topic: String,
    notification: FcmNotification,
    data: HashMap<String, String>,
    android: FcmAndroidConfig,
}

#[derive(Debug, Serialize)]
struct FcmNotification {
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct FcmAndroidConfig {
    priority: String,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    name: Option<String>,
}

impl FcmDispatcher {
    pub fn new(config: FcmConfig) -> Self {
        Self::with_api_url(config, FCM_API_URL)
    }

    pub fn with_api_url(config: FcmConfig, api_url: &str) -> Self {
        Self {
            config,
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    fn access_token(&self) -> Result<&str, ChannelError> {
        if self.config.service_account_key.is_empty() {
            return Err(ChannelError::Authentication(
                "FCM service account key not configured".to_string(),
            ));
        }
        Ok(&self.config.service_account_key)
    }

    fn build_request(&self, envelope: &EventEnvelope) -> FcmRequest {
        let (title, body) = order_confirmation(envelope);
        let event = &envelope.event;

        let mut data = HashMap::new();
        data.insert("eventId".to_string(), event.event_id.clone());
        data.insert("orderId".to_string(), event.order_id.clone());

        FcmRequest {
            message: FcmMessage {
                topic: format!("{}{}", self.config.topic_prefix, event.user_id),
                notification: FcmNotification { title, body },
                data,
                android: FcmAndroidConfig {
                    priority: "high".to_string(),
                },
            },
        }
    }
}

#[async_trait]
impl NotificationDispatcher for FcmDispatcher {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, envelope: &EventEnvelope) -> Result<DispatchReceipt, ChannelError> {
        if self.config.project_id.is_empty() {
            return Err(ChannelError::Configuration(
                "FCM project_id is not configured".to_string(),
            ));
        }

        let access_token = self.access_token()?;
        let request = self.build_request(envelope);
        let url = format!("{}/{}/messages:send", self.api_url, self.config.project_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_error("FCM", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status("FCM", status, &body));
        }

        let fcm_response: FcmResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Unavailable(format!("Failed to parse FCM response: {}", e)))?;

        tracing::info!(
            event_id = %envelope.event_id(),
            topic = %request.message.topic,
            "Push notification sent via FCM"
        );

        Ok(DispatchReceipt::new(fcm_response.name))
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        if self.config.project_id.is_empty() {
            return Err(ChannelError::Configuration(
                "FCM project_id is not configured".to_string(),
            ));
        }
        self.access_token().map(|_| ())
    }
}
