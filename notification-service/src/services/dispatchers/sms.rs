use super::{
    classify_http_status, classify_transport_error, order_confirmation, ChannelError,
    DispatchReceipt, NotificationDispatcher, RecipientTemplate,
};
use crate::config::Msg91Config;
use crate::models::{Channel, EventEnvelope};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const MSG91_API_URL: &str = "https://api.msg91.com/api/v5/flow/";

pub struct Msg91Dispatcher {
    config: Msg91Config,
    recipients: RecipientTemplate,
    client: Client,
}

#[derive(Debug, Serialize)]
struct Msg91Request {
    sender: String,
    route: String,
    country: String,
    sms: Vec<Msg91Sms>,
}

#[derive(Debug, Serialize)]
struct Msg91Sms {
    message: String,
    to: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Msg91Response {
    #[serde(rename = "type")]
    response_type: String,
    message: String,
    #[serde(default)]
    request_id: Option<String>,
}

impl Msg91Dispatcher {
    pub fn new(config: Msg91Config) -> Self {
        Self {
            recipients: RecipientTemplate::new(config.recipient_template.clone()),
            config,
            client: Client::new(),
        }
    }

    fn resolve_phone(&self, user_id: &str) -> Result<String, ChannelError> {
        // Keep digits and a leading +
        let phone = self
            .recipients
            .resolve(user_id)?
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect::<String>();

        if phone.len() < 7 {
            return Err(ChannelError::InvalidRecipient(format!(
                "No usable phone number for user {}",
                user_id
            )));
        }
        Ok(phone)
    }
}

#[async_trait]
impl NotificationDispatcher for Msg91Dispatcher {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, envelope: &EventEnvelope) -> Result<DispatchReceipt, ChannelError> {
        let phone = self.resolve_phone(&envelope.event.user_id)?;
        let (_, body) = order_confirmation(envelope);

        let request = Msg91Request {
            sender: self.config.sender_id.clone(),
            route: "4".to_string(), // transactional
            country: self.config.country_code.clone(),
            sms: vec![Msg91Sms {
                message: body,
                to: vec![phone],
            }],
        };

        let response = self
            .client
            .post(MSG91_API_URL)
            .header("authkey", &self.config.auth_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_error("Msg91", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status("Msg91", status, &body));
        }

        let msg91_response: Msg91Response = response
            .json()
            .await
            .map_err(|e| ChannelError::Unavailable(format!("Failed to parse Msg91 response: {}", e)))?;

        if msg91_response.response_type != "success" {
            return Err(ChannelError::Rejected(format!(
                "Msg91 error: {}",
                msg91_response.message
            )));
        }

        tracing::info!(
            event_id = %envelope.event_id(),
            "Order confirmation SMS sent via Msg91"
        );

        Ok(DispatchReceipt::new(msg91_response.request_id))
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        if self.config.auth_key.is_empty() || self.config.sender_id.is_empty() {
            return Err(ChannelError::Configuration(
                "Msg91 auth key and sender id must be configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(template: &str) -> Msg91Dispatcher {
        Msg91Dispatcher::new(Msg91Config {
            auth_key: "key".to_string(),
            sender_id: "ORDERS".to_string(),
            country_code: "91".to_string(),
            recipient_template: template.to_string(),
        })
    }

    #[test]
    fn test_phone_is_normalized() {
        let sms = dispatcher("{user_id}");
        assert_eq!(sms.resolve_phone("+91 98765-43210").unwrap(), "+919876543210");
    }

    #[test]
    fn test_non_phone_user_id_is_invalid_recipient() {
        let sms = dispatcher("{user_id}");
        assert!(matches!(
            sms.resolve_phone("user-abc"),
            Err(ChannelError::InvalidRecipient(_))
        ));
    }
}
