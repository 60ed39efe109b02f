pub mod email;
pub mod log;
pub mod mock;
pub mod push;
pub mod sms;

use crate::models::{Channel, ErrorClass, EventEnvelope};
use async_trait::async_trait;
use thiserror::Error;

pub use email::SmtpDispatcher;
pub use log::LogDispatcher;
pub use mock::MockDispatcher;
pub use push::FcmDispatcher;
pub use sms::Msg91Dispatcher;

/// Channel failures, split into retryable and permanent by [`ChannelError::class`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    #[error("Channel not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Rejected by provider: {0}")]
    Rejected(String),
}

impl ChannelError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChannelError::Connection(_)
            | ChannelError::Unavailable(_)
            | ChannelError::RateLimited(_)
            | ChannelError::Timeout(_) => ErrorClass::TransientDispatch,
            ChannelError::NotEnabled(_)
            | ChannelError::Configuration(_)
            | ChannelError::Authentication(_)
            | ChannelError::InvalidRecipient(_)
            | ChannelError::Rejected(_) => ErrorClass::PermanentDispatch,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::TransientDispatch
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReceipt {
    pub provider_id: Option<String>,
}

impl DispatchReceipt {
    pub fn new(provider_id: Option<String>) -> Self {
        Self { provider_id }
    }
}

/// Sends the notification for one event through a single channel.
///
/// Implementations must tolerate being called more than once for the same
/// event: delivery is at-least-once.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    fn channel(&self) -> Channel;
    async fn send(&self, envelope: &EventEnvelope) -> Result<DispatchReceipt, ChannelError>;
    async fn health_check(&self) -> Result<(), ChannelError>;
}

/// Maps a user id to a channel address, e.g. `{user_id}@mail.example.com`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientTemplate(String);

impl RecipientTemplate {
    pub const PLACEHOLDER: &'static str = "{user_id}";

    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn resolve(&self, user_id: &str) -> Result<String, ChannelError> {
        if !self.0.contains(Self::PLACEHOLDER) {
            return Err(ChannelError::Configuration(format!(
                "Recipient template '{}' has no {} placeholder",
                self.0,
                Self::PLACEHOLDER
            )));
        }
        if user_id.trim().is_empty() {
            return Err(ChannelError::InvalidRecipient("Empty user id".to_string()));
        }
        Ok(self.0.replace(Self::PLACEHOLDER, user_id))
    }
}

/// Subject and body of the order confirmation.
pub(crate) fn order_confirmation(envelope: &EventEnvelope) -> (String, String) {
    let event = &envelope.event;
    (
        format!("Order {} received", event.order_id),
        format!(
            "Thanks for your order {}. Total: {} {}.",
            event.order_id,
            event.total.round_dp(2),
            event.currency
        ),
    )
}

pub(crate) fn classify_http_status(
    provider: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> ChannelError {
    let detail = format!("{} returned {}: {}", provider, status, body);
    match status.as_u16() {
        429 => ChannelError::RateLimited(detail),
        401 | 403 => ChannelError::Authentication(detail),
        404 => ChannelError::InvalidRecipient(detail),
        408 => ChannelError::Timeout(detail),
        s if s >= 500 => ChannelError::Unavailable(detail),
        _ => ChannelError::Rejected(detail),
    }
}

pub(crate) fn classify_transport_error(provider: &str, err: reqwest::Error) -> ChannelError {
    if err.is_timeout() {
        ChannelError::Timeout(format!("{} request timed out: {}", provider, err))
    } else {
        ChannelError::Connection(format!("Failed to connect to {}: {}", provider, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_error_classification() {
        assert!(ChannelError::Unavailable("x".into()).is_transient());
        assert!(ChannelError::Timeout("x".into()).is_transient());
        assert!(ChannelError::RateLimited("x".into()).is_transient());
        assert!(!ChannelError::InvalidRecipient("x".into()).is_transient());
        assert!(!ChannelError::Rejected("x".into()).is_transient());
    }

    #[test]
    fn test_http_status_classification() {
        assert!(matches!(
            classify_http_status("fcm", StatusCode::TOO_MANY_REQUESTS, ""),
            ChannelError::RateLimited(_)
        ));
        assert!(matches!(
            classify_http_status("fcm", StatusCode::BAD_GATEWAY, ""),
            ChannelError::Unavailable(_)
        ));
        assert!(matches!(
            classify_http_status("fcm", StatusCode::NOT_FOUND, ""),
            ChannelError::InvalidRecipient(_)
        ));
        assert!(matches!(
            classify_http_status("fcm", StatusCode::BAD_REQUEST, ""),
            ChannelError::Rejected(_)
        ));
    }

    #[test]
    fn test_recipient_template() {
        let template = RecipientTemplate::new("{user_id}@mail.example.com");
        assert_eq!(template.resolve("u1").unwrap(), "u1@mail.example.com");
        assert!(template.resolve(" ").is_err());

        let broken = RecipientTemplate::new("orders@example.com");
        assert!(matches!(
            broken.resolve("u1"),
            Err(ChannelError::Configuration(_))
        ));
    }
}
