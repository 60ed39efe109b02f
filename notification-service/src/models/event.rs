//! Inbound `order.created` events and their transport envelope.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Payload published on the order-created topic. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    #[validate(custom(function = "validate_not_blank"))]
    pub event_id: String,
    #[validate(custom(function = "validate_not_blank"))]
    pub order_id: String,
    #[validate(custom(function = "validate_not_blank"))]
    pub user_id: String,
    pub total: Decimal,
    #[validate(custom(function = "validate_currency"))]
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Where a message was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub received_at: DateTime<Utc>,
}

/// A decoded, validated event plus the transport metadata it arrived with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event: OrderCreatedEvent,
    pub transport: TransportMetadata,
}

impl EventEnvelope {
    pub fn event_id(&self) -> &str {
        &self.event.event_id
    }
}

fn validate_not_blank(value: &str) -> Result<(), validator::ValidationError> {
    if value.trim().is_empty() {
        let mut err = validator::ValidationError::new("blank");
        err.message = Some("must not be empty".into());
        return Err(err);
    }
    Ok(())
}

fn validate_currency(value: &str) -> Result<(), validator::ValidationError> {
    if value.len() == 3 && value.bytes().all(|b| b.is_ascii_uppercase()) {
        return Ok(());
    }
    let mut err = validator::ValidationError::new("currency");
    err.message = Some("must be a three-letter ISO 4217 code".into());
    Err(err)
}

/// Decode a raw topic payload into a typed envelope.
///
/// Any error here is permanent: the message is rejected and never retried.
pub fn decode(
    payload: Option<&[u8]>,
    transport: TransportMetadata,
) -> Result<EventEnvelope, ValidationError> {
    let payload = match payload {
        Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => bytes,
        _ => return Err(ValidationError::EmptyPayload),
    };

    let event: OrderCreatedEvent = serde_json::from_slice(payload)?;
    event.validate()?;

    if event.total.is_sign_negative() {
        return Err(ValidationError::NegativeTotal(event.total));
    }

    Ok(EventEnvelope { event, transport })
}
