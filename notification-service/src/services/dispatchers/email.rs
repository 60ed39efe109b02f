use super::{order_confirmation, ChannelError, DispatchReceipt, NotificationDispatcher, RecipientTemplate};
use crate::config::SmtpConfig;
use crate::models::{Channel, EventEnvelope};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, Error as SmtpError},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

pub struct SmtpDispatcher {
    config: SmtpConfig,
    recipients: RecipientTemplate,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpDispatcher {
    pub fn new(config: SmtpConfig) -> Result<Self, ChannelError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| ChannelError::Configuration(format!("Failed to create SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            recipients: RecipientTemplate::new(config.recipient_template.clone()),
            config,
            transport,
        })
    }

    fn build_message(&self, envelope: &EventEnvelope) -> Result<(String, Message), ChannelError> {
        let from_mailbox: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| ChannelError::Configuration(format!("Invalid from address: {}", e)))?;

        let to = self.recipients.resolve(&envelope.event.user_id)?;
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| ChannelError::InvalidRecipient(format!("Invalid recipient {}: {}", to, e)))?;

        let (subject, body) = order_confirmation(envelope);

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| ChannelError::Rejected(format!("Failed to build message: {}", e)))?;

        Ok((to, message))
    }
}

fn classify_smtp_error(err: SmtpError) -> ChannelError {
    if err.is_permanent() {
        ChannelError::Rejected(format!("SMTP permanent failure: {}", err))
    } else if err.is_timeout() {
        ChannelError::Timeout(format!("SMTP timed out: {}", err))
    } else if err.is_transient() {
        ChannelError::Unavailable(format!("SMTP transient failure: {}", err))
    } else {
        ChannelError::Connection(format!("Failed to send email: {}", err))
    }
}

#[async_trait]
impl NotificationDispatcher for SmtpDispatcher {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, envelope: &EventEnvelope) -> Result<DispatchReceipt, ChannelError> {
        let (to, message) = self.build_message(envelope)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(classify_smtp_error)?;

        let provider_id = response.message().next().map(|s| s.to_string());

        tracing::info!(
            event_id = %envelope.event_id(),
            to = %to,
            "Order confirmation email sent"
        );

        Ok(DispatchReceipt::new(provider_id))
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| ChannelError::Connection(format!("SMTP connection test failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderCreatedEvent, TransportMetadata};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn config(template: &str) -> SmtpConfig {
        SmtpConfig {
            host: "smtp.test.local".to_string(),
            port: 587,
            user: "test".to_string(),
            password: "test".to_string(),
            from_email: "orders@example.com".to_string(),
            from_name: "Orders".to_string(),
            recipient_template: template.to_string(),
        }
    }

    fn envelope(user_id: &str) -> EventEnvelope {
        EventEnvelope {
            event: OrderCreatedEvent {
                event_id: "e1".to_string(),
                order_id: "o1".to_string(),
                user_id: user_id.to_string(),
                total: Decimal::new(4250, 2),
                currency: "USD".to_string(),
                created_at: Utc::now(),
            },
            transport: TransportMetadata {
                topic: "orders.created".to_string(),
                partition: 0,
                offset: 0,
                received_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_build_message_resolves_recipient() {
        let dispatcher = SmtpDispatcher::new(config("{user_id}@mail.example.com")).unwrap();
        let (to, _message) = dispatcher.build_message(&envelope("u1")).unwrap();
        assert_eq!(to, "u1@mail.example.com");
    }

    #[tokio::test]
    async fn test_unparseable_recipient_is_permanent() {
        let dispatcher = SmtpDispatcher::new(config("{user_id}")).unwrap();
        let err = dispatcher.build_message(&envelope("not an address")).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidRecipient(_)));
        assert!(!err.is_transient());
    }
}
