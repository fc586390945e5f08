//! Messaging gateway - The outbound delivery seam used by the notification sweep.
//!
//! The sweep never talks to a mail server or push service itself; it hands each
//! message to a [`MessagingGateway`]. A failed delivery is logged and counted by
//! the sweep but never rolls back the stored notification.

use crate::{core::user::NotificationChannel, errors::Result};
use async_trait::async_trait;
use tracing::info;

/// A message ready for delivery on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Recipient user
    pub user_id: i64,
    /// Delivery channel
    pub channel: NotificationChannel,
    /// Channel address (the user's email for both channels)
    pub recipient: String,
    /// Short subject line
    pub subject: String,
    /// Message body
    pub body: String,
}

/// Acknowledgement returned by a gateway for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Channel the message went out on
    pub channel: NotificationChannel,
    /// Gateway-specific message reference
    pub reference: String,
}

/// Outbound delivery of notification messages.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Delivers one message.
    ///
    /// # Errors
    /// Returns [`Error::Delivery`] when the message could not be delivered.
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt>;
}

/// Gateway that writes each message to the tracing log. Used by the binary when no
/// external provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogGateway;

#[async_trait]
impl MessagingGateway for LogGateway {
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt> {
        info!(
            user_id = message.user_id,
            channel = message.channel.as_str(),
            recipient = %message.recipient,
            subject = %message.subject,
            "{}",
            message.body
        );
        Ok(DeliveryReceipt {
            channel: message.channel,
            reference: format!("log-{}-{}", message.channel.as_str(), message.user_id),
        })
    }
}
