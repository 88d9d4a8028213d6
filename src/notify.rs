//! Outbound notification seam.
//!
//! The email service is an external collaborator with a `{to, template,
//! data}` contract. Sends are best-effort and fire-and-forget: a booking
//! confirmation must never block on, or fail because of, email delivery.

use crate::types::{Booking, UserId};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Template name for booking confirmations
pub const TEMPLATE_BOOKING_CONFIRMED: &str = "booking-confirmed";

/// A message handed to the email service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    /// Recipient user
    pub to: UserId,
    /// Template name
    pub template: String,
    /// Template data
    pub data: serde_json::Value,
}

/// Outbound email collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one message. Failures are the implementation's problem to
    /// log/retry; callers never act on them.
    async fn send(&self, message: EmailMessage);
}

/// Default notifier that only logs; stands in for the real email service.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, message: EmailMessage) {
        tracing::info!(
            to = %message.to,
            template = message.template,
            "email send (logging notifier)"
        );
    }
}

/// Spawns a best-effort confirmation email for a booking. Returns
/// immediately; the send happens on a detached task.
pub fn send_confirmation(notifier: Arc<dyn Notifier>, booking: &Booking) {
    let message = EmailMessage {
        to: booking.user_id,
        template: TEMPLATE_BOOKING_CONFIRMED.to_string(),
        data: json!({
            "bookingId": booking.id.to_string(),
            "eventId": booking.event_id.to_string(),
            "lines": booking.line_items,
            "total_cents": booking.total_amount().map(|m| m.cents()),
        }),
    };
    tokio::spawn(async move {
        notifier.send(message).await;
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{AccessCode, Booking, BookingId, EventId, LineItem, Money};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: EmailMessage) {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(message);
            }
        }
    }

    #[tokio::test]
    async fn confirmation_is_fire_and_forget() {
        let notifier = Arc::new(RecordingNotifier::default());
        let booking = Booking::new(
            BookingId::new(),
            UserId::new(),
            EventId::new(),
            vec![LineItem::new(
                "General".to_string(),
                1,
                Money::from_cents(100),
            )],
            AccessCode::generate(),
            chrono::Utc::now(),
        );

        send_confirmation(notifier.clone(), &booking);
        // Let the detached task run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, TEMPLATE_BOOKING_CONFIRMED);
        assert_eq!(sent[0].to, booking.user_id);
    }
}
