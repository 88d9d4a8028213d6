//! End-to-end walkthrough on in-memory stores: an organizer lists a
//! conference, a buyer books and pays, and the door scans the ticket twice.

use chrono::{Duration, Utc};
use ticketline::app::{NewEvent, TicketingApp};
use ticketline::config::Config;
use ticketline::error::TicketingError;
use ticketline::types::{Money, OrganizerId, PurchaseLine, TicketType, UserId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), TicketingError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let mut app = TicketingApp::in_memory(config);
    app.start_sweeper();

    let organizer = OrganizerId::new();
    let event = app
        .create_event(
            organizer,
            NewEvent {
                title: "Conf2024".to_string(),
                description: "Annual tech conference".to_string(),
                category: "Tech".to_string(),
                venue: "Convention Center".to_string(),
                starts_at: Utc::now() + Duration::days(30),
                ticket_types: vec![
                    TicketType::new("General".to_string(), Money::from_cents(2_500), 100),
                    TicketType::new("VIP".to_string(), Money::from_cents(10_000), 10),
                ],
            },
        )
        .await?;
    info!(event_id = %event.id, "listed {}", event.title);

    // Buyer books 2 General + 1 VIP; inventory is held immediately.
    let buyer = UserId::new();
    let booking = app
        .purchase(
            buyer,
            event.id,
            vec![
                PurchaseLine::new("General".to_string(), 2),
                PurchaseLine::new("VIP".to_string(), 1),
            ],
        )
        .await?;
    info!(
        booking_id = %booking.id,
        total = %booking
            .total_amount()
            .unwrap_or(Money::from_cents(0)),
        "booking held"
    );

    // Payment succeeds; the hold becomes an admitting ticket.
    let booking = app.confirm(booking.id).await?;
    info!(booking_id = %booking.id, status = %booking.status, "payment confirmed");

    // First scan at the door admits.
    let summary = app.check_in(&booking.access_code, organizer).await?;
    info!(
        attendee = %summary.user_id,
        event = summary.event_title,
        admits = ?summary.admits,
        "checked in"
    );

    // Second scan of the same code is rejected.
    match app.check_in(&booking.access_code, organizer).await {
        Err(TicketingError::AlreadyCheckedIn { booking_id }) => {
            info!(%booking_id, "second scan rejected");
        }
        other => info!(?other, "unexpected second-scan outcome"),
    }

    // Another buyer holds a ticket but never pays; cancelling releases it.
    let abandoned = app
        .purchase(
            UserId::new(),
            event.id,
            vec![PurchaseLine::new("VIP".to_string(), 1)],
        )
        .await?;
    app.cancel(abandoned.id).await?;
    let remaining = app
        .get_event(event.id)
        .await?
        .ticket_type("VIP")
        .map_or(0, TicketType::available);
    info!(remaining, "VIP inventory after cancellation");

    app.shutdown().await;
    Ok(())
}
