//! Hold expiry tests driven by a fixed, manually advanced clock.
//!
//! Run with: `cargo test --test hold_expiry_test`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use chrono::{Duration, Utc};
use std::sync::Arc;
use ticketline::booking::BookingService;
use ticketline::clock::FixedClock;
use ticketline::config::BookingConfig;
use ticketline::error::TicketingError;
use ticketline::notify::LoggingNotifier;
use ticketline::store::memory::{InMemoryBookingStore, InMemoryEventCatalog};
use ticketline::store::EventCatalog;
use ticketline::types::{
    BookingStatus, EventId, EventRecord, Money, OrganizerId, PurchaseLine, TicketType, UserId,
};

const HOLD_SECS: u64 = 900;

struct Fixture {
    catalog: Arc<InMemoryEventCatalog>,
    clock: Arc<FixedClock>,
    service: BookingService,
    event_id: EventId,
}

async fn setup(capacity: u32) -> Fixture {
    let catalog = Arc::new(InMemoryEventCatalog::new());
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let event = EventRecord {
        id: EventId::new(),
        title: "Club Night".to_string(),
        description: String::new(),
        category: "Music".to_string(),
        venue: "Basement".to_string(),
        starts_at: Utc::now() + Duration::days(1),
        organizer_id: OrganizerId::new(),
        ticket_types: vec![TicketType::new(
            "General".to_string(),
            Money::from_cents(1_500),
            capacity,
        )],
    };
    let event_id = event.id;
    catalog.insert_event(event).await.unwrap();

    let service = BookingService::new(
        catalog.clone(),
        catalog.clone(),
        Arc::new(InMemoryBookingStore::new()),
        Arc::new(LoggingNotifier),
        clock.clone(),
        BookingConfig {
            hold_duration_secs: HOLD_SECS,
            sweep_interval_secs: 60,
            access_code_attempts: 5,
        },
    );
    Fixture {
        catalog,
        clock,
        service,
        event_id,
    }
}

async fn available(fx: &Fixture) -> u32 {
    fx.catalog
        .get_event(fx.event_id)
        .await
        .unwrap()
        .unwrap()
        .ticket_type("General")
        .unwrap()
        .available()
}

#[tokio::test]
async fn sweep_cancels_only_expired_holds() {
    let fx = setup(10).await;

    let old_hold = fx
        .service
        .purchase(
            UserId::new(),
            fx.event_id,
            vec![PurchaseLine::new("General".to_string(), 2)],
        )
        .await
        .unwrap();

    // A second hold created just inside the window must survive the sweep.
    fx.clock.advance(Duration::seconds(i64::try_from(HOLD_SECS).unwrap() - 60));
    let fresh_hold = fx
        .service
        .purchase(
            UserId::new(),
            fx.event_id,
            vec![PurchaseLine::new("General".to_string(), 1)],
        )
        .await
        .unwrap();

    fx.clock.advance(Duration::seconds(60));
    let expired = fx.service.expire_stale_holds().await.unwrap();
    assert_eq!(expired, 1);

    let old = fx.service.get_booking(old_hold.id).await.unwrap();
    assert_eq!(old.status, BookingStatus::Cancelled);
    let fresh = fx.service.get_booking(fresh_hold.id).await.unwrap();
    assert_eq!(fresh.status, BookingStatus::Created);
    assert_eq!(available(&fx).await, 9);
}

#[tokio::test]
async fn confirmed_bookings_survive_any_sweep() {
    let fx = setup(10).await;
    let booking = fx
        .service
        .purchase(
            UserId::new(),
            fx.event_id,
            vec![PurchaseLine::new("General".to_string(), 3)],
        )
        .await
        .unwrap();
    fx.service.confirm(booking.id).await.unwrap();

    fx.clock.advance(Duration::days(365));
    let expired = fx.service.expire_stale_holds().await.unwrap();
    assert_eq!(expired, 0);
    assert_eq!(available(&fx).await, 7);
}

/// Capacity pressure triggers check-on-read expiry: a purchase that would
/// fail succeeds by reclaiming an abandoned hold's inventory, without
/// waiting for the sweeper.
#[tokio::test]
async fn capacity_pressure_reclaims_abandoned_holds() {
    let fx = setup(1).await;

    let abandoned = fx
        .service
        .purchase(
            UserId::new(),
            fx.event_id,
            vec![PurchaseLine::new("General".to_string(), 1)],
        )
        .await
        .unwrap();

    // Sold out while the hold is live.
    let err = fx
        .service
        .purchase(
            UserId::new(),
            fx.event_id,
            vec![PurchaseLine::new("General".to_string(), 1)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TicketingError::InsufficientCapacity { .. }));

    // Once the hold ages out, the same purchase succeeds immediately.
    fx.clock.advance(Duration::seconds(i64::try_from(HOLD_SECS).unwrap()));
    let winner = fx
        .service
        .purchase(
            UserId::new(),
            fx.event_id,
            vec![PurchaseLine::new("General".to_string(), 1)],
        )
        .await
        .unwrap();
    assert_eq!(winner.status, BookingStatus::Created);

    let old = fx.service.get_booking(abandoned.id).await.unwrap();
    assert_eq!(old.status, BookingStatus::Cancelled);
    assert_eq!(available(&fx).await, 0);
}

/// An expired (cancelled) hold cannot be confirmed afterwards.
#[tokio::test]
async fn expired_holds_cannot_confirm() {
    let fx = setup(5).await;
    let booking = fx
        .service
        .purchase(
            UserId::new(),
            fx.event_id,
            vec![PurchaseLine::new("General".to_string(), 1)],
        )
        .await
        .unwrap();

    fx.clock.advance(Duration::seconds(i64::try_from(HOLD_SECS).unwrap() + 1));
    fx.service.expire_stale_holds().await.unwrap();

    let err = fx.service.confirm(booking.id).await.unwrap_err();
    assert!(matches!(
        err,
        TicketingError::InvalidTransition {
            from: BookingStatus::Cancelled,
            ..
        }
    ));
}
