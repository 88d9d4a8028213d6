//! Event ticketing core: ticket inventory, booking lifecycle, and QR
//! check-in.
//!
//! # Architecture
//!
//! Four pieces cooperate around three storage seams:
//!
//! - **Ticket pool** ([`store::TicketPool`]): per-event, per-ticket-type
//!   capacity/sold counters. `try_reserve` is a linearizable
//!   check-and-increment, so overselling is impossible even under
//!   concurrent purchases of the last unit.
//! - **Booking ledger** ([`store::BookingStore`]): one record per purchase,
//!   moving `created -> confirmed -> cancelled` via conditional writes.
//!   Inventory is taken at `created` (reserve-then-pay); payment confirms,
//!   cancellation or hold expiry releases exactly once.
//! - **Reservation protocol** ([`booking::BookingService`]): multi-line
//!   purchases reserve in a stable order with an explicit log of committed
//!   steps; any failure replays the log in reverse as compensating
//!   releases, so a purchase is all-or-nothing.
//! - **Check-in gate** ([`checkin::CheckInGate`]): admits by access code,
//!   at most once, only for the event's own organizer.
//!
//! [`app::TicketingApp`] wires everything together over either the
//! in-memory stores or `PostgreSQL`, and owns the background sweeper that
//! expires abandoned holds.
//!
//! # Example
//!
//! ```no_run
//! use ticketline::app::{NewEvent, TicketingApp};
//! use ticketline::config::Config;
//! use ticketline::types::{Money, OrganizerId, PurchaseLine, TicketType, UserId};
//!
//! # async fn run() -> Result<(), ticketline::error::TicketingError> {
//! let app = TicketingApp::in_memory(Config::from_env());
//! let organizer = OrganizerId::new();
//! let event = app
//!     .create_event(
//!         organizer,
//!         NewEvent {
//!             title: "Conf2024".into(),
//!             description: String::new(),
//!             category: "Tech".into(),
//!             venue: "Main Hall".into(),
//!             starts_at: chrono::Utc::now(),
//!             ticket_types: vec![TicketType::new(
//!                 "General".into(),
//!                 Money::from_cents(2_500),
//!                 100,
//!             )],
//!         },
//!     )
//!     .await?;
//!
//! let booking = app
//!     .purchase(
//!         UserId::new(),
//!         event.id,
//!         vec![PurchaseLine::new("General".into(), 2)],
//!     )
//!     .await?;
//! let booking = app.confirm(booking.id).await?;
//! app.check_in(&booking.access_code, organizer).await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod booking;
pub mod checkin;
pub mod clock;
pub mod config;
pub mod error;
pub mod expiry;
pub mod notify;
pub mod store;
pub mod types;

pub use app::{NewEvent, TicketingApp};
pub use booking::BookingService;
pub use checkin::CheckInGate;
pub use config::Config;
pub use error::TicketingError;
pub use types::{
    AccessCode, AttendeeSummary, Booking, BookingId, BookingStatus, EventId, EventRecord,
    LineItem, Money, OrganizerId, PurchaseLine, TicketType, UserId,
};
