//! Storage seams for the ticketing core.
//!
//! Three traits split the persistent surface by coordination requirements:
//!
//! - [`TicketPool`] is the only seam needing strict mutual exclusion: its
//!   `try_reserve` must be a linearizable check-and-increment so two callers
//!   racing for the last unit cannot both succeed.
//! - [`BookingStore`] needs only per-booking atomicity, which the
//!   conditional `transition_status` / `mark_checked_in` operations provide.
//! - [`EventCatalog`] is plain reads plus organizer-driven edits.
//!
//! Implementations: [`memory`] for tests and single-process deployments,
//! [`postgres`] for durable multi-process deployments.

pub mod memory;
pub mod postgres;

use crate::error::TicketingError;
use crate::types::{AccessCode, Booking, BookingId, BookingStatus, EventId, EventRecord, LineItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Shape checks every catalog runs before accepting an event: at least one
/// ticket type, unique type names, counters within bounds.
pub(crate) fn validate_event(event: &EventRecord) -> Result<(), TicketingError> {
    if event.ticket_types.is_empty() {
        return Err(TicketingError::validation(
            "event must define at least one ticket type",
        ));
    }
    for (i, tt) in event.ticket_types.iter().enumerate() {
        if event.ticket_types[..i].iter().any(|t| t.name == tt.name) {
            return Err(TicketingError::validation(format!(
                "duplicate ticket type '{}'",
                tt.name
            )));
        }
        if tt.sold > tt.capacity {
            return Err(TicketingError::validation(format!(
                "ticket type '{}' has sold {} above capacity {}",
                tt.name, tt.sold, tt.capacity
            )));
        }
    }
    Ok(())
}

/// Read/write access to event records and their ticket-type metadata.
#[async_trait]
pub trait EventCatalog: Send + Sync {
    /// Stores a new event.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Validation`] if the event has no ticket
    /// types, duplicate type names, or an id already in use, and
    /// [`TicketingError::Persistence`] if the store is unavailable.
    async fn insert_event(&self, event: EventRecord) -> Result<(), TicketingError>;

    /// Loads an event by id.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the store is unavailable.
    async fn get_event(&self, event_id: EventId) -> Result<Option<EventRecord>, TicketingError>;

    /// Changes a ticket type's capacity after sales exist (explicit organizer
    /// re-issue). The new capacity must still cover everything already sold.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::EventNotFound`] for an unknown event,
    /// [`TicketingError::Validation`] for an unknown ticket type or a
    /// capacity below the current sold count.
    async fn reissue_capacity(
        &self,
        event_id: EventId,
        ticket_type: &str,
        new_capacity: u32,
    ) -> Result<(), TicketingError>;
}

/// Per-event, per-ticket-type capacity/sold counters.
#[async_trait]
pub trait TicketPool: Send + Sync {
    /// Atomically checks `sold + quantity <= capacity` and increments `sold`
    /// as a single indivisible step. No mutation happens on failure.
    ///
    /// Linearizable per `(event_id, ticket_type)`: under a race for the last
    /// unit, exactly one caller wins.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::InsufficientCapacity`] naming the type when
    /// the pool cannot cover the request, [`TicketingError::EventNotFound`] /
    /// [`TicketingError::Validation`] for unknown event or type, and
    /// [`TicketingError::Persistence`] if the store is unavailable.
    async fn try_reserve(
        &self,
        event_id: EventId,
        ticket_type: &str,
        quantity: u32,
    ) -> Result<(), TicketingError>;

    /// Decrements `sold` by `quantity`, floored at 0. Used on cancellation
    /// and hold expiry. A would-be-negative decrement clamps and logs; an
    /// unknown event or type is a logged no-op so compensation never fails.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the store is unavailable.
    async fn release(
        &self,
        event_id: EventId,
        ticket_type: &str,
        quantity: u32,
    ) -> Result<(), TicketingError>;

    /// Releases every line of a booking as one all-or-nothing step. Either
    /// all decrements apply or none do, so a failure leaves no partially
    /// released booking behind and the whole release can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the store is unavailable;
    /// no decrement has been applied in that case.
    async fn release_all(
        &self,
        event_id: EventId,
        lines: &[LineItem],
    ) -> Result<(), TicketingError>;
}

/// Booking records and their per-booking atomic updates.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Persists a new booking. The access code must be unique across all
    /// bookings ever stored.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Validation`] on a duplicate booking id or
    /// access code, [`TicketingError::Persistence`] if the write fails.
    async fn insert(&self, booking: Booking) -> Result<(), TicketingError>;

    /// Loads a booking by id.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the store is unavailable.
    async fn get(&self, id: BookingId) -> Result<Option<Booking>, TicketingError>;

    /// Loads a booking by its access code (the check-in credential).
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the store is unavailable.
    async fn find_by_access_code(
        &self,
        code: &AccessCode,
    ) -> Result<Option<Booking>, TicketingError>;

    /// Whether any booking already holds this access code.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the store is unavailable.
    async fn access_code_exists(&self, code: &AccessCode) -> Result<bool, TicketingError>;

    /// Conditionally moves a booking from `from` to `to`, recording the
    /// transition timestamp. Returns `true` if this call performed the
    /// transition, `false` if the booking was not in `from` (e.g. a
    /// concurrent caller won the race). The compare-and-set is what makes
    /// cancellation's inventory release exactly-once.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::BookingNotFound`] for an unknown id and
    /// [`TicketingError::Persistence`] if the store is unavailable.
    async fn transition_status(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, TicketingError>;

    /// Conditionally flips `checked_in` to true for a confirmed booking.
    /// Returns `true` if this call performed the check-in, `false` if the
    /// booking was already checked in (or not confirmed). At-most-once is
    /// enforced here, not client-side, because scanners retry.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::BookingNotFound`] for an unknown id and
    /// [`TicketingError::Persistence`] if the store is unavailable.
    async fn mark_checked_in(
        &self,
        id: BookingId,
        at: DateTime<Utc>,
    ) -> Result<bool, TicketingError>;

    /// Bookings still in `Created` whose `created_at` is at or before
    /// `cutoff` — abandoned holds due for cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the store is unavailable.
    async fn stale_holds(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, TicketingError>;

    /// Like [`BookingStore::stale_holds`] but scoped to one event; used by
    /// check-on-read expiry when a reservation hits capacity pressure.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the store is unavailable.
    async fn stale_holds_for_event(
        &self,
        event_id: EventId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, TicketingError>;
}
