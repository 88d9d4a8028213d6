//! Booking lifecycle: the reservation/commit protocol.
//!
//! A purchase spanning multiple ticket types is all-or-nothing. Reservations
//! are attempted in a stable order (ticket-type name ascending, which also
//! rules out lock-ordering deadlock in lock-based pools) and recorded in an
//! explicit [`ReservationLog`]; any failure replays the log in reverse as
//! compensating releases. The log is a plain data structure, not exception
//! unwinding, so the compensation path is testable on its own.
//!
//! Inventory is decremented at `Created` (reserve-then-pay). Holds that never
//! confirm are expired either by the background sweeper or lazily when a
//! conflicting reservation hits capacity pressure.

use crate::clock::Clock;
use crate::config::BookingConfig;
use crate::error::TicketingError;
use crate::expiry::hold_expired;
use crate::notify::{Notifier, send_confirmation};
use crate::store::{BookingStore, EventCatalog, TicketPool};
use crate::types::{
    AccessCode, Booking, BookingId, BookingStatus, EventId, EventRecord, LineItem, PurchaseLine,
    UserId,
};
use std::sync::Arc;

// ============================================================================
// Reservation log (saga steps)
// ============================================================================

/// One committed reservation step, held so it can be compensated.
#[derive(Clone, Debug, PartialEq, Eq)]
struct CommittedReservation {
    event_id: EventId,
    ticket_type: String,
    quantity: u32,
}

/// Explicit record of reservations committed within one purchase request.
///
/// On failure, [`ReservationLog::rollback`] releases every committed step in
/// reverse order. Release itself cannot fail the compensation: individual
/// store errors are logged and the remaining steps still run.
#[derive(Debug, Default)]
pub(crate) struct ReservationLog {
    steps: Vec<CommittedReservation>,
}

impl ReservationLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, event_id: EventId, ticket_type: &str, quantity: u32) {
        self.steps.push(CommittedReservation {
            event_id,
            ticket_type: ticket_type.to_string(),
            quantity,
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.steps.len()
    }

    /// Releases all committed steps, newest first.
    pub(crate) async fn rollback(&mut self, pool: &dyn TicketPool) {
        while let Some(step) = self.steps.pop() {
            if let Err(e) = pool
                .release(step.event_id, &step.ticket_type, step.quantity)
                .await
            {
                tracing::error!(
                    event_id = %step.event_id,
                    ticket_type = step.ticket_type,
                    quantity = step.quantity,
                    error = %e,
                    "compensating release failed; pool counter may be inflated"
                );
            }
        }
    }
}

// ============================================================================
// Booking service
// ============================================================================

/// Coordinates the ticket pool, booking ledger, and notifier into the
/// purchase / confirm / cancel operations.
pub struct BookingService {
    catalog: Arc<dyn EventCatalog>,
    pool: Arc<dyn TicketPool>,
    bookings: Arc<dyn BookingStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: BookingConfig,
}

impl BookingService {
    /// Creates a new `BookingService`
    #[must_use]
    pub fn new(
        catalog: Arc<dyn EventCatalog>,
        pool: Arc<dyn TicketPool>,
        bookings: Arc<dyn BookingStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: BookingConfig,
    ) -> Self {
        Self {
            catalog,
            pool,
            bookings,
            notifier,
            clock,
            config,
        }
    }

    /// Purchases tickets: validates the request, reserves inventory
    /// atomically across all lines, and persists a `Created` booking with a
    /// fresh unique access code. The caller is only told "booked" after the
    /// booking is durable.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::Validation`] for a malformed request
    /// - [`TicketingError::EventNotFound`] for an unknown event
    /// - [`TicketingError::InsufficientCapacity`] naming the first ticket
    ///   type that could not be covered; no inventory is consumed
    /// - [`TicketingError::Persistence`] if the store failed after
    ///   reservation; compensating releases have already run
    pub async fn purchase(
        &self,
        user_id: UserId,
        event_id: EventId,
        lines: Vec<PurchaseLine>,
    ) -> Result<Booking, TicketingError> {
        let event = self
            .catalog
            .get_event(event_id)
            .await?
            .ok_or(TicketingError::EventNotFound(event_id))?;
        let lines = validate_purchase(&event, lines)?;

        // Reserve each line, keeping an explicit log for compensation.
        let mut log = ReservationLog::new();
        for line in &lines {
            if let Err(e) = self.reserve_line(event_id, line).await {
                log.rollback(self.pool.as_ref()).await;
                return Err(e);
            }
            log.record(event_id, &line.ticket_type, line.quantity);
        }

        // Price snapshot comes from the record read at validation time.
        let line_items: Vec<LineItem> = lines
            .iter()
            .filter_map(|line| {
                event
                    .ticket_type(&line.ticket_type)
                    .map(|tt| LineItem::new(line.ticket_type.clone(), line.quantity, tt.price))
            })
            .collect();

        let access_code = match self.unique_access_code().await {
            Ok(code) => code,
            Err(e) => {
                log.rollback(self.pool.as_ref()).await;
                return Err(e);
            }
        };

        let booking = Booking::new(
            BookingId::new(),
            user_id,
            event_id,
            line_items,
            access_code,
            self.clock.now(),
        );

        // Persist before reporting success. A failed write means the
        // reservation must not survive ("phantom sold" counts).
        if let Err(e) = self.bookings.insert(booking.clone()).await {
            log.rollback(self.pool.as_ref()).await;
            tracing::warn!(booking_id = %booking.id, error = %e, "booking persist failed, reservation compensated");
            return Err(TicketingError::persistence(e.to_string()));
        }

        tracing::info!(
            booking_id = %booking.id,
            %event_id,
            %user_id,
            lines = booking.line_items.len(),
            "booking created"
        );
        Ok(booking)
    }

    /// Reserves one line, lazily expiring stale holds on capacity pressure
    /// and retrying once if that freed anything.
    async fn reserve_line(
        &self,
        event_id: EventId,
        line: &PurchaseLine,
    ) -> Result<(), TicketingError> {
        match self
            .pool
            .try_reserve(event_id, &line.ticket_type, line.quantity)
            .await
        {
            Ok(()) => Ok(()),
            Err(short @ TicketingError::InsufficientCapacity { .. }) => {
                // Check-on-read expiry: abandoned holds may be occupying the
                // capacity this request needs.
                let released = self.expire_stale_holds_for_event(event_id).await?;
                if released == 0 {
                    return Err(short);
                }
                self.pool
                    .try_reserve(event_id, &line.ticket_type, line.quantity)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Generates an access code that no existing booking holds.
    async fn unique_access_code(&self) -> Result<AccessCode, TicketingError> {
        for _ in 0..self.config.access_code_attempts.max(1) {
            let code = AccessCode::generate();
            if !self.bookings.access_code_exists(&code).await? {
                return Ok(code);
            }
        }
        Err(TicketingError::persistence(
            "could not allocate a unique access code",
        ))
    }

    /// Confirms a `Created` booking after payment success and fires the
    /// best-effort confirmation email. Confirming an already-confirmed
    /// booking is a no-op returning the booking.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::BookingNotFound`] for an unknown id
    /// - [`TicketingError::InvalidTransition`] if the booking was cancelled
    /// - [`TicketingError::Persistence`] if the store is unavailable
    pub async fn confirm(&self, booking_id: BookingId) -> Result<Booking, TicketingError> {
        let booking = self
            .bookings
            .get(booking_id)
            .await?
            .ok_or(TicketingError::BookingNotFound(booking_id))?;

        match booking.status {
            BookingStatus::Confirmed => return Ok(booking),
            BookingStatus::Cancelled => {
                return Err(TicketingError::InvalidTransition {
                    booking_id,
                    from: BookingStatus::Cancelled,
                    to: BookingStatus::Confirmed,
                });
            }
            BookingStatus::Created => {}
        }

        let now = self.clock.now();
        let transitioned = self
            .bookings
            .transition_status(
                booking_id,
                BookingStatus::Created,
                BookingStatus::Confirmed,
                now,
            )
            .await?;
        if !transitioned {
            // Lost a race; report based on where the booking ended up.
            let current = self
                .bookings
                .get(booking_id)
                .await?
                .ok_or(TicketingError::BookingNotFound(booking_id))?;
            if current.status == BookingStatus::Confirmed {
                return Ok(current);
            }
            return Err(TicketingError::InvalidTransition {
                booking_id,
                from: current.status,
                to: BookingStatus::Confirmed,
            });
        }

        let confirmed = self
            .bookings
            .get(booking_id)
            .await?
            .ok_or(TicketingError::BookingNotFound(booking_id))?;
        send_confirmation(self.notifier.clone(), &confirmed);
        tracing::info!(%booking_id, "booking confirmed");
        Ok(confirmed)
    }

    /// Cancels a booking and releases its inventory exactly once. Cancelling
    /// an already-cancelled booking is a no-op, not a double release.
    ///
    /// If the pool release fails, the booking is moved back out of
    /// `Cancelled` before the error surfaces, so a retried cancel runs the
    /// release again instead of short-circuiting with the units still
    /// counted as sold.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::BookingNotFound`] for an unknown id
    /// - [`TicketingError::Persistence`] (retryable) if the store or pool is
    ///   unavailable; no inventory has been half-released
    pub async fn cancel(&self, booking_id: BookingId) -> Result<(), TicketingError> {
        // Two attempts cover a concurrent Created -> Confirmed transition.
        for _ in 0..2 {
            let booking = self
                .bookings
                .get(booking_id)
                .await?
                .ok_or(TicketingError::BookingNotFound(booking_id))?;

            if booking.status == BookingStatus::Cancelled {
                return Ok(());
            }

            let transitioned = self
                .bookings
                .transition_status(
                    booking_id,
                    booking.status,
                    BookingStatus::Cancelled,
                    self.clock.now(),
                )
                .await?;
            if !transitioned {
                continue;
            }

            // This caller won the compare-and-set, so this is the one and
            // only release for the booking. The release is all-or-nothing.
            if let Err(release_err) = self
                .pool
                .release_all(booking.event_id, &booking.line_items)
                .await
            {
                // Undo the transition so the inventory is not stranded as
                // sold behind a Cancelled booking; cancel is the only writer
                // that moves a booking out of Cancelled.
                let reverted = self
                    .bookings
                    .transition_status(
                        booking_id,
                        BookingStatus::Cancelled,
                        booking.status,
                        self.clock.now(),
                    )
                    .await?;
                if reverted {
                    tracing::warn!(
                        %booking_id,
                        error = %release_err,
                        "inventory release failed, cancellation rolled back for retry"
                    );
                } else {
                    tracing::error!(
                        %booking_id,
                        error = %release_err,
                        "inventory release failed and rollback lost its compare-and-set"
                    );
                }
                return Err(release_err);
            }

            tracing::info!(%booking_id, "booking cancelled, inventory released");
            return Ok(());
        }
        Err(TicketingError::persistence(
            "booking status kept changing during cancellation",
        ))
    }

    /// Cancels all abandoned `Created` holds older than the configured hold
    /// duration. Returns how many were cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the stale-hold scan fails;
    /// individual cancellation failures are logged and skipped.
    pub async fn expire_stale_holds(&self) -> Result<usize, TicketingError> {
        let now = self.clock.now();
        let cutoff = now - self.config.hold_duration();
        let stale = self.bookings.stale_holds(cutoff).await?;
        Ok(self.cancel_expired(stale, now).await)
    }

    /// Like [`BookingService::expire_stale_holds`], scoped to one event.
    /// Used by check-on-read expiry under capacity pressure.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the stale-hold scan fails.
    pub async fn expire_stale_holds_for_event(
        &self,
        event_id: EventId,
    ) -> Result<usize, TicketingError> {
        let now = self.clock.now();
        let cutoff = now - self.config.hold_duration();
        let stale = self.bookings.stale_holds_for_event(event_id, cutoff).await?;
        Ok(self.cancel_expired(stale, now).await)
    }

    async fn cancel_expired(&self, stale: Vec<Booking>, now: chrono::DateTime<chrono::Utc>) -> usize {
        let mut cancelled = 0;
        for booking in stale {
            // The store already filtered by cutoff; re-check with the pure
            // predicate in case an implementation is approximate.
            if !hold_expired(now, booking.created_at, self.config.hold_duration()) {
                continue;
            }
            match self.cancel(booking.id).await {
                Ok(()) => {
                    tracing::info!(booking_id = %booking.id, "expired abandoned hold");
                    cancelled += 1;
                }
                Err(e) => {
                    tracing::warn!(booking_id = %booking.id, error = %e, "failed to expire hold");
                }
            }
        }
        cancelled
    }

    /// Booking lookup for callers that already know the reference.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::BookingNotFound`] for an unknown id and
    /// [`TicketingError::Persistence`] if the store is unavailable.
    pub async fn get_booking(&self, booking_id: BookingId) -> Result<Booking, TicketingError> {
        self.bookings
            .get(booking_id)
            .await?
            .ok_or(TicketingError::BookingNotFound(booking_id))
    }
}

/// Validates the request shape and returns the lines in reservation order.
fn validate_purchase(
    event: &EventRecord,
    mut lines: Vec<PurchaseLine>,
) -> Result<Vec<PurchaseLine>, TicketingError> {
    if lines.is_empty() {
        return Err(TicketingError::validation(
            "purchase must contain at least one line item",
        ));
    }
    for line in &lines {
        if line.quantity == 0 {
            return Err(TicketingError::validation(format!(
                "quantity for '{}' must be at least 1",
                line.ticket_type
            )));
        }
        if event.ticket_type(&line.ticket_type).is_none() {
            return Err(TicketingError::validation(format!(
                "unknown ticket type '{}' for event '{}'",
                line.ticket_type, event.title
            )));
        }
    }
    // Stable order: ticket-type name ascending.
    lines.sort_by(|a, b| a.ticket_type.cmp(&b.ticket_type));
    for pair in lines.windows(2) {
        if pair[0].ticket_type == pair[1].ticket_type {
            return Err(TicketingError::validation(format!(
                "duplicate line for ticket type '{}'",
                pair[0].ticket_type
            )));
        }
    }
    Ok(lines)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::notify::LoggingNotifier;
    use crate::store::memory::{InMemoryBookingStore, InMemoryEventCatalog};
    use crate::types::{Money, OrganizerId, TicketType};
    use chrono::Utc;

    fn test_config() -> BookingConfig {
        BookingConfig {
            hold_duration_secs: 900,
            sweep_interval_secs: 60,
            access_code_attempts: 5,
        }
    }

    async fn setup() -> (Arc<InMemoryEventCatalog>, BookingService, EventId) {
        let catalog = Arc::new(InMemoryEventCatalog::new());
        let event = EventRecord {
            id: EventId::new(),
            title: "Conf2024".to_string(),
            description: String::new(),
            category: "Tech".to_string(),
            venue: "Main Hall".to_string(),
            starts_at: Utc::now(),
            organizer_id: OrganizerId::new(),
            ticket_types: vec![
                TicketType::new("General".to_string(), Money::from_cents(2_500), 2),
                TicketType::new("VIP".to_string(), Money::from_cents(10_000), 1),
            ],
        };
        let event_id = event.id;
        catalog.insert_event(event).await.unwrap();

        let service = BookingService::new(
            catalog.clone(),
            catalog.clone(),
            Arc::new(InMemoryBookingStore::new()),
            Arc::new(LoggingNotifier),
            Arc::new(SystemClock),
            test_config(),
        );
        (catalog, service, event_id)
    }

    async fn sold(catalog: &InMemoryEventCatalog, event_id: EventId, name: &str) -> u32 {
        catalog
            .get_event(event_id)
            .await
            .unwrap()
            .unwrap()
            .ticket_type(name)
            .unwrap()
            .sold
    }

    #[tokio::test]
    async fn purchase_rejects_malformed_requests() {
        let (_, service, event_id) = setup().await;
        let user = UserId::new();

        let err = service.purchase(user, event_id, vec![]).await.unwrap_err();
        assert!(matches!(err, TicketingError::Validation { .. }));

        let err = service
            .purchase(user, event_id, vec![PurchaseLine::new("General".into(), 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, TicketingError::Validation { .. }));

        let err = service
            .purchase(user, event_id, vec![PurchaseLine::new("Balcony".into(), 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, TicketingError::Validation { .. }));

        let err = service
            .purchase(
                user,
                event_id,
                vec![
                    PurchaseLine::new("General".into(), 1),
                    PurchaseLine::new("General".into(), 1),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TicketingError::Validation { .. }));

        let err = service
            .purchase(user, EventId::new(), vec![PurchaseLine::new("General".into(), 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, TicketingError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn purchase_snapshots_prices_and_persists() {
        let (catalog, service, event_id) = setup().await;
        let booking = service
            .purchase(
                UserId::new(),
                event_id,
                vec![
                    PurchaseLine::new("VIP".into(), 1),
                    PurchaseLine::new("General".into(), 2),
                ],
            )
            .await
            .unwrap();

        assert_eq!(booking.status, BookingStatus::Created);
        // Lines come back in reservation (name-ascending) order.
        assert_eq!(booking.line_items[0].ticket_type, "General");
        assert_eq!(booking.line_items[0].unit_price, Money::from_cents(2_500));
        assert_eq!(booking.line_items[1].ticket_type, "VIP");
        assert_eq!(sold(&catalog, event_id, "General").await, 2);
        assert_eq!(sold(&catalog, event_id, "VIP").await, 1);
    }

    #[tokio::test]
    async fn multi_line_failure_rolls_back_fully() {
        let (catalog, service, event_id) = setup().await;
        // Drain VIP first so the second line of the combined purchase fails.
        service
            .purchase(
                UserId::new(),
                event_id,
                vec![PurchaseLine::new("VIP".into(), 1)],
            )
            .await
            .unwrap();

        let err = service
            .purchase(
                UserId::new(),
                event_id,
                vec![
                    PurchaseLine::new("General".into(), 2),
                    PurchaseLine::new("VIP".into(), 1),
                ],
            )
            .await
            .unwrap_err();
        assert!(
            matches!(&err, TicketingError::InsufficientCapacity { ticket_type, .. } if ticket_type == "VIP")
        );
        // The General reservation from the failed purchase was compensated.
        assert_eq!(sold(&catalog, event_id, "General").await, 0);
        assert_eq!(sold(&catalog, event_id, "VIP").await, 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (catalog, service, event_id) = setup().await;
        let booking = service
            .purchase(
                UserId::new(),
                event_id,
                vec![PurchaseLine::new("General".into(), 2)],
            )
            .await
            .unwrap();
        assert_eq!(sold(&catalog, event_id, "General").await, 2);

        service.cancel(booking.id).await.unwrap();
        assert_eq!(sold(&catalog, event_id, "General").await, 0);

        // Second cancel: no-op, no double release.
        service.cancel(booking.id).await.unwrap();
        assert_eq!(sold(&catalog, event_id, "General").await, 0);
    }

    #[tokio::test]
    async fn confirm_then_cancel_releases_inventory() {
        let (catalog, service, event_id) = setup().await;
        let booking = service
            .purchase(
                UserId::new(),
                event_id,
                vec![PurchaseLine::new("General".into(), 1)],
            )
            .await
            .unwrap();

        let confirmed = service.confirm(booking.id).await.unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert!(confirmed.confirmed_at.is_some());

        // Confirm is idempotent.
        service.confirm(booking.id).await.unwrap();

        service.cancel(booking.id).await.unwrap();
        assert_eq!(sold(&catalog, event_id, "General").await, 0);

        // A cancelled booking cannot be re-confirmed.
        let err = service.confirm(booking.id).await.unwrap_err();
        assert!(matches!(err, TicketingError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn reservation_log_rolls_back_in_reverse() {
        let (catalog, _service, event_id) = setup().await;
        catalog.try_reserve(event_id, "General", 2).await.unwrap();
        catalog.try_reserve(event_id, "VIP", 1).await.unwrap();

        let mut log = ReservationLog::new();
        log.record(event_id, "General", 2);
        log.record(event_id, "VIP", 1);
        assert_eq!(log.len(), 2);

        log.rollback(catalog.as_ref() as &dyn TicketPool).await;
        assert_eq!(log.len(), 0);
        assert_eq!(sold(&catalog, event_id, "General").await, 0);
        assert_eq!(sold(&catalog, event_id, "VIP").await, 0);
    }
}
