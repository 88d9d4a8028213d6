//! In-memory store implementations.
//!
//! Used by the test suite and by single-process deployments (the demo
//! binary). Linearizability of `try_reserve` falls out of running the
//! check-and-increment under one write lock per catalog.

use crate::error::TicketingError;
use crate::store::{BookingStore, EventCatalog, TicketPool, validate_event};
use crate::types::{AccessCode, Booking, BookingId, BookingStatus, EventId, EventRecord, LineItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

// ============================================================================
// Event catalog + ticket pool
// ============================================================================

/// In-memory event catalog. The ticket pool counters live inside the event
/// records, so this type implements both [`EventCatalog`] and [`TicketPool`].
#[derive(Debug, Default)]
pub struct InMemoryEventCatalog {
    events: RwLock<HashMap<EventId, EventRecord>>,
}

impl InMemoryEventCatalog {
    /// Creates an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventCatalog for InMemoryEventCatalog {
    async fn insert_event(&self, event: EventRecord) -> Result<(), TicketingError> {
        validate_event(&event)?;
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Err(TicketingError::validation(format!(
                "event {} already exists",
                event.id
            )));
        }
        events.insert(event.id, event);
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<EventRecord>, TicketingError> {
        Ok(self.events.read().await.get(&event_id).cloned())
    }

    async fn reissue_capacity(
        &self,
        event_id: EventId,
        ticket_type: &str,
        new_capacity: u32,
    ) -> Result<(), TicketingError> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(&event_id)
            .ok_or(TicketingError::EventNotFound(event_id))?;
        let tt = event.ticket_type_mut(ticket_type).ok_or_else(|| {
            TicketingError::validation(format!("unknown ticket type '{ticket_type}'"))
        })?;
        if new_capacity < tt.sold {
            return Err(TicketingError::validation(format!(
                "cannot reduce capacity of '{ticket_type}' below {} already sold",
                tt.sold
            )));
        }
        tt.capacity = new_capacity;
        Ok(())
    }
}

#[async_trait]
impl TicketPool for InMemoryEventCatalog {
    async fn try_reserve(
        &self,
        event_id: EventId,
        ticket_type: &str,
        quantity: u32,
    ) -> Result<(), TicketingError> {
        // Single write lock around check + increment: this is the
        // linearization point for the no-overselling guarantee.
        let mut events = self.events.write().await;
        let event = events
            .get_mut(&event_id)
            .ok_or(TicketingError::EventNotFound(event_id))?;
        let tt = event.ticket_type_mut(ticket_type).ok_or_else(|| {
            TicketingError::validation(format!("unknown ticket type '{ticket_type}'"))
        })?;
        if !tt.has_availability(quantity) {
            return Err(TicketingError::InsufficientCapacity {
                ticket_type: ticket_type.to_string(),
                requested: quantity,
                available: tt.available(),
            });
        }
        tt.sold += quantity;
        Ok(())
    }

    async fn release(
        &self,
        event_id: EventId,
        ticket_type: &str,
        quantity: u32,
    ) -> Result<(), TicketingError> {
        let mut events = self.events.write().await;
        apply_release(&mut events, event_id, ticket_type, quantity);
        Ok(())
    }

    async fn release_all(
        &self,
        event_id: EventId,
        lines: &[LineItem],
    ) -> Result<(), TicketingError> {
        // One write lock across all lines keeps the release indivisible.
        let mut events = self.events.write().await;
        for line in lines {
            apply_release(&mut events, event_id, &line.ticket_type, line.quantity);
        }
        Ok(())
    }
}

fn apply_release(
    events: &mut HashMap<EventId, EventRecord>,
    event_id: EventId,
    ticket_type: &str,
    quantity: u32,
) {
    let Some(event) = events.get_mut(&event_id) else {
        tracing::warn!(%event_id, ticket_type, quantity, "release against unknown event");
        return;
    };
    let Some(tt) = event.ticket_type_mut(ticket_type) else {
        tracing::warn!(%event_id, ticket_type, quantity, "release against unknown ticket type");
        return;
    };
    if tt.sold < quantity {
        // Should not occur under correct use; clamp rather than go negative.
        tracing::warn!(
            %event_id,
            ticket_type,
            sold = tt.sold,
            quantity,
            "release would make sold negative, clamping to zero"
        );
        tt.sold = 0;
    } else {
        tt.sold -= quantity;
    }
}

// ============================================================================
// Booking store
// ============================================================================

#[derive(Debug, Default)]
struct BookingTable {
    by_id: HashMap<BookingId, Booking>,
    // Access-code index doubles as the uniqueness guard.
    id_by_code: HashMap<String, BookingId>,
}

/// In-memory booking ledger.
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    table: RwLock<BookingTable>,
}

impl InMemoryBookingStore {
    /// Creates an empty booking store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert(&self, booking: Booking) -> Result<(), TicketingError> {
        let mut table = self.table.write().await;
        if table.by_id.contains_key(&booking.id) {
            return Err(TicketingError::validation(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        if table.id_by_code.contains_key(booking.access_code.as_str()) {
            return Err(TicketingError::validation("access code already in use"));
        }
        table
            .id_by_code
            .insert(booking.access_code.as_str().to_string(), booking.id);
        table.by_id.insert(booking.id, booking);
        Ok(())
    }

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, TicketingError> {
        Ok(self.table.read().await.by_id.get(&id).cloned())
    }

    async fn find_by_access_code(
        &self,
        code: &AccessCode,
    ) -> Result<Option<Booking>, TicketingError> {
        let table = self.table.read().await;
        Ok(table
            .id_by_code
            .get(code.as_str())
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn access_code_exists(&self, code: &AccessCode) -> Result<bool, TicketingError> {
        Ok(self
            .table
            .read()
            .await
            .id_by_code
            .contains_key(code.as_str()))
    }

    async fn transition_status(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, TicketingError> {
        let mut table = self.table.write().await;
        let booking = table
            .by_id
            .get_mut(&id)
            .ok_or(TicketingError::BookingNotFound(id))?;
        if booking.status != from {
            return Ok(false);
        }
        booking.status = to;
        match to {
            BookingStatus::Confirmed => booking.confirmed_at = Some(at),
            BookingStatus::Cancelled => booking.cancelled_at = Some(at),
            BookingStatus::Created => {}
        }
        Ok(true)
    }

    async fn mark_checked_in(
        &self,
        id: BookingId,
        at: DateTime<Utc>,
    ) -> Result<bool, TicketingError> {
        let mut table = self.table.write().await;
        let booking = table
            .by_id
            .get_mut(&id)
            .ok_or(TicketingError::BookingNotFound(id))?;
        if booking.checked_in || booking.status != BookingStatus::Confirmed {
            return Ok(false);
        }
        booking.checked_in = true;
        booking.checked_in_at = Some(at);
        Ok(true)
    }

    async fn stale_holds(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, TicketingError> {
        Ok(self
            .table
            .read()
            .await
            .by_id
            .values()
            .filter(|b| b.is_hold() && b.created_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn stale_holds_for_event(
        &self,
        event_id: EventId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, TicketingError> {
        Ok(self
            .table
            .read()
            .await
            .by_id
            .values()
            .filter(|b| b.event_id == event_id && b.is_hold() && b.created_at <= cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{LineItem, Money, OrganizerId, TicketType, UserId};

    fn sample_event() -> EventRecord {
        EventRecord {
            id: EventId::new(),
            title: "Conf2024".to_string(),
            description: "Annual conference".to_string(),
            category: "Tech".to_string(),
            venue: "Main Hall".to_string(),
            starts_at: Utc::now(),
            organizer_id: OrganizerId::new(),
            ticket_types: vec![
                TicketType::new("General".to_string(), Money::from_cents(2_500), 2),
                TicketType::new("VIP".to_string(), Money::from_cents(10_000), 1),
            ],
        }
    }

    fn sample_booking(event_id: EventId) -> Booking {
        Booking::new(
            BookingId::new(),
            UserId::new(),
            event_id,
            vec![LineItem::new(
                "General".to_string(),
                1,
                Money::from_cents(2_500),
            )],
            AccessCode::generate(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn reserve_checks_and_increments() {
        let catalog = InMemoryEventCatalog::new();
        let event = sample_event();
        let event_id = event.id;
        catalog.insert_event(event).await.unwrap();

        catalog.try_reserve(event_id, "General", 2).await.unwrap();
        let err = catalog.try_reserve(event_id, "General", 1).await.unwrap_err();
        assert!(matches!(
            err,
            TicketingError::InsufficientCapacity { requested: 1, available: 0, .. }
        ));

        let event = catalog.get_event(event_id).await.unwrap().unwrap();
        assert_eq!(event.ticket_type("General").unwrap().sold, 2);
    }

    #[tokio::test]
    async fn release_clamps_at_zero() {
        let catalog = InMemoryEventCatalog::new();
        let event = sample_event();
        let event_id = event.id;
        catalog.insert_event(event).await.unwrap();

        catalog.try_reserve(event_id, "General", 1).await.unwrap();
        catalog.release(event_id, "General", 5).await.unwrap();
        let event = catalog.get_event(event_id).await.unwrap().unwrap();
        assert_eq!(event.ticket_type("General").unwrap().sold, 0);

        // Unknown targets are logged no-ops.
        catalog.release(event_id, "Balcony", 1).await.unwrap();
        catalog.release(EventId::new(), "General", 1).await.unwrap();
    }

    #[tokio::test]
    async fn reissue_capacity_respects_sold() {
        let catalog = InMemoryEventCatalog::new();
        let event = sample_event();
        let event_id = event.id;
        catalog.insert_event(event).await.unwrap();
        catalog.try_reserve(event_id, "General", 2).await.unwrap();

        assert!(catalog.reissue_capacity(event_id, "General", 1).await.is_err());
        catalog.reissue_capacity(event_id, "General", 10).await.unwrap();
        let event = catalog.get_event(event_id).await.unwrap().unwrap();
        assert_eq!(event.ticket_type("General").unwrap().capacity, 10);
    }

    #[tokio::test]
    async fn duplicate_access_code_rejected() {
        let store = InMemoryBookingStore::new();
        let mut first = sample_booking(EventId::new());
        first.access_code = AccessCode::from_string("fixed-code".to_string());
        store.insert(first.clone()).await.unwrap();

        let mut second = sample_booking(EventId::new());
        second.access_code = AccessCode::from_string("fixed-code".to_string());
        assert!(store.insert(second).await.is_err());
        assert!(
            store
                .access_code_exists(&AccessCode::from_string("fixed-code".to_string()))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn transitions_are_conditional() {
        let store = InMemoryBookingStore::new();
        let booking = sample_booking(EventId::new());
        let id = booking.id;
        store.insert(booking).await.unwrap();

        let now = Utc::now();
        assert!(
            store
                .transition_status(id, BookingStatus::Created, BookingStatus::Confirmed, now)
                .await
                .unwrap()
        );
        // Second identical transition fails the compare-and-set.
        assert!(
            !store
                .transition_status(id, BookingStatus::Created, BookingStatus::Confirmed, now)
                .await
                .unwrap()
        );
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.confirmed_at, Some(now));
    }

    #[tokio::test]
    async fn check_in_is_at_most_once() {
        let store = InMemoryBookingStore::new();
        let booking = sample_booking(EventId::new());
        let id = booking.id;
        store.insert(booking).await.unwrap();

        let now = Utc::now();
        // Not confirmed yet: no check-in.
        assert!(!store.mark_checked_in(id, now).await.unwrap());

        store
            .transition_status(id, BookingStatus::Created, BookingStatus::Confirmed, now)
            .await
            .unwrap();
        assert!(store.mark_checked_in(id, now).await.unwrap());
        assert!(!store.mark_checked_in(id, now).await.unwrap());
    }

    #[tokio::test]
    async fn stale_hold_scan_filters_by_status_and_age() {
        let store = InMemoryBookingStore::new();
        let event_id = EventId::new();
        let old = {
            let mut b = sample_booking(event_id);
            b.created_at = Utc::now() - chrono::Duration::hours(1);
            b
        };
        let fresh = sample_booking(event_id);
        store.insert(old.clone()).await.unwrap();
        store.insert(fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(10);
        let stale = store.stale_holds(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);

        let scoped = store.stale_holds_for_event(event_id, cutoff).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert!(
            store
                .stale_holds_for_event(EventId::new(), cutoff)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
