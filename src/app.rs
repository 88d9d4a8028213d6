//! Application wiring: store selection, service construction, and the
//! background sweeper's lifecycle.

use crate::booking::BookingService;
use crate::checkin::CheckInGate;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::TicketingError;
use crate::expiry::HoldSweeper;
use crate::notify::{LoggingNotifier, Notifier};
use crate::store::memory::{InMemoryBookingStore, InMemoryEventCatalog};
use crate::store::postgres::{self, PostgresBookingStore, PostgresEventCatalog};
use crate::store::{BookingStore, EventCatalog, TicketPool};
use crate::types::{
    AccessCode, AttendeeSummary, Booking, BookingId, EventId, EventRecord, OrganizerId,
    PurchaseLine, TicketType, UserId,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Input shape for creating an event.
#[derive(Clone, Debug)]
pub struct NewEvent {
    /// Event title
    pub title: String,
    /// Free-form description
    pub description: String,
    /// Category label
    pub category: String,
    /// Venue name
    pub venue: String,
    /// Event start date and time
    pub starts_at: DateTime<Utc>,
    /// Ticket types to sell, each starting with nothing sold
    pub ticket_types: Vec<TicketType>,
}

/// The assembled ticketing application.
///
/// Owns the storage seams, the booking service, the check-in gate, and the
/// hold sweeper's lifecycle.
pub struct TicketingApp {
    catalog: Arc<dyn EventCatalog>,
    booking: Arc<BookingService>,
    gate: CheckInGate,
    config: Config,
    sweeper: Option<(JoinHandle<()>, broadcast::Sender<()>)>,
}

impl TicketingApp {
    /// Assembles the application over in-memory stores. Suitable for tests
    /// and single-process deployments; state is lost on restart.
    #[must_use]
    pub fn in_memory(config: Config) -> Self {
        let catalog = Arc::new(InMemoryEventCatalog::new());
        Self::assemble(
            catalog.clone(),
            catalog,
            Arc::new(InMemoryBookingStore::new()),
            Arc::new(LoggingNotifier),
            Arc::new(SystemClock),
            config,
        )
    }

    /// Assembles the application over `PostgreSQL`, running migrations first.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Persistence`] if the database is
    /// unreachable or migrations fail.
    pub async fn connect_postgres(config: Config) -> Result<Self, TicketingError> {
        let pool = postgres::connect(&config.postgres).await?;
        postgres::run_migrations(&pool).await?;
        let catalog = Arc::new(PostgresEventCatalog::new(pool.clone()));
        Ok(Self::assemble(
            catalog.clone(),
            catalog,
            Arc::new(PostgresBookingStore::new(pool)),
            Arc::new(LoggingNotifier),
            Arc::new(SystemClock),
            config,
        ))
    }

    /// Assembles the application from explicit collaborators.
    #[must_use]
    pub fn assemble(
        catalog: Arc<dyn EventCatalog>,
        pool: Arc<dyn TicketPool>,
        bookings: Arc<dyn BookingStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        let booking = Arc::new(BookingService::new(
            catalog.clone(),
            pool,
            bookings.clone(),
            notifier,
            clock.clone(),
            config.booking.clone(),
        ));
        let gate = CheckInGate::new(bookings, catalog.clone(), clock);
        Self {
            catalog,
            booking,
            gate,
            config,
            sweeper: None,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts the background hold sweeper. Idempotent.
    pub fn start_sweeper(&mut self) {
        if self.sweeper.is_some() {
            return;
        }
        let sweeper = HoldSweeper::new(self.booking.clone(), self.config.booking.sweep_interval());
        self.sweeper = Some(sweeper.spawn());
    }

    /// Stops the sweeper and waits for its current sweep to finish.
    pub async fn shutdown(&mut self) {
        if let Some((handle, shutdown_tx)) = self.sweeper.take() {
            let _ = shutdown_tx.send(());
            if let Err(e) = handle.await {
                warn!(error = %e, "hold sweeper did not shut down cleanly");
            }
        }
        info!("ticketing application stopped");
    }

    // ========================================================================
    // Organizer operations
    // ========================================================================

    /// Creates an event owned by `organizer_id` and returns its record.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Validation`] for an empty title or an
    /// invalid ticket-type list, [`TicketingError::Persistence`] on store
    /// failure.
    pub async fn create_event(
        &self,
        organizer_id: OrganizerId,
        new_event: NewEvent,
    ) -> Result<EventRecord, TicketingError> {
        if new_event.title.trim().is_empty() {
            return Err(TicketingError::validation("event title must not be empty"));
        }
        let event = EventRecord {
            id: EventId::new(),
            title: new_event.title,
            description: new_event.description,
            category: new_event.category,
            venue: new_event.venue,
            starts_at: new_event.starts_at,
            organizer_id,
            ticket_types: new_event.ticket_types,
        };
        self.catalog.insert_event(event.clone()).await?;
        info!(event_id = %event.id, title = event.title, "event created");
        Ok(event)
    }

    /// Loads an event by id.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::EventNotFound`] for an unknown id.
    pub async fn get_event(&self, event_id: EventId) -> Result<EventRecord, TicketingError> {
        self.catalog
            .get_event(event_id)
            .await?
            .ok_or(TicketingError::EventNotFound(event_id))
    }

    /// Re-issues capacity for a ticket type on an event the organizer owns.
    /// The new capacity must still cover everything already sold.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::Unauthorized`] if `organizer_id` does not
    /// own the event, plus the catalog's own errors.
    pub async fn reissue_capacity(
        &self,
        organizer_id: OrganizerId,
        event_id: EventId,
        ticket_type: &str,
        new_capacity: u32,
    ) -> Result<(), TicketingError> {
        let event = self.get_event(event_id).await?;
        if event.organizer_id != organizer_id {
            return Err(TicketingError::Unauthorized {
                reason: "event is not managed by this organizer".to_string(),
            });
        }
        self.catalog
            .reissue_capacity(event_id, ticket_type, new_capacity)
            .await?;
        info!(%event_id, ticket_type, new_capacity, "capacity re-issued");
        Ok(())
    }

    // ========================================================================
    // Buyer operations
    // ========================================================================

    /// Purchases tickets, creating an unpaid hold.
    ///
    /// # Errors
    ///
    /// See [`BookingService::purchase`].
    pub async fn purchase(
        &self,
        user_id: UserId,
        event_id: EventId,
        lines: Vec<PurchaseLine>,
    ) -> Result<Booking, TicketingError> {
        self.booking.purchase(user_id, event_id, lines).await
    }

    /// Confirms a hold after payment success.
    ///
    /// # Errors
    ///
    /// See [`BookingService::confirm`].
    pub async fn confirm(&self, booking_id: BookingId) -> Result<Booking, TicketingError> {
        self.booking.confirm(booking_id).await
    }

    /// Cancels a booking, releasing its inventory exactly once.
    ///
    /// # Errors
    ///
    /// See [`BookingService::cancel`].
    pub async fn cancel(&self, booking_id: BookingId) -> Result<(), TicketingError> {
        self.booking.cancel(booking_id).await
    }

    /// Loads a booking by reference.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError::BookingNotFound`] for an unknown id.
    pub async fn get_booking(&self, booking_id: BookingId) -> Result<Booking, TicketingError> {
        self.booking.get_booking(booking_id).await
    }

    // ========================================================================
    // Door operations
    // ========================================================================

    /// Admits the holder of an access code at the venue door.
    ///
    /// # Errors
    ///
    /// See [`CheckInGate::check_in`].
    pub async fn check_in(
        &self,
        code: &AccessCode,
        organizer_id: OrganizerId,
    ) -> Result<AttendeeSummary, TicketingError> {
        self.gate.check_in(code, organizer_id).await
    }

    /// Direct access to the booking service, e.g. for driving expiry in
    /// tests or embedding callers.
    #[must_use]
    pub fn booking_service(&self) -> Arc<BookingService> {
        self.booking.clone()
    }
}
