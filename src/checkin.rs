//! Venue-door check-in.
//!
//! The access code printed in a ticket's QR payload is the sole lookup key at
//! the door. Admission is at-most-once: the checked-in flag is flipped with a
//! conditional store write, so two gates scanning the same code concurrently
//! produce exactly one admission.

use crate::clock::Clock;
use crate::error::TicketingError;
use crate::store::{BookingStore, EventCatalog};
use crate::types::{AccessCode, AttendeeSummary, BookingStatus, OrganizerId};
use std::sync::Arc;

/// Validates access codes at the venue door.
pub struct CheckInGate {
    bookings: Arc<dyn BookingStore>,
    catalog: Arc<dyn EventCatalog>,
    clock: Arc<dyn Clock>,
}

impl CheckInGate {
    /// Creates a new `CheckInGate`
    #[must_use]
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        catalog: Arc<dyn EventCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bookings,
            catalog,
            clock,
        }
    }

    /// Admits the holder of `code`, marking the booking checked in.
    ///
    /// Only the organizer of the booked event may admit its attendees. A
    /// rejected scan never changes state: the stored `checked_in_at` of an
    /// already-admitted booking is untouched by later attempts.
    ///
    /// # Errors
    ///
    /// - [`TicketingError::AccessCodeNotFound`] for an unknown code
    /// - [`TicketingError::Unauthorized`] if `organizer_id` does not manage
    ///   the booked event
    /// - [`TicketingError::AlreadyCheckedIn`] on a second scan
    /// - [`TicketingError::NotConfirmed`] for an unpaid or cancelled booking
    pub async fn check_in(
        &self,
        code: &AccessCode,
        organizer_id: OrganizerId,
    ) -> Result<AttendeeSummary, TicketingError> {
        let booking = self
            .bookings
            .find_by_access_code(code)
            .await?
            .ok_or(TicketingError::AccessCodeNotFound)?;

        let event = self
            .catalog
            .get_event(booking.event_id)
            .await?
            .ok_or(TicketingError::EventNotFound(booking.event_id))?;
        if event.organizer_id != organizer_id {
            tracing::warn!(
                booking_id = %booking.id,
                event_id = %event.id,
                %organizer_id,
                "check-in attempt by non-owning organizer"
            );
            return Err(TicketingError::Unauthorized {
                reason: "event is not managed by this organizer".to_string(),
            });
        }

        if booking.checked_in {
            return Err(TicketingError::AlreadyCheckedIn {
                booking_id: booking.id,
            });
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(TicketingError::NotConfirmed {
                booking_id: booking.id,
                status: booking.status,
            });
        }

        let now = self.clock.now();
        // Conditional write is the linearization point: only one scan wins.
        if !self.bookings.mark_checked_in(booking.id, now).await? {
            // Lost a race between the lookup and the write; report from the
            // booking's current state so door staff get the right message.
            let current = self
                .bookings
                .get(booking.id)
                .await?
                .ok_or(TicketingError::BookingNotFound(booking.id))?;
            if current.checked_in {
                return Err(TicketingError::AlreadyCheckedIn {
                    booking_id: booking.id,
                });
            }
            return Err(TicketingError::NotConfirmed {
                booking_id: booking.id,
                status: current.status,
            });
        }

        tracing::info!(booking_id = %booking.id, event_id = %event.id, "attendee checked in");
        Ok(AttendeeSummary {
            booking_id: booking.id,
            user_id: booking.user_id,
            event_title: event.title,
            admits: booking
                .line_items
                .iter()
                .map(|li| (li.ticket_type.clone(), li.quantity))
                .collect(),
            checked_in_at: now,
        })
    }
}
