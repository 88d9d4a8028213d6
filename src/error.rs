//! Error taxonomy for the ticketing core.
//!
//! Capacity and validation failures are terminal for a request and carry
//! enough detail for the caller to retry with corrected input. Persistence
//! failures are surfaced as retryable only after compensating releases have
//! run, so the caller never observes consumed inventory without a booking.

use crate::types::{BookingId, EventId};
use thiserror::Error;

/// Errors produced by the ticketing core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketingError {
    /// Malformed request: bad quantities, duplicate or unknown ticket types,
    /// empty line items.
    #[error("validation failed: {reason}")]
    Validation {
        /// Human-readable rejection reason
        reason: String,
    },

    /// Inventory exhausted for a specific ticket type. Names the offending
    /// type so the buyer can retry with an adjusted quantity.
    #[error(
        "insufficient capacity for ticket type '{ticket_type}': requested {requested}, available {available}"
    )]
    InsufficientCapacity {
        /// Ticket type that ran out
        ticket_type: String,
        /// Units requested
        requested: u32,
        /// Units actually available at decision time
        available: u32,
    },

    /// Unknown event
    #[error("event {0} not found")]
    EventNotFound(EventId),

    /// Unknown booking
    #[error("booking {0} not found")]
    BookingNotFound(BookingId),

    /// No booking holds the presented access code
    #[error("no booking matches the presented access code")]
    AccessCodeNotFound,

    /// Actor lacks rights over the event or booking
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// What the actor was not allowed to do
        reason: String,
    },

    /// The booking was already checked in; scanning twice is reported, not
    /// silently accepted
    #[error("booking {booking_id} already checked in")]
    AlreadyCheckedIn {
        /// The booking that was scanned again
        booking_id: BookingId,
    },

    /// An unpaid or cancelled booking cannot admit
    #[error("booking {booking_id} is {status}, not confirmed")]
    NotConfirmed {
        /// The booking presented at the door
        booking_id: BookingId,
        /// Its actual status
        status: crate::types::BookingStatus,
    },

    /// A lifecycle transition that the current status does not allow
    #[error("booking {booking_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Booking being transitioned
        booking_id: BookingId,
        /// Current status
        from: crate::types::BookingStatus,
        /// Requested status
        to: crate::types::BookingStatus,
    },

    /// Store unavailable or write failed. Compensating releases have already
    /// run by the time this surfaces; the request is safe to retry.
    #[error("persistence failure (retryable): {reason}")]
    Persistence {
        /// Underlying store error
        reason: String,
    },
}

impl TicketingError {
    /// Convenience constructor for validation failures
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for persistence failures
    #[must_use]
    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the same request unchanged
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

impl From<sqlx::Error> for TicketingError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence {
            reason: err.to_string(),
        }
    }
}
