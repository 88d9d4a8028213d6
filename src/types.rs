//! Domain types for the ticketing core.
//!
//! Value objects, entities, and lifecycle state for ticket inventory,
//! bookings, and check-in. Identifiers are UUID newtypes so they cannot be
//! mixed up at call sites; money is cents-based to avoid floating point.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a booking.
///
/// Doubles as the human-facing booking reference, so it is opaque but
/// printable. It is NOT the check-in credential; that is [`AccessCode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Creates a new random `BookingId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `BookingId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user (ticket buyer)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an organizer (event owner)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizerId(Uuid);

impl OrganizerId {
    /// Creates a new random `OrganizerId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OrganizerId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrganizerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrganizerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Access Code (check-in credential)
// ============================================================================

/// Length of generated access codes, in alphanumeric characters.
pub const ACCESS_CODE_LEN: usize = 24;

/// Secret token gating check-in for one booking.
///
/// Generated once at booking creation and never reused across bookings.
/// The code, not the booking id, is the credential presented at the door
/// (as a QR payload), which keeps check-in safe from id enumeration.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessCode(String);

impl AccessCode {
    /// Generates a fresh random access code.
    #[must_use]
    pub fn generate() -> Self {
        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ACCESS_CODE_LEN)
            .map(char::from)
            .collect();
        Self(code)
    }

    /// Wraps an existing code (e.g. loaded from storage or scanned).
    #[must_use]
    pub fn from_string(code: String) -> Self {
        Self(code)
    }

    /// Returns the code as a string slice (QR payload).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Debug keeps the code out of logs; only a prefix is shown.
impl fmt::Debug for AccessCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "AccessCode({prefix}…)")
    }
}

impl fmt::Display for AccessCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from dollars with overflow checking
    #[must_use]
    pub const fn checked_from_dollars(dollars: u64) -> Option<Self> {
        match dollars.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Events and the Ticket Pool
// ============================================================================

/// One sellable ticket type within an event.
///
/// The capacity/sold pair is the Ticket Pool counter for this type.
/// Invariant: `sold <= capacity` at all times.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketType {
    /// Type name, unique within its event (e.g. "General Admission", "VIP")
    pub name: String,
    /// Current unit price; bookings snapshot this at purchase time
    pub price: Money,
    /// Total units that may ever be sold
    pub capacity: u32,
    /// Units consumed by non-cancelled bookings
    pub sold: u32,
}

impl TicketType {
    /// Creates a new `TicketType` with nothing sold yet
    #[must_use]
    pub const fn new(name: String, price: Money, capacity: u32) -> Self {
        Self {
            name,
            price,
            capacity,
            sold: 0,
        }
    }

    /// Returns the number of units still sellable (computed, not stored)
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.sold)
    }

    /// Checks if the requested quantity is available
    #[must_use]
    pub const fn has_availability(&self, quantity: u32) -> bool {
        self.available() >= quantity
    }
}

/// Event entity: identity, presentation metadata, and its ticket pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event identifier
    pub id: EventId,
    /// Event title (e.g. "Conf2024")
    pub title: String,
    /// Free-form description
    pub description: String,
    /// Category label (e.g. "Music", "Tech")
    pub category: String,
    /// Venue name
    pub venue: String,
    /// Event start date and time
    pub starts_at: DateTime<Utc>,
    /// Organizer who owns this event (authorizes check-in scans)
    pub organizer_id: OrganizerId,
    /// Ordered, non-empty list of ticket types
    pub ticket_types: Vec<TicketType>,
}

impl EventRecord {
    /// Looks up a ticket type by name
    #[must_use]
    pub fn ticket_type(&self, name: &str) -> Option<&TicketType> {
        self.ticket_types.iter().find(|t| t.name == name)
    }

    /// Looks up a ticket type by name, mutably
    pub fn ticket_type_mut(&mut self, name: &str) -> Option<&mut TicketType> {
        self.ticket_types.iter_mut().find(|t| t.name == name)
    }
}

// ============================================================================
// Bookings
// ============================================================================

/// One line of a purchase request (input shape, before pricing).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    /// Ticket type name on the target event
    pub ticket_type: String,
    /// Units requested, must be >= 1
    pub quantity: u32,
}

impl PurchaseLine {
    /// Creates a new `PurchaseLine`
    #[must_use]
    pub const fn new(ticket_type: String, quantity: u32) -> Self {
        Self {
            ticket_type,
            quantity,
        }
    }
}

/// One priced line of a booking.
///
/// `unit_price` is copied from the event at purchase time and never changes
/// afterwards, decoupling the booking from future price edits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Ticket type name
    pub ticket_type: String,
    /// Units purchased, >= 1
    pub quantity: u32,
    /// Unit price snapshot taken at purchase time
    pub unit_price: Money,
}

impl LineItem {
    /// Creates a new `LineItem`
    #[must_use]
    pub const fn new(ticket_type: String, quantity: u32, unit_price: Money) -> Self {
        Self {
            ticket_type,
            quantity,
            unit_price,
        }
    }

    /// Line subtotal with overflow checking
    #[must_use]
    pub const fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// Booking lifecycle status.
///
/// `Created` is an unpaid hold whose inventory is already reserved
/// (reserve-then-pay). Holds that never confirm are expired and cancelled.
/// Check-in is an orthogonal flag on `Confirmed`, not a status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Unpaid hold; inventory reserved, payment pending
    Created,
    /// Payment succeeded; admits at the door
    Confirmed,
    /// Released; inventory returned exactly once
    Cancelled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One purchase transaction and its lifecycle state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Unique identifier, also the human-facing reference
    pub id: BookingId,
    /// Buyer who owns this booking
    pub user_id: UserId,
    /// Event the tickets are for
    pub event_id: EventId,
    /// Priced lines; each quantity >= 1
    pub line_items: Vec<LineItem>,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Check-in credential; unique across all bookings, never reused
    pub access_code: AccessCode,
    /// Whether the booking has been consumed at the door
    pub checked_in: bool,
    /// When the booking was created
    pub created_at: DateTime<Utc>,
    /// When payment was confirmed, if it was
    pub confirmed_at: Option<DateTime<Utc>>,
    /// When the booking was cancelled, if it was
    pub cancelled_at: Option<DateTime<Utc>>,
    /// When the booking was checked in, if it was
    pub checked_in_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Creates a new booking in `Created` status
    #[must_use]
    pub const fn new(
        id: BookingId,
        user_id: UserId,
        event_id: EventId,
        line_items: Vec<LineItem>,
        access_code: AccessCode,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            event_id,
            line_items,
            status: BookingStatus::Created,
            access_code,
            checked_in: false,
            created_at,
            confirmed_at: None,
            cancelled_at: None,
            checked_in_at: None,
        }
    }

    /// Total amount across all lines, with overflow checking
    #[must_use]
    pub fn total_amount(&self) -> Option<Money> {
        self.line_items
            .iter()
            .try_fold(Money::from_cents(0), |acc, line| {
                acc.checked_add(line.subtotal()?)
            })
    }

    /// Whether this is an unpaid hold still occupying inventory
    #[must_use]
    pub const fn is_hold(&self) -> bool {
        matches!(self.status, BookingStatus::Created)
    }
}

// ============================================================================
// Check-In
// ============================================================================

/// Minimal summary returned to the scanning device on successful check-in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeSummary {
    /// Booking reference
    pub booking_id: BookingId,
    /// Attendee
    pub user_id: UserId,
    /// Event title for the door display
    pub event_title: String,
    /// (ticket type, quantity) pairs admitted by this booking
    pub admits: Vec<(String, u32)>,
    /// When the check-in was recorded
    pub checked_in_at: DateTime<Utc>,
}
