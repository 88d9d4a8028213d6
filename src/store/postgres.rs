//! `PostgreSQL` store implementations.
//!
//! The Ticket Pool's no-overselling guarantee rests on one conditional
//! statement:
//!
//! ```sql
//! UPDATE ticket_types
//! SET sold = sold + $3
//! WHERE event_id = $1 AND name = $2 AND sold + $3 <= capacity
//! ```
//!
//! The database applies the predicate and the increment as a single atomic
//! step, so there is no check-then-act window even across server processes.
//! A `CHECK (sold BETWEEN 0 AND capacity)` constraint backs the invariant.

use crate::config::PostgresConfig;
use crate::error::TicketingError;
use crate::store::{BookingStore, EventCatalog, TicketPool, validate_event};
use crate::types::{
    AccessCode, Booking, BookingId, BookingStatus, EventId, EventRecord, LineItem, Money,
    OrganizerId, TicketType, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;

/// Schema for the ticketing tables. Idempotent; applied at startup.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id UUID PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    venue TEXT NOT NULL,
    starts_at TIMESTAMPTZ NOT NULL,
    organizer_id UUID NOT NULL
);

CREATE TABLE IF NOT EXISTS ticket_types (
    event_id UUID NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    position BIGINT NOT NULL,
    name TEXT NOT NULL,
    price_cents BIGINT NOT NULL CHECK (price_cents >= 0),
    capacity BIGINT NOT NULL CHECK (capacity >= 0),
    sold BIGINT NOT NULL DEFAULT 0 CHECK (sold >= 0 AND sold <= capacity),
    PRIMARY KEY (event_id, name)
);

CREATE TABLE IF NOT EXISTS bookings (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    event_id UUID NOT NULL,
    line_items JSONB NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('created', 'confirmed', 'cancelled')),
    access_code TEXT NOT NULL UNIQUE,
    checked_in BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL,
    confirmed_at TIMESTAMPTZ,
    cancelled_at TIMESTAMPTZ,
    checked_in_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS bookings_stale_holds_idx
    ON bookings (event_id, created_at)
    WHERE status = 'created';
";

/// Opens a connection pool from the configured knobs.
///
/// # Errors
///
/// Returns [`TicketingError::Persistence`] if the database is unreachable.
pub async fn connect(config: &PostgresConfig) -> Result<PgPool, TicketingError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .connect(&config.url)
        .await
        .map_err(TicketingError::from)
}

/// Applies the schema. Safe to call on every startup.
///
/// # Errors
///
/// Returns [`TicketingError::Persistence`] if schema creation fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), TicketingError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

fn status_as_str(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Created => "created",
        BookingStatus::Confirmed => "confirmed",
        BookingStatus::Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> Result<BookingStatus, TicketingError> {
    match s {
        "created" => Ok(BookingStatus::Created),
        "confirmed" => Ok(BookingStatus::Confirmed),
        "cancelled" => Ok(BookingStatus::Cancelled),
        other => Err(TicketingError::persistence(format!(
            "unknown booking status '{other}' in storage"
        ))),
    }
}

fn u32_from_db(value: i64, column: &str) -> Result<u32, TicketingError> {
    u32::try_from(value)
        .map_err(|_| TicketingError::persistence(format!("column {column} out of range: {value}")))
}

// ============================================================================
// Event catalog + ticket pool
// ============================================================================

/// Postgres-backed event catalog and ticket pool.
#[derive(Clone, Debug)]
pub struct PostgresEventCatalog {
    pool: PgPool,
}

impl PostgresEventCatalog {
    /// Creates a catalog over an existing connection pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventCatalog for PostgresEventCatalog {
    async fn insert_event(&self, event: EventRecord) -> Result<(), TicketingError> {
        // Same shape checks as the in-memory catalog, so malformed events
        // surface as Validation before any constraint fires.
        validate_event(&event)?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r"
            INSERT INTO events (id, title, description, category, venue, starts_at, organizer_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(event.id.as_uuid())
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.category)
        .bind(&event.venue)
        .bind(event.starts_at)
        .bind(event.organizer_id.as_uuid())
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(TicketingError::validation(format!(
                    "event {} already exists",
                    event.id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        for (position, tt) in event.ticket_types.iter().enumerate() {
            let price = i64::try_from(tt.price.cents()).map_err(|_| {
                TicketingError::validation(format!("price of '{}' out of range", tt.name))
            })?;
            sqlx::query(
                r"
                INSERT INTO ticket_types (event_id, position, name, price_cents, capacity, sold)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(event.id.as_uuid())
            .bind(i64::try_from(position).unwrap_or(i64::MAX))
            .bind(&tt.name)
            .bind(price)
            .bind(i64::from(tt.capacity))
            .bind(i64::from(tt.sold))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<EventRecord>, TicketingError> {
        let Some(row) = sqlx::query(
            r"
            SELECT id, title, description, category, venue, starts_at, organizer_id
            FROM events
            WHERE id = $1
            ",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let type_rows = sqlx::query(
            r"
            SELECT name, price_cents, capacity, sold
            FROM ticket_types
            WHERE event_id = $1
            ORDER BY position ASC
            ",
        )
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut ticket_types = Vec::with_capacity(type_rows.len());
        for tr in &type_rows {
            let price: i64 = tr.try_get("price_cents")?;
            let capacity: i64 = tr.try_get("capacity")?;
            let sold: i64 = tr.try_get("sold")?;
            ticket_types.push(TicketType {
                name: tr.try_get("name")?,
                price: Money::from_cents(u64::try_from(price).unwrap_or(0)),
                capacity: u32_from_db(capacity, "capacity")?,
                sold: u32_from_db(sold, "sold")?,
            });
        }

        Ok(Some(EventRecord {
            id: EventId::from_uuid(row.try_get("id")?),
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            venue: row.try_get("venue")?,
            starts_at: row.try_get("starts_at")?,
            organizer_id: OrganizerId::from_uuid(row.try_get("organizer_id")?),
            ticket_types,
        }))
    }

    async fn reissue_capacity(
        &self,
        event_id: EventId,
        ticket_type: &str,
        new_capacity: u32,
    ) -> Result<(), TicketingError> {
        let result = sqlx::query(
            r"
            UPDATE ticket_types
            SET capacity = $3
            WHERE event_id = $1 AND name = $2 AND sold <= $3
            ",
        )
        .bind(event_id.as_uuid())
        .bind(ticket_type)
        .bind(i64::from(new_capacity))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // No row updated: explain why.
        let row = sqlx::query(
            r"SELECT sold FROM ticket_types WHERE event_id = $1 AND name = $2",
        )
        .bind(event_id.as_uuid())
        .bind(ticket_type)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => {
                let sold: i64 = r.try_get("sold")?;
                Err(TicketingError::validation(format!(
                    "cannot reduce capacity of '{ticket_type}' below {sold} already sold"
                )))
            }
            None => Err(TicketingError::validation(format!(
                "unknown ticket type '{ticket_type}'"
            ))),
        }
    }
}

#[async_trait]
impl TicketPool for PostgresEventCatalog {
    async fn try_reserve(
        &self,
        event_id: EventId,
        ticket_type: &str,
        quantity: u32,
    ) -> Result<(), TicketingError> {
        // The atomic increment-with-check. One statement, no read-then-write.
        let result = sqlx::query(
            r"
            UPDATE ticket_types
            SET sold = sold + $3
            WHERE event_id = $1 AND name = $2 AND sold + $3 <= capacity
            ",
        )
        .bind(event_id.as_uuid())
        .bind(ticket_type)
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Rejected: report unknown event/type or the exact shortfall.
        let row = sqlx::query(
            r"SELECT capacity, sold FROM ticket_types WHERE event_id = $1 AND name = $2",
        )
        .bind(event_id.as_uuid())
        .bind(ticket_type)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => {
                let capacity: i64 = r.try_get("capacity")?;
                let sold: i64 = r.try_get("sold")?;
                Err(TicketingError::InsufficientCapacity {
                    ticket_type: ticket_type.to_string(),
                    requested: quantity,
                    available: u32_from_db(capacity.saturating_sub(sold), "capacity - sold")?,
                })
            }
            None => {
                let exists = sqlx::query(r"SELECT 1 AS one FROM events WHERE id = $1")
                    .bind(event_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?
                    .is_some();
                if exists {
                    Err(TicketingError::validation(format!(
                        "unknown ticket type '{ticket_type}'"
                    )))
                } else {
                    Err(TicketingError::EventNotFound(event_id))
                }
            }
        }
    }

    async fn release(
        &self,
        event_id: EventId,
        ticket_type: &str,
        quantity: u32,
    ) -> Result<(), TicketingError> {
        let result = sqlx::query(
            r"
            UPDATE ticket_types
            SET sold = GREATEST(sold - $3, 0)
            WHERE event_id = $1 AND name = $2
            ",
        )
        .bind(event_id.as_uuid())
        .bind(ticket_type)
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(%event_id, ticket_type, quantity, "release against unknown pool entry");
        }
        Ok(())
    }

    async fn release_all(
        &self,
        event_id: EventId,
        lines: &[LineItem],
    ) -> Result<(), TicketingError> {
        // One transaction across all lines: a failure rolls every decrement
        // back, so the caller can retry the release as a whole.
        let mut tx = self.pool.begin().await?;
        for line in lines {
            let result = sqlx::query(
                r"
                UPDATE ticket_types
                SET sold = GREATEST(sold - $3, 0)
                WHERE event_id = $1 AND name = $2
                ",
            )
            .bind(event_id.as_uuid())
            .bind(&line.ticket_type)
            .bind(i64::from(line.quantity))
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                tracing::warn!(
                    %event_id,
                    ticket_type = line.ticket_type,
                    quantity = line.quantity,
                    "release against unknown pool entry"
                );
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Booking store
// ============================================================================

/// Postgres-backed booking ledger.
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Creates a booking store over an existing connection pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_booking(row: &PgRow) -> Result<Booking, TicketingError> {
        let line_items: serde_json::Value = row.try_get("line_items")?;
        let line_items: Vec<LineItem> = serde_json::from_value(line_items)
            .map_err(|e| TicketingError::persistence(format!("corrupt line_items: {e}")))?;
        let status: String = row.try_get("status")?;

        Ok(Booking {
            id: BookingId::from_uuid(row.try_get("id")?),
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            event_id: EventId::from_uuid(row.try_get("event_id")?),
            line_items,
            status: parse_status(&status)?,
            access_code: AccessCode::from_string(row.try_get("access_code")?),
            checked_in: row.try_get("checked_in")?,
            created_at: row.try_get("created_at")?,
            confirmed_at: row.try_get("confirmed_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            checked_in_at: row.try_get("checked_in_at")?,
        })
    }
}

const SELECT_BOOKING: &str = r"
    SELECT id, user_id, event_id, line_items, status, access_code,
           checked_in, created_at, confirmed_at, cancelled_at, checked_in_at
    FROM bookings
";

#[async_trait]
impl BookingStore for PostgresBookingStore {
    async fn insert(&self, booking: Booking) -> Result<(), TicketingError> {
        let line_items = serde_json::to_value(&booking.line_items)
            .map_err(|e| TicketingError::persistence(format!("serialize line_items: {e}")))?;
        let result = sqlx::query(
            r"
            INSERT INTO bookings (
                id, user_id, event_id, line_items, status, access_code,
                checked_in, created_at, confirmed_at, cancelled_at, checked_in_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.user_id.as_uuid())
        .bind(booking.event_id.as_uuid())
        .bind(line_items)
        .bind(status_as_str(booking.status))
        .bind(booking.access_code.as_str())
        .bind(booking.checked_in)
        .bind(booking.created_at)
        .bind(booking.confirmed_at)
        .bind(booking.cancelled_at)
        .bind(booking.checked_in_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                TicketingError::validation("booking id or access code already in use"),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, TicketingError> {
        let row = sqlx::query(&format!("{SELECT_BOOKING} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_booking).transpose()
    }

    async fn find_by_access_code(
        &self,
        code: &AccessCode,
    ) -> Result<Option<Booking>, TicketingError> {
        let row = sqlx::query(&format!("{SELECT_BOOKING} WHERE access_code = $1"))
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_booking).transpose()
    }

    async fn access_code_exists(&self, code: &AccessCode) -> Result<bool, TicketingError> {
        let row = sqlx::query(r"SELECT 1 AS one FROM bookings WHERE access_code = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn transition_status(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, TicketingError> {
        let result = sqlx::query(
            r"
            UPDATE bookings
            SET status = $3,
                confirmed_at = CASE WHEN $3 = 'confirmed' THEN $4 ELSE confirmed_at END,
                cancelled_at = CASE WHEN $3 = 'cancelled' THEN $4 ELSE cancelled_at END
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(id.as_uuid())
        .bind(status_as_str(from))
        .bind(status_as_str(to))
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Distinguish "wrong status" (a lost race, fine) from "no such booking".
        let exists = sqlx::query(r"SELECT 1 AS one FROM bookings WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(TicketingError::BookingNotFound(id))
        }
    }

    async fn mark_checked_in(
        &self,
        id: BookingId,
        at: DateTime<Utc>,
    ) -> Result<bool, TicketingError> {
        let result = sqlx::query(
            r"
            UPDATE bookings
            SET checked_in = TRUE, checked_in_at = $2
            WHERE id = $1 AND checked_in = FALSE AND status = 'confirmed'
            ",
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        let exists = sqlx::query(r"SELECT 1 AS one FROM bookings WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(TicketingError::BookingNotFound(id))
        }
    }

    async fn stale_holds(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, TicketingError> {
        let rows = sqlx::query(&format!(
            "{SELECT_BOOKING} WHERE status = 'created' AND created_at <= $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_booking).collect()
    }

    async fn stale_holds_for_event(
        &self,
        event_id: EventId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, TicketingError> {
        let rows = sqlx::query(&format!(
            "{SELECT_BOOKING} WHERE event_id = $1 AND status = 'created' AND created_at <= $2"
        ))
        .bind(event_id.as_uuid())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_booking).collect()
    }
}
