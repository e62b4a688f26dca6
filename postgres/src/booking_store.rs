//! `PostgreSQL` implementation of [`BookingStore`].
//!
//! Each commit runs in one transaction. Aggregates are written first with a
//! version check, then the outbox rows. Any failure rolls everything back,
//! and so does dropping the commit future before it finishes.
//!
//! # Outbox ordering
//!
//! `outbox_messages.sequence` is drawn when a row is inserted, not when its
//! transaction commits. Two unserialized writers could commit out of sequence
//! order and let the dispatcher see sequence 6 before 5. Commits that carry
//! outbox rows therefore take [`OUTBOX_WRITE_LOCK`] with
//! `pg_advisory_xact_lock` before inserting them, and hold it until commit,
//! so sequence order matches commit order.

use crate::{database_error, is_unique_violation};
use chrono::{DateTime, NaiveDate, Utc};
use lodgebook_core::apartment::{Amenity, Apartment, ApartmentId};
use lodgebook_core::booking::{Booking, BookingId, BookingStatus, UserId};
use lodgebook_core::date_range::DateRange;
use lodgebook_core::money::{Currency, Money};
use lodgebook_core::outbox::NewOutboxMessage;
use lodgebook_core::persistence::{BookingStore, BoxFuture, CommitError, PersistenceError};
use lodgebook_core::pricing::PriceBreakdown;
use lodgebook_core::unit_of_work::ChangeSet;
use lodgebook_core::version::Version;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// Advisory lock key serializing outbox inserts across transactions.
pub const OUTBOX_WRITE_LOCK: i64 = 0x6c6f_6467_6f75_7462;

const BOOKING_COLUMNS: &str = r"
    id, apartment_id, user_id, period_start, period_end, currency,
    price_for_period_amount, cleaning_fee_amount, amenities_upcharge_amount, total_amount,
    status, created_at, confirmed_at, rejected_at, completed_at, cancelled_at, version
";

/// Apartments and bookings stored in `PostgreSQL`.
///
/// # Example
///
/// ```no_run
/// use lodgebook_postgres::PostgresBookingStore;
///
/// # async fn example(pool: sqlx::PgPool) {
/// let store = PostgresBookingStore::new(pool);
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Create a store on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_apartment(&self, id: ApartmentId) -> Result<Option<Apartment>, PersistenceError> {
        let row = sqlx::query(
            r"
            SELECT id, name, price_amount, price_currency, cleaning_fee_amount,
                   cleaning_fee_currency, amenities, last_booked_at, version
            FROM apartments
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        row.as_ref().map(row_to_apartment).transpose()
    }

    async fn fetch_booking(&self, id: BookingId) -> Result<Option<Booking>, PersistenceError> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

        row.as_ref().map(row_to_booking).transpose()
    }

    async fn fetch_overlapping(
        &self,
        apartment_id: ApartmentId,
        period: DateRange,
    ) -> Result<Vec<Booking>, PersistenceError> {
        let active: Vec<String> = [BookingStatus::Reserved, BookingStatus::Confirmed]
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let rows = sqlx::query(&format!(
            r"
            SELECT {BOOKING_COLUMNS}
            FROM bookings
            WHERE apartment_id = $1
              AND status = ANY($2)
              AND period_start < $3
              AND period_end > $4
            ORDER BY period_start
            "
        ))
        .bind(apartment_id.as_uuid())
        .bind(active)
        .bind(period.end())
        .bind(period.start())
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        rows.iter().map(row_to_booking).collect()
    }

    async fn write(&self, changes: ChangeSet) -> Result<usize, CommitError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;
        let mut written = 0;

        for apartment in &changes.apartments {
            write_apartment(&mut tx, apartment).await?;
            written += 1;
        }
        for booking in &changes.bookings {
            write_booking(&mut tx, booking).await?;
            written += 1;
        }
        if !changes.outbox.is_empty() {
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(OUTBOX_WRITE_LOCK)
                .execute(&mut *tx)
                .await
                .map_err(database_error)?;
        }
        for message in &changes.outbox {
            insert_outbox_message(&mut tx, message).await?;
            written += 1;
        }

        tx.commit().await.map_err(database_error)?;

        tracing::debug!(
            apartments = changes.apartments.len(),
            bookings = changes.bookings.len(),
            outbox_messages = changes.outbox.len(),
            "Change set committed"
        );
        Ok(written)
    }
}

impl BookingStore for PostgresBookingStore {
    fn load_apartment(
        &self,
        id: ApartmentId,
    ) -> BoxFuture<'_, Result<Option<Apartment>, PersistenceError>> {
        Box::pin(self.fetch_apartment(id))
    }

    fn load_booking(&self, id: BookingId) -> BoxFuture<'_, Result<Option<Booking>, PersistenceError>> {
        Box::pin(self.fetch_booking(id))
    }

    fn overlapping_bookings(
        &self,
        apartment_id: ApartmentId,
        period: DateRange,
    ) -> BoxFuture<'_, Result<Vec<Booking>, PersistenceError>> {
        Box::pin(self.fetch_overlapping(apartment_id, period))
    }

    fn commit(&self, changes: ChangeSet) -> BoxFuture<'_, Result<usize, CommitError>> {
        Box::pin(async move {
            let result = self.write(changes).await;
            if let Err(CommitError::Concurrency { aggregate, .. }) = &result {
                metrics::counter!("postgres_commit_conflicts_total", "aggregate" => *aggregate)
                    .increment(1);
            }
            result
        })
    }
}

async fn write_apartment(
    tx: &mut Transaction<'static, Postgres>,
    apartment: &Apartment,
) -> Result<(), CommitError> {
    let next = version_to_db(apartment.version.next())?;
    let amenities: Vec<String> = apartment.amenities.iter().map(|a| a.as_str().to_string()).collect();
    let price = cents_to_db(apartment.price)?;
    let cleaning_fee = cents_to_db(apartment.cleaning_fee)?;

    if apartment.version.is_initial() {
        let result = sqlx::query(
            r"
            INSERT INTO apartments (
                id, name, price_amount, price_currency, cleaning_fee_amount,
                cleaning_fee_currency, amenities, last_booked_at, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(apartment.id.as_uuid())
        .bind(&apartment.name)
        .bind(price)
        .bind(apartment.price.currency().code())
        .bind(cleaning_fee)
        .bind(apartment.cleaning_fee.currency().code())
        .bind(amenities)
        .bind(apartment.last_booked_at)
        .bind(next)
        .execute(&mut **tx)
        .await;

        return match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(CommitError::apartment_conflict(apartment)),
            Err(e) => Err(database_error(e).into()),
        };
    }

    let result = sqlx::query(
        r"
        UPDATE apartments
        SET name = $3, price_amount = $4, price_currency = $5, cleaning_fee_amount = $6,
            cleaning_fee_currency = $7, amenities = $8, last_booked_at = $9, version = $10
        WHERE id = $1 AND version = $2
        ",
    )
    .bind(apartment.id.as_uuid())
    .bind(version_to_db(apartment.version)?)
    .bind(&apartment.name)
    .bind(price)
    .bind(apartment.price.currency().code())
    .bind(cleaning_fee)
    .bind(apartment.cleaning_fee.currency().code())
    .bind(amenities)
    .bind(apartment.last_booked_at)
    .bind(next)
    .execute(&mut **tx)
    .await
    .map_err(database_error)?;

    if result.rows_affected() == 0 {
        return Err(CommitError::apartment_conflict(apartment));
    }
    Ok(())
}

async fn write_booking(tx: &mut Transaction<'static, Postgres>, booking: &Booking) -> Result<(), CommitError> {
    let next = version_to_db(booking.version.next())?;
    let price = &booking.price;

    if booking.version.is_initial() {
        let result = sqlx::query(&format!(
            r"
            INSERT INTO bookings ({BOOKING_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "
        ))
        .bind(booking.id.as_uuid())
        .bind(booking.apartment_id.as_uuid())
        .bind(booking.user_id.as_uuid())
        .bind(booking.period.start())
        .bind(booking.period.end())
        .bind(price.total.currency().code())
        .bind(cents_to_db(price.price_for_period)?)
        .bind(cents_to_db(price.cleaning_fee)?)
        .bind(cents_to_db(price.amenities_upcharge)?)
        .bind(cents_to_db(price.total)?)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .bind(booking.confirmed_at)
        .bind(booking.rejected_at)
        .bind(booking.completed_at)
        .bind(booking.cancelled_at)
        .bind(next)
        .execute(&mut **tx)
        .await;

        return match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(CommitError::booking_conflict(booking)),
            Err(e) => Err(database_error(e).into()),
        };
    }

    let result = sqlx::query(
        r"
        UPDATE bookings
        SET status = $3, confirmed_at = $4, rejected_at = $5, completed_at = $6,
            cancelled_at = $7, version = $8
        WHERE id = $1 AND version = $2
        ",
    )
    .bind(booking.id.as_uuid())
    .bind(version_to_db(booking.version)?)
    .bind(booking.status.as_str())
    .bind(booking.confirmed_at)
    .bind(booking.rejected_at)
    .bind(booking.completed_at)
    .bind(booking.cancelled_at)
    .bind(next)
    .execute(&mut **tx)
    .await
    .map_err(database_error)?;

    if result.rows_affected() == 0 {
        return Err(CommitError::booking_conflict(booking));
    }
    Ok(())
}

async fn insert_outbox_message(
    tx: &mut Transaction<'static, Postgres>,
    message: &NewOutboxMessage,
) -> Result<(), CommitError> {
    sqlx::query(
        r"
        INSERT INTO outbox_messages (id, occurred_at, event_type, payload)
        VALUES ($1, $2, $3, $4)
        ",
    )
    .bind(message.id)
    .bind(message.occurred_at)
    .bind(&message.event_type)
    .bind(&message.payload)
    .execute(&mut **tx)
    .await
    .map_err(database_error)?;
    Ok(())
}

fn row_to_apartment(row: &PgRow) -> Result<Apartment, PersistenceError> {
    let id: Uuid = row.try_get("id").map_err(database_error)?;
    let amenities: Vec<String> = row.try_get("amenities").map_err(database_error)?;

    Ok(Apartment {
        id: ApartmentId::from_uuid(id),
        name: row.try_get("name").map_err(database_error)?,
        price: money_from_row(row, "price_amount", "price_currency")?,
        cleaning_fee: money_from_row(row, "cleaning_fee_amount", "cleaning_fee_currency")?,
        amenities: amenities
            .iter()
            .map(|a| Amenity::parse(a).map_err(|e| PersistenceError::Serialization(e.to_string())))
            .collect::<Result<_, _>>()?,
        last_booked_at: row.try_get("last_booked_at").map_err(database_error)?,
        version: version_from_row(row)?,
    })
}

fn row_to_booking(row: &PgRow) -> Result<Booking, PersistenceError> {
    let id: Uuid = row.try_get("id").map_err(database_error)?;
    let apartment_id: Uuid = row.try_get("apartment_id").map_err(database_error)?;
    let user_id: Uuid = row.try_get("user_id").map_err(database_error)?;
    let start: NaiveDate = row.try_get("period_start").map_err(database_error)?;
    let end: NaiveDate = row.try_get("period_end").map_err(database_error)?;
    let status: String = row.try_get("status").map_err(database_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(database_error)?;

    let period = DateRange::new(start, end).map_err(|e| PersistenceError::Serialization(e.to_string()))?;
    let status = BookingStatus::parse(&status)
        .ok_or_else(|| PersistenceError::Serialization(format!("Invalid booking status: {status}")))?;
    let price = PriceBreakdown {
        price_for_period: money_from_row(row, "price_for_period_amount", "currency")?,
        cleaning_fee: money_from_row(row, "cleaning_fee_amount", "currency")?,
        amenities_upcharge: money_from_row(row, "amenities_upcharge_amount", "currency")?,
        total: money_from_row(row, "total_amount", "currency")?,
    };

    let mut booking = Booking::restore(
        BookingId::from_uuid(id),
        ApartmentId::from_uuid(apartment_id),
        UserId::from_uuid(user_id),
        period,
        price,
        status,
        created_at,
        version_from_row(row)?,
    );
    booking.confirmed_at = row.try_get("confirmed_at").map_err(database_error)?;
    booking.rejected_at = row.try_get("rejected_at").map_err(database_error)?;
    booking.completed_at = row.try_get("completed_at").map_err(database_error)?;
    booking.cancelled_at = row.try_get("cancelled_at").map_err(database_error)?;
    Ok(booking)
}

fn money_from_row(row: &PgRow, amount: &str, currency: &str) -> Result<Money, PersistenceError> {
    let cents: i64 = row.try_get(amount).map_err(database_error)?;
    let code: String = row.try_get(currency).map_err(database_error)?;
    let cents = u64::try_from(cents)
        .map_err(|_| PersistenceError::Serialization(format!("Negative amount in {amount}: {cents}")))?;
    let currency = Currency::parse(&code).map_err(|e| PersistenceError::Serialization(e.to_string()))?;
    Ok(Money::from_cents(cents, currency))
}

fn version_from_row(row: &PgRow) -> Result<Version, PersistenceError> {
    let version: i64 = row.try_get("version").map_err(database_error)?;
    u64::try_from(version)
        .map(Version::new)
        .map_err(|_| PersistenceError::Serialization(format!("Negative version: {version}")))
}

fn version_to_db(version: Version) -> Result<i64, PersistenceError> {
    i64::try_from(version.value())
        .map_err(|_| PersistenceError::Serialization(format!("Version out of range: {version}")))
}

fn cents_to_db(money: Money) -> Result<i64, PersistenceError> {
    i64::try_from(money.cents())
        .map_err(|_| PersistenceError::Serialization(format!("Amount out of range: {money}")))
}
