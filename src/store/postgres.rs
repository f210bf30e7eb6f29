use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, FromRow, PgPool, QueryBuilder};
use uuid::Uuid;

use super::{
    check_batch, in_request_order, BookingStore, Catalog, OccupyOutcome, OccupyRequest, SeatStore,
    ShowingStore, StorageError, TicketStore,
};
use crate::models::{
    Booking, BookingSeat, BookingStatus, HallTemplate, NewShowing, Occupant, PaymentStatus, Seat,
    Showing, ShowingCoordinates, ShowingFilter, ShowingId, Ticket, TicketStatus, UserId,
};

const SEAT_COLUMNS: &str = "showing_id, seat_number, seat_row, seat_col, category, price, status, \
     holder_id, held_at, occupant_kind, occupant_id, occupied_at";

const BOOKING_COLUMNS: &str = "id, user_id, showing_id, movie_id, seats, total_amount, \
     payment_method, payment_status, booking_status, qr_code, created_at, updated_at";

const TICKET_COLUMNS: &str = "id, user_id, showing_id, movie_id, movie_title, cinema, hall, \
     show_date, show_time, seats, total_amount, payment_method, status, created_at, updated_at";

const SHOWING_COLUMNS: &str = "id, movie_id, cinema, hall, show_date, show_time, created_at";

/// Postgres implementation of every store trait over one connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct SeatRow {
    showing_id: i64,
    seat_number: String,
    seat_row: String,
    seat_col: i32,
    category: String,
    price: Decimal,
    status: String,
    holder_id: Option<i64>,
    held_at: Option<DateTime<Utc>>,
    occupant_kind: Option<String>,
    occupant_id: Option<Uuid>,
    occupied_at: Option<DateTime<Utc>>,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StorageError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        let occupant = match (row.occupant_kind.as_deref(), row.occupant_id) {
            (Some(kind), Some(id)) => Some(Occupant::from_parts(kind, id)?),
            (None, None) => None,
            _ => {
                return Err(StorageError::Corrupt(format!(
                    "seat {}/{} has a partial occupant",
                    row.showing_id, row.seat_number
                )))
            }
        };
        Ok(Seat {
            showing_id: row.showing_id,
            seat_number: row.seat_number,
            row: row.seat_row,
            number: row.seat_col,
            category: row.category.parse()?,
            price: row.price,
            status: row.status.parse()?,
            holder: row.holder_id,
            held_at: row.held_at,
            occupant,
            occupied_at: row.occupied_at,
        })
    }
}

fn into_seats(rows: Vec<SeatRow>) -> Result<Vec<Seat>, StorageError> {
    rows.into_iter().map(Seat::try_from).collect()
}

#[derive(FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: i64,
    showing_id: i64,
    movie_id: i64,
    seats: Json<Vec<BookingSeat>>,
    total_amount: Decimal,
    payment_method: String,
    payment_status: String,
    booking_status: String,
    qr_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StorageError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            showing_id: row.showing_id,
            movie_id: row.movie_id,
            seats: row.seats.0,
            total_amount: row.total_amount,
            payment_method: row.payment_method.parse()?,
            payment_status: row.payment_status.parse()?,
            booking_status: row.booking_status.parse()?,
            qr_code: row.qr_code,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TicketRow {
    id: Uuid,
    user_id: i64,
    showing_id: i64,
    movie_id: i64,
    movie_title: String,
    cinema: String,
    hall: String,
    show_date: NaiveDate,
    show_time: String,
    seats: Vec<String>,
    total_amount: Decimal,
    payment_method: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StorageError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            user_id: row.user_id,
            showing_id: row.showing_id,
            movie_id: row.movie_id,
            movie_title: row.movie_title,
            cinema: row.cinema,
            hall: row.hall,
            date: row.show_date,
            time: row.show_time,
            seats: row.seats,
            total_amount: row.total_amount,
            payment_method: row.payment_method.parse()?,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ShowingRow {
    id: i64,
    movie_id: i64,
    cinema: String,
    hall: String,
    show_date: NaiveDate,
    show_time: String,
    created_at: DateTime<Utc>,
}

impl From<ShowingRow> for Showing {
    fn from(row: ShowingRow) -> Self {
        Showing {
            id: row.id,
            movie_id: row.movie_id,
            cinema: row.cinema,
            hall: row.hall,
            date: row.show_date,
            time: row.show_time,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl SeatStore for PgStore {
    async fn insert_seats(&self, seats: &[Seat]) -> Result<u64, StorageError> {
        if seats.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::new(
            "INSERT INTO seats (showing_id, seat_number, seat_row, seat_col, category, price) ",
        );
        qb.push_values(seats, |mut b, seat| {
            b.push_bind(seat.showing_id)
                .push_bind(&seat.seat_number)
                .push_bind(&seat.row)
                .push_bind(seat.number)
                .push_bind(seat.category.as_str())
                .push_bind(seat.price);
        });
        qb.push(" ON CONFLICT (showing_id, seat_number) DO NOTHING");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count_seats(&self, showing_id: ShowingId) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seats WHERE showing_id = $1")
            .bind(showing_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn get_seat(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
    ) -> Result<Option<Seat>, StorageError> {
        let row: Option<SeatRow> = sqlx::query_as(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats WHERE showing_id = $1 AND seat_number = $2"
        ))
        .bind(showing_id)
        .bind(seat_number)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Seat::try_from).transpose()
    }

    async fn list_seats(&self, showing_id: ShowingId) -> Result<Vec<Seat>, StorageError> {
        let rows: Vec<SeatRow> = sqlx::query_as(&format!(
            "SELECT {SEAT_COLUMNS} FROM seats WHERE showing_id = $1 ORDER BY seat_row, seat_col"
        ))
        .bind(showing_id)
        .fetch_all(&self.pool)
        .await?;
        into_seats(rows)
    }

    async fn try_hold(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        holder: UserId,
        now: DateTime<Utc>,
        hold_cutoff: DateTime<Utc>,
    ) -> Result<Option<Seat>, StorageError> {
        // Один условный UPDATE: из двух конкурентных запросов выиграет ровно один
        let row: Option<SeatRow> = sqlx::query_as(&format!(
            r#"
            UPDATE seats
            SET status = 'selected', holder_id = $3, held_at = $4
            WHERE showing_id = $1 AND seat_number = $2
              AND (status = 'available' OR (status = 'selected' AND held_at < $5))
            RETURNING {SEAT_COLUMNS}
            "#
        ))
        .bind(showing_id)
        .bind(seat_number)
        .bind(holder)
        .bind(now)
        .bind(hold_cutoff)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Seat::try_from).transpose()
    }

    async fn try_release(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        holder: UserId,
    ) -> Result<Option<Seat>, StorageError> {
        let row: Option<SeatRow> = sqlx::query_as(&format!(
            r#"
            UPDATE seats
            SET status = 'available', holder_id = NULL, held_at = NULL
            WHERE showing_id = $1 AND seat_number = $2
              AND status = 'selected' AND holder_id = $3
            RETURNING {SEAT_COLUMNS}
            "#
        ))
        .bind(showing_id)
        .bind(seat_number)
        .bind(holder)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Seat::try_from).transpose()
    }

    async fn expire_hold(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        held_at: DateTime<Utc>,
    ) -> Result<Option<Seat>, StorageError> {
        let row: Option<SeatRow> = sqlx::query_as(&format!(
            r#"
            UPDATE seats
            SET status = 'available', holder_id = NULL, held_at = NULL
            WHERE showing_id = $1 AND seat_number = $2
              AND status = 'selected' AND held_at = $3
            RETURNING {SEAT_COLUMNS}
            "#
        ))
        .bind(showing_id)
        .bind(seat_number)
        .bind(held_at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Seat::try_from).transpose()
    }

    async fn occupy(&self, request: OccupyRequest<'_>) -> Result<OccupyOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;

        // Блокируем строки в фиксированном порядке, чтобы пересекающиеся пакеты не зацикливались
        let rows: Vec<SeatRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SEAT_COLUMNS}
            FROM seats
            WHERE showing_id = $1 AND seat_number = ANY($2)
            ORDER BY seat_number
            FOR UPDATE
            "#
        ))
        .bind(request.showing_id)
        .bind(request.seat_numbers)
        .fetch_all(&mut *tx)
        .await?;
        let found = into_seats(rows)?;

        if let Some(rejection) = check_batch(&found, &request) {
            tx.rollback().await?;
            return Ok(rejection);
        }

        let rows: Vec<SeatRow> = sqlx::query_as(&format!(
            r#"
            UPDATE seats
            SET status = 'occupied', holder_id = NULL, held_at = NULL,
                occupant_kind = $3, occupant_id = $4, occupied_at = $5
            WHERE showing_id = $1 AND seat_number = ANY($2)
            RETURNING {SEAT_COLUMNS}
            "#
        ))
        .bind(request.showing_id)
        .bind(request.seat_numbers)
        .bind(request.occupant.kind())
        .bind(request.occupant.id())
        .bind(request.now)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        // RETURNING не гарантирует порядок строк
        let occupied = in_request_order(into_seats(rows)?, request.seat_numbers);
        Ok(OccupyOutcome::Occupied(occupied))
    }

    async fn free(
        &self,
        showing_id: ShowingId,
        seat_numbers: &[String],
        occupant: Occupant,
    ) -> Result<Vec<String>, StorageError> {
        let freed: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE seats
            SET status = 'available', occupant_kind = NULL, occupant_id = NULL, occupied_at = NULL
            WHERE showing_id = $1 AND seat_number = ANY($2)
              AND status = 'occupied' AND occupant_kind = $3 AND occupant_id = $4
            RETURNING seat_number
            "#,
        )
        .bind(showing_id)
        .bind(seat_numbers)
        .bind(occupant.kind())
        .bind(occupant.id())
        .fetch_all(&self.pool)
        .await?;
        Ok(freed)
    }

    async fn orphaned_seats(&self, cutoff: DateTime<Utc>) -> Result<Vec<Seat>, StorageError> {
        // Живые брони и билеты отсекаются в самом запросе, наружу уходят только кандидаты
        let rows: Vec<SeatRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SEAT_COLUMNS}
            FROM seats s
            WHERE s.status = 'occupied' AND s.occupied_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM bookings b
                  WHERE s.occupant_kind = 'booking' AND b.id = s.occupant_id
                    AND b.showing_id = s.showing_id
                    AND b.booking_status IN ('active', 'completed'))
              AND NOT EXISTS (
                  SELECT 1 FROM tickets t
                  WHERE s.occupant_kind = 'ticket' AND t.id = s.occupant_id
                    AND t.showing_id = s.showing_id
                    AND t.status = 'active')
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        into_seats(rows)
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, user_id, showing_id, movie_id, seats, total_amount,
                                  payment_method, payment_status, booking_status, qr_code,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.showing_id)
        .bind(booking.movie_id)
        .bind(Json(&booking.seats))
        .bind(booking.total_amount)
        .bind(booking.payment_method.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.booking_status.as_str())
        .bind(&booking.qr_code)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StorageError> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_bookings_for_user(&self, user_id: UserId) -> Result<Vec<Booking>, StorageError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StorageError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        expected: BookingStatus,
        expected_payment: Option<PaymentStatus>,
        next: BookingStatus,
        payment: Option<PaymentStatus>,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, StorageError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            r#"
            UPDATE bookings
            SET booking_status = $3,
                payment_status = COALESCE($4, payment_status),
                updated_at = $5
            WHERE id = $1 AND booking_status = $2
              AND ($6::TEXT IS NULL OR payment_status = $6)
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(payment.map(|p| p.as_str()))
        .bind(now)
        .bind(expected_payment.map(|p| p.as_str()))
        .fetch_optional(&self.pool)
        .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn set_qr_code(&self, id: Uuid, qr_code: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE bookings SET qr_code = $2 WHERE id = $1")
            .bind(id)
            .bind(qr_code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TicketStore for PgStore {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO tickets (id, user_id, showing_id, movie_id, movie_title, cinema, hall,
                                 show_date, show_time, seats, total_amount, payment_method,
                                 status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.user_id)
        .bind(ticket.showing_id)
        .bind(ticket.movie_id)
        .bind(&ticket.movie_title)
        .bind(&ticket.cinema)
        .bind(&ticket.hall)
        .bind(ticket.date)
        .bind(&ticket.time)
        .bind(&ticket.seats)
        .bind(ticket.total_amount)
        .bind(ticket.payment_method.as_str())
        .bind(ticket.status.as_str())
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>, StorageError> {
        let row: Option<TicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn list_tickets_for_user(&self, user_id: UserId) -> Result<Vec<Ticket>, StorageError> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Ticket::try_from).collect()
    }

    async fn transition_ticket(
        &self,
        id: Uuid,
        expected: TicketStatus,
        next: TicketStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StorageError> {
        let row: Option<TicketRow> = sqlx::query_as(&format!(
            r#"
            UPDATE tickets
            SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Ticket::try_from).transpose()
    }
}

#[async_trait]
impl ShowingStore for PgStore {
    async fn create_showing(
        &self,
        showing: &NewShowing,
        now: DateTime<Utc>,
    ) -> Result<Showing, StorageError> {
        let result: Result<ShowingRow, sqlx::Error> = sqlx::query_as(&format!(
            r#"
            INSERT INTO showings (movie_id, cinema, hall, show_date, show_time, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SHOWING_COLUMNS}
            "#
        ))
        .bind(showing.movie_id)
        .bind(&showing.cinema)
        .bind(&showing.hall)
        .bind(showing.date)
        .bind(&showing.time)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row.into()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::Duplicate(format!(
                    "showing of movie {} in hall {} at {} {}",
                    showing.movie_id, showing.hall, showing.date, showing.time
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_showing(&self, id: ShowingId) -> Result<Option<Showing>, StorageError> {
        let row: Option<ShowingRow> =
            sqlx::query_as(&format!("SELECT {SHOWING_COLUMNS} FROM showings WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Showing::from))
    }

    async fn find_showing(
        &self,
        coordinates: &ShowingCoordinates,
    ) -> Result<Option<Showing>, StorageError> {
        let row: Option<ShowingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SHOWING_COLUMNS}
            FROM showings
            WHERE movie_id = $1 AND hall = $2 AND show_date = $3 AND show_time = $4
            "#
        ))
        .bind(coordinates.movie_id)
        .bind(&coordinates.hall)
        .bind(coordinates.date)
        .bind(&coordinates.time)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Showing::from))
    }

    async fn list_showings(&self, filter: &ShowingFilter) -> Result<Vec<Showing>, StorageError> {
        let rows: Vec<ShowingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SHOWING_COLUMNS}
            FROM showings
            WHERE ($1::BIGINT IS NULL OR movie_id = $1)
              AND ($2::TEXT IS NULL OR cinema = $2)
            ORDER BY show_date, show_time, id
            "#
        ))
        .bind(filter.movie_id)
        .bind(filter.cinema.as_deref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Showing::from).collect())
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn hall_template(
        &self,
        cinema: &str,
        hall: &str,
    ) -> Result<Option<HallTemplate>, StorageError> {
        let seat_map: Option<Json<HallTemplate>> =
            sqlx::query_scalar("SELECT seat_map FROM halls WHERE cinema = $1 AND hall = $2")
                .bind(cinema)
                .bind(hall)
                .fetch_optional(&self.pool)
                .await?;
        Ok(seat_map.map(|Json(template)| template))
    }
}
