//! Durable storage seams.
//!
//! Every seat mutation is expressed as one conditional operation against the
//! store: the store's own consistency mechanism (row locks and conditional
//! `UPDATE`s in Postgres, a single mutex in [`MemoryStore`]) is the only
//! synchronization primitive. Nothing above this layer reads a seat, decides,
//! and then writes it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Booking, BookingStatus, HallTemplate, NewShowing, Occupant, PaymentStatus, Seat, SeatStatus,
    Showing, ShowingCoordinates, ShowingFilter, ShowingId, Ticket, TicketStatus, UnknownVariant,
    UserId,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<UnknownVariant> for StorageError {
    fn from(err: UnknownVariant) -> Self {
        StorageError::Corrupt(err.to_string())
    }
}

/// Which starting states `occupy` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Direct purchase: only free seats.
    Available,
    /// Booking conversion: free seats or seats held by this user.
    AvailableOrHeldBy(UserId),
}

#[derive(Debug, Clone)]
pub struct OccupyRequest<'a> {
    pub showing_id: ShowingId,
    pub seat_numbers: &'a [String],
    pub occupant: Occupant,
    pub eligibility: Eligibility,
    pub now: DateTime<Utc>,
    /// Holds taken before this instant have lapsed and count as available.
    pub hold_cutoff: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OccupyOutcome {
    Occupied(Vec<Seat>),
    /// Seats that exist but are not in an eligible state. Nothing was written.
    Conflict(Vec<String>),
    /// Seat numbers unknown for the showing. Nothing was written.
    Missing(Vec<String>),
}

/// Whether a single seat may be occupied under `eligibility`.
pub fn is_eligible(seat: &Seat, eligibility: Eligibility, hold_cutoff: DateTime<Utc>) -> bool {
    match seat.status {
        SeatStatus::Available => true,
        SeatStatus::Occupied => false,
        SeatStatus::Selected => {
            let lapsed = seat.held_at.map_or(true, |at| at < hold_cutoff);
            lapsed
                || matches!(eligibility, Eligibility::AvailableOrHeldBy(user) if seat.holder == Some(user))
        }
    }
}

/// Checks a locked batch against a request. `found` must hold the current
/// state of every requested seat that exists.
pub fn check_batch(found: &[Seat], request: &OccupyRequest<'_>) -> Option<OccupyOutcome> {
    let missing: Vec<String> = request
        .seat_numbers
        .iter()
        .filter(|n| !found.iter().any(|s| &s.seat_number == *n))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Some(OccupyOutcome::Missing(missing));
    }

    let mut blocked: Vec<String> = found
        .iter()
        .filter(|s| !is_eligible(s, request.eligibility, request.hold_cutoff))
        .map(|s| s.seat_number.clone())
        .collect();
    if blocked.is_empty() {
        None
    } else {
        blocked.sort();
        Some(OccupyOutcome::Conflict(blocked))
    }
}

/// Orders seats the way they were requested. Seats not in the request go last.
pub fn in_request_order(mut seats: Vec<Seat>, seat_numbers: &[String]) -> Vec<Seat> {
    seats.sort_by_key(|seat| {
        seat_numbers
            .iter()
            .position(|n| n == &seat.seat_number)
            .unwrap_or(usize::MAX)
    });
    seats
}

#[async_trait]
pub trait SeatStore: Send + Sync + 'static {
    /// Bulk insert; seats whose `(showing_id, seat_number)` already exists are
    /// skipped. Returns how many rows were actually inserted.
    async fn insert_seats(&self, seats: &[Seat]) -> Result<u64, StorageError>;

    async fn count_seats(&self, showing_id: ShowingId) -> Result<u64, StorageError>;

    async fn get_seat(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
    ) -> Result<Option<Seat>, StorageError>;

    /// Every seat of a showing, ordered by row then column.
    async fn list_seats(&self, showing_id: ShowingId) -> Result<Vec<Seat>, StorageError>;

    /// `available -> selected`, or re-hold of a hold taken before
    /// `hold_cutoff`. `None` when the condition did not match.
    async fn try_hold(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        holder: UserId,
        now: DateTime<Utc>,
        hold_cutoff: DateTime<Utc>,
    ) -> Result<Option<Seat>, StorageError>;

    /// `selected -> available` if `holder` holds the seat.
    async fn try_release(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        holder: UserId,
    ) -> Result<Option<Seat>, StorageError>;

    /// Reverts a lapsed hold, conditional on the hold still being the one
    /// taken at `held_at`.
    async fn expire_hold(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        held_at: DateTime<Utc>,
    ) -> Result<Option<Seat>, StorageError>;

    /// All-or-nothing batch occupation.
    async fn occupy(&self, request: OccupyRequest<'_>) -> Result<OccupyOutcome, StorageError>;

    /// `occupied -> available` for the seats still owned by `occupant`.
    /// Returns the seat numbers that were actually freed.
    async fn free(
        &self,
        showing_id: ShowingId,
        seat_numbers: &[String],
        occupant: Occupant,
    ) -> Result<Vec<String>, StorageError>;

    /// Seats occupied before `cutoff` whose occupant is missing, cancelled or
    /// recorded against another showing. Seats of live records never appear.
    async fn orphaned_seats(&self, cutoff: DateTime<Utc>) -> Result<Vec<Seat>, StorageError>;
}

#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    async fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StorageError>;

    async fn list_bookings_for_user(&self, user_id: UserId) -> Result<Vec<Booking>, StorageError>;

    async fn list_bookings(&self) -> Result<Vec<Booking>, StorageError>;

    /// Compare-and-set on `booking_status`, and on `payment_status` too when
    /// `expected_payment` is given. `payment` overwrites the payment status
    /// when given. `None` when the booking did not match.
    async fn transition_booking(
        &self,
        id: Uuid,
        expected: BookingStatus,
        expected_payment: Option<PaymentStatus>,
        next: BookingStatus,
        payment: Option<PaymentStatus>,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, StorageError>;

    async fn set_qr_code(&self, id: Uuid, qr_code: &str) -> Result<(), StorageError>;
}

#[async_trait]
pub trait TicketStore: Send + Sync + 'static {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StorageError>;

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>, StorageError>;

    async fn list_tickets_for_user(&self, user_id: UserId) -> Result<Vec<Ticket>, StorageError>;

    /// Compare-and-set on `status`.
    async fn transition_ticket(
        &self,
        id: Uuid,
        expected: TicketStatus,
        next: TicketStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StorageError>;
}

#[async_trait]
pub trait ShowingStore: Send + Sync + 'static {
    /// Fails with [`StorageError::Duplicate`] when the coordinates are taken.
    async fn create_showing(
        &self,
        showing: &NewShowing,
        now: DateTime<Utc>,
    ) -> Result<Showing, StorageError>;

    async fn get_showing(&self, id: ShowingId) -> Result<Option<Showing>, StorageError>;

    async fn find_showing(
        &self,
        coordinates: &ShowingCoordinates,
    ) -> Result<Option<Showing>, StorageError>;

    /// Showings matching `filter`, ordered by date, time and id.
    async fn list_showings(&self, filter: &ShowingFilter) -> Result<Vec<Showing>, StorageError>;
}

/// Read-only view of the cinema catalog.
#[async_trait]
pub trait Catalog: Send + Sync + 'static {
    async fn hall_template(
        &self,
        cinema: &str,
        hall: &str,
    ) -> Result<Option<HallTemplate>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeatCategory;
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn seat(number: &str) -> Seat {
        let mut seat = Seat::available(1, "A", 1, SeatCategory::Standard, Decimal::from(10));
        seat.seat_number = number.to_string();
        seat
    }

    #[test]
    fn held_seat_is_eligible_only_for_its_holder() {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(7);
        let mut held = seat("A1");
        held.set_selected(5, now);

        assert!(is_eligible(&held, Eligibility::AvailableOrHeldBy(5), cutoff));
        assert!(!is_eligible(&held, Eligibility::AvailableOrHeldBy(6), cutoff));
        assert!(!is_eligible(&held, Eligibility::Available, cutoff));
    }

    #[test]
    fn lapsed_hold_is_eligible_for_anyone() {
        let now = Utc::now();
        let mut held = seat("A1");
        held.set_selected(5, now - Duration::minutes(10));
        assert!(is_eligible(&held, Eligibility::Available, now - Duration::minutes(7)));
    }

    #[test]
    fn occupied_seats_come_back_in_request_order() {
        let returned = vec![seat("A1"), seat("B3"), seat("A2")];
        let requested = vec!["B3".to_string(), "A2".to_string(), "A1".to_string()];
        let ordered: Vec<String> = in_request_order(returned, &requested)
            .into_iter()
            .map(|s| s.seat_number)
            .collect();
        assert_eq!(ordered, requested);
    }

    #[test]
    fn batch_check_reports_missing_before_conflicts() {
        let now = Utc::now();
        let mut taken = seat("A2");
        taken.set_occupied(Occupant::Ticket(Uuid::new_v4()), now);
        let found = vec![seat("A1"), taken];
        let numbers = vec!["A1".to_string(), "A2".to_string(), "A9".to_string()];
        let request = OccupyRequest {
            showing_id: 1,
            seat_numbers: &numbers,
            occupant: Occupant::Booking(Uuid::new_v4()),
            eligibility: Eligibility::Available,
            now,
            hold_cutoff: now,
        };
        assert_eq!(check_batch(&found, &request), Some(OccupyOutcome::Missing(vec!["A9".into()])));

        let numbers = vec!["A1".to_string(), "A2".to_string()];
        let request = OccupyRequest { seat_numbers: &numbers, ..request };
        assert_eq!(check_batch(&found, &request), Some(OccupyOutcome::Conflict(vec!["A2".into()])));
    }
}
