//! Cancels that lose to a concurrent status change. The store below lets a
//! competing request land between a cancel freeing its seats and the
//! booking status flip.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use cinema_booking::error::BookingError;
use cinema_booking::inventory::{Clock, ManualClock};
use cinema_booking::models::{
    Booking, BookingStatus, HallTemplate, NewShowing, Occupant, PaymentMethod, PaymentStatus,
    Requester, Seat, Showing, ShowingCoordinates, ShowingFilter, ShowingId, Ticket, TicketStatus,
    UserId,
};
use cinema_booking::services::{NewBooking, QrPayloadRenderer, ServiceSettings, Services};
use cinema_booking::store::{
    BookingStore, Catalog, Eligibility, MemoryStore, OccupyOutcome, OccupyRequest, SeatStore,
    ShowingStore, StorageError, TicketStore,
};
use common::*;

/// What the competing request does.
#[derive(Debug, Clone)]
enum Interleaving {
    PaymentCompleted(Uuid),
    AdminCompleted { booking: Uuid, sold_to_stranger: Option<String> },
}

struct InterleavingStore {
    inner: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    next: Mutex<Option<Interleaving>>,
}

impl InterleavingStore {
    fn schedule(&self, step: Interleaving) {
        *self.next.lock().unwrap() = Some(step);
    }

    async fn run(&self, step: Interleaving) -> Result<(), StorageError> {
        let now = self.clock.now();
        match step {
            Interleaving::PaymentCompleted(id) => {
                self.inner
                    .transition_booking(
                        id,
                        BookingStatus::Active,
                        Some(PaymentStatus::Pending),
                        BookingStatus::Active,
                        Some(PaymentStatus::Completed),
                        now,
                    )
                    .await?;
            }
            Interleaving::AdminCompleted { booking, sold_to_stranger } => {
                let completed = self
                    .inner
                    .transition_booking(booking, BookingStatus::Active, None, BookingStatus::Completed, None, now)
                    .await?;
                if let (Some(completed), Some(seat)) = (completed, sold_to_stranger) {
                    let numbers = vec![seat];
                    self.inner
                        .occupy(OccupyRequest {
                            showing_id: completed.showing_id,
                            seat_numbers: &numbers,
                            occupant: Occupant::Ticket(Uuid::new_v4()),
                            eligibility: Eligibility::Available,
                            now,
                            hold_cutoff: now,
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SeatStore for InterleavingStore {
    async fn insert_seats(&self, seats: &[Seat]) -> Result<u64, StorageError> {
        self.inner.insert_seats(seats).await
    }

    async fn count_seats(&self, showing_id: ShowingId) -> Result<u64, StorageError> {
        self.inner.count_seats(showing_id).await
    }

    async fn get_seat(&self, showing_id: ShowingId, seat_number: &str) -> Result<Option<Seat>, StorageError> {
        self.inner.get_seat(showing_id, seat_number).await
    }

    async fn list_seats(&self, showing_id: ShowingId) -> Result<Vec<Seat>, StorageError> {
        self.inner.list_seats(showing_id).await
    }

    async fn try_hold(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        holder: UserId,
        now: DateTime<Utc>,
        hold_cutoff: DateTime<Utc>,
    ) -> Result<Option<Seat>, StorageError> {
        self.inner.try_hold(showing_id, seat_number, holder, now, hold_cutoff).await
    }

    async fn try_release(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        holder: UserId,
    ) -> Result<Option<Seat>, StorageError> {
        self.inner.try_release(showing_id, seat_number, holder).await
    }

    async fn expire_hold(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        held_at: DateTime<Utc>,
    ) -> Result<Option<Seat>, StorageError> {
        self.inner.expire_hold(showing_id, seat_number, held_at).await
    }

    async fn occupy(&self, request: OccupyRequest<'_>) -> Result<OccupyOutcome, StorageError> {
        self.inner.occupy(request).await
    }

    async fn free(
        &self,
        showing_id: ShowingId,
        seat_numbers: &[String],
        occupant: Occupant,
    ) -> Result<Vec<String>, StorageError> {
        let freed = self.inner.free(showing_id, seat_numbers, occupant).await?;
        let step = self.next.lock().unwrap().take();
        if let Some(step) = step {
            self.run(step).await?;
        }
        Ok(freed)
    }

    async fn orphaned_seats(&self, cutoff: DateTime<Utc>) -> Result<Vec<Seat>, StorageError> {
        self.inner.orphaned_seats(cutoff).await
    }
}

#[async_trait]
impl BookingStore for InterleavingStore {
    async fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError> {
        self.inner.insert_booking(booking).await
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StorageError> {
        self.inner.get_booking(id).await
    }

    async fn list_bookings_for_user(&self, user_id: UserId) -> Result<Vec<Booking>, StorageError> {
        self.inner.list_bookings_for_user(user_id).await
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StorageError> {
        self.inner.list_bookings().await
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
        self.inner
            .transition_booking(id, expected, expected_payment, next, payment, now)
            .await
    }

    async fn set_qr_code(&self, id: Uuid, qr_code: &str) -> Result<(), StorageError> {
        self.inner.set_qr_code(id, qr_code).await
    }
}

#[async_trait]
impl TicketStore for InterleavingStore {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StorageError> {
        self.inner.insert_ticket(ticket).await
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>, StorageError> {
        self.inner.get_ticket(id).await
    }

    async fn list_tickets_for_user(&self, user_id: UserId) -> Result<Vec<Ticket>, StorageError> {
        self.inner.list_tickets_for_user(user_id).await
    }

    async fn transition_ticket(
        &self,
        id: Uuid,
        expected: TicketStatus,
        next: TicketStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StorageError> {
        self.inner.transition_ticket(id, expected, next, now).await
    }
}

#[async_trait]
impl ShowingStore for InterleavingStore {
    async fn create_showing(&self, showing: &NewShowing, now: DateTime<Utc>) -> Result<Showing, StorageError> {
        self.inner.create_showing(showing, now).await
    }

    async fn get_showing(&self, id: ShowingId) -> Result<Option<Showing>, StorageError> {
        self.inner.get_showing(id).await
    }

    async fn find_showing(&self, coordinates: &ShowingCoordinates) -> Result<Option<Showing>, StorageError> {
        self.inner.find_showing(coordinates).await
    }

    async fn list_showings(&self, filter: &ShowingFilter) -> Result<Vec<Showing>, StorageError> {
        self.inner.list_showings(filter).await
    }
}

#[async_trait]
impl Catalog for InterleavingStore {
    async fn hall_template(&self, cinema: &str, hall: &str) -> Result<Option<HallTemplate>, StorageError> {
        self.inner.hall_template(cinema, hall).await
    }
}

struct Race {
    store: Arc<InterleavingStore>,
    services: Services,
    showing_id: ShowingId,
}

impl Race {
    async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(InterleavingStore {
            inner: Arc::new(MemoryStore::new()),
            clock: clock.clone(),
            next: Mutex::new(None),
        });
        let services = Services::new(
            store.clone(),
            clock,
            ServiceSettings { hold_ttl: HOLD_TTL, reconciliation_grace: GRACE },
            Arc::new(RecordingNotifier::default()),
            Arc::new(QrPayloadRenderer),
        );
        let showing = services
            .inventory
            .create_showing(NewShowing {
                movie_id: MOVIE,
                cinema: CINEMA.into(),
                hall: HALL.into(),
                date: Harness::show_date(),
                time: "19:30".into(),
            })
            .await
            .unwrap();
        services.inventory.initialize(showing.id, Some(two_row_hall())).await.unwrap();
        Self { store, services, showing_id: showing.id }
    }

    async fn book(&self, numbers: &[&str], amount: i64) -> Booking {
        self.services
            .bookings
            .create_booking(
                Requester::user(U1),
                NewBooking {
                    movie_id: MOVIE,
                    showing_id: self.showing_id,
                    seats: seats(numbers),
                    amount: Decimal::from(amount),
                    payment_method: PaymentMethod::Card,
                },
            )
            .await
            .unwrap()
    }

    async fn occupant_of(&self, number: &str) -> Option<Occupant> {
        self.store
            .inner
            .get_seat(self.showing_id, number)
            .await
            .unwrap()
            .unwrap()
            .occupant
    }

    async fn stored(&self, id: Uuid) -> Booking {
        self.store.inner.get_booking(id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn failed_payment_loses_to_a_completed_payment() {
    let race = Race::new().await;
    let booking = race.book(&["A1", "A2"], 30).await;
    race.store.schedule(Interleaving::PaymentCompleted(booking.id));

    let err = race
        .services
        .bookings
        .update_payment_status(booking.id, PaymentStatus::Failed, Requester::user(U1))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }), "got {:?}", err);

    let stored = race.stored(booking.id).await;
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
    assert_eq!(stored.booking_status, BookingStatus::Active);
    for number in ["A1", "A2"] {
        assert_eq!(race.occupant_of(number).await, Some(Occupant::Booking(booking.id)));
    }
}

#[tokio::test]
async fn cancel_loses_to_a_completed_payment() {
    let race = Race::new().await;
    let booking = race.book(&["B1", "B2"], 20).await;
    race.store.schedule(Interleaving::PaymentCompleted(booking.id));

    let err = race
        .services
        .bookings
        .cancel_booking(booking.id, Requester::user(U1))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }), "got {:?}", err);

    let stored = race.stored(booking.id).await;
    assert_eq!((stored.booking_status, stored.payment_status), (BookingStatus::Active, PaymentStatus::Completed));
    for number in ["B1", "B2"] {
        assert_eq!(race.occupant_of(number).await, Some(Occupant::Booking(booking.id)));
    }
}

#[tokio::test]
async fn cancel_losing_to_admin_completion_restores_the_seats() {
    let race = Race::new().await;
    let booking = race.book(&["A3", "B3"], 25).await;
    race.store.schedule(Interleaving::AdminCompleted { booking: booking.id, sold_to_stranger: None });

    let err = race
        .services
        .bookings
        .cancel_booking(booking.id, Requester::user(U1))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }), "got {:?}", err);

    assert_eq!(race.stored(booking.id).await.booking_status, BookingStatus::Completed);
    for number in ["A3", "B3"] {
        assert_eq!(race.occupant_of(number).await, Some(Occupant::Booking(booking.id)));
    }
}

#[tokio::test]
async fn seats_sold_during_a_lost_cancel_are_reported() {
    let race = Race::new().await;
    let booking = race.book(&["A1", "A2", "B1"], 40).await;
    race.store.schedule(Interleaving::AdminCompleted {
        booking: booking.id,
        sold_to_stranger: Some("A2".into()),
    });

    let err = race
        .services
        .bookings
        .cancel_booking(booking.id, Requester::user(U1))
        .await
        .unwrap_err();
    match err {
        BookingError::SeatsLost { booking: id, seats } => {
            assert_eq!(id, booking.id);
            assert_eq!(seats, vec!["A2".to_string()]);
        }
        other => panic!("expected lost seats, got {:?}", other),
    }

    assert_eq!(race.stored(booking.id).await.booking_status, BookingStatus::Completed);
    for number in ["A1", "B1"] {
        assert_eq!(race.occupant_of(number).await, Some(Occupant::Booking(booking.id)));
    }
    assert!(matches!(race.occupant_of("A2").await, Some(Occupant::Ticket(_))));
}
