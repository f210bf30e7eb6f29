use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    check_batch, BookingStore, Catalog, OccupyOutcome, OccupyRequest, SeatStore, ShowingStore,
    StorageError, TicketStore,
};
use crate::models::{
    Booking, BookingStatus, HallTemplate, NewShowing, Occupant, PaymentStatus, Seat, SeatStatus,
    Showing, ShowingCoordinates, ShowingFilter, ShowingId, Ticket, TicketStatus, UserId,
};

#[derive(Default)]
struct State {
    seats: BTreeMap<(ShowingId, String), Seat>,
    bookings: HashMap<Uuid, Booking>,
    tickets: HashMap<Uuid, Ticket>,
    showings: BTreeMap<ShowingId, Showing>,
    halls: HashMap<(String, String), HallTemplate>,
    next_showing_id: ShowingId,
}

/// Process-local store. One mutex guards all state, so every trait method is
/// a single atomic step, mirroring a transaction in the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hall seat map in the catalog.
    pub async fn insert_hall(&self, cinema: &str, hall: &str, template: HallTemplate) {
        let mut state = self.state.lock().await;
        state.halls.insert((cinema.to_string(), hall.to_string()), template);
    }

    /// Replaces a stored seat verbatim. Lets tests stage states such as an
    /// occupation left behind by a crashed request.
    pub async fn put_seat(&self, seat: Seat) {
        let mut state = self.state.lock().await;
        state.seats.insert((seat.showing_id, seat.seat_number.clone()), seat);
    }
}

fn sorted(mut seats: Vec<Seat>) -> Vec<Seat> {
    seats.sort_by(|a, b| a.row.cmp(&b.row).then(a.number.cmp(&b.number)));
    seats
}

#[async_trait]
impl SeatStore for MemoryStore {
    async fn insert_seats(&self, seats: &[Seat]) -> Result<u64, StorageError> {
        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for seat in seats {
            let key = (seat.showing_id, seat.seat_number.clone());
            if !state.seats.contains_key(&key) {
                state.seats.insert(key, seat.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count_seats(&self, showing_id: ShowingId) -> Result<u64, StorageError> {
        let state = self.state.lock().await;
        Ok(state.seats.keys().filter(|(id, _)| *id == showing_id).count() as u64)
    }

    async fn get_seat(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
    ) -> Result<Option<Seat>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.seats.get(&(showing_id, seat_number.to_string())).cloned())
    }

    async fn list_seats(&self, showing_id: ShowingId) -> Result<Vec<Seat>, StorageError> {
        let state = self.state.lock().await;
        let seats = state.seats.values().filter(|s| s.showing_id == showing_id).cloned().collect();
        Ok(sorted(seats))
    }

    async fn try_hold(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        holder: UserId,
        now: DateTime<Utc>,
        hold_cutoff: DateTime<Utc>,
    ) -> Result<Option<Seat>, StorageError> {
        let mut state = self.state.lock().await;
        let Some(seat) = state.seats.get_mut(&(showing_id, seat_number.to_string())) else {
            return Ok(None);
        };
        let lapsed = seat.status == SeatStatus::Selected
            && seat.held_at.map_or(true, |at| at < hold_cutoff);
        if seat.status == SeatStatus::Available || lapsed {
            seat.set_selected(holder, now);
            Ok(Some(seat.clone()))
        } else {
            Ok(None)
        }
    }

    async fn try_release(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        holder: UserId,
    ) -> Result<Option<Seat>, StorageError> {
        let mut state = self.state.lock().await;
        match state.seats.get_mut(&(showing_id, seat_number.to_string())) {
            Some(seat) if seat.is_held_by(holder) => {
                seat.set_available();
                Ok(Some(seat.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_hold(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        held_at: DateTime<Utc>,
    ) -> Result<Option<Seat>, StorageError> {
        let mut state = self.state.lock().await;
        match state.seats.get_mut(&(showing_id, seat_number.to_string())) {
            Some(seat) if seat.status == SeatStatus::Selected && seat.held_at == Some(held_at) => {
                seat.set_available();
                Ok(Some(seat.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn occupy(&self, request: OccupyRequest<'_>) -> Result<OccupyOutcome, StorageError> {
        let mut state = self.state.lock().await;
        let found: Vec<Seat> = request
            .seat_numbers
            .iter()
            .filter_map(|n| state.seats.get(&(request.showing_id, n.clone())).cloned())
            .collect();
        if let Some(rejection) = check_batch(&found, &request) {
            return Ok(rejection);
        }

        let mut occupied = Vec::with_capacity(found.len());
        for number in request.seat_numbers {
            if let Some(seat) = state.seats.get_mut(&(request.showing_id, number.clone())) {
                seat.set_occupied(request.occupant, request.now);
                occupied.push(seat.clone());
            }
        }
        Ok(OccupyOutcome::Occupied(occupied))
    }

    async fn free(
        &self,
        showing_id: ShowingId,
        seat_numbers: &[String],
        occupant: Occupant,
    ) -> Result<Vec<String>, StorageError> {
        let mut state = self.state.lock().await;
        let mut freed = Vec::new();
        for number in seat_numbers {
            if let Some(seat) = state.seats.get_mut(&(showing_id, number.clone())) {
                if seat.status == SeatStatus::Occupied && seat.occupant == Some(occupant) {
                    seat.set_available();
                    freed.push(number.clone());
                }
            }
        }
        Ok(freed)
    }

    async fn orphaned_seats(&self, cutoff: DateTime<Utc>) -> Result<Vec<Seat>, StorageError> {
        let state = self.state.lock().await;
        let is_live = |seat: &Seat| match seat.occupant {
            Some(Occupant::Booking(id)) => state
                .bookings
                .get(&id)
                .is_some_and(|b| b.showing_id == seat.showing_id && b.holds_seats()),
            Some(Occupant::Ticket(id)) => state
                .tickets
                .get(&id)
                .is_some_and(|t| t.showing_id == seat.showing_id && t.status == TicketStatus::Active),
            None => false,
        };
        Ok(state
            .seats
            .values()
            .filter(|s| s.status == SeatStatus::Occupied && s.occupied_at.is_some_and(|at| at < cutoff))
            .filter(|s| !is_live(s))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if state.bookings.contains_key(&booking.id) {
            return Err(StorageError::Duplicate(format!("booking {}", booking.id)));
        }
        state.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.bookings.get(&id).cloned())
    }

    async fn list_bookings_for_user(&self, user_id: UserId) -> Result<Vec<Booking>, StorageError> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> =
            state.bookings.values().filter(|b| b.user_id == user_id).cloned().collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StorageError> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state.bookings.values().cloned().collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
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
        let mut state = self.state.lock().await;
        match state.bookings.get_mut(&id) {
            Some(booking)
                if booking.booking_status == expected
                    && expected_payment.map_or(true, |p| booking.payment_status == p) =>
            {
                booking.booking_status = next;
                if let Some(payment) = payment {
                    booking.payment_status = payment;
                }
                booking.updated_at = now;
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_qr_code(&self, id: Uuid, qr_code: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if let Some(booking) = state.bookings.get_mut(&id) {
            booking.qr_code = Some(qr_code.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if state.tickets.contains_key(&ticket.id) {
            return Err(StorageError::Duplicate(format!("ticket {}", ticket.id)));
        }
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.tickets.get(&id).cloned())
    }

    async fn list_tickets_for_user(&self, user_id: UserId) -> Result<Vec<Ticket>, StorageError> {
        let state = self.state.lock().await;
        let mut tickets: Vec<Ticket> =
            state.tickets.values().filter(|t| t.user_id == user_id).cloned().collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets)
    }

    async fn transition_ticket(
        &self,
        id: Uuid,
        expected: TicketStatus,
        next: TicketStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StorageError> {
        let mut state = self.state.lock().await;
        match state.tickets.get_mut(&id) {
            Some(ticket) if ticket.status == expected => {
                ticket.status = next;
                ticket.updated_at = now;
                Ok(Some(ticket.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ShowingStore for MemoryStore {
    async fn create_showing(
        &self,
        showing: &NewShowing,
        now: DateTime<Utc>,
    ) -> Result<Showing, StorageError> {
        let mut state = self.state.lock().await;
        let taken = state.showings.values().any(|s| {
            s.movie_id == showing.movie_id
                && s.hall == showing.hall
                && s.date == showing.date
                && s.time == showing.time
        });
        if taken {
            return Err(StorageError::Duplicate(format!(
                "showing of movie {} in hall {} at {} {}",
                showing.movie_id, showing.hall, showing.date, showing.time
            )));
        }

        state.next_showing_id += 1;
        let created = Showing {
            id: state.next_showing_id,
            movie_id: showing.movie_id,
            cinema: showing.cinema.clone(),
            hall: showing.hall.clone(),
            date: showing.date,
            time: showing.time.clone(),
            created_at: now,
        };
        state.showings.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_showing(&self, id: ShowingId) -> Result<Option<Showing>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.showings.get(&id).cloned())
    }

    async fn find_showing(
        &self,
        coordinates: &ShowingCoordinates,
    ) -> Result<Option<Showing>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.showings.values().find(|s| &s.coordinates() == coordinates).cloned())
    }

    async fn list_showings(&self, filter: &ShowingFilter) -> Result<Vec<Showing>, StorageError> {
        let state = self.state.lock().await;
        let mut showings: Vec<Showing> =
            state.showings.values().filter(|s| filter.matches(s)).cloned().collect();
        showings.sort_by(|a, b| (a.date, &a.time, a.id).cmp(&(b.date, &b.time, b.id)));
        Ok(showings)
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn hall_template(
        &self,
        cinema: &str,
        hall: &str,
    ) -> Result<Option<HallTemplate>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.halls.get(&(cinema.to_string(), hall.to_string())).cloned())
    }
}
