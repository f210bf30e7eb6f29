//! Seat inventory: the only component allowed to change a seat's status.
//!
//! ```text
//!            hold                    occupy
//! available ------> selected ----------------> occupied
//!     ^  ^            |  |                        |
//!     |  +- release --+  +- lapse (lazy, on read) |
//!     +---------------- free (cancel, sweep) -----+
//! ```
//!
//! `occupy` also accepts `available` seats directly (ticket flow).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::error::{BookingError, BookingResult};
use crate::models::{
    HallTemplate, NewShowing, Occupant, Seat, SeatStatusView, Showing, ShowingCoordinates,
    ShowingFilter, ShowingId, UserId, MAX_SEAT_NUMBER_LEN,
};
use crate::store::{Catalog, Eligibility, OccupyOutcome, OccupyRequest, SeatStore, ShowingStore, StorageError};

pub mod expiry;

pub use expiry::{Clock, HoldExpiry, ManualClock, SystemClock};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializeOutcome {
    pub showing_id: ShowingId,
    pub created: u64,
    pub capacity: u64,
    pub already_initialized: bool,
}

pub struct SeatInventory {
    seats: Arc<dyn SeatStore>,
    showings: Arc<dyn ShowingStore>,
    catalog: Arc<dyn Catalog>,
    expiry: HoldExpiry,
    clock: Arc<dyn Clock>,
}

impl SeatInventory {
    pub fn new(
        seats: Arc<dyn SeatStore>,
        showings: Arc<dyn ShowingStore>,
        catalog: Arc<dyn Catalog>,
        expiry: HoldExpiry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { seats, showings, catalog, expiry, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn expiry(&self) -> HoldExpiry {
        self.expiry
    }

    /* ---------- showings ---------- */

    pub async fn create_showing(&self, showing: NewShowing) -> BookingResult<Showing> {
        showing.validate()?;
        match self.showings.create_showing(&showing, self.now()).await {
            Ok(created) => {
                info!(
                    "Showing {} scheduled: movie {} in {}/{} at {} {}",
                    created.id, created.movie_id, created.cinema, created.hall, created.date, created.time
                );
                Ok(created)
            }
            Err(StorageError::Duplicate(what)) => Err(BookingError::DuplicateShowing(what)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn showing(&self, showing_id: ShowingId) -> BookingResult<Showing> {
        self.showings
            .get_showing(showing_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("showing {}", showing_id)))
    }

    pub async fn find_showing(&self, coordinates: &ShowingCoordinates) -> BookingResult<Showing> {
        coordinates.validate()?;
        self.showings.find_showing(coordinates).await?.ok_or_else(|| {
            BookingError::NotFound(format!(
                "showing of movie {} in hall {} at {} {}",
                coordinates.movie_id, coordinates.hall, coordinates.date, coordinates.time
            ))
        })
    }

    /// Showings matching the filter, earliest first.
    pub async fn list_showings(&self, filter: &ShowingFilter) -> BookingResult<Vec<Showing>> {
        filter.validate()?;
        Ok(self.showings.list_showings(filter).await?)
    }

    /* ---------- seats ---------- */

    /// Creates the seats of a showing from a hall template. When no template
    /// is passed, the hall's seat map is taken from the catalog.
    ///
    /// Idempotent: a showing that already has seats is left untouched and the
    /// call still succeeds.
    pub async fn initialize(
        &self,
        showing_id: ShowingId,
        template: Option<HallTemplate>,
    ) -> BookingResult<InitializeOutcome> {
        let showing = self.showing(showing_id).await?;
        if let Some(template) = &template {
            template.validate()?;
        }

        let existing = self.seats.count_seats(showing_id).await?;
        if existing > 0 {
            info!("Seats for showing {} already initialized ({} seats)", showing_id, existing);
            return Ok(InitializeOutcome {
                showing_id,
                created: 0,
                capacity: existing,
                already_initialized: true,
            });
        }

        let template = match template {
            Some(template) => template,
            None => {
                let template = self
                    .catalog
                    .hall_template(&showing.cinema, &showing.hall)
                    .await?
                    .ok_or_else(|| {
                        BookingError::NotFound(format!("hall {}/{}", showing.cinema, showing.hall))
                    })?;
                template.validate()?;
                template
            }
        };

        // Дубликаты подавляются на уровне хранилища, так что гонка двух init безопасна
        let created = self.seats.insert_seats(&template.seats_for(showing_id)).await?;
        let capacity = self.seats.count_seats(showing_id).await?;
        info!("Initialized {} seats for showing {} (capacity {})", created, showing_id, capacity);

        Ok(InitializeOutcome {
            showing_id,
            created,
            capacity,
            already_initialized: created == 0,
        })
    }

    /// Current state of one seat. A lapsed hold is reverted in the store
    /// before the seat is returned; this is the only place expiry writes.
    pub async fn seat(&self, showing_id: ShowingId, seat_number: &str) -> BookingResult<Seat> {
        let seat = self.require_seat(showing_id, seat_number).await?;
        let now = self.now();
        if !self.expiry.is_expired(&seat, now) {
            return Ok(seat);
        }

        let Some(held_at) = seat.held_at else {
            warn!("Seat {}/{} is selected without a hold time", showing_id, seat_number);
            return Ok(self.expiry.effective(seat, now));
        };

        match self.seats.expire_hold(showing_id, seat_number, held_at).await? {
            Some(expired) => {
                info!(
                    "Hold on seat {}/{} by user {:?} expired",
                    showing_id, seat_number, seat.holder
                );
                Ok(expired)
            }
            None => {
                // Кто-то изменил место между чтением и сбросом, возвращаем актуальное состояние
                let current = self.require_seat(showing_id, seat_number).await?;
                Ok(self.expiry.effective(current, now))
            }
        }
    }

    pub async fn get_status(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
    ) -> BookingResult<SeatStatusView> {
        let seat = self.seat(showing_id, seat_number).await?;
        Ok(SeatStatusView::from(&seat))
    }

    /// Raw seat map straight from the store.
    pub async fn stored_seats(&self, showing_id: ShowingId) -> BookingResult<Vec<Seat>> {
        let seats = self.seats.list_seats(showing_id).await?;
        if seats.is_empty() {
            // отличаем "нет такого сеанса" от "места ещё не созданы"
            self.showing(showing_id).await?;
        }
        Ok(seats)
    }

    /// Seat map as readers should see it: lapsed holds show as available.
    pub async fn list_seats(&self, showing_id: ShowingId) -> BookingResult<Vec<Seat>> {
        let seats = self.stored_seats(showing_id).await?;
        Ok(self.effective_seats(seats))
    }

    pub fn effective_seats(&self, seats: Vec<Seat>) -> Vec<Seat> {
        let now = self.now();
        seats.into_iter().map(|s| self.expiry.effective(s, now)).collect()
    }

    /// Current records of the given seats, in request order.
    pub async fn seats_by_number(
        &self,
        showing_id: ShowingId,
        seat_numbers: &[String],
    ) -> BookingResult<Vec<Seat>> {
        let all = self.stored_seats(showing_id).await?;
        let mut missing = Vec::new();
        let mut found = Vec::with_capacity(seat_numbers.len());
        for number in seat_numbers {
            match all.iter().find(|s| &s.seat_number == number) {
                Some(seat) => found.push(seat.clone()),
                None => missing.push(number.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(BookingError::NotFound(format!(
                "seats {} in showing {}",
                missing.join(", "),
                showing_id
            )));
        }
        Ok(found)
    }

    pub async fn hold(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        user_id: UserId,
    ) -> BookingResult<Seat> {
        validate_seat_number(seat_number)?;
        let now = self.now();
        let held = self
            .seats
            .try_hold(showing_id, seat_number, user_id, now, self.expiry.cutoff(now))
            .await?;

        match held {
            Some(seat) => {
                debug!("Seat {}/{} held by user {}", showing_id, seat_number, user_id);
                Ok(seat)
            }
            None => {
                self.require_seat(showing_id, seat_number).await?;
                warn!("Seat {}/{} unavailable for user {}", showing_id, seat_number, user_id);
                Err(BookingError::SeatUnavailable { seat: seat_number.to_string() })
            }
        }
    }

    pub async fn release(
        &self,
        showing_id: ShowingId,
        seat_number: &str,
        user_id: UserId,
    ) -> BookingResult<Seat> {
        validate_seat_number(seat_number)?;
        match self.seats.try_release(showing_id, seat_number, user_id).await? {
            Some(seat) => {
                debug!("Seat {}/{} released by user {}", showing_id, seat_number, user_id);
                Ok(seat)
            }
            None => {
                self.require_seat(showing_id, seat_number).await?;
                Err(BookingError::NotHolder { seat: seat_number.to_string() })
            }
        }
    }

    /// Occupies every requested seat or none of them.
    pub async fn occupy(
        &self,
        showing_id: ShowingId,
        seat_numbers: &[String],
        occupant: Occupant,
        eligibility: Eligibility,
    ) -> BookingResult<Vec<Seat>> {
        validate_seat_selection(seat_numbers)?;
        let now = self.now();
        let request = OccupyRequest {
            showing_id,
            seat_numbers,
            occupant,
            eligibility,
            now,
            hold_cutoff: self.expiry.cutoff(now),
        };

        match self.seats.occupy(request).await? {
            OccupyOutcome::Occupied(seats) => {
                info!(
                    "Occupied {} seats of showing {} for {}",
                    seats.len(),
                    showing_id,
                    occupant
                );
                Ok(seats)
            }
            OccupyOutcome::Conflict(seats) => {
                warn!(
                    "Occupation for {} rejected, blocked seats: {}",
                    occupant,
                    seats.join(", ")
                );
                Err(BookingError::SeatConflict { seats })
            }
            OccupyOutcome::Missing(seats) => Err(BookingError::NotFound(format!(
                "seats {} in showing {}",
                seats.join(", "),
                showing_id
            ))),
        }
    }

    /// Returns seats owned by `occupant` to the pool. Seats already free, or
    /// since taken by someone else, are skipped.
    pub async fn free(
        &self,
        showing_id: ShowingId,
        seat_numbers: &[String],
        occupant: Occupant,
    ) -> BookingResult<Vec<String>> {
        let freed = self.seats.free(showing_id, seat_numbers, occupant).await?;
        if freed.len() < seat_numbers.len() {
            debug!(
                "Freed {}/{} seats of showing {} for {}",
                freed.len(),
                seat_numbers.len(),
                showing_id,
                occupant
            );
        } else {
            info!("Freed {} seats of showing {} for {}", freed.len(), showing_id, occupant);
        }
        Ok(freed)
    }

    async fn require_seat(&self, showing_id: ShowingId, seat_number: &str) -> BookingResult<Seat> {
        self.seats
            .get_seat(showing_id, seat_number)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("seat {} in showing {}", seat_number, showing_id)))
    }
}

fn validate_seat_number(seat_number: &str) -> BookingResult<()> {
    let valid = !seat_number.is_empty()
        && seat_number.len() <= MAX_SEAT_NUMBER_LEN
        && seat_number.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(BookingError::Validation(format!("malformed seat number {:?}", seat_number)))
    }
}

/// Non-empty, well-formed and free of duplicates.
pub(crate) fn validate_seat_selection(seat_numbers: &[String]) -> BookingResult<()> {
    if seat_numbers.is_empty() {
        return Err(BookingError::Validation("at least one seat is required".into()));
    }
    let mut seen = HashSet::with_capacity(seat_numbers.len());
    for number in seat_numbers {
        validate_seat_number(number)?;
        if !seen.insert(number.as_str()) {
            return Err(BookingError::Validation(format!("seat {} requested twice", number)));
        }
    }
    Ok(())
}
