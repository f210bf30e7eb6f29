use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::notification::{spawn_receipt, Notifier};
use super::receipt::{Receipt, ReceiptRenderer};
use crate::error::{BookingError, BookingResult};
use crate::inventory::{validate_seat_selection, SeatInventory};
use crate::models::{
    Booking, BookingSeat, BookingStatus, MovieId, Occupant, PaymentMethod, PaymentStatus,
    Requester, Seat, SeatStatus, ShowingId,
};
use crate::store::{is_eligible, BookingStore, Eligibility};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewBooking {
    #[validate(range(min = 1))]
    pub movie_id: MovieId,
    #[validate(range(min = 1))]
    pub showing_id: ShowingId,
    #[validate(length(min = 1, max = 8))]
    pub seats: Vec<String>,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
}

pub(crate) fn seat_total(seats: &[Seat]) -> Decimal {
    seats.iter().map(|s| s.price).sum()
}

/// Rejects a client-side total that does not match the seat prices.
pub(crate) fn check_amount(amount: Decimal, seats: &[Seat]) -> BookingResult<Decimal> {
    let expected = seat_total(seats);
    if amount.is_sign_negative() {
        return Err(BookingError::Validation("amount must not be negative".into()));
    }
    if amount != expected {
        return Err(BookingError::Validation(format!(
            "amount {} does not match seat total {}",
            amount, expected
        )));
    }
    Ok(expected)
}

pub struct BookingWorkflow {
    inventory: Arc<SeatInventory>,
    bookings: Arc<dyn BookingStore>,
    notifier: Arc<dyn Notifier>,
    renderer: Arc<dyn ReceiptRenderer>,
}

impl BookingWorkflow {
    pub fn new(
        inventory: Arc<SeatInventory>,
        bookings: Arc<dyn BookingStore>,
        notifier: Arc<dyn Notifier>,
        renderer: Arc<dyn ReceiptRenderer>,
    ) -> Self {
        Self { inventory, bookings, notifier, renderer }
    }

    /// Occupies the requested seats for `requester` and records the booking.
    ///
    /// Seats must be free or held by the requester. Nothing is written when
    /// the request is invalid or any seat is blocked.
    pub async fn create_booking(
        &self,
        requester: Requester,
        request: NewBooking,
    ) -> BookingResult<Booking> {
        request.validate()?;
        validate_seat_selection(&request.seats)?;

        let showing = self.inventory.showing(request.showing_id).await?;
        if showing.movie_id != request.movie_id {
            return Err(BookingError::Validation(format!(
                "showing {} does not screen movie {}",
                showing.id, request.movie_id
            )));
        }

        // Цены мест не меняются после инициализации, поэтому сверяем сумму до захвата мест
        let priced = self.inventory.seats_by_number(showing.id, &request.seats).await?;
        check_amount(request.amount, &priced)?;

        let id = Uuid::new_v4();
        let occupant = Occupant::Booking(id);
        let occupied = self
            .inventory
            .occupy(
                showing.id,
                &request.seats,
                occupant,
                Eligibility::AvailableOrHeldBy(requester.user_id),
            )
            .await?;

        let now = self.inventory.now();
        let mut booking = Booking {
            id,
            user_id: requester.user_id,
            showing_id: showing.id,
            movie_id: showing.movie_id,
            seats: occupied.iter().map(BookingSeat::from).collect(),
            total_amount: seat_total(&occupied),
            payment_method: request.payment_method,
            payment_status: PaymentStatus::Pending,
            booking_status: BookingStatus::Active,
            qr_code: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.bookings.insert_booking(&booking).await {
            error!("Failed to persist booking {}: {}", id, e);
            self.release_after_failure(showing.id, &request.seats, occupant).await;
            return Err(e.into());
        }

        info!(
            "Booking {} created for user {}: showing {}, seats [{}], total {}",
            id,
            requester.user_id,
            showing.id,
            request.seats.join(", "),
            booking.total_amount
        );

        // QR строится только после того, как места и бронь записаны
        match self.renderer.render(&Receipt::for_booking(&booking)).await {
            Ok(qr_code) => match self.bookings.set_qr_code(id, &qr_code).await {
                Ok(()) => booking.qr_code = Some(qr_code),
                Err(e) => warn!("Failed to store QR code for booking {}: {}", id, e),
            },
            Err(e) => warn!("Failed to render QR code for booking {}: {}", id, e),
        }

        Ok(booking)
    }

    /// Confirms payment. The booking stays active and keeps its seats.
    pub async fn complete_booking(&self, id: Uuid, requester: Requester) -> BookingResult<Booking> {
        let booking = self.authorized(id, requester).await?;
        if booking.booking_status != BookingStatus::Active {
            return Err(invalid_transition(&booking, "active/completed payment"));
        }
        if booking.payment_status == PaymentStatus::Completed {
            return Ok(booking);
        }

        let completed = self
            .bookings
            .transition_booking(
                id,
                BookingStatus::Active,
                Some(PaymentStatus::Pending),
                BookingStatus::Active,
                Some(PaymentStatus::Completed),
                self.inventory.now(),
            )
            .await?;
        let completed = match completed {
            Some(completed) => completed,
            None => {
                let current = self.load(id).await?;
                if current.booking_status == BookingStatus::Active
                    && current.payment_status == PaymentStatus::Completed
                {
                    return Ok(current);
                }
                return Err(invalid_transition(&current, "active/completed payment"));
            }
        };

        info!("Payment for booking {} completed", id);
        spawn_receipt(self.notifier.clone(), Receipt::for_booking(&completed));
        Ok(completed)
    }

    pub async fn cancel_booking(&self, id: Uuid, requester: Requester) -> BookingResult<Booking> {
        let booking = self.authorized(id, requester).await?;
        self.cancel(booking, None).await
    }

    /// Administrative override: `completed` marks the screening attended,
    /// `cancelled` frees the seats exactly like [`Self::cancel_booking`].
    pub async fn update_booking_status(
        &self,
        id: Uuid,
        next: BookingStatus,
        requester: Requester,
    ) -> BookingResult<Booking> {
        if !requester.is_admin {
            return Err(BookingError::NotAuthorized(format!("booking {}", id)));
        }
        let booking = self.load(id).await?;
        if !booking.booking_status.can_transition_to(next) {
            return Err(invalid_transition(&booking, next.as_str()));
        }

        match next {
            BookingStatus::Cancelled => self.cancel(booking, None).await,
            BookingStatus::Completed => {
                let updated = self
                    .bookings
                    .transition_booking(id, BookingStatus::Active, None, next, None, self.inventory.now())
                    .await?
                    .ok_or_else(|| BookingError::InvalidTransition {
                        entity: "booking",
                        from: "changed concurrently".into(),
                        to: next.to_string(),
                    })?;
                info!("Booking {} marked completed by admin {}", id, requester.user_id);

                // Завершённая бронь должна владеть всеми своими местами
                let lost = self.reclaim_seats(&updated).await?;
                if !lost.is_empty() {
                    error!(
                        "Completed booking {} lost seats [{}] to another occupant",
                        id,
                        lost.join(", ")
                    );
                    return Err(BookingError::SeatsLost { booking: id, seats: lost });
                }
                Ok(updated)
            }
            BookingStatus::Active => Err(invalid_transition(&booking, next.as_str())),
        }
    }

    /// Outcome reported by the payment collaborator.
    pub async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        requester: Requester,
    ) -> BookingResult<Booking> {
        match status {
            PaymentStatus::Completed => self.complete_booking(id, requester).await,
            PaymentStatus::Failed => {
                let booking = self.authorized(id, requester).await?;
                if booking.payment_status == PaymentStatus::Completed {
                    return Err(BookingError::InvalidTransition {
                        entity: "payment",
                        from: booking.payment_status.to_string(),
                        to: status.to_string(),
                    });
                }
                self.cancel(booking, Some(PaymentStatus::Failed)).await
            }
            PaymentStatus::Pending => {
                let booking = self.authorized(id, requester).await?;
                if booking.payment_status == PaymentStatus::Pending {
                    Ok(booking)
                } else {
                    Err(BookingError::InvalidTransition {
                        entity: "payment",
                        from: booking.payment_status.to_string(),
                        to: status.to_string(),
                    })
                }
            }
        }
    }

    pub async fn get_booking(&self, id: Uuid, requester: Requester) -> BookingResult<Booking> {
        self.authorized(id, requester).await
    }

    pub async fn list_user_bookings(&self, requester: Requester) -> BookingResult<Vec<Booking>> {
        Ok(self.bookings.list_bookings_for_user(requester.user_id).await?)
    }

    pub async fn list_all_bookings(&self, requester: Requester) -> BookingResult<Vec<Booking>> {
        if !requester.is_admin {
            return Err(BookingError::NotAuthorized("all bookings".into()));
        }
        Ok(self.bookings.list_bookings().await?)
    }

    /// Frees the seats first, then flips the status, so a crash in between
    /// never leaves a cancelled booking owning occupied seats.
    ///
    /// The flip is conditional on both statuses read into `booking`. If
    /// either changed meanwhile the cancel loses, and a booking that still
    /// owns seats gets them back.
    async fn cancel(&self, booking: Booking, payment: Option<PaymentStatus>) -> BookingResult<Booking> {
        if !booking.booking_status.can_transition_to(BookingStatus::Cancelled) {
            return Err(invalid_transition(&booking, BookingStatus::Cancelled.as_str()));
        }

        let occupant = Occupant::Booking(booking.id);
        let seats = booking.seat_numbers();
        let freed = self.inventory.free(booking.showing_id, &seats, occupant).await?;

        let cancelled = self
            .bookings
            .transition_booking(
                booking.id,
                BookingStatus::Active,
                Some(booking.payment_status),
                BookingStatus::Cancelled,
                payment,
                self.inventory.now(),
            )
            .await?;

        match cancelled {
            Some(cancelled) => {
                info!(
                    "Booking {} cancelled, {} seats released",
                    cancelled.id,
                    freed.len()
                );
                Ok(cancelled)
            }
            None => {
                // Статус поменялся параллельно: если бронь всё ещё владеет местами, возвращаем их
                let current = self.load(booking.id).await?;
                warn!(
                    "Booking {} became {} with payment {} while cancelling",
                    current.id, current.booking_status, current.payment_status
                );
                if current.holds_seats() && !freed.is_empty() {
                    let lost = self.reclaim_seats(&current).await?;
                    if !lost.is_empty() {
                        error!(
                            "Booking {} lost seats [{}] while its cancel was abandoned",
                            current.id,
                            lost.join(", ")
                        );
                        return Err(BookingError::SeatsLost { booking: current.id, seats: lost });
                    }
                }
                let from = if current.booking_status == BookingStatus::Active {
                    format!("active with {} payment", current.payment_status)
                } else {
                    current.booking_status.to_string()
                };
                Err(BookingError::InvalidTransition {
                    entity: "booking",
                    from,
                    to: BookingStatus::Cancelled.to_string(),
                })
            }
        }
    }

    /// Re-occupies every seat of `booking` that is free again. Returns the
    /// seats now held or occupied by someone else, sorted.
    async fn reclaim_seats(&self, booking: &Booking) -> BookingResult<Vec<String>> {
        const ATTEMPTS: usize = 3;

        let occupant = Occupant::Booking(booking.id);
        let numbers = booking.seat_numbers();
        let mut lost = Vec::new();
        for attempt in 1..=ATTEMPTS {
            let now = self.inventory.now();
            let cutoff = self.inventory.expiry().cutoff(now);
            let current = self.inventory.seats_by_number(booking.showing_id, &numbers).await?;

            let mut vacant = Vec::new();
            lost.clear();
            for seat in current {
                if seat.status == SeatStatus::Occupied && seat.occupant == Some(occupant) {
                    continue;
                }
                if is_eligible(&seat, Eligibility::Available, cutoff) {
                    vacant.push(seat.seat_number);
                } else {
                    lost.push(seat.seat_number);
                }
            }
            if vacant.is_empty() {
                break;
            }

            match self
                .inventory
                .occupy(booking.showing_id, &vacant, occupant, Eligibility::Available)
                .await
            {
                Ok(restored) => {
                    info!("Restored {} seats of booking {}", restored.len(), booking.id);
                    break;
                }
                // Место заняли между чтением и захватом, перечитываем
                Err(BookingError::SeatConflict { .. }) if attempt < ATTEMPTS => continue,
                Err(BookingError::SeatConflict { .. }) => lost.extend(vacant),
                Err(e) => return Err(e),
            }
        }
        lost.sort();
        Ok(lost)
    }

    async fn release_after_failure(&self, showing_id: ShowingId, seats: &[String], occupant: Occupant) {
        match self.inventory.free(showing_id, seats, occupant).await {
            Ok(freed) => warn!("Released {} seats after failed booking {}", freed.len(), occupant),
            // Оставшиеся места подберёт сверка
            Err(e) => error!("Failed to release seats of {}: {}", occupant, e),
        }
    }

    async fn load(&self, id: Uuid) -> BookingResult<Booking> {
        self.bookings
            .get_booking(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("booking {}", id)))
    }

    async fn authorized(&self, id: Uuid, requester: Requester) -> BookingResult<Booking> {
        let booking = self.load(id).await?;
        if !requester.may_act_on(booking.user_id) {
            warn!("User {} tried to access booking {}", requester.user_id, id);
            return Err(BookingError::NotAuthorized(format!("booking {}", id)));
        }
        Ok(booking)
    }
}

fn invalid_transition(booking: &Booking, to: &str) -> BookingError {
    BookingError::InvalidTransition {
        entity: "booking",
        from: booking.booking_status.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeatCategory;

    fn seat(row: &str, price: i64) -> Seat {
        Seat::available(1, row, 1, SeatCategory::Standard, Decimal::from(price))
    }

    #[test]
    fn amount_must_match_seat_prices() {
        let seats = vec![seat("A", 15), seat("B", 10)];
        assert_eq!(check_amount(Decimal::from(25), &seats).unwrap(), Decimal::from(25));
        assert!(matches!(
            check_amount(Decimal::from(20), &seats),
            Err(BookingError::Validation(_))
        ));
        assert!(check_amount(Decimal::from(-25), &seats).is_err());
    }

    #[test]
    fn booking_request_bounds_seat_count() {
        let mut request = NewBooking {
            movie_id: 1,
            showing_id: 1,
            seats: vec![],
            amount: Decimal::ZERO,
            payment_method: PaymentMethod::Card,
        };
        assert!(request.validate().is_err());

        request.seats = (1..=9).map(|n| format!("A{}", n)).collect();
        assert!(request.validate().is_err());

        request.seats.truncate(8);
        assert!(request.validate().is_ok());
    }
}
