use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::booking::check_amount;
use super::notification::{spawn_receipt, Notifier};
use super::receipt::Receipt;
use crate::error::{BookingError, BookingResult};
use crate::inventory::{validate_seat_selection, SeatInventory};
use crate::models::{
    Occupant, PaymentMethod, Requester, Seat, ShowingCoordinates, Ticket, TicketStatus,
};
use crate::store::{Eligibility, TicketStore};

/// Direct purchase addressed by what is printed on the ticket.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewTicket {
    #[serde(flatten)]
    #[validate(nested)]
    pub showing: ShowingCoordinates,
    #[validate(length(min = 1, max = 200))]
    pub movie_title: String,
    #[validate(length(min = 1, max = 8))]
    pub seats: Vec<String>,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
}

pub struct TicketWorkflow {
    inventory: Arc<SeatInventory>,
    tickets: Arc<dyn TicketStore>,
    notifier: Arc<dyn Notifier>,
}

impl TicketWorkflow {
    pub fn new(
        inventory: Arc<SeatInventory>,
        tickets: Arc<dyn TicketStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { inventory, tickets, notifier }
    }

    /// Buys free seats outright. Goes through the same all-or-nothing
    /// `occupy` as bookings, so the two paths can never sell a seat twice.
    pub async fn create_ticket(&self, requester: Requester, request: NewTicket) -> BookingResult<Ticket> {
        request.validate()?;
        if !matches!(request.payment_method, PaymentMethod::Cash | PaymentMethod::Card) {
            return Err(BookingError::Validation(format!(
                "tickets are paid by cash or card, not {}",
                request.payment_method.as_str()
            )));
        }
        validate_seat_selection(&request.seats)?;

        let showing = self.inventory.find_showing(&request.showing).await?;
        let priced = self.inventory.seats_by_number(showing.id, &request.seats).await?;
        let total = check_amount(request.amount, &priced)?;

        let id = Uuid::new_v4();
        let occupant = Occupant::Ticket(id);
        self.inventory
            .occupy(showing.id, &request.seats, occupant, Eligibility::Available)
            .await?;

        let now = self.inventory.now();
        let ticket = Ticket {
            id,
            user_id: requester.user_id,
            showing_id: showing.id,
            movie_id: showing.movie_id,
            movie_title: request.movie_title,
            cinema: showing.cinema,
            hall: showing.hall,
            date: showing.date,
            time: showing.time,
            seats: request.seats,
            total_amount: total,
            payment_method: request.payment_method,
            status: TicketStatus::Active,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.tickets.insert_ticket(&ticket).await {
            error!("Failed to persist ticket {}: {}", id, e);
            if let Err(free_err) = self.inventory.free(ticket.showing_id, &ticket.seats, occupant).await {
                error!("Failed to release seats of {}: {}", occupant, free_err);
            }
            return Err(e.into());
        }

        info!(
            "Ticket {} sold to user {}: showing {}, seats [{}]",
            id,
            requester.user_id,
            ticket.showing_id,
            ticket.seats.join(", ")
        );
        spawn_receipt(self.notifier.clone(), Receipt::for_ticket(&ticket));
        Ok(ticket)
    }

    pub async fn cancel_ticket(&self, id: Uuid, requester: Requester) -> BookingResult<Ticket> {
        let ticket = self.authorized(id, requester).await?;
        if ticket.status != TicketStatus::Active {
            return Err(BookingError::InvalidTransition {
                entity: "ticket",
                from: ticket.status.to_string(),
                to: TicketStatus::Cancelled.to_string(),
            });
        }

        let freed = self
            .inventory
            .free(ticket.showing_id, &ticket.seats, Occupant::Ticket(id))
            .await?;

        let cancelled = self
            .tickets
            .transition_ticket(id, TicketStatus::Active, TicketStatus::Cancelled, self.inventory.now())
            .await?
            .ok_or_else(|| BookingError::InvalidTransition {
                entity: "ticket",
                from: "changed concurrently".into(),
                to: TicketStatus::Cancelled.to_string(),
            })?;

        info!("Ticket {} cancelled, {} seats released", id, freed.len());
        Ok(cancelled)
    }

    pub async fn get_ticket(&self, id: Uuid, requester: Requester) -> BookingResult<Ticket> {
        self.authorized(id, requester).await
    }

    pub async fn list_user_tickets(&self, requester: Requester) -> BookingResult<Vec<Ticket>> {
        Ok(self.tickets.list_tickets_for_user(requester.user_id).await?)
    }

    /// Seat map of the showing at the given coordinates.
    pub async fn check_seats(&self, coordinates: &ShowingCoordinates) -> BookingResult<Vec<Seat>> {
        let showing = self.inventory.find_showing(coordinates).await?;
        self.inventory.list_seats(showing.id).await
    }

    async fn authorized(&self, id: Uuid, requester: Requester) -> BookingResult<Ticket> {
        let ticket = self
            .tickets
            .get_ticket(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("ticket {}", id)))?;
        if !requester.may_act_on(ticket.user_id) {
            warn!("User {} tried to access ticket {}", requester.user_id, id);
            return Err(BookingError::NotAuthorized(format!("ticket {}", id)));
        }
        Ok(ticket)
    }
}
