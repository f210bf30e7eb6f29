use chrono::TimeDelta;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::BookingResult;
use crate::inventory::SeatInventory;
use crate::models::{Occupant, ShowingId, TicketStatus};
use crate::store::{BookingStore, SeatStore, TicketStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationStats {
    /// Orphan candidates returned by the store: occupied past the grace
    /// period by a record that is missing or no longer live.
    pub scanned: usize,
    /// Of those, seats still orphaned on a second look at their occupant.
    pub orphaned: usize,
    pub freed: usize,
}

/// Frees seats left occupied by a request that died between occupying them
/// and persisting its booking or ticket, and seats still owned by a
/// cancelled record.
pub struct ReconciliationService {
    inventory: Arc<SeatInventory>,
    seats: Arc<dyn SeatStore>,
    bookings: Arc<dyn BookingStore>,
    tickets: Arc<dyn TicketStore>,
    grace: TimeDelta,
}

impl ReconciliationService {
    pub fn new(
        inventory: Arc<SeatInventory>,
        seats: Arc<dyn SeatStore>,
        bookings: Arc<dyn BookingStore>,
        tickets: Arc<dyn TicketStore>,
        grace: Duration,
    ) -> Self {
        Self {
            inventory,
            seats,
            bookings,
            tickets,
            grace: TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX),
        }
    }

    /// One pass over the orphan candidates past the grace period. Each
    /// occupant is looked up again right before its seats are freed.
    pub async fn run_once(&self) -> BookingResult<ReconciliationStats> {
        let now = self.inventory.now();
        let cutoff = now.checked_sub_signed(self.grace).unwrap_or(now);
        let candidates = self.seats.orphaned_seats(cutoff).await?;

        let mut stats = ReconciliationStats { scanned: candidates.len(), ..Default::default() };
        if candidates.is_empty() {
            info!("🪑 No orphaned seats past the grace period");
            return Ok(stats);
        }

        let mut by_occupant: HashMap<(ShowingId, Occupant), Vec<String>> = HashMap::new();
        for seat in candidates {
            match seat.occupant {
                Some(occupant) => by_occupant
                    .entry((seat.showing_id, occupant))
                    .or_default()
                    .push(seat.seat_number),
                None => warn!(
                    "Seat {}/{} is occupied without an occupant, skipping",
                    seat.showing_id, seat.seat_number
                ),
            }
        }

        for ((showing_id, occupant), seat_numbers) in by_occupant {
            match self.is_live(showing_id, occupant).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to look up {}: {}", occupant, e);
                    continue;
                }
            }

            stats.orphaned += seat_numbers.len();
            match self.inventory.free(showing_id, &seat_numbers, occupant).await {
                Ok(freed) => {
                    warn!(
                        "🔓 Freed {} orphaned seats of showing {} held by {}",
                        freed.len(),
                        showing_id,
                        occupant
                    );
                    stats.freed += freed.len();
                }
                Err(e) => error!("Failed to free seats held by {}: {}", occupant, e),
            }
        }

        info!(
            "✅ Reconciliation completed: scanned {}, orphaned {}, freed {}",
            stats.scanned, stats.orphaned, stats.freed
        );
        Ok(stats)
    }

    /// Runs [`Self::run_once`] on a fixed interval forever.
    pub async fn run_forever(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            info!("🧹 Starting seat reconciliation");
            if let Err(e) = self.run_once().await {
                error!("Seat reconciliation failed: {}", e);
            }
        }
    }

    async fn is_live(&self, showing_id: ShowingId, occupant: Occupant) -> BookingResult<bool> {
        let live = match occupant {
            Occupant::Booking(id) => self
                .bookings
                .get_booking(id)
                .await?
                .is_some_and(|b| b.showing_id == showing_id && b.holds_seats()),
            Occupant::Ticket(id) => self
                .tickets
                .get_ticket(id)
                .await?
                .is_some_and(|t| t.showing_id == showing_id && t.status == TicketStatus::Active),
        };
        Ok(live)
    }
}
