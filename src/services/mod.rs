pub mod booking;
pub mod notification;
pub mod receipt;
pub mod reconciliation;
pub mod ticket;

pub use booking::{BookingWorkflow, NewBooking};
pub use notification::{CircuitBreaker, LogNotifier, Notifier, WebhookNotifier};
pub use receipt::{QrPayloadRenderer, Receipt, ReceiptRenderer};
pub use reconciliation::{ReconciliationService, ReconciliationStats};
pub use ticket::{NewTicket, TicketWorkflow};

use std::sync::Arc;
use std::time::Duration;

use crate::inventory::{Clock, HoldExpiry, SeatInventory};
use crate::store::{BookingStore, Catalog, SeatStore, ShowingStore, TicketStore};

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub hold_ttl: Duration,
    pub reconciliation_grace: Duration,
}

/// The workflows, wired over one store.
#[derive(Clone)]
pub struct Services {
    pub inventory: Arc<SeatInventory>,
    pub bookings: Arc<BookingWorkflow>,
    pub tickets: Arc<TicketWorkflow>,
    pub reconciliation: Arc<ReconciliationService>,
}

impl Services {
    pub fn new<S>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
        notifier: Arc<dyn Notifier>,
        renderer: Arc<dyn ReceiptRenderer>,
    ) -> Self
    where
        S: SeatStore + BookingStore + TicketStore + ShowingStore + Catalog,
    {
        let seats: Arc<dyn SeatStore> = store.clone();
        let bookings: Arc<dyn BookingStore> = store.clone();
        let tickets: Arc<dyn TicketStore> = store.clone();
        let showings: Arc<dyn ShowingStore> = store.clone();
        let catalog: Arc<dyn Catalog> = store;

        let inventory = Arc::new(SeatInventory::new(
            seats.clone(),
            showings,
            catalog,
            HoldExpiry::new(settings.hold_ttl),
            clock,
        ));

        Self {
            bookings: Arc::new(BookingWorkflow::new(
                inventory.clone(),
                bookings.clone(),
                notifier.clone(),
                renderer,
            )),
            tickets: Arc::new(TicketWorkflow::new(inventory.clone(), tickets.clone(), notifier)),
            reconciliation: Arc::new(ReconciliationService::new(
                inventory.clone(),
                seats,
                bookings,
                tickets,
                settings.reconciliation_grace,
            )),
            inventory,
        }
    }
}
