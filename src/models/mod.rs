pub mod booking;
pub mod hall;
pub mod seat;
pub mod showing;
pub mod ticket;
pub mod user;

pub use booking::{Booking, BookingSeat, BookingStatus, PaymentMethod, PaymentStatus};
pub use hall::{HallTemplate, SeatPrices};
pub use seat::{Occupant, Seat, SeatCategory, SeatStatus, SeatStatusView, MAX_SEAT_NUMBER_LEN};
pub use showing::{NewShowing, Showing, ShowingCoordinates, ShowingFilter};
pub use ticket::{Ticket, TicketStatus};
pub use user::{Requester, User};

pub type UserId = i64;
pub type ShowingId = i64;
pub type MovieId = i64;

/// A stored string did not match any variant of a status enum.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}
