use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{ShowingId, UnknownVariant, UserId};

/// Longest accepted seat number, row label plus column digits.
pub const MAX_SEAT_NUMBER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Selected,
    Occupied,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Selected => "selected",
            SeatStatus::Occupied => "occupied",
        }
    }
}

impl FromStr for SeatStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SeatStatus::Available),
            "selected" => Ok(SeatStatus::Selected),
            "occupied" => Ok(SeatStatus::Occupied),
            other => Err(UnknownVariant::new("seat status", other)),
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatCategory {
    Standard,
    Vip,
}

impl SeatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatCategory::Standard => "standard",
            SeatCategory::Vip => "vip",
        }
    }
}

impl FromStr for SeatCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(SeatCategory::Standard),
            "vip" => Ok(SeatCategory::Vip),
            other => Err(UnknownVariant::new("seat category", other)),
        }
    }
}

/// The reservation record that owns an occupied seat.
///
/// Booking and ticket ids are minted before their seats are occupied, so an
/// occupied seat always names its occupant even if the record itself was
/// never persisted. The reconciliation sweep relies on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Occupant {
    Booking(Uuid),
    Ticket(Uuid),
}

impl Occupant {
    pub fn kind(&self) -> &'static str {
        match self {
            Occupant::Booking(_) => "booking",
            Occupant::Ticket(_) => "ticket",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Occupant::Booking(id) | Occupant::Ticket(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Result<Self, UnknownVariant> {
        match kind {
            "booking" => Ok(Occupant::Booking(id)),
            "ticket" => Ok(Occupant::Ticket(id)),
            other => Err(UnknownVariant::new("occupant kind", other)),
        }
    }
}

impl fmt::Display for Occupant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

/// One physical seat of one showing, identified by `(showing_id, seat_number)`.
///
/// `holder`/`held_at` are set exactly when the seat is selected, and
/// `occupant`/`occupied_at` exactly when it is occupied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub showing_id: ShowingId,
    pub seat_number: String,
    pub row: String,
    pub number: i32,
    pub category: SeatCategory,
    pub price: Decimal,
    pub status: SeatStatus,
    pub holder: Option<UserId>,
    pub held_at: Option<DateTime<Utc>>,
    pub occupant: Option<Occupant>,
    pub occupied_at: Option<DateTime<Utc>>,
}

impl Seat {
    pub fn available(
        showing_id: ShowingId,
        row: &str,
        number: i32,
        category: SeatCategory,
        price: Decimal,
    ) -> Self {
        Self {
            showing_id,
            seat_number: format!("{}{}", row, number),
            row: row.to_string(),
            number,
            category,
            price,
            status: SeatStatus::Available,
            holder: None,
            held_at: None,
            occupant: None,
            occupied_at: None,
        }
    }

    pub fn is_held_by(&self, user_id: UserId) -> bool {
        self.status == SeatStatus::Selected && self.holder == Some(user_id)
    }

    pub(crate) fn set_available(&mut self) {
        self.status = SeatStatus::Available;
        self.holder = None;
        self.held_at = None;
        self.occupant = None;
        self.occupied_at = None;
    }

    pub(crate) fn set_selected(&mut self, holder: UserId, at: DateTime<Utc>) {
        self.status = SeatStatus::Selected;
        self.holder = Some(holder);
        self.held_at = Some(at);
        self.occupant = None;
        self.occupied_at = None;
    }

    pub(crate) fn set_occupied(&mut self, occupant: Occupant, at: DateTime<Utc>) {
        self.status = SeatStatus::Occupied;
        self.holder = None;
        self.held_at = None;
        self.occupant = Some(occupant);
        self.occupied_at = Some(at);
    }
}

/// Answer of the seat-status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeatStatusView {
    pub status: SeatStatus,
    pub category: SeatCategory,
    pub price: Decimal,
}

impl From<&Seat> for SeatStatusView {
    fn from(seat: &Seat) -> Self {
        Self { status: seat.status, category: seat.category, price: seat.price }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_number_joins_row_and_column() {
        let seat = Seat::available(1, "B", 7, SeatCategory::Standard, Decimal::from(10));
        assert_eq!(seat.seat_number, "B7");
        assert_eq!(seat.status, SeatStatus::Available);
    }

    #[test]
    fn transitions_keep_holder_and_occupant_exclusive() {
        let mut seat = Seat::available(1, "A", 1, SeatCategory::Vip, Decimal::from(15));
        seat.set_selected(42, Utc::now());
        assert!(seat.is_held_by(42));
        assert!(seat.occupant.is_none());

        seat.set_occupied(Occupant::Booking(Uuid::new_v4()), Utc::now());
        assert!(seat.holder.is_none());
        assert!(seat.held_at.is_none());
        assert!(!seat.is_held_by(42));

        seat.set_available();
        assert!(seat.occupant.is_none() && seat.occupied_at.is_none());
    }

    #[test]
    fn occupant_round_trips_through_parts() {
        let id = Uuid::new_v4();
        let occupant = Occupant::Ticket(id);
        assert_eq!(Occupant::from_parts(occupant.kind(), occupant.id()).unwrap(), occupant);
        assert!(Occupant::from_parts("refund", id).is_err());
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_eq!("selected".parse::<SeatStatus>().unwrap(), SeatStatus::Selected);
        assert!("reserved".parse::<SeatStatus>().is_err());
    }
}
