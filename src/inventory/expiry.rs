use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::models::{Seat, SeatStatus};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used to step over hold and grace
/// windows without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { millis: AtomicI64::new(start.timestamp_millis()) }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// A hold lapses once strictly more than `ttl` has passed since it was taken.
/// A selected seat without a hold timestamp is treated as lapsed.
pub fn is_expired(seat: &Seat, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
    seat.status == SeatStatus::Selected && seat.held_at.map_or(true, |at| now - at > ttl)
}

#[derive(Debug, Clone, Copy)]
pub struct HoldExpiry {
    ttl: TimeDelta,
}

impl HoldExpiry {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX) }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Holds taken strictly before the returned instant have lapsed at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.ttl).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_expired(&self, seat: &Seat, now: DateTime<Utc>) -> bool {
        is_expired(seat, now, self.ttl)
    }

    /// The status a reader should see, without writing anything back.
    pub fn effective(&self, mut seat: Seat, now: DateTime<Utc>) -> Seat {
        if self.is_expired(&seat, now) {
            seat.set_available();
        }
        seat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeatCategory;
    use rust_decimal::Decimal;

    fn held_at(at: DateTime<Utc>) -> Seat {
        let mut seat = Seat::available(1, "C", 3, SeatCategory::Standard, Decimal::from(10));
        seat.set_selected(11, at);
        seat
    }

    #[test]
    fn hold_lapses_only_after_ttl() {
        let t0 = Utc::now();
        let expiry = HoldExpiry::new(Duration::from_secs(300));
        let seat = held_at(t0);

        assert!(!expiry.is_expired(&seat, t0 + TimeDelta::seconds(299)));
        assert!(!expiry.is_expired(&seat, t0 + TimeDelta::seconds(300)));
        assert!(expiry.is_expired(&seat, t0 + TimeDelta::seconds(301)));
    }

    #[test]
    fn cutoff_agrees_with_is_expired() {
        let t0 = Utc::now();
        let expiry = HoldExpiry::new(Duration::from_secs(300));
        let now = t0 + TimeDelta::minutes(6);
        assert!(t0 < expiry.cutoff(now));
        assert!(expiry.is_expired(&held_at(t0), now));
    }

    #[test]
    fn available_and_occupied_seats_never_expire() {
        let expiry = HoldExpiry::new(Duration::from_secs(1));
        let seat = Seat::available(1, "A", 1, SeatCategory::Vip, Decimal::from(15));
        assert!(!expiry.is_expired(&seat, Utc::now() + TimeDelta::days(1)));
    }

    #[test]
    fn effective_view_clears_lapsed_holder() {
        let t0 = Utc::now();
        let expiry = HoldExpiry::new(Duration::from_secs(60));
        let view = expiry.effective(held_at(t0), t0 + TimeDelta::minutes(2));
        assert_eq!(view.status, SeatStatus::Available);
        assert!(view.holder.is_none() && view.held_at.is_none());
    }

    #[test]
    fn manual_clock_advances() {
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(t0);
        clock.advance(Duration::from_secs(360));
        assert_eq!((clock.now() - t0).num_seconds(), 360);
    }
}
