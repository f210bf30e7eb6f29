#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cinema_booking::inventory::ManualClock;
use cinema_booking::models::{HallTemplate, NewShowing, SeatPrices, Showing, ShowingCoordinates};
use cinema_booking::services::notification::{NotifyError, Notifier};
use cinema_booking::services::{QrPayloadRenderer, Receipt, ServiceSettings, Services};
use cinema_booking::store::MemoryStore;

pub const HOLD_TTL: Duration = Duration::from_secs(5 * 60);
pub const GRACE: Duration = Duration::from_secs(5 * 60);

pub const CINEMA: &str = "Galaxy";
pub const HALL: &str = "Hall 1";
pub const MOVIE: i64 = 42;

pub const U1: i64 = 1;
pub const U2: i64 = 2;
pub const ADMIN: i64 = 99;

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Rows A-B x 5 seats, row A VIP at 15, row B standard at 10.
pub fn two_row_hall() -> HallTemplate {
    HallTemplate {
        rows: vec!["A".into(), "B".into()],
        columns: 5,
        vip_rows: vec!["A".into()],
        prices: SeatPrices { standard: Decimal::from(10), vip: Decimal::from(15) },
    }
}

pub fn seats(numbers: &[&str]) -> Vec<String> {
    numbers.iter().map(|n| n.to_string()).collect()
}

/// Keeps every receipt it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Receipt>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_receipt(&self, receipt: &Receipt) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(receipt.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: Services,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let notifier = Arc::new(RecordingNotifier::default());
        let services = Services::new(
            store.clone(),
            clock.clone(),
            ServiceSettings { hold_ttl: HOLD_TTL, reconciliation_grace: GRACE },
            notifier.clone(),
            Arc::new(QrPayloadRenderer),
        );
        Self { store, clock, notifier, services }
    }

    pub fn show_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    pub fn coordinates(time: &str) -> ShowingCoordinates {
        ShowingCoordinates {
            movie_id: MOVIE,
            hall: HALL.into(),
            date: Self::show_date(),
            time: time.into(),
        }
    }

    pub async fn showing_at(&self, time: &str) -> Showing {
        self.services
            .inventory
            .create_showing(NewShowing {
                movie_id: MOVIE,
                cinema: CINEMA.into(),
                hall: HALL.into(),
                date: Self::show_date(),
                time: time.into(),
            })
            .await
            .unwrap()
    }

    /// A showing at 19:30 with the two-row hall initialized.
    pub async fn initialized_showing(&self) -> Showing {
        let showing = self.showing_at("19:30").await;
        self.services
            .inventory
            .initialize(showing.id, Some(two_row_hall()))
            .await
            .unwrap();
        showing
    }
}
