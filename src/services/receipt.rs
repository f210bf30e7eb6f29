use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Booking, PaymentMethod, ShowingId, Ticket, UserId};

/// What a customer gets after a purchase: enough to identify the seats at
/// the door and nothing else.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub reference: Uuid,
    pub kind: &'static str,
    pub user_id: UserId,
    pub showing_id: ShowingId,
    pub seats: Vec<String>,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub issued_at: DateTime<Utc>,
}

impl Receipt {
    pub fn for_booking(booking: &Booking) -> Self {
        Self {
            reference: booking.id,
            kind: "booking",
            user_id: booking.user_id,
            showing_id: booking.showing_id,
            seats: booking.seat_numbers(),
            total: booking.total_amount,
            payment_method: booking.payment_method,
            issued_at: booking.updated_at,
        }
    }

    pub fn for_ticket(ticket: &Ticket) -> Self {
        Self {
            reference: ticket.id,
            kind: "ticket",
            user_id: ticket.user_id,
            showing_id: ticket.showing_id,
            seats: ticket.seats.clone(),
            total: ticket.total_amount,
            payment_method: ticket.payment_method,
            issued_at: ticket.created_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to encode receipt payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait ReceiptRenderer: Send + Sync {
    /// Returns an opaque payload to attach to the booking.
    async fn render(&self, receipt: &Receipt) -> Result<String, RenderError>;
}

/// Payload for a QR code scanner: a data URL carrying the receipt JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrPayloadRenderer;

#[derive(Serialize)]
struct QrPayload<'a> {
    reference: Uuid,
    showing_id: ShowingId,
    seats: &'a [String],
    total: Decimal,
}

#[async_trait]
impl ReceiptRenderer for QrPayloadRenderer {
    async fn render(&self, receipt: &Receipt) -> Result<String, RenderError> {
        let payload = serde_json::to_vec(&QrPayload {
            reference: receipt.reference,
            showing_id: receipt.showing_id,
            seats: &receipt.seats,
            total: receipt.total,
        })?;
        Ok(format!("data:application/json;base64,{}", STANDARD.encode(payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn qr_payload_is_a_json_data_url() {
        let receipt = Receipt {
            reference: Uuid::new_v4(),
            kind: "booking",
            user_id: 3,
            showing_id: 12,
            seats: vec!["A1".into(), "A2".into()],
            total: Decimal::new(3000, 2),
            payment_method: PaymentMethod::Card,
            issued_at: Utc::now(),
        };

        let rendered = QrPayloadRenderer.render(&receipt).await.unwrap();
        let encoded = rendered.strip_prefix("data:application/json;base64,").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();

        assert_eq!(json["reference"], receipt.reference.to_string());
        assert_eq!(json["showing_id"], 12);
        assert_eq!(json["seats"], serde_json::json!(["A1", "A2"]));
        assert_eq!(json["total"], "30.00");
    }
}
