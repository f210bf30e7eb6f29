use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cinema_booking::models::PaymentMethod;
use cinema_booking::services::notification::{
    CircuitBreaker, CircuitState, NotifyError, Notifier, WebhookNotifier, SIGNATURE_HEADER,
};
use cinema_booking::services::Receipt;

fn receipt() -> Receipt {
    Receipt {
        reference: Uuid::new_v4(),
        kind: "booking",
        user_id: 7,
        showing_id: 3,
        seats: vec!["A1".into(), "B2".into()],
        total: Decimal::from(25),
        payment_method: PaymentMethod::Card,
        issued_at: Utc::now(),
    }
}

fn notifier(server: &MockServer, threshold: u32) -> WebhookNotifier {
    WebhookNotifier::new(
        format!("{}/receipts", server.uri()),
        "s3cret",
        Duration::from_secs(2),
        Arc::new(CircuitBreaker::new(threshold, 3600)),
    )
    .unwrap()
}

#[tokio::test]
async fn webhook_posts_a_signed_receipt() {
    let server = MockServer::start().await;
    let receipt = receipt();

    Mock::given(method("POST"))
        .and(path("/receipts"))
        .and(header_exists(SIGNATURE_HEADER))
        .and(body_partial_json(serde_json::json!({
            "reference": receipt.reference.to_string(),
            "seats": ["A1", "B2"],
            "total": "25",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let webhook = notifier(&server, 3);
    webhook.send_receipt(&receipt).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let signature = requests[0].headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
    assert_eq!(signature, webhook.sign(&receipt));
}

#[tokio::test]
async fn failing_webhook_opens_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let webhook = notifier(&server, 2);
    for _ in 0..2 {
        let err = webhook.send_receipt(&receipt()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(status) if status.as_u16() == 503));
    }
    assert_eq!(webhook.circuit_state(), CircuitState::Open);

    // the third attempt never reaches the server
    let err = webhook.send_receipt(&receipt()).await.unwrap_err();
    assert!(matches!(err, NotifyError::CircuitOpen));
}

#[tokio::test]
async fn client_errors_do_not_trip_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let webhook = notifier(&server, 1);
    assert!(webhook.send_receipt(&receipt()).await.is_err());
    assert_eq!(webhook.circuit_state(), CircuitState::Closed);
}
