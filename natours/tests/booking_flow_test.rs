//! End-to-end booking lifecycle over HTTP: checkout session, signed webhook,
//! reconciliation, failed bookings and refunds.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use axum::http::StatusCode;
use common::{completed_event, TestApp};
use natours::mocks::fixtures::{sample_tour, sample_user, sample_user_with_role};
use natours::models::Tour;
use natours::types::{Money, Role};
use serde_json::{json, Value};
use std::sync::Arc;

async fn checkout(app: &TestApp, token: &str, tour: &Tour, travelers: u32) -> (StatusCode, Value) {
    app.post(
        "/api/v1/bookings/checkout-session",
        Some(token),
        json!({
            "tour_id": tour.id,
            "start_date": tour.start_dates[0].date,
            "num_participants": travelers,
        }),
    )
    .await
}

fn booked_on_first_departure(app: &TestApp, tour: &Tour) -> u32 {
    app.db
        .raw_tour(tour.id)
        .expect("tour stored")
        .start_dates[0]
        .participants_booked
}

/// Pay for `travelers` on the first departure and deliver the webhook.
async fn book(app: &TestApp, token: &str, tour: &Tour, travelers: u32, intent: &str) -> Value {
    let (status, body) = checkout(app, token, tour, travelers).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let session_id = body["data"]["id"].as_str().expect("session id").to_string();

    let (status, _) = app.complete_checkout(&session_id, &app.last_checkout(), intent).await;
    assert_eq!(status, StatusCode::OK);

    let (_, bookings) = app.get("/api/v1/bookings/my-bookings", Some(token)).await;
    bookings["data"][0].clone()
}

#[tokio::test]
async fn test_checkout_session_describes_the_tour_without_reserving() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;

    let (status, body) = checkout(&app, &token, &tour, 2).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["data"]["id"].as_str().unwrap().starts_with("cs_test_"));
    assert!(body["data"]["url"].as_str().unwrap().starts_with("https://"));

    let request = app.last_checkout();
    assert_eq!(request.customer_email, "jonas@example.com");
    assert_eq!(request.client_reference_id, tour.id.to_string());
    assert_eq!(request.line_item.name, "The Forest Hiker Tour");
    assert_eq!(request.line_item.unit_amount, Money::from_dollars(397));
    assert_eq!(request.line_item.quantity, 2);
    assert_eq!(request.metadata.num_participants, 2);

    assert_eq!(booked_on_first_departure(&app, &tour), 0);
    assert_eq!(app.db.booking_count(), 0);
}

#[tokio::test]
async fn test_checkout_requires_a_session() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;

    let (status, body) = app
        .post(
            "/api/v1/bookings/checkout-session",
            None,
            json!({
                "tour_id": tour.id,
                "start_date": tour.start_dates[0].date,
                "num_participants": 1,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "fail");
}

#[tokio::test]
async fn test_checkout_is_refused_when_the_departure_is_too_small() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 3);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;

    let (status, _) = checkout(&app, &token, &tour, 4).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(app.gateway.checkout_requests().is_empty());
}

#[tokio::test]
async fn test_checkout_rejects_a_date_the_tour_does_not_run_on() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;

    let (status, _) = app
        .post(
            "/api/v1/bookings/checkout-session",
            Some(&token),
            json!({
                "tour_id": tour.id,
                "start_date": natours::mocks::fixtures::departure_in(45),
                "num_participants": 1,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_paid_checkout_creates_the_booking_and_takes_the_places() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;

    let booking = book(&app, &token, &tour, 3, "pi_first").await;

    assert_eq!(booking["tour"], json!(tour.id));
    assert_eq!(booking["num_participants"], 3);
    assert_eq!(booking["price"], 3 * 39_700);
    assert_eq!(booking["paid"], true);
    assert_eq!(booking["refunded"], false);
    assert_eq!(booking["payment_intents"][0]["id"], "pi_first");
    assert_eq!(booked_on_first_departure(&app, &tour), 3);
}

#[tokio::test]
async fn test_redelivered_webhook_books_only_once() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;

    let (_, body) = checkout(&app, &token, &tour, 2).await;
    let session_id = body["data"]["id"].as_str().unwrap().to_string();
    let request = app.last_checkout();

    for _ in 0..3 {
        let (status, receipt) = app.complete_checkout(&session_id, &request, "pi_once").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["received"], true);
    }

    assert_eq!(app.db.booking_count(), 1);
    assert_eq!(booked_on_first_departure(&app, &tour), 2);
}

#[tokio::test]
async fn test_concurrent_webhooks_never_overbook_a_departure() {
    let app = Arc::new(TestApp::new());
    let tour = sample_tour("The Forest Hiker", 4);
    app.add_tour(&tour).await;

    let mut paid = Vec::new();
    for n in 0..8 {
        let token = app.sign_in(&sample_user(&format!("traveler{n}@example.com"))).await;
        let (status, body) = checkout(&app, &token, &tour, 1).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let session_id = body["data"]["id"].as_str().unwrap().to_string();
        paid.push((session_id, app.last_checkout(), format!("pi_{n}")));
    }

    let mut deliveries = Vec::new();
    for (session_id, request, intent) in paid {
        let app = Arc::clone(&app);
        deliveries.push(tokio::spawn(async move {
            app.complete_checkout(&session_id, &request, &intent).await.0
        }));
    }
    for delivery in deliveries {
        assert_eq!(delivery.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(booked_on_first_departure(&app, &tour), 4);
    assert_eq!(app.db.booking_count(), 4);
    let failed = app.repositories().failed_bookings.list().await.unwrap();
    assert_eq!(failed.len(), 4);
    assert!(failed.iter().all(|f| f.num_participants == 1 && !f.resolved));
}

#[tokio::test]
async fn test_second_checkout_for_the_same_departure_extends_the_booking() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;

    book(&app, &token, &tour, 2, "pi_one").await;
    let booking = book(&app, &token, &tour, 1, "pi_two").await;

    assert_eq!(app.db.booking_count(), 1);
    assert_eq!(booking["num_participants"], 3);
    assert_eq!(booking["price"], 3 * 39_700);
    assert_eq!(booking["payment_intents"].as_array().unwrap().len(), 2);
    assert_eq!(booked_on_first_departure(&app, &tour), 3);
}

#[tokio::test]
async fn test_add_travelers_checkout_targets_the_existing_booking() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;
    let booking = book(&app, &token, &tour, 1, "pi_one").await;
    let booking_id = booking["id"].as_str().unwrap();

    let (status, body) = app
        .post(
            &format!("/api/v1/bookings/{booking_id}/add-travelers"),
            Some(&token),
            json!({ "num_participants": 2 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let request = app.last_checkout();
    assert_eq!(request.metadata.booking.map(|id| id.to_string()).as_deref(), Some(booking_id));

    let session_id = body["data"]["id"].as_str().unwrap();
    let (status, _) = app.complete_checkout(session_id, &request, "pi_two").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.db.booking_count(), 1);
    assert_eq!(booked_on_first_departure(&app, &tour), 3);
}

#[tokio::test]
async fn test_someone_elses_booking_cannot_be_extended() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let owner = app.sign_in(&sample_user("jonas@example.com")).await;
    let stranger = app.sign_in(&sample_user("lisa@example.com")).await;
    let booking = book(&app, &owner, &tour, 1, "pi_one").await;

    let (status, _) = app
        .post(
            &format!("/api/v1/bookings/{}/add-travelers", booking["id"].as_str().unwrap()),
            Some(&stranger),
            json!({ "num_participants": 1 }),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_without_a_valid_signature_is_rejected() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;
    let (_, body) = checkout(&app, &token, &tour, 1).await;
    let session_id = body["data"]["id"].as_str().unwrap().to_string();
    let payload = completed_event(&session_id, &app.last_checkout(), "pi_forged");

    let (status, body) = app.deliver_webhook(payload.clone(), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().starts_with("Webhook error"));

    let timestamp = chrono::Utc::now().timestamp();
    let forged = format!("t={timestamp},v1={}", "0".repeat(64));
    let (status, _) = app.deliver_webhook(payload.clone(), Some(&forged)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let stale = app.state.webhooks.sign(&payload, timestamp - 3_600);
    let (status, _) = app.deliver_webhook(payload, Some(&stale)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.db.booking_count(), 0);
}

#[tokio::test]
async fn test_other_event_types_are_acknowledged() {
    let app = TestApp::new();
    let payload = serde_json::to_vec(&json!({
        "type": "payment_intent.created",
        "data": { "object": { "id": "pi_123" } }
    }))
    .unwrap();
    let signature = app.state.webhooks.sign(&payload, chrono::Utc::now().timestamp());

    let (status, body) = app.deliver_webhook(payload, Some(&signature)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
}

#[tokio::test]
async fn test_unreconcilable_payment_is_kept_for_an_operator() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;
    let admin = app
        .sign_in(&sample_user_with_role("admin@natours.io", Role::Admin))
        .await;

    let (_, body) = checkout(&app, &token, &tour, 2).await;
    let session_id = body["data"]["id"].as_str().unwrap().to_string();
    app.db.fail_finalize(Some("connection reset"));

    let (status, _) = app
        .complete_checkout(&session_id, &app.last_checkout(), "pi_lost")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.db.booking_count(), 0);
    assert_eq!(booked_on_first_departure(&app, &tour), 0);

    let (status, _) = app.get("/api/v1/failed-bookings", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.get("/api/v1/failed-bookings", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 1);
    let failed = &body["data"][0];
    assert_eq!(failed["session_id"], session_id.as_str());
    assert_eq!(failed["payment_intent"], "pi_lost");
    assert_eq!(failed["num_participants"], 2);
    assert_eq!(failed["resolved"], false);
    assert!(failed["error"].as_str().unwrap().contains("connection reset"));

    let id = failed["id"].as_str().unwrap();
    let (status, body) = app
        .patch(&format!("/api/v1/failed-bookings/{id}/resolve"), Some(&admin), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["resolved"], true);
    assert!(body["data"]["resolved_at"].is_string());
}

#[tokio::test]
async fn test_refund_lifecycle_returns_the_money_and_frees_the_places() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;
    let admin = app
        .sign_in(&sample_user_with_role("admin@natours.io", Role::Admin))
        .await;
    book(&app, &token, &tour, 2, "pi_one").await;
    let booking = book(&app, &token, &tour, 1, "pi_two").await;
    let booking_id = booking["id"].as_str().unwrap();

    let (status, body) = app
        .request(
            axum::http::Method::POST,
            &format!("/api/v1/bookings/{booking_id}/refund"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["amount"], 3 * 39_700);
    let refund_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            axum::http::Method::POST,
            &format!("/api/v1/bookings/{booking_id}/refund"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .patch(&format!("/api/v1/refunds/{refund_id}/process"), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .patch(&format!("/api/v1/refunds/{refund_id}/process"), Some(&admin), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "processed");
    assert!(body["data"]["processed_at"].is_string());

    let mut refunded = app.gateway.refunds();
    refunded.sort();
    assert_eq!(
        refunded,
        vec![
            ("pi_one".to_string(), Money::from_dollars(2 * 397)),
            ("pi_two".to_string(), Money::from_dollars(397)),
        ]
    );
    assert_eq!(booked_on_first_departure(&app, &tour), 0);

    let (_, bookings) = app.get("/api/v1/bookings/my-bookings", Some(&token)).await;
    assert_eq!(bookings["data"][0]["refunded"], true);

    let (status, _) = app
        .patch(&format!("/api/v1/refunds/{refund_id}/reject"), Some(&admin), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rejected_refund_keeps_the_booking() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;
    let admin = app
        .sign_in(&sample_user_with_role("admin@natours.io", Role::Admin))
        .await;
    let booking = book(&app, &token, &tour, 2, "pi_one").await;

    let (_, body) = app
        .request(
            axum::http::Method::POST,
            &format!("/api/v1/bookings/{}/refund", booking["id"].as_str().unwrap()),
            Some(&token),
            None,
        )
        .await;
    let refund_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .patch(&format!("/api/v1/refunds/{refund_id}/reject"), Some(&admin), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "rejected");
    assert!(app.gateway.refunds().is_empty());
    assert_eq!(booked_on_first_departure(&app, &tour), 2);

    let (_, mine) = app.get("/api/v1/refunds/my-refunds", Some(&token)).await;
    assert_eq!(mine["results"], 1);
    assert_eq!(mine["data"][0]["status"], "rejected");
}

#[tokio::test]
async fn test_provider_refund_failure_leaves_the_refund_pending() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;
    let admin = app
        .sign_in(&sample_user_with_role("admin@natours.io", Role::Admin))
        .await;
    let booking = book(&app, &token, &tour, 2, "pi_one").await;

    let (_, body) = app
        .request(
            axum::http::Method::POST,
            &format!("/api/v1/bookings/{}/refund", booking["id"].as_str().unwrap()),
            Some(&token),
            None,
        )
        .await;
    let refund_id = body["data"]["id"].as_str().unwrap().to_string();

    app.gateway.fail_refunds(true);
    let (status, body) = app
        .patch(&format!("/api/v1/refunds/{refund_id}/process"), Some(&admin), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["message"].as_str().unwrap().contains("still pending"));

    let (_, body) = app.get(&format!("/api/v1/refunds/{refund_id}"), Some(&admin)).await;
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(booked_on_first_departure(&app, &tour), 2);

    app.gateway.fail_refunds(false);
    let (status, body) = app
        .patch(&format!("/api/v1/refunds/{refund_id}/process"), Some(&admin), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "processed");
}

#[tokio::test]
async fn test_unpaid_bookings_cannot_be_refunded() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let traveler = sample_user("jonas@example.com");
    let token = app.sign_in(&traveler).await;
    let admin = app
        .sign_in(&sample_user_with_role("admin@natours.io", Role::Admin))
        .await;

    let (status, body) = app
        .post(
            "/api/v1/bookings",
            Some(&admin),
            json!({
                "tour": tour.id,
                "user": traveler.id,
                "start_date": tour.start_dates[0].date,
                "num_participants": 1,
                "paid": false,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let booking_id = body["data"]["id"].as_str().unwrap();

    let (status, _) = app
        .request(
            axum::http::Method::POST,
            &format!("/api/v1/bookings/{booking_id}/refund"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
