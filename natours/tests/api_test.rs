//! HTTP behavior outside the booking lifecycle: sign-in, tours, list
//! queries, reviews and health probes.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use natours::mocks::fixtures::{departure_in, sample_tour, sample_user, sample_user_with_role};
use natours::types::{Money, Role};
use serde_json::json;

// ============================================================================
// Sign-in
// ============================================================================

#[tokio::test]
async fn test_magic_link_sign_in_opens_a_session() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/api/v1/users/signup",
            None,
            json!({ "name": "Jonas Schmedtmann", "email": "Jonas@Example.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["email"], "jonas@example.com");
    assert_eq!(body["data"]["role"], "user");
    assert_eq!(app.email.sent_to("jonas@example.com").len(), 1);

    let (status, body) = app
        .post("/api/v1/users/login", None, json!({ "email": "jonas@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let link_token = body["data"]["token"].as_str().expect("exposed token").to_string();
    let link = app.email.last_link_to("jonas@example.com").expect("magic link");
    assert!(link.ends_with(&link_token));

    let (status, body) = app
        .post("/api/v1/users/login/verify", None, json!({ "token": link_token }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let session = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = app.get("/api/v1/users/me", Some(&session)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Jonas Schmedtmann");

    // Link tokens are single use
    let (status, _) = app
        .post("/api/v1/users/login/verify", None, json!({ "token": link_token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(Method::POST, "/api/v1/users/logout", Some(&session), None)
        .await;
    assert!(status.is_success());
    let (status, _) = app.get("/api/v1/users/me", Some(&session)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_for_an_unknown_address_reveals_nothing() {
    let app = TestApp::new();

    let (status, body) = app
        .post("/api/v1/users/login", None, json!({ "email": "nobody@example.com" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["token"].is_null());
    assert!(app.email.sent().is_empty());
}

#[tokio::test]
async fn test_duplicate_signup_is_a_conflict() {
    let app = TestApp::new();
    let body = json!({ "name": "Jonas Schmedtmann", "email": "jonas@example.com" });

    let (status, _) = app.post("/api/v1/users/signup", None, body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = app.post("/api/v1/users/signup", None, body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "fail");
}

#[tokio::test]
async fn test_update_me_refuses_the_role_field() {
    let app = TestApp::new();
    let token = app.sign_in(&sample_user("jonas@example.com")).await;

    let (status, _) = app
        .patch("/api/v1/users/update-me", Some(&token), json!({ "role": "admin" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .patch("/api/v1/users/update-me", Some(&token), json!({ "name": "Jonas S" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Jonas S");
    assert_eq!(body["data"]["role"], "user");
}

#[tokio::test]
async fn test_deleted_account_loses_its_sessions() {
    let app = TestApp::new();
    let token = app.sign_in(&sample_user("jonas@example.com")).await;

    let (status, _) = app
        .request(Method::DELETE, "/api/v1/users/delete-me", Some(&token), None)
        .await;
    assert!(status.is_success());

    let (status, _) = app.get("/api/v1/users/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deleting_a_user_keeps_places_and_ratings_consistent() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let traveler = sample_user("jonas@example.com");
    let token = app.sign_in(&traveler).await;
    let admin = app
        .sign_in(&sample_user_with_role("admin@natours.io", Role::Admin))
        .await;

    let (_, body) = app
        .post(
            "/api/v1/bookings",
            Some(&admin),
            json!({
                "tour": tour.id,
                "user": traveler.id,
                "start_date": tour.start_dates[0].date,
                "num_participants": 3,
            }),
        )
        .await;
    let booking_id = body["data"]["id"].as_str().unwrap().to_string();
    let (status, _) = app
        .post(
            &format!("/api/v1/tours/{}/reviews", tour.id),
            Some(&token),
            json!({ "review": "Amazing, a trip to remember", "rating": 3 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let user_uri = format!("/api/v1/users/{}", traveler.id);

    let (status, _) = app.request(Method::DELETE, &user_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.db.raw_tour(tour.id).unwrap().start_dates[0].participants_booked, 3);

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/v1/bookings/{booking_id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.request(Method::DELETE, &user_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let stored = app.db.raw_tour(tour.id).unwrap();
    assert_eq!(stored.start_dates[0].participants_booked, 0);
    assert_eq!(stored.ratings_quantity, 0);
    assert!((stored.ratings_average - 4.5).abs() < f64::EPSILON);

    let (status, _) = app.get(&user_uri, Some(&admin)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get("/api/v1/users/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Tours
// ============================================================================

fn new_tour(name: &str) -> serde_json::Value {
    json!({
        "name": name,
        "duration": 7,
        "max_group_size": 15,
        "difficulty": "medium",
        "price": 49_700,
        "summary": "Exploring the jaw-dropping US east coast by foot and by boat",
        "image_cover": "tour-2-cover.jpg",
        "start_dates": [departure_in(20), departure_in(60)],
    })
}

#[tokio::test]
async fn test_only_tour_managers_create_tours() {
    let app = TestApp::new();
    let user = app.sign_in(&sample_user("jonas@example.com")).await;
    let lead = app
        .sign_in(&sample_user_with_role("lead@natours.io", Role::LeadGuide))
        .await;

    let (status, _) = app.post("/api/v1/tours", None, new_tour("The Sea Explorer")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.post("/api/v1/tours", Some(&user), new_tour("The Sea Explorer")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.post("/api/v1/tours", Some(&lead), new_tour("The Sea Explorer")).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["slug"], "the-sea-explorer");
    assert_eq!(body["data"]["duration_weeks"], 1.0);
    assert_eq!(body["data"]["ratings_quantity"], 0);
    assert_eq!(body["data"]["availability"][0]["available_places"], 15);

    let (status, body) = app.get("/api/v1/tours/slug/the-sea-explorer", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "The Sea Explorer");
}

#[tokio::test]
async fn test_invalid_tours_are_rejected() {
    let app = TestApp::new();
    let admin = app
        .sign_in(&sample_user_with_role("admin@natours.io", Role::Admin))
        .await;

    let (status, body) = app.post("/api/v1/tours", Some(&admin), new_tour("Short")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap().contains("between 10 and 40"));

    let mut discounted = new_tour("The Sea Explorer");
    discounted["price_discount"] = json!(59_700);
    let (status, _) = app.post("/api/v1/tours", Some(&admin), discounted).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_list_queries_filter_sort_project_and_paginate() {
    let app = TestApp::new();
    for (name, dollars) in [
        ("The Forest Hiker", 397),
        ("The Sea Explorer", 497),
        ("The Snow Adventurer", 997),
    ] {
        let mut tour = sample_tour(name, 10);
        tour.price = Money::from_dollars(dollars);
        app.add_tour(&tour).await;
    }

    let (status, body) = app
        .get("/api/v1/tours?sort=-price&fields=name,price&limit=2", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 2);
    assert_eq!(body["data"][0]["name"], "The Snow Adventurer");
    assert_eq!(body["data"][1]["name"], "The Sea Explorer");
    let first = body["data"][0].as_object().unwrap();
    assert!(first.contains_key("id"));
    assert!(!first.contains_key("summary"));

    let (_, body) = app
        .get("/api/v1/tours?sort=-price&fields=name&limit=2&page=2", None)
        .await;
    assert_eq!(body["results"], 1);
    assert_eq!(body["data"][0]["name"], "The Forest Hiker");

    let (_, body) = app.get("/api/v1/tours?price%5Blt%5D=50000", None).await;
    assert_eq!(body["results"], 2);

    let (status, _) = app.get("/api/v1/tours?password=secret", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_secret_tours_stay_hidden() {
    let app = TestApp::new();
    let mut secret = sample_tour("The Secret Mountain", 10);
    secret.secret_tour = true;
    app.add_tour(&secret).await;
    app.add_tour(&sample_tour("The Forest Hiker", 10)).await;

    let (_, body) = app.get("/api/v1/tours", None).await;
    assert_eq!(body["results"], 1);
    assert_eq!(body["data"][0]["name"], "The Forest Hiker");

    let (status, _) = app.get(&format!("/api/v1/tours/{}", secret.id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_tour_is_not_found() {
    let app = TestApp::new();

    let (status, body) = app
        .get(&format!("/api/v1/tours/{}", uuid::Uuid::new_v4()), None)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "fail");
}

#[tokio::test]
async fn test_group_size_cannot_drop_below_booked_travelers() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let traveler = sample_user("jonas@example.com");
    app.sign_in(&traveler).await;
    let admin = app
        .sign_in(&sample_user_with_role("admin@natours.io", Role::Admin))
        .await;
    let (status, _) = app
        .post(
            "/api/v1/bookings",
            Some(&admin),
            json!({
                "tour": tour.id,
                "user": traveler.id,
                "start_date": tour.start_dates[0].date,
                "num_participants": 5,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/api/v1/tours/{}", tour.id);

    let (status, body) = app.patch(&uri, Some(&admin), json!({ "max_group_size": 2 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("5 travelers"));

    let stored = app.db.raw_tour(tour.id).unwrap();
    assert_eq!(stored.max_group_size, 10);
    assert_eq!(stored.start_dates[0].participants_booked, 5);

    let (status, body) = app.patch(&uri, Some(&admin), json!({ "max_group_size": 5 })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["max_group_size"], 5);
    assert_eq!(body["data"]["availability"][0]["available_places"], 0);
}

// ============================================================================
// Reviews
// ============================================================================

#[tokio::test]
async fn test_only_paying_travelers_review_and_only_once() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let traveler = sample_user("jonas@example.com");
    let token = app.sign_in(&traveler).await;
    let admin = app
        .sign_in(&sample_user_with_role("admin@natours.io", Role::Admin))
        .await;
    let uri = format!("/api/v1/tours/{}/reviews", tour.id);
    let review = json!({ "review": "Amazing, a trip to remember", "rating": 4 });

    let (status, _) = app.post(&uri, Some(&token), review.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            "/api/v1/bookings",
            Some(&admin),
            json!({
                "tour": tour.id,
                "user": traveler.id,
                "start_date": tour.start_dates[0].date,
                "num_participants": 1,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.post(&uri, Some(&token), review.clone()).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["rating"], 4);

    let (status, _) = app.post(&uri, Some(&token), review).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = app.get(&format!("/api/v1/tours/{}", tour.id), None).await;
    assert_eq!(body["data"]["ratings_quantity"], 1);
    assert_eq!(body["data"]["ratings_average"], 4.0);

    let (_, body) = app.get(&uri, None).await;
    assert_eq!(body["results"], 1);
}

#[tokio::test]
async fn test_ratings_outside_one_to_five_are_invalid() {
    let app = TestApp::new();
    let tour = sample_tour("The Forest Hiker", 10);
    app.add_tour(&tour).await;
    let token = app.sign_in(&sample_user("jonas@example.com")).await;

    let (status, _) = app
        .post(
            &format!("/api/v1/tours/{}/reviews", tour.id),
            Some(&token),
            json!({ "review": "Too good to be true", "rating": 6 }),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_readiness_follows_the_database() {
    let app = TestApp::new();

    let (status, _) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    app.db.set_unavailable(true);
    let (status, _) = app.get("/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
