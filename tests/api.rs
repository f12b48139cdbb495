use std::sync::Arc;
use std::time::Duration;

use actix_web::{http::StatusCode, test, web, App};
use courtsplit::api::{self, AppState};
use courtsplit::memory::MemoryBackend;
use courtsplit::split::SplitPolicy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

fn state(backend: &Arc<MemoryBackend>) -> web::Data<AppState> {
    web::Data::new(AppState::new(
        backend.clone(),
        backend.clone(),
        backend.clone(),
        SplitPolicy::default(),
    ))
}

macro_rules! open_session {
    ($app:expr, $event:expr) => {{
        let (status, view) = call!(
            $app,
            test::TestRequest::post()
                .uri("/settlements")
                .set_json(json!({ "event_id": $event }))
        );
        assert_eq!(status, StatusCode::CREATED);
        view["id"].as_str().unwrap().to_string()
    }};
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .configure(api::configure),
        )
        .await
    };
}

macro_rules! call {
    ($app:expr, $req:expr) => {{
        let response = test::call_service(&$app, $req.to_request()).await;
        let status = response.status();
        let body: Value = test::read_body_json(response).await;
        (status, body)
    }};
}

macro_rules! seed_event {
    ($app:expr, $id:expr, $cost:expr, $participants:expr) => {{
        let (status, _) = call!(
            $app,
            test::TestRequest::put()
                .uri(&format!("/events/{}", $id))
                .set_json(json!({ "title": "Friendly Doubles Match", "organizer": "john", "total_cost": $cost }))
        );
        assert_eq!(status, StatusCode::CREATED);
        for (participant, has_paid) in $participants {
            let (status, _) = call!(
                $app,
                test::TestRequest::post()
                    .uri(&format!("/events/{}/participants", $id))
                    .set_json(json!({ "id": participant, "name": participant, "has_paid": has_paid }))
            );
            assert_eq!(status, StatusCode::OK);
        }
    }};
}

fn decimal(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

fn amount_of(view: &Value, participant: &str) -> Decimal {
    let participant = view["participants"]
        .as_array()
        .and_then(|participants| participants.iter().find(|p| p["id"] == participant))
        .unwrap();
    decimal(&participant["amount_due"])
}

#[actix_web::test]
async fn equal_split_is_submitted() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);
    seed_event!(
        app,
        "1",
        "60.00",
        [("sarah", false), ("david", false), ("emily", false)]
    );

    let (status, view) = call!(
        app,
        test::TestRequest::post()
            .uri("/settlements")
            .set_json(json!({ "event_id": "1" }))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(view["state"], "ChoosingSplitMethod");
    assert_eq!(amount_of(&view, "sarah"), dec!(15.00));
    let session = view["id"].as_str().unwrap().to_string();

    let (status, view) = call!(
        app,
        test::TestRequest::put()
            .uri(&format!("/settlements/{}/split-method", session))
            .set_json(json!({ "method": "equal" }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["state"], "Ready");

    let (status, report) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/submit", session))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["outcomes"].as_array().unwrap().len(), 3);
    assert_eq!(backend.dispatched().await.len(), 1);

    let (status, error) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/participants/sarah/toggle", session))
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["kind"], "SessionClosed");
}

#[actix_web::test]
async fn custom_split_mismatch_is_reported() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);
    seed_event!(app, "2", "50.00", [("sarah", false), ("david", false)]);

    let (_, view) = call!(
        app,
        test::TestRequest::post()
            .uri("/settlements")
            .set_json(json!({ "event_id": "2" }))
    );
    let session = view["id"].as_str().unwrap().to_string();

    for (participant, amount) in [("sarah", "30.00"), ("david", "15.00")] {
        let (status, _) = call!(
            app,
            test::TestRequest::put()
                .uri(&format!("/settlements/{}/participants/{}/amount", session, participant))
                .set_json(json!({ "amount": amount }))
        );
        assert_eq!(status, StatusCode::OK);
    }

    let (status, error) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/submit", session))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "SplitMismatch");
    assert_eq!(decimal(&error["delta"]), dec!(5.00));
    assert!(backend.dispatched().await.is_empty());

    let (_, view) = call!(
        app,
        test::TestRequest::put()
            .uri(&format!("/settlements/{}/participants/david/amount", session))
            .set_json(json!({ "amount": "20.00" }))
    );
    assert_eq!(decimal(&view["requested_total"]), dec!(50.00));
    let (status, _) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/submit", session))
    );
    assert_eq!(status, StatusCode::OK);
}

#[actix_web::test]
async fn nothing_selected_is_rejected() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);
    seed_event!(app, "3", "20.00", [("sarah", false)]);

    let (_, view) = call!(
        app,
        test::TestRequest::post()
            .uri("/settlements")
            .set_json(json!({ "event_id": "3" }))
    );
    let session = view["id"].as_str().unwrap().to_string();

    let (status, error) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/participants/sarah/toggle", session))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "InsufficientParticipants");

    let (status, error) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/submit", session))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "NoParticipantsSelected");
}

#[actix_web::test]
async fn unknown_event_and_session() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);

    let (status, error) = call!(
        app,
        test::TestRequest::post()
            .uri("/settlements")
            .set_json(json!({ "event_id": "404" }))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["kind"], "NotFound");

    let (status, _) = call!(
        app,
        test::TestRequest::get().uri("/settlements/00000000-0000-0000-0000-000000000000")
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn paying_a_share_moves_wallet_funds() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);
    seed_event!(app, "1", "60.00", [("sarah", false)]);

    let session = open_session!(app, "1");
    let (status, report) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/submit", session))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&report["outcomes"][0]["amount"]), dec!(30.00));

    let (status, wallet) = call!(
        app,
        test::TestRequest::post()
            .uri("/wallets/sarah/deposits")
            .set_json(json!({ "amount": "40" }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&wallet["balance"]), dec!(40));

    let (status, wallet) = call!(
        app,
        test::TestRequest::post()
            .uri("/events/1/participants/sarah/pay")
            .set_json(json!({ "amount": "30.00" }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&wallet["balance"]), dec!(10.00));

    let (_, organizer) = call!(app, test::TestRequest::get().uri("/wallets/john"));
    assert_eq!(decimal(&organizer["balance"]), dec!(30.00));

    let (_, event) = call!(app, test::TestRequest::get().uri("/events/1"));
    assert_eq!(event["participants"][0]["has_paid"], true);

    let (status, error) = call!(
        app,
        test::TestRequest::post()
            .uri("/events/1/participants/sarah/pay")
            .set_json(json!({ "amount": "30.00" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "AlreadyPaid");
}

#[actix_web::test]
async fn payment_must_match_the_request() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);
    seed_event!(app, "1", "60.00", [("sarah", false)]);

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/wallets/sarah/deposits")
            .set_json(json!({ "amount": "40" }))
    );
    assert_eq!(status, StatusCode::OK);

    let (status, error) = call!(
        app,
        test::TestRequest::post()
            .uri("/events/1/participants/sarah/pay")
            .set_json(json!({ "amount": "30.00" }))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["kind"], "NoPaymentRequest");

    let session = open_session!(app, "1");
    let (status, _) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/submit", session))
    );
    assert_eq!(status, StatusCode::OK);

    let (status, error) = call!(
        app,
        test::TestRequest::post()
            .uri("/events/1/participants/sarah/pay")
            .set_json(json!({ "amount": "0.01" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "PaymentMismatch");

    let (_, event) = call!(app, test::TestRequest::get().uri("/events/1"));
    assert_eq!(event["participants"][0]["has_paid"], false);
    let (_, wallet) = call!(app, test::TestRequest::get().uri("/wallets/sarah"));
    assert_eq!(decimal(&wallet["balance"]), dec!(40));
}

#[actix_web::test]
async fn failed_payment_leaves_the_share_unpaid() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);
    seed_event!(app, "1", "60.00", [("sarah", false)]);
    let session = open_session!(app, "1");
    let (status, _) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/submit", session))
    );
    assert_eq!(status, StatusCode::OK);

    let (status, error) = call!(
        app,
        test::TestRequest::post()
            .uri("/events/1/participants/sarah/pay")
            .set_json(json!({ "amount": "30.00" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "InsufficientBalance");

    let (_, event) = call!(app, test::TestRequest::get().uri("/events/1"));
    assert_eq!(event["participants"][0]["has_paid"], false);
}

#[actix_web::test]
async fn participant_cannot_be_added_twice() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);
    seed_event!(app, "1", "60.00", [("sarah", false)]);

    let (status, error) = call!(
        app,
        test::TestRequest::post()
            .uri("/events/1/participants")
            .set_json(json!({ "id": "sarah", "name": "Sarah again", "has_paid": true }))
    );
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["kind"], "DuplicateParticipant");

    let (_, event) = call!(app, test::TestRequest::get().uri("/events/1"));
    assert_eq!(event["participants"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn undelivered_requests_keep_the_session_open() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);
    seed_event!(app, "1", "60.00", [("sarah", false), ("david", false)]);
    let session = open_session!(app, "1");
    let (status, _) = call!(
        app,
        test::TestRequest::put()
            .uri(&format!("/settlements/{}/split-method", session))
            .set_json(json!({ "method": "equal" }))
    );
    assert_eq!(status, StatusCode::OK);
    backend.set_unreachable("david", true).await;

    let (status, error) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/submit", session))
    );
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(error["kind"], "Dispatch");

    let (_, view) = call!(
        app,
        test::TestRequest::get().uri(&format!("/settlements/{}", session))
    );
    assert_eq!(view["state"], "Ready");

    backend.set_unreachable("david", false).await;
    let (status, report) = call!(
        app,
        test::TestRequest::post().uri(&format!("/settlements/{}/submit", session))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["outcomes"].as_array().unwrap().len(), 2);
    assert_eq!(backend.dispatched().await.len(), 2);
}

#[actix_web::test]
async fn idle_sessions_are_evicted() {
    let backend = Arc::new(MemoryBackend::default());
    let state = web::Data::new(
        AppState::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            SplitPolicy::default(),
        )
        .with_session_ttl(Duration::ZERO),
    );
    let app = app!(state);
    seed_event!(app, "1", "60.00", [("sarah", false)]);
    let session = open_session!(app, "1");

    assert_eq!(state.evict_expired().await, 1);
    let (status, _) = call!(
        app,
        test::TestRequest::get().uri(&format!("/settlements/{}", session))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn closed_session_is_gone() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);
    seed_event!(app, "1", "60.00", [("sarah", false)]);
    let session = open_session!(app, "1");

    let response = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/settlements/{}", session))
            .to_request(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(state.evict_expired().await, 0);

    let (status, _) = call!(
        app,
        test::TestRequest::get().uri(&format!("/settlements/{}", session))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn wallet_validation() {
    let backend = Arc::new(MemoryBackend::default());
    let state = state(&backend);
    let app = app!(state);

    let (status, error) = call!(
        app,
        test::TestRequest::post()
            .uri("/wallets/john/withdrawals")
            .set_json(json!({ "amount": "10" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "InsufficientBalance");

    let (status, error) = call!(
        app,
        test::TestRequest::post()
            .uri("/wallets/john/deposits")
            .set_json(json!({ "amount": "lots" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "InvalidAmount");

    let (status, error) = call!(
        app,
        test::TestRequest::post()
            .uri("/wallets/john/transfers")
            .set_json(json!({ "to": "john", "amount": "1" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "SelfTransfer");

    let (status, error) = call!(
        app,
        test::TestRequest::post()
            .uri("/wallets/john/deposits")
            .set_json(json!({ "amount": "79228162514264337593543950335" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "InvalidAmount");

    let (status, error) = call!(
        app,
        test::TestRequest::put()
            .uri("/events/9")
            .set_json(json!({ "title": "Final", "organizer": "john", "total_cost": "79228162514264337593543950335" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["kind"], "InvalidAmount");
}
