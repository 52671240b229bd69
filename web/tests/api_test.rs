//! End-to-end tests of the HTTP surface, driven through the full router.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use chrono::{Duration, TimeZone, Utc};
use homeserve_booking::{
    Actor, BookingEngine, BookingEnvironment, BookingPolicy, CustomerId,
    InMemoryBookingRepository, ProfessionalId,
};
use homeserve_core::environment::Clock;
use homeserve_runtime::InMemoryEventBus;
use homeserve_testing::{ManualClock, ScriptedCodeGenerator, test_clock};
use homeserve_web::{AppState, build_router};
use serde_json::{Value, json};
use std::sync::Arc;

struct Harness {
    server: TestServer,
    clock: ManualClock,
}

fn harness() -> Harness {
    let clock = ManualClock::new(test_clock().now());
    let env = BookingEnvironment::new(
        Arc::new(clock.clone()),
        Arc::new(ScriptedCodeGenerator::new(["4821", "7310", "5096"])),
        BookingPolicy::default(),
    );
    let engine = BookingEngine::new(
        env,
        Arc::new(InMemoryBookingRepository::new()),
        Arc::new(InMemoryEventBus::new()),
    );
    let server = TestServer::new(build_router(AppState::new(Arc::new(engine)))).unwrap();
    Harness { server, clock }
}

fn as_actor(request: TestRequest, actor: Actor) -> TestRequest {
    let (role, id) = match actor {
        Actor::Customer(id) => ("customer", Some(id.to_string())),
        Actor::Professional(id) => ("professional", Some(id.to_string())),
        Actor::Admin => ("admin", None),
    };
    let request = request.add_header(
        HeaderName::from_static("x-actor-role"),
        HeaderValue::from_static(role),
    );
    match id {
        Some(id) => request.add_header(
            HeaderName::from_static("x-actor-id"),
            HeaderValue::from_str(&id).unwrap(),
        ),
        None => request,
    }
}

fn customer() -> Actor {
    Actor::Customer(CustomerId::new())
}

fn professional() -> Actor {
    Actor::Professional(ProfessionalId::new())
}

/// Slot on 2025-01-02 at 10:00 UTC, 34 hours after the test clock starts.
fn new_booking() -> Value {
    json!({
        "service": "Deep cleaning",
        "address": "12 Rue des Lilas",
        "slot": { "date": "2025-01-02", "time": "10:00:00" },
        "price": 5000,
        "payment_method": "cash"
    })
}

impl Harness {
    fn get(&self, path: &str, actor: Actor) -> TestRequest {
        as_actor(self.server.get(path), actor)
    }

    fn post(&self, path: &str, actor: Actor) -> TestRequest {
        as_actor(self.server.post(path), actor)
    }

    async fn create(&self, customer: Actor) -> String {
        let response = self
            .post("/api/v1/bookings", customer)
            .json(&new_booking())
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()["id"].as_str().unwrap().to_string()
    }

    async fn accepted(&self, customer: Actor, pro: Actor) -> String {
        let id = self.create(customer).await;
        self.post(&format!("/api/v1/bookings/{id}/accept"), pro)
            .await
            .assert_status_ok();
        id
    }

    async fn start(&self, id: &str, pro: Actor, otp: &str) -> axum_test::TestResponse {
        self.post(&format!("/api/v1/bookings/{id}/start"), pro)
            .json(&json!({ "otp": otp }))
            .await
    }
}

fn error_code(response: &axum_test::TestResponse) -> String {
    response.json::<Value>()["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_endpoints() {
    let h = harness();

    let live = h.server.get("/health").await;
    live.assert_status_ok();
    assert_eq!(live.text(), "ok");

    let ready = h.server.get("/health/ready").await;
    ready.assert_status_ok();
    let report = ready.json::<Value>();
    assert_eq!(report["status"], "healthy");
    assert_eq!(report["checks"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn booking_goes_from_request_to_rating() {
    let h = harness();
    let (cust, pro) = (customer(), professional());

    let created = h
        .post("/api/v1/bookings", cust)
        .json(&new_booking())
        .await;
    created.assert_status(StatusCode::CREATED);
    let body = created.json::<Value>();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["version"], 1);
    let id = body["id"].as_str().unwrap().to_string();
    let path = format!("/api/v1/bookings/{id}");

    let accepted = h.post(&format!("{path}/accept"), pro).await;
    accepted.assert_status_ok();
    assert_eq!(accepted.json::<Value>()["status"], "accepted");
    assert_eq!(accepted.json::<Value>()["otp"], Value::Null);

    let customer_view = h.get(&path, cust).await.json::<Value>();
    assert_eq!(customer_view["otp"], "4821");
    let pro_view = h.get(&path, pro).await.json::<Value>();
    assert_eq!(pro_view["otp"], Value::Null);

    h.post(&format!("{path}/otp/disclosure"), pro)
        .await
        .assert_status_ok();
    let customer_view = h.get(&path, cust).await.json::<Value>();
    assert!(customer_view["otp_disclosure_requested_at"].is_string());

    let wrong = h.start(&id, pro, "0000").await;
    wrong.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&wrong), "INVALID_OTP");

    let started = h.start(&id, pro, "4821").await;
    started.assert_status_ok();
    assert_eq!(started.json::<Value>()["status"], "ongoing");

    let completed = h.post(&format!("{path}/complete"), pro).await;
    completed.assert_status_ok();
    assert_eq!(completed.json::<Value>()["status"], "completed");

    let rated = h
        .post(&format!("{path}/rate"), cust)
        .json(&json!({ "rating": 5, "review": "Spotless" }))
        .await;
    rated.assert_status_ok();
    assert_eq!(rated.json::<Value>()["review"]["rating"], 5);

    let again = h
        .post(&format!("{path}/rate"), cust)
        .json(&json!({ "rating": 1 }))
        .await;
    again.assert_status(StatusCode::CONFLICT);
    assert_eq!(error_code(&again), "ILLEGAL_TRANSITION");
}

#[tokio::test]
async fn missing_actor_is_unauthorized() {
    let h = harness();
    let response = h.server.post("/api/v1/bookings").json(&new_booking()).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&response), "UNAUTHORIZED");
}

#[tokio::test]
async fn malformed_booking_ids_get_the_json_error_shape() {
    let h = harness();

    let response = h.get("/api/v1/bookings/not-a-uuid", Actor::Admin).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&response), "BAD_REQUEST");
    assert_eq!(
        response.json::<Value>()["message"],
        "booking id must be a UUID"
    );

    let accept = h.post("/api/v1/bookings/42/accept", professional()).await;
    accept.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&accept), "BAD_REQUEST");
}

#[tokio::test]
async fn strangers_see_nothing() {
    let h = harness();
    let id = h.create(customer()).await;

    let response = h.get(&format!("/api/v1/bookings/{id}"), customer()).await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(error_code(&response), "BOOKING_NOT_FOUND");

    let missing = h
        .get(&format!("/api/v1/bookings/{}", uuid::Uuid::new_v4()), Actor::Admin)
        .await;
    missing.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn customers_cannot_accept_and_losers_cannot_claim() {
    let h = harness();
    let cust = customer();
    let id = h.create(cust).await;

    let by_customer = h.post(&format!("/api/v1/bookings/{id}/accept"), cust).await;
    by_customer.assert_status(StatusCode::CONFLICT);
    assert_eq!(error_code(&by_customer), "ILLEGAL_TRANSITION");

    h.post(&format!("/api/v1/bookings/{id}/accept"), professional())
        .await
        .assert_status_ok();
    let second = h
        .post(&format!("/api/v1/bookings/{id}/accept"), professional())
        .await;
    second.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn reschedule_inside_lead_time_is_refused() {
    let h = harness();
    let (cust, pro) = (customer(), professional());
    let id = h.accepted(cust, pro).await;

    h.clock
        .set(Utc.with_ymd_and_hms(2025, 1, 2, 9, 55, 0).unwrap());
    let response = h
        .post(&format!("/api/v1/bookings/{id}/reschedule"), cust)
        .json(&json!({ "slot": { "date": "2025-01-03", "time": "10:00:00" } }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&response), "VALIDATION_ERROR");
}

#[tokio::test]
async fn late_cancellation_carries_a_fee() {
    let h = harness();
    let (cust, pro) = (customer(), professional());
    let id = h.accepted(cust, pro).await;

    h.clock
        .set(Utc.with_ymd_and_hms(2025, 1, 2, 9, 30, 0).unwrap());
    let response = h
        .post(&format!("/api/v1/bookings/{id}/cancel"), cust)
        .json(&json!({ "reason": "change of plans" }))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancellation"]["fee"], 500);
    assert_eq!(body["cancellation"]["reason"], "change of plans");
}

#[tokio::test]
async fn cancel_without_a_body() {
    let h = harness();
    let cust = customer();
    let id = h.create(cust).await;

    let response = h.post(&format!("/api/v1/bookings/{id}/cancel"), cust).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["cancellation"]["fee"], Value::Null);
}

#[tokio::test]
async fn locked_and_expired_codes_have_their_own_statuses() {
    let h = harness();
    let (cust, pro) = (customer(), professional());
    let id = h.accepted(cust, pro).await;

    for _ in 0..5 {
        h.start(&id, pro, "0000")
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let locked = h.start(&id, pro, "4821").await;
    locked.assert_status(StatusCode::LOCKED);
    assert_eq!(error_code(&locked), "OTP_LOCKED");

    let regenerated = h
        .post(&format!("/api/v1/bookings/{id}/otp/regenerate"), cust)
        .await;
    regenerated.assert_status_ok();
    assert_eq!(regenerated.json::<Value>()["otp"], "7310");

    h.clock.advance(Duration::hours(25));
    let expired = h.start(&id, pro, "7310").await;
    expired.assert_status(StatusCode::GONE);
    assert_eq!(error_code(&expired), "OTP_EXPIRED");

    let reissued = h.post(&format!("/api/v1/bookings/{id}/otp"), cust).await;
    reissued.assert_status_ok();
    assert_eq!(reissued.json::<Value>()["otp"], "5096");
}

#[tokio::test]
async fn professionals_cannot_fetch_the_code() {
    let h = harness();
    let (cust, pro) = (customer(), professional());
    let id = h.accepted(cust, pro).await;

    let response = h.post(&format!("/api/v1/bookings/{id}/otp"), pro).await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn listing_is_scoped_and_filtered() {
    let h = harness();
    let (alice, bob) = (customer(), customer());
    h.create(alice).await;
    h.create(bob).await;

    let mine = h.get("/api/v1/bookings", alice).await.json::<Vec<Value>>();
    assert_eq!(mine.len(), 1);

    let all = h.get("/api/v1/bookings", Actor::Admin).await.json::<Vec<Value>>();
    assert_eq!(all.len(), 2);

    let ongoing = h
        .get("/api/v1/bookings", Actor::Admin)
        .add_query_param("status", "in-progress")
        .await
        .json::<Vec<Value>>();
    assert!(ongoing.is_empty());

    let upcoming = h
        .get("/api/v1/bookings", Actor::Admin)
        .add_query_param("category", "upcoming")
        .await
        .json::<Vec<Value>>();
    assert_eq!(upcoming.len(), 2);

    let unknown = h
        .get("/api/v1/bookings", Actor::Admin)
        .add_query_param("status", "archived")
        .await;
    unknown.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn metrics_need_an_installed_recorder() {
    let h = harness();
    h.server
        .get("/metrics")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let h = harness();
    let id = uuid::Uuid::new_v4().to_string();
    let response = h
        .server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-correlation-id"),
            HeaderValue::from_str(&id).unwrap(),
        )
        .await;
    assert_eq!(response.header("x-correlation-id"), id.as_str());
}

#[tokio::test]
async fn websocket_route_needs_an_upgrade_request() {
    let h = harness();
    let id = h.create(customer()).await;

    let response = h
        .get(&format!("/api/v1/bookings/{id}/ws"), customer())
        .await;
    assert!(response.status_code().is_client_error());
}
