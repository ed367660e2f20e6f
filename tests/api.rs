use axum::{body::Body, http::{Request, StatusCode}, Router};
use backoffice_ecommerce::api::{router, AppState};
use backoffice_ecommerce::bus::EventBus;
use backoffice_ecommerce::config::StripeConfig;
use backoffice_ecommerce::auth::TokenKeys;
use backoffice_ecommerce::domain::aggregates::{NewProduct, PaymentMethod, Product, User};
use backoffice_ecommerce::domain::inventory::OrderLine;
use backoffice_ecommerce::domain::value_objects::Email;
use backoffice_ecommerce::AppConfig;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(stripe: Option<StripeConfig>) -> AppConfig {
    AppConfig {
        database_url: "postgres://localhost/unused".into(),
        max_connections: 1,
        port: 0,
        jwt_secret: "test-secret".into(),
        jwt_ttl_hours: 1,
        nats_url: None,
        stripe,
    }
}

// Every request here is rejected before a query runs, so the pool never connects.
fn app(stripe: Option<StripeConfig>) -> Router {
    let config = config(stripe);
    let db = PgPoolOptions::new().connect_lazy(&config.database_url).unwrap();
    router(AppState::new(&config, db, EventBus::disabled()))
}

fn stripe(webhook_secret: Option<&str>) -> StripeConfig {
    StripeConfig {
        secret_key: "sk_test_123".into(),
        webhook_secret: webhook_secret.map(str::to_string),
        api_base: "http://127.0.0.1:9".into(),
        currency: "usd".into(),
        webhook_tolerance_secs: 300,
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn json_post(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri).header("content-type", "application/json").body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_profile_requires_token() {
    let (status, body) = send(app(None), Request::get("/api/auth/profile").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "No token provided");
}

#[tokio::test]
async fn test_garbage_token_rejected() {
    let request = Request::get("/api/orders/myorders").header("authorization", "Bearer not.a.jwt").body(Body::empty()).unwrap();
    let (status, body) = send(app(None), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Not authorized");
}

#[tokio::test]
async fn test_register_validates_before_storage() {
    let (status, body) = send(app(None), json_post("/api/auth/register", r#"{"name":"Jane","email":"jane@example.com","password":"123"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Password must be at least 6 characters");

    let (status, body) = send(app(None), json_post("/api/auth/register", r#"{"name":"Jane","email":"not-an-email","password":"123456"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Please provide a valid email");
}

#[tokio::test]
async fn test_payments_disabled_without_stripe() {
    let request = Request::post("/api/payments/stripe/webhook").body(Body::from("{}")).unwrap();
    let (status, body) = send(app(None), request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], "Payments are not configured");
}

#[tokio::test]
async fn test_webhook_without_secret_is_unavailable() {
    let request = Request::post("/api/payments/stripe/webhook").body(Body::from("{}")).unwrap();
    let (status, _) = send(app(Some(stripe(None))), request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let app = app(Some(stripe(Some("whsec_test"))));
    let request = Request::post("/api/payments/stripe/webhook")
        .header("stripe-signature", "t=1700000000,v1=deadbeef")
        .body(Body::from(r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{}}}"#))
        .unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let unsigned = Request::post("/api/payments/stripe/webhook").body(Body::from("{}")).unwrap();
    let (status, _) = send(app, unsigned).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_staff_routes_require_token() {
    for (method, uri) in [("GET", "/api/orders"), ("GET", "/api/users"), ("POST", "/api/products"), ("PUT", "/api/payments/refund/0190f7c4-0000-7000-8000-000000000000")] {
        let request = Request::builder().method(method).uri(uri).header("content-type", "application/json").body(Body::from("{}")).unwrap();
        let (status, _) = send(app(None), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
    }
}

#[tokio::test]
async fn test_bad_path_id_uses_error_body() {
    let (status, body) = send(app(None), Request::get("/api/products/not-a-uuid").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn test_malformed_json_uses_error_body() {
    let (status, body) = send(app(None), json_post("/api/auth/login", r#"{"email": "#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let untyped = Request::post("/api/auth/register").body(Body::from("{}")).unwrap();
    let (status, body) = send(app(None), untyped).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_refund_route_only_refunds_the_paying_intent(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(header("Idempotency-Key", "refund-pi_card"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "re_1", "amount": 1000, "status": "succeeded", "payment_intent": "pi_card"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let mut settings = stripe(None);
    settings.api_base = server.uri();
    let config = config(Some(settings));
    let state = AppState::new(&config, pool, EventBus::disabled());
    let store = state.store.clone();

    let user = User::register("Jane", Email::new("jane@example.com").unwrap(), "hash".into()).unwrap();
    store.insert_user(&user).await.unwrap();
    let mut product = Product::create(NewProduct { name: "A".into(), price: 500, stock: 5, description: None, image_url: None }).unwrap();
    store.insert_product(&mut product).await.unwrap();
    let token = TokenKeys::new(&config.jwt_secret, config.jwt_ttl_hours).issue(user.id()).unwrap();
    let lines = [OrderLine { product_id: product.id(), quantity: 2 }];

    let (card, _) = store.place_order(user.id(), &lines).await.unwrap();
    store.update_order(card.id(), |o| {
        o.attach_payment_intent("pi_card")?;
        Ok(o.confirm_payment("pi_card", None)?)
    }).await.unwrap();
    let (cash, _) = store.place_order(user.id(), &lines).await.unwrap();
    store.update_order(cash.id(), |o| {
        o.attach_payment_intent("pi_abandoned")?;
        Ok(o.pay_mock(PaymentMethod::Cash, "jane@example.com")?)
    }).await.unwrap();

    let refund = |id: uuid::Uuid| Request::put(format!("/api/payments/refund/{id}"))
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router(state.clone()), refund(cash.id())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "PaymentIntent not found");

    let (status, body) = send(router(state), refund(card.id())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Order refunded and cancelled");
    assert_eq!(body["order"]["refunded"], true);
    assert_eq!(store.find_product(product.id()).await.unwrap().unwrap().stock(), 3);
}

fn signed_webhook(secret: &str, payload: &str) -> Request<Body> {
    use hmac::{Hmac, Mac};
    let t = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{t}.{payload}").as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Request::post("/api/payments/stripe/webhook")
        .header("stripe-signature", format!("t={t},v1={signature}"))
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
async fn test_payment_after_cancel_is_refunded(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents/pi_late/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "pi_late", "client_secret": null, "amount": 1000, "currency": "usd", "status": "canceled"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(header("Idempotency-Key", "refund-pi_late"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "re_late", "amount": 1000, "status": "succeeded", "payment_intent": "pi_late"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let mut settings = stripe(Some("whsec_test"));
    settings.api_base = server.uri();
    let config = config(Some(settings));
    let state = AppState::new(&config, pool, EventBus::disabled());
    let store = state.store.clone();

    let user = User::register("Jane", Email::new("jane@example.com").unwrap(), "hash".into()).unwrap();
    store.insert_user(&user).await.unwrap();
    let mut product = Product::create(NewProduct { name: "A".into(), price: 500, stock: 5, description: None, image_url: None }).unwrap();
    store.insert_product(&mut product).await.unwrap();
    let token = TokenKeys::new(&config.jwt_secret, config.jwt_ttl_hours).issue(user.id()).unwrap();
    let (order, _) = store.place_order(user.id(), &[OrderLine { product_id: product.id(), quantity: 2 }]).await.unwrap();
    store.update_order(order.id(), |o| Ok(o.attach_payment_intent("pi_late")?)).await.unwrap();

    let cancel = Request::put(format!("/api/orders/{}/cancel", order.id()))
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router(state.clone()), cancel).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["order"]["refunded"], false);

    let payload = serde_json::json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": "pi_late", "amount": 1000, "currency": "usd",
            "metadata": { "orderId": order.id().to_string() }
        } }
    }).to_string();
    let (status, _) = send(router(state), signed_webhook("whsec_test", &payload)).await;
    assert_eq!(status, StatusCode::OK);

    let stored = store.find_order(order.id()).await.unwrap().unwrap();
    assert!(stored.is_cancelled() && !stored.is_paid() && stored.is_refunded());
}
