//! HTTP routes and shared handler state.

use axum::{routing::{get, post, put}, Router};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::auth::TokenKeys;
use crate::bus::EventBus;
use crate::payments::StripeClient;
use crate::store::Store;
use crate::{AppConfig, Result, ShopError};

mod auth;
mod extract;
mod orders;
mod payments;
mod products;
mod users;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub tokens: TokenKeys,
    /// `None` when no Stripe key is configured.
    pub stripe: Option<StripeClient>,
    pub bus: EventBus,
}

impl AppState {
    pub fn new(config: &AppConfig, db: PgPool, bus: EventBus) -> Self {
        Self {
            store: Store::new(db, config.currency()),
            tokens: TokenKeys::new(&config.jwt_secret, config.jwt_ttl_hours),
            stripe: config.stripe.as_ref().map(StripeClient::new),
            bus,
        }
    }

    pub fn stripe(&self) -> Result<&StripeClient> { self.stripe.as_ref().ok_or(ShopError::PaymentsDisabled) }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/profile", get(auth::profile))
        .route("/api/products", get(products::list_products).post(products::create_product))
        .route("/api/products/:id", get(products::get_product).put(products::update_product).delete(products::delete_product))
        .route("/api/orders", get(orders::list_orders).post(orders::create_order))
        .route("/api/orders/myorders", get(orders::my_orders))
        .route("/api/orders/:id", get(orders::get_order).delete(orders::delete_order))
        .route("/api/orders/:id/status", put(orders::update_status))
        .route("/api/orders/:id/products", put(orders::update_products))
        .route("/api/orders/:id/pay", post(orders::pay_order))
        .route("/api/orders/:id/cancel", put(orders::cancel_order))
        .route("/api/payments/stripe/create-intent", post(payments::create_intent))
        .route("/api/payments/stripe/webhook", post(payments::webhook))
        .route("/api/payments/refund/:order_id", put(payments::refund_order))
        .route("/api/users", get(users::list_users))
        .route("/api/users/stats", get(users::user_stats))
        .route("/api/users/:id", get(users::get_user).delete(users::delete_user))
        .route("/api/users/:id/role", put(users::update_role))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
