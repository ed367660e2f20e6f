//! Back-office API for a small store
//!
//! ## Features
//! - Registration, login and bearer-token sessions
//! - Product catalog management
//! - Order placement with transactional stock decrement and restore
//! - Stripe payment intents, signed webhooks and refunds
//! - User administration

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use thiserror::Error;

pub mod api;
pub mod auth;
pub mod bus;
pub mod config;
pub mod domain;
pub mod payments;
pub mod store;

pub use config::AppConfig;

use domain::aggregates::{OrderError, ProductError, UserError};
use domain::inventory::InventoryError;
use payments::StripeError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InsufficientStock(String),

    /// The entity exists but is in a state that forbids the operation.
    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Payment provider error: {0}")]
    Payment(#[from] StripeError),

    #[error("Payments are not configured")]
    PaymentsDisabled,

    #[error("Storage error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ShopError>;

impl ShopError {
    pub fn not_found(what: &str) -> Self { Self::NotFound(format!("{what} not found")) }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::InsufficientStock(_) | Self::InvalidState(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Payment(StripeError::Signature(_)) => StatusCode::BAD_REQUEST,
            Self::Payment(StripeError::MissingWebhookSecret) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Payment(_) => StatusCode::BAD_GATEWAY,
            Self::PaymentsDisabled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ShopError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Storage details stay in the log.
        let message = match &self {
            Self::Database(e) => { tracing::error!(error = %e, "database error"); "Internal server error".to_string() }
            Self::Internal(e) => { tracing::error!(error = %e, "internal error"); "Internal server error".to_string() }
            Self::Payment(e) => { tracing::warn!(error = %e, "payment provider error"); self.to_string() }
            _ => self.to_string(),
        };
        (status, Json(serde_json::json!({ "success": false, "message": message }))).into_response()
    }
}

impl From<ProductError> for ShopError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::InsufficientStock { .. } => Self::InsufficientStock(e.to_string()),
            _ => Self::Validation(e.to_string()),
        }
    }
}

impl From<InventoryError> for ShopError {
    fn from(e: InventoryError) -> Self {
        match e {
            // Unknown products in an order body are a bad request, not a missing route target.
            InventoryError::ProductNotFound(_) => Self::Validation(e.to_string()),
            InventoryError::Product(p) => p.into(),
            InventoryError::Money(_) => Self::Validation(e.to_string()),
        }
    }
}

impl From<OrderError> for ShopError {
    fn from(e: OrderError) -> Self { Self::InvalidState(e.to_string()) }
}

impl From<UserError> for ShopError {
    fn from(e: UserError) -> Self { Self::Validation(e.to_string()) }
}

impl From<validator::ValidationErrors> for ShopError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(first_validation_message(&errors).unwrap_or_else(|| "Invalid request".to_string()))
    }
}

/// Walks nested struct and list errors down to the first field message.
fn first_validation_message(errors: &validator::ValidationErrors) -> Option<String> {
    use validator::ValidationErrorsKind;
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by_key(|(name, _)| *name);
    fields.into_iter().find_map(|(field, kind)| match kind {
        ValidationErrorsKind::Field(errs) => errs.first().map(|e| {
            e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| format!("Invalid {field}"))
        }),
        ValidationErrorsKind::Struct(inner) => first_validation_message(inner),
        ValidationErrorsKind::List(items) => items.values().find_map(|inner| first_validation_message(inner)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ShopError::not_found("Order").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ShopError::PaymentsDisabled.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ShopError::Payment(StripeError::Signature("bad".into())).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ShopError::Payment(StripeError::Api { status_code: 402, message: "declined".into() }).status_code(), StatusCode::BAD_GATEWAY);
        let stock: ShopError = ProductError::InsufficientStock { name: "A".into(), available: 0 }.into();
        assert_eq!(stock.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(stock.to_string(), "Not enough stock for product A. Available: 0");
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ShopError::Forbidden("Not authorized".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "success": false, "message": "Not authorized" }));
    }

    #[tokio::test]
    async fn test_database_error_is_masked() {
        let response = ShopError::Database(sqlx::Error::RowNotFound).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("Internal server error"));
    }
}
