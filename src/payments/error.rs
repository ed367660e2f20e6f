use thiserror::Error;

/// Stripe-specific error types.
#[derive(Error, Debug)]
pub enum StripeError {
    /// Error occurred during a Stripe API request
    #[error("Stripe API request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Error returned by the Stripe API
    #[error("Stripe API returned an error: {message} (Status: {status_code})")]
    Api { status_code: u16, message: String },

    /// Error parsing a Stripe API response or webhook body
    #[error("Failed to parse Stripe payload: {0}")]
    Parse(#[from] serde_json::Error),

    /// Webhook signing secret is not configured
    #[error("Stripe webhook secret is not configured")]
    MissingWebhookSecret,

    /// Webhook signature verification failed
    #[error("Stripe webhook signature verification failed: {0}")]
    Signature(String),
}
