//! Stripe integration: REST client for payment intents, cancellations and refunds, plus
//! webhook signature checks and event payloads.

pub mod error;
pub mod stripe;
pub mod webhook;

pub use error::StripeError;
pub use stripe::{refund_key, PaymentIntent, Refund, StripeClient};
pub use webhook::{verify_signature, PaymentIntentObject, StripeEvent};
