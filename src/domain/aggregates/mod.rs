//! Aggregates module
pub mod product;
pub mod order;
pub mod user;

pub use product::{NewProduct, Product, ProductError, ProductPatch};
pub use order::{IntentSettlement, LineItem, Order, OrderError, OrderStatus, PaymentMethod, PaymentResult};
pub use user::{User, UserError, UserSummary};
