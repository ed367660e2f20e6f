//! Domain events
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
}

impl DomainEvent {
    /// Subject suffix used when the event leaves the process.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Product(ProductEvent::Created { .. }) => "product.created",
            Self::Product(ProductEvent::StockAdjusted { .. }) => "product.stock_adjusted",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::ItemsReplaced { .. }) => "order.items_replaced",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Order(OrderEvent::Paid { .. }) => "order.paid",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
            Self::Order(OrderEvent::Refunded { .. }) => "order.refunded",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductEvent {
    Created { product_id: Uuid, name: String },
    /// `delta` is negative when stock was reserved, positive when restored.
    StockAdjusted { product_id: Uuid, delta: i32, stock: i32 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, user_id: Uuid, total_price: i64 },
    ItemsReplaced { order_id: Uuid, total_price: i64 },
    StatusChanged { order_id: Uuid, status: String },
    Paid { order_id: Uuid, reference: String },
    Cancelled { order_id: Uuid },
    Refunded { order_id: Uuid, payment_intent_id: String },
}
