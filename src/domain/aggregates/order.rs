//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::inventory::Reservation;
use crate::domain::value_objects::{Role, UnknownVariant};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Order {
    id: Uuid,
    user_id: Uuid,
    #[sqlx(skip)]
    items: Vec<LineItem>,
    /// Cents.
    total_price: i64,
    #[sqlx(try_from = "String")]
    payment_method: PaymentMethod,
    is_paid: bool,
    paid_at: Option<DateTime<Utc>>,
    refunded: bool,
    refunded_at: Option<DateTime<Utc>>,
    payment_intent_id: Option<String>,
    payment_result: Option<Json<PaymentResult>>,
    #[sqlx(try_from = "String")]
    status: OrderStatus,
    is_cancelled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Snapshot of a product at the time it was ordered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LineItem { pub product_id: Uuid, pub name: String, pub image_url: Option<String>, pub quantity: i32, pub price: i64 }

impl LineItem {
    pub fn total(&self) -> i64 { self.price * i64::from(self.quantity) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult { pub id: String, pub status: String, pub update_time: String, pub email: Option<String> }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Paid, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod { #[default] Cash, Card }

/// What a cancellation owes the payment provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntentSettlement {
    /// The intent paid the order and must be refunded.
    Refund(String),
    /// The intent never paid this order and must not charge it later.
    Void(String),
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [Self::Pending, Self::Paid, Self::Shipped, Self::Delivered, Self::Cancelled];
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Paid => "paid", Self::Shipped => "shipped",
            Self::Delivered => "delivered", Self::Cancelled => "cancelled",
        }
    }
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str { match self { Self::Cash => "cash", Self::Card => "card" } }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|v| v.as_str() == s).ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = UnknownVariant;
    fn try_from(value: String) -> Result<Self, Self::Error> { value.parse() }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s { "cash" => Ok(Self::Cash), "card" => Ok(Self::Card), other => Err(UnknownVariant(other.to_string())) }
    }
}

impl TryFrom<String> for PaymentMethod {
    type Error = UnknownVariant;
    fn try_from(value: String) -> Result<Self, Self::Error> { value.parse() }
}

impl Order {
    pub fn place(user_id: Uuid, reservation: Reservation) -> Result<Self, OrderError> {
        if reservation.items.is_empty() { return Err(OrderError::NoItems); }
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut order = Self {
            id, user_id, items: reservation.items, total_price: reservation.total.amount(),
            payment_method: PaymentMethod::Cash, is_paid: false, paid_at: None, refunded: false, refunded_at: None,
            payment_intent_id: None, payment_result: None, status: OrderStatus::Pending, is_cancelled: false,
            created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed { order_id: id, user_id, total_price: order.total_price }));
        Ok(order)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn total_price(&self) -> i64 { self.total_price }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn is_paid(&self) -> bool { self.is_paid }
    pub fn paid_at(&self) -> Option<DateTime<Utc>> { self.paid_at }
    pub fn is_refunded(&self) -> bool { self.refunded }
    pub fn refunded_at(&self) -> Option<DateTime<Utc>> { self.refunded_at }
    pub fn is_cancelled(&self) -> bool { self.is_cancelled }
    pub fn payment_intent_id(&self) -> Option<&str> { self.payment_intent_id.as_deref() }
    pub fn payment_result(&self) -> Option<&PaymentResult> { self.payment_result.as_ref().map(|j| &j.0) }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_owned_by(&self, user_id: Uuid) -> bool { self.user_id == user_id }
    pub fn can_be_viewed_by(&self, user_id: Uuid, role: Role) -> bool { self.is_owned_by(user_id) || role.is_staff() }

    pub(crate) fn attach_items(&mut self, items: Vec<LineItem>) { self.items = items; }

    /// Whether the line items may still change.
    pub fn check_editable(&self) -> Result<(), OrderError> {
        self.ensure_open()?;
        if self.is_paid { Err(OrderError::AlreadyPaid) } else { Ok(()) }
    }

    pub fn replace_items(&mut self, reservation: Reservation) -> Result<(), OrderError> {
        self.check_editable()?;
        if reservation.items.is_empty() { return Err(OrderError::NoItems); }
        self.items = reservation.items;
        self.total_price = reservation.total.amount();
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::ItemsReplaced { order_id: self.id, total_price: self.total_price }));
        Ok(())
    }

    /// Staff status change. Cancellation has its own path because it restocks.
    pub fn set_status(&mut self, status: OrderStatus) -> Result<(), OrderError> {
        self.ensure_open()?;
        if status == OrderStatus::Cancelled { return Err(OrderError::UseCancel); }
        self.status = status;
        if status == OrderStatus::Paid && !self.is_paid {
            self.is_paid = true;
            self.paid_at = Some(Utc::now());
        }
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id, status: status.to_string() }));
        Ok(())
    }

    /// Offline payment recorded without a provider round-trip.
    pub fn pay_mock(&mut self, method: PaymentMethod, email: &str) -> Result<(), OrderError> {
        self.check_payable()?;
        let now = Utc::now();
        let reference = format!("MOCK-{}", now.timestamp_millis());
        self.payment_method = method;
        self.is_paid = true;
        self.paid_at = Some(now);
        self.status = OrderStatus::Paid;
        self.payment_result = Some(Json(PaymentResult {
            id: reference.clone(), status: "success".into(), update_time: now.to_rfc3339(), email: Some(email.to_string()),
        }));
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Paid { order_id: self.id, reference }));
        Ok(())
    }

    /// Whether a new payment may be started.
    pub fn check_payable(&self) -> Result<(), OrderError> {
        if self.is_cancelled { return Err(OrderError::Cancelled); }
        if self.is_paid { Err(OrderError::AlreadyPaid) } else { Ok(()) }
    }

    /// Records the intent a card payment will go through. A no-op when that
    /// same intent has already been confirmed.
    pub fn attach_payment_intent(&mut self, intent_id: impl Into<String>) -> Result<(), OrderError> {
        let intent_id = intent_id.into();
        if self.paid_intent() == Some(intent_id.as_str()) { return Ok(()); }
        self.check_payable()?;
        self.payment_intent_id = Some(intent_id);
        self.payment_method = PaymentMethod::Card;
        self.touch();
        Ok(())
    }

    /// Applies a provider confirmation. Returns `false` when the order was already paid.
    pub fn confirm_payment(&mut self, intent_id: &str, email: Option<String>) -> Result<bool, OrderError> {
        if self.is_paid { return Ok(false); }
        if self.is_cancelled { return Err(OrderError::Cancelled); }
        let now = Utc::now();
        self.payment_method = PaymentMethod::Card;
        self.payment_intent_id = Some(intent_id.to_string());
        self.is_paid = true;
        self.paid_at = Some(now);
        self.status = OrderStatus::Paid;
        self.payment_result = Some(Json(PaymentResult {
            id: intent_id.to_string(), status: "succeeded".into(), update_time: now.to_rfc3339(), email,
        }));
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Paid { order_id: self.id, reference: intent_id.to_string() }));
        Ok(true)
    }

    /// The attached intent, when it is the one that paid the order.
    pub fn paid_intent(&self) -> Option<&str> {
        let intent = self.payment_intent_id.as_deref()?;
        let confirmed = self.is_paid && self.payment_result().is_some_and(|r| r.id == intent);
        confirmed.then_some(intent)
    }

    /// Marks the order cancelled and says what must happen to its payment
    /// intent. Stock is restored by the caller, which holds the product locks.
    pub fn cancel(&mut self) -> Result<Option<IntentSettlement>, OrderError> {
        if self.is_cancelled || self.status == OrderStatus::Cancelled { return Err(OrderError::AlreadyCancelled); }
        if self.status == OrderStatus::Delivered { return Err(OrderError::CannotCancelDelivered); }
        let settlement = match (self.paid_intent(), self.payment_intent_id.as_deref()) {
            (Some(paid), _) => Some(IntentSettlement::Refund(paid.to_string())),
            (None, Some(open)) => Some(IntentSettlement::Void(open.to_string())),
            (None, None) => None,
        };
        let now = Utc::now();
        if self.is_paid {
            self.refunded = true;
            self.refunded_at = Some(now);
        }
        self.status = OrderStatus::Cancelled;
        self.is_cancelled = true;
        self.is_paid = false;
        self.paid_at = None;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id }));
        if let Some(IntentSettlement::Refund(intent)) = &settlement {
            self.raise_event(DomainEvent::Order(OrderEvent::Refunded { order_id: self.id, payment_intent_id: intent.clone() }));
        }
        Ok(settlement)
    }

    /// Records a refund for a card payment that landed after cancellation.
    /// Returns `false` when the order already carries a refund.
    pub fn record_late_refund(&mut self, intent_id: &str) -> Result<bool, OrderError> {
        if !self.is_cancelled { return Err(OrderError::NotCancelled); }
        if self.refunded { return Ok(false); }
        self.refunded = true;
        self.refunded_at = Some(Utc::now());
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Refunded { order_id: self.id, payment_intent_id: intent_id.to_string() }));
        Ok(true)
    }

    /// Whether deleting this order must put its items back on the shelf.
    pub fn holds_stock(&self) -> bool { !self.is_cancelled }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn ensure_open(&self) -> Result<(), OrderError> {
        if self.is_cancelled { Err(OrderError::Cancelled) } else { Ok(()) }
    }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError { NoItems, AlreadyPaid, NotPaid, Cancelled, NotCancelled, AlreadyCancelled, CannotCancelDelivered, UseCancel }
impl std::error::Error for OrderError {}
impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoItems => write!(f, "No products provided"),
            Self::AlreadyPaid => write!(f, "Order already paid"),
            Self::NotPaid => write!(f, "Order not paid yet"),
            Self::Cancelled => write!(f, "Order is cancelled"),
            Self::NotCancelled => write!(f, "Order is not cancelled"),
            Self::AlreadyCancelled => write!(f, "Order already cancelled"),
            Self::CannotCancelDelivered => write!(f, "Cannot cancel a delivered order"),
            Self::UseCancel => write!(f, "Use the cancel endpoint to cancel an order"),
        }
    }
}
