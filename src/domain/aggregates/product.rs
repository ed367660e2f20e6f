//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use crate::domain::events::{DomainEvent, ProductEvent};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Product {
    id: Uuid,
    name: String,
    description: String,
    /// Unit price in cents.
    price: i64,
    stock: i32,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug)]
pub struct NewProduct { pub name: String, pub price: i64, pub stock: i32, pub description: Option<String>, pub image_url: Option<String> }

/// Fields left as `None` keep their current value.
#[derive(Clone, Debug, Default)]
pub struct ProductPatch { pub name: Option<String>, pub price: Option<i64>, pub stock: Option<i32>, pub description: Option<String>, pub image_url: Option<String> }

impl Product {
    pub fn create(new: NewProduct) -> Result<Self, ProductError> {
        let name = new.name.trim().to_string();
        if name.is_empty() { return Err(ProductError::MissingName); }
        if new.price < 0 { return Err(ProductError::NegativePrice); }
        if new.stock < 0 { return Err(ProductError::NegativeStock); }
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut product = Self {
            id, name: name.clone(), description: new.description.unwrap_or_default(), price: new.price,
            stock: new.stock, image_url: new.image_url, created_at: now, updated_at: now, events: vec![],
        };
        product.raise_event(DomainEvent::Product(ProductEvent::Created { product_id: id, name }));
        Ok(product)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn description(&self) -> &str { &self.description }
    pub fn price(&self) -> i64 { self.price }
    pub fn stock(&self) -> i32 { self.stock }
    pub fn image_url(&self) -> Option<&str> { self.image_url.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_in_stock(&self) -> bool { self.stock > 0 }

    pub fn apply(&mut self, patch: ProductPatch) -> Result<(), ProductError> {
        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() { return Err(ProductError::MissingName); }
            self.name = name;
        }
        if let Some(price) = patch.price {
            if price < 0 { return Err(ProductError::NegativePrice); }
            self.price = price;
        }
        if let Some(stock) = patch.stock {
            if stock < 0 { return Err(ProductError::NegativeStock); }
            self.stock = stock;
        }
        if let Some(description) = patch.description { self.description = description; }
        if let Some(url) = patch.image_url { self.image_url = Some(url); }
        self.touch();
        Ok(())
    }

    pub fn take_stock(&mut self, qty: i32) -> Result<(), ProductError> {
        if qty < 1 { return Err(ProductError::InvalidQuantity); }
        if qty > self.stock {
            return Err(ProductError::InsufficientStock { name: self.name.clone(), available: self.stock });
        }
        self.stock -= qty;
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::StockAdjusted { product_id: self.id, delta: -qty, stock: self.stock }));
        Ok(())
    }

    pub fn return_stock(&mut self, qty: i32) {
        self.stock = self.stock.saturating_add(qty.max(0));
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::StockAdjusted { product_id: self.id, delta: qty, stock: self.stock }));
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductError { MissingName, NegativePrice, NegativeStock, InvalidQuantity, InsufficientStock { name: String, available: i32 } }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingName => write!(f, "Product name is required"),
            Self::NegativePrice => write!(f, "Price cannot be negative"),
            Self::NegativeStock => write!(f, "Stock cannot be negative"),
            Self::InvalidQuantity => write!(f, "Quantity must be at least 1"),
            Self::InsufficientStock { name, available } => write!(f, "Not enough stock for product {}. Available: {}", name, available),
        }
    }
}
