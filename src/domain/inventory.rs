//! Stock reservation over a set of locked products.
//!
//! The store loads every product an operation touches (under row locks),
//! hands them to an [`Inventory`], lets the order logic reserve and release
//! stock in memory, then writes back [`Inventory::into_touched`].

use std::collections::{BTreeSet, HashMap};
use serde::Deserialize;
use uuid::Uuid;
use crate::domain::aggregates::{LineItem, Product, ProductError};
use crate::domain::value_objects::{Money, MoneyError};

/// A requested `{product, quantity}` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct OrderLine { pub product_id: Uuid, pub quantity: i32 }

/// Priced snapshot produced by a successful reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation { pub items: Vec<LineItem>, pub total: Money }

pub struct Inventory {
    products: HashMap<Uuid, Product>,
    touched: BTreeSet<Uuid>,
    currency: String,
}

impl Inventory {
    pub fn new(products: impl IntoIterator<Item = Product>, currency: &str) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id(), p)).collect(),
            touched: BTreeSet::new(),
            currency: currency.to_string(),
        }
    }

    /// Ids an operation must lock: the union of both sets, sorted so
    /// concurrent transactions take row locks in the same order.
    pub fn lock_order(lines: &[OrderLine], items: &[LineItem]) -> Vec<Uuid> {
        let ids: BTreeSet<Uuid> = lines.iter().map(|l| l.product_id).chain(items.iter().map(|i| i.product_id)).collect();
        ids.into_iter().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<&Product> { self.products.get(&id) }

    /// Takes stock for every line in order. Either every line is reserved or
    /// the inventory is left exactly as it was.
    pub fn reserve(&mut self, lines: &[OrderLine]) -> Result<Reservation, InventoryError> {
        let snapshot = (self.products.clone(), self.touched.clone());
        match self.try_reserve(lines) {
            Ok(r) => Ok(r),
            Err(e) => {
                (self.products, self.touched) = snapshot;
                Err(e)
            }
        }
    }

    fn try_reserve(&mut self, lines: &[OrderLine]) -> Result<Reservation, InventoryError> {
        let mut items = Vec::with_capacity(lines.len());
        let mut total = Money::zero(&self.currency);
        for line in lines {
            let product = self.products.get_mut(&line.product_id).ok_or(InventoryError::ProductNotFound(line.product_id))?;
            product.take_stock(line.quantity)?;
            self.touched.insert(line.product_id);
            let quantity = u32::try_from(line.quantity).map_err(|_| ProductError::InvalidQuantity)?;
            total = total.add(&Money::new(product.price(), &self.currency).multiply(quantity)?)?;
            items.push(LineItem {
                product_id: product.id(), name: product.name().to_string(),
                image_url: product.image_url().map(str::to_string), quantity: line.quantity, price: product.price(),
            });
        }
        Ok(Reservation { items, total })
    }

    /// Puts the items back. Items whose product no longer exists are skipped.
    pub fn release(&mut self, items: &[LineItem]) {
        for item in items {
            if let Some(product) = self.products.get_mut(&item.product_id) {
                product.return_stock(item.quantity);
                self.touched.insert(item.product_id);
            }
        }
    }

    /// Products whose stock changed, in id order.
    pub fn into_touched(mut self) -> Vec<Product> {
        self.touched.iter().filter_map(|id| self.products.remove(id)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryError { ProductNotFound(Uuid), Product(ProductError), Money(String) }
impl std::error::Error for InventoryError {}
impl std::fmt::Display for InventoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProductNotFound(id) => write!(f, "Product {} not found", id),
            Self::Product(e) => write!(f, "{}", e),
            Self::Money(e) => write!(f, "{}", e),
        }
    }
}
impl From<ProductError> for InventoryError { fn from(e: ProductError) -> Self { Self::Product(e) } }
impl From<MoneyError> for InventoryError { fn from(e: MoneyError) -> Self { Self::Money(e.to_string()) } }
