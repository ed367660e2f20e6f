use std::collections::HashMap;
use std::future::Future;

use sqlx::types::Json;
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{IntentSettlement, LineItem, Order, OrderStatus};
use crate::domain::events::DomainEvent;
use crate::domain::inventory::{Inventory, OrderLine};
use crate::{Result, ShopError};
use super::products::{lock_products, write_stock};
use super::{Page, Paged, Store};

/// Staff order search. Unset fields do not filter.
#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub user_id: Option<Uuid>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    order_id: Uuid,
    #[sqlx(flatten)]
    item: LineItem,
}

const ORDER_FILTER: &str = "($1::text IS NULL OR status = $1) AND ($2::uuid IS NULL OR user_id = $2) \
    AND ($3::bigint IS NULL OR total_price >= $3) AND ($4::bigint IS NULL OR total_price <= $4)";

impl Store {
    /// Reserves stock for every line and records the order, or changes nothing.
    pub async fn place_order(&self, user_id: Uuid, lines: &[OrderLine]) -> Result<(Order, Vec<DomainEvent>)> {
        let mut tx = self.db.begin().await?;
        let products = lock_products(&mut tx, &Inventory::lock_order(lines, &[])).await?;
        let mut inventory = Inventory::new(products, &self.currency);
        let reservation = inventory.reserve(lines)?;
        let mut order = Order::place(user_id, reservation)?;

        insert_header(&mut tx, &order).await?;
        write_items(&mut tx, &order).await?;
        let mut events = write_stock(&mut tx, inventory.into_touched()).await?;
        tx.commit().await?;

        events.extend(order.take_events());
        info!(order_id = %order.id(), user_id = %user_id, total_price = order.total_price(), "order placed");
        Ok((order, events))
    }

    /// Returns the old items to stock and reserves the new ones.
    pub async fn replace_order_items(&self, order_id: Uuid, lines: &[OrderLine]) -> Result<(Order, Vec<DomainEvent>)> {
        let mut tx = self.db.begin().await?;
        let mut order = lock_order(&mut tx, order_id).await?;
        order.check_editable()?;

        let products = lock_products(&mut tx, &Inventory::lock_order(lines, order.items())).await?;
        let mut inventory = Inventory::new(products, &self.currency);
        inventory.release(order.items());
        let reservation = inventory.reserve(lines)?;
        order.replace_items(reservation)?;

        update_header(&mut tx, &order).await?;
        write_items(&mut tx, &order).await?;
        let mut events = write_stock(&mut tx, inventory.into_touched()).await?;
        tx.commit().await?;

        events.extend(order.take_events());
        info!(order_id = %order_id, total_price = order.total_price(), "order items replaced");
        Ok((order, events))
    }

    /// Cancels and restocks. `authorize` sees the locked order first. When the
    /// order has a payment intent, `settle` runs last, inside the transaction,
    /// to refund or void it; its failure rolls the cancellation back.
    pub async fn cancel_order<A, F, Fut>(&self, order_id: Uuid, authorize: A, settle: F) -> Result<(Order, Vec<DomainEvent>)>
    where
        A: FnOnce(&Order) -> Result<()>,
        F: FnOnce(Uuid, IntentSettlement) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut tx = self.db.begin().await?;
        let mut order = lock_order(&mut tx, order_id).await?;
        authorize(&order)?;
        let settlement = order.cancel()?;

        let products = lock_products(&mut tx, &Inventory::lock_order(&[], order.items())).await?;
        let mut inventory = Inventory::new(products, &self.currency);
        inventory.release(order.items());
        update_header(&mut tx, &order).await?;
        let mut events = write_stock(&mut tx, inventory.into_touched()).await?;

        if let Some(settlement) = settlement {
            settle(order_id, settlement).await?;
        }
        tx.commit().await?;

        events.extend(order.take_events());
        info!(order_id = %order_id, refunded = order.is_refunded(), "order cancelled");
        Ok((order, events))
    }

    /// Removes the order, restocking its items unless a cancel already did.
    pub async fn delete_order(&self, order_id: Uuid) -> Result<Vec<DomainEvent>> {
        let mut tx = self.db.begin().await?;
        let order = lock_order(&mut tx, order_id).await?;
        let mut events = Vec::new();
        if order.holds_stock() {
            let products = lock_products(&mut tx, &Inventory::lock_order(&[], order.items())).await?;
            let mut inventory = Inventory::new(products, &self.currency);
            inventory.release(order.items());
            events = write_stock(&mut tx, inventory.into_touched()).await?;
        }
        sqlx::query("DELETE FROM orders WHERE id = $1").bind(order_id).execute(&mut *tx).await?;
        tx.commit().await?;
        info!(order_id = %order_id, restocked = order.holds_stock(), "order deleted");
        Ok(events)
    }

    /// Runs `change` on the locked order and saves the header. Items and
    /// stock are left alone.
    pub async fn update_order<T>(&self, order_id: Uuid, change: impl FnOnce(&mut Order) -> Result<T>) -> Result<(Order, T, Vec<DomainEvent>)> {
        let mut tx = self.db.begin().await?;
        let mut order = lock_order(&mut tx, order_id).await?;
        let out = change(&mut order)?;
        update_header(&mut tx, &order).await?;
        tx.commit().await?;
        let events = order.take_events();
        Ok((order, out, events))
    }

    pub async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        let Some(mut order) = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&self.db).await? else { return Ok(None) };
        let mut conn = self.db.acquire().await?;
        order.attach_items(load_items(&mut conn, id).await?);
        Ok(Some(order))
    }

    pub async fn find_order_id_by_intent(&self, payment_intent_id: &str) -> Result<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE payment_intent_id = $1 ORDER BY created_at DESC LIMIT 1")
            .bind(payment_intent_id).fetch_optional(&self.db).await?;
        Ok(row.map(|r| r.0))
    }

    /// Newest first.
    pub async fn list_orders_for_user(&self, user_id: Uuid, limit: Option<i64>) -> Result<Vec<Order>> {
        let mut orders = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2")
            .bind(user_id).bind(limit).fetch_all(&self.db).await?;
        self.attach_items(&mut orders).await?;
        Ok(orders)
    }

    pub async fn list_orders(&self, filter: &OrderFilter, page: Page) -> Result<Paged<Order>> {
        let status = filter.status.map(|s| s.as_str());
        let mut items = sqlx::query_as::<_, Order>(&format!("SELECT * FROM orders WHERE {ORDER_FILTER} ORDER BY created_at DESC LIMIT $5 OFFSET $6"))
            .bind(status).bind(filter.user_id).bind(filter.min_price).bind(filter.max_price)
            .bind(page.limit).bind(page.offset())
            .fetch_all(&self.db).await?;
        let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM orders WHERE {ORDER_FILTER}"))
            .bind(status).bind(filter.user_id).bind(filter.min_price).bind(filter.max_price)
            .fetch_one(&self.db).await?;
        self.attach_items(&mut items).await?;
        Ok(Paged { items, total: total.0 })
    }

    async fn attach_items(&self, orders: &mut [Order]) -> Result<()> {
        if orders.is_empty() { return Ok(()); }
        let ids: Vec<Uuid> = orders.iter().map(Order::id).collect();
        let rows = sqlx::query_as::<_, ItemRow>("SELECT order_id, product_id, name, image_url, quantity, price FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position")
            .bind(&ids).fetch_all(&self.db).await?;
        let mut by_order: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
        for row in rows {
            by_order.entry(row.order_id).or_default().push(row.item);
        }
        for order in orders.iter_mut() {
            order.attach_items(by_order.remove(&order.id()).unwrap_or_default());
        }
        Ok(())
    }
}

async fn lock_order(conn: &mut PgConnection, id: Uuid) -> Result<Order> {
    let mut order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(id).fetch_optional(&mut *conn).await?
        .ok_or_else(|| ShopError::not_found("Order"))?;
    order.attach_items(load_items(conn, id).await?);
    Ok(order)
}

async fn load_items(conn: &mut PgConnection, order_id: Uuid) -> Result<Vec<LineItem>> {
    Ok(sqlx::query_as::<_, LineItem>("SELECT product_id, name, image_url, quantity, price FROM order_items WHERE order_id = $1 ORDER BY position")
        .bind(order_id).fetch_all(&mut *conn).await?)
}

async fn insert_header(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query("INSERT INTO orders (id, user_id, total_price, payment_method, is_paid, paid_at, refunded, refunded_at, payment_intent_id, payment_result, status, is_cancelled, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)")
        .bind(order.id()).bind(order.user_id()).bind(order.total_price()).bind(order.payment_method().as_str())
        .bind(order.is_paid()).bind(order.paid_at()).bind(order.is_refunded()).bind(order.refunded_at())
        .bind(order.payment_intent_id()).bind(order.payment_result().map(Json))
        .bind(order.status().as_str()).bind(order.is_cancelled()).bind(order.created_at()).bind(order.updated_at())
        .execute(&mut *conn).await?;
    Ok(())
}

async fn update_header(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query("UPDATE orders SET total_price = $2, payment_method = $3, is_paid = $4, paid_at = $5, refunded = $6, refunded_at = $7, \
                 payment_intent_id = $8, payment_result = $9, status = $10, is_cancelled = $11, updated_at = $12 WHERE id = $1")
        .bind(order.id()).bind(order.total_price()).bind(order.payment_method().as_str())
        .bind(order.is_paid()).bind(order.paid_at()).bind(order.is_refunded()).bind(order.refunded_at())
        .bind(order.payment_intent_id()).bind(order.payment_result().map(Json))
        .bind(order.status().as_str()).bind(order.is_cancelled()).bind(order.updated_at())
        .execute(&mut *conn).await?;
    Ok(())
}

/// Replaces the stored items with the order's current ones, keeping their order.
async fn write_items(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query("DELETE FROM order_items WHERE order_id = $1").bind(order.id()).execute(&mut *conn).await?;
    for (position, item) in order.items().iter().enumerate() {
        sqlx::query("INSERT INTO order_items (id, order_id, position, product_id, name, image_url, quantity, price) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)")
            .bind(Uuid::now_v7()).bind(order.id()).bind(position as i32).bind(item.product_id)
            .bind(&item.name).bind(&item.image_url).bind(item.quantity).bind(item.price)
            .execute(&mut *conn).await?;
    }
    Ok(())
}
