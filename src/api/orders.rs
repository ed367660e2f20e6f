use axum::{extract::State, http::StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::domain::aggregates::{Order, OrderStatus, PaymentMethod};
use crate::domain::inventory::OrderLine;
use crate::store::{OrderFilter, Page};
use crate::{Result, ShopError};
use super::extract::{lenient, Json, Path, Query};
use super::payments::settle_intent;
use super::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct OrderProductsRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "No products provided"))]
    pub products: Vec<OrderLineRequest>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
pub struct OrderLineRequest {
    #[serde(rename = "product", alias = "product_id", alias = "productId")]
    pub product_id: Uuid,
    pub quantity: i32,
}

impl OrderProductsRequest {
    fn lines(&self) -> Vec<OrderLine> {
        self.products.iter().map(|l| OrderLine { product_id: l.product_id, quantity: l.quantity }).collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    #[serde(default, deserialize_with = "lenient")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub user: Option<Uuid>,
    #[serde(default, alias = "minPrice", deserialize_with = "lenient")]
    pub min_price: Option<i64>,
    #[serde(default, alias = "maxPrice", deserialize_with = "lenient")]
    pub max_price: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest { pub status: String }

#[derive(Debug, Default, Deserialize)]
pub struct PayRequest {
    #[serde(alias = "paymentMethod")]
    pub payment_method: Option<PaymentMethod>,
}

fn parse_status(raw: &str) -> Result<OrderStatus> {
    raw.trim().to_lowercase().parse().map_err(|_| ShopError::Validation("Invalid status".into()))
}

pub async fn create_order(State(state): State<AppState>, user: AuthUser, Json(req): Json<OrderProductsRequest>) -> Result<(StatusCode, Json<Order>)> {
    req.validate()?;
    let (order, events) = state.store.place_order(user.id(), &req.lines()).await?;
    state.bus.publish(events).await;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn my_orders(State(state): State<AppState>, user: AuthUser) -> Result<Json<Vec<Order>>> {
    Ok(Json(state.store.list_orders_for_user(user.id(), None).await?))
}

pub async fn list_orders(State(state): State<AppState>, user: AuthUser, Query(q): Query<OrderQuery>) -> Result<Json<Value>> {
    user.require_staff()?;
    let status = match q.status.as_deref().filter(|s| !s.is_empty() && *s != "all") {
        Some(raw) => Some(parse_status(raw)?),
        None => None,
    };
    let filter = OrderFilter { status, user_id: q.user, min_price: q.min_price, max_price: q.max_price };
    let page = Page::new(q.page, q.limit, 10);
    let found = state.store.list_orders(&filter, page).await?;
    Ok(Json(json!({
        "success": true,
        "page": page.number,
        "pages": page.pages(found.total),
        "count": found.items.len(),
        "total": found.total,
        "orders": found.items,
    })))
}

pub async fn get_order(State(state): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    let order = state.store.find_order(id).await?.ok_or_else(|| ShopError::not_found("Order"))?;
    if !order.can_be_viewed_by(user.id(), user.role()) {
        return Err(ShopError::Forbidden("Not authorized".into()));
    }
    Ok(Json(order))
}

pub async fn update_status(State(state): State<AppState>, user: AuthUser, Path(id): Path<Uuid>, Json(req): Json<StatusRequest>) -> Result<Json<Order>> {
    user.require_staff()?;
    let status = parse_status(&req.status)?;
    let (order, _, events) = state.store.update_order(id, |o| Ok(o.set_status(status)?)).await?;
    state.bus.publish(events).await;
    Ok(Json(order))
}

pub async fn update_products(State(state): State<AppState>, user: AuthUser, Path(id): Path<Uuid>, Json(req): Json<OrderProductsRequest>) -> Result<Json<Value>> {
    user.require_staff()?;
    req.validate()?;
    let (order, events) = state.store.replace_order_items(id, &req.lines()).await?;
    state.bus.publish(events).await;
    Ok(Json(json!({ "message": "Order updated successfully", "order": order })))
}

pub async fn delete_order(State(state): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> Result<Json<Value>> {
    user.require_admin()?;
    let events = state.store.delete_order(id).await?;
    state.bus.publish(events).await;
    Ok(Json(json!({ "message": "Order deleted and stock restored successfully" })))
}

/// Records an offline payment without going through Stripe.
pub async fn pay_order(State(state): State<AppState>, user: AuthUser, Path(id): Path<Uuid>, body: Option<Json<PayRequest>>) -> Result<Json<Value>> {
    let method = body.and_then(|Json(b)| b.payment_method).unwrap_or_default();
    let (order, _, events) = state.store.update_order(id, |o| {
        user.require_owner(o.user_id())?;
        Ok(o.pay_mock(method, user.0.email())?)
    }).await?;
    state.bus.publish(events).await;
    Ok(Json(json!({ "message": "Payment successful", "order": order })))
}

pub async fn cancel_order(State(state): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> Result<Json<Value>> {
    let stripe = state.stripe.clone();
    let (order, events) = state.store.cancel_order(
        id,
        |o| user.require_owner_or_admin(o.user_id()),
        |order_id, settlement| async move { settle_intent(stripe.as_ref(), order_id, settlement).await },
    ).await?;
    state.bus.publish(events).await;
    Ok(Json(json!({ "message": "Order cancelled successfully", "order": order })))
}
