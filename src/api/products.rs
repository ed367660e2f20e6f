use axum::{extract::State, http::StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::domain::aggregates::{NewProduct, Product, ProductPatch};
use crate::store::Page;
use crate::{Result, ShopError};
use super::extract::{lenient, Json, Path, Query};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    #[serde(default, deserialize_with = "lenient")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub limit: Option<i64>,
    pub keyword: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Product name is required"))]
    pub name: String,
    #[validate(range(min = 0, message = "Price cannot be negative"))]
    pub price: i64,
    #[serde(default)]
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,
    pub description: Option<String>,
    #[serde(alias = "imageUrl", alias = "image")]
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, message = "Product name is required"))]
    pub name: Option<String>,
    #[validate(range(min = 0, message = "Price cannot be negative"))]
    pub price: Option<i64>,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: Option<i32>,
    pub description: Option<String>,
    #[serde(alias = "imageUrl", alias = "image")]
    pub image_url: Option<String>,
}

pub async fn list_products(State(state): State<AppState>, Query(q): Query<ProductQuery>) -> Result<Json<Value>> {
    let page = Page::new(q.page, q.limit, 10);
    let found = state.store.list_products(q.keyword.as_deref(), page).await?;
    Ok(Json(json!({
        "success": true,
        "page": page.number,
        "pages": page.pages(found.total),
        "total": found.total,
        "products": found.items,
    })))
}

pub async fn get_product(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>> {
    let product = state.store.find_product(id).await?.ok_or_else(|| ShopError::not_found("Product"))?;
    Ok(Json(json!({ "success": true, "product": product })))
}

pub async fn create_product(State(state): State<AppState>, user: AuthUser, Json(req): Json<CreateProductRequest>) -> Result<(StatusCode, Json<Value>)> {
    user.require_staff()?;
    req.validate()?;
    let mut product = Product::create(NewProduct {
        name: req.name, price: req.price, stock: req.stock, description: req.description, image_url: req.image_url,
    })?;
    let events = state.store.insert_product(&mut product).await?;
    state.bus.publish(events).await;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "message": "Product created successfully", "product": product }))))
}

pub async fn update_product(State(state): State<AppState>, user: AuthUser, Path(id): Path<Uuid>, Json(req): Json<UpdateProductRequest>) -> Result<Json<Value>> {
    user.require_staff()?;
    req.validate()?;
    let patch = ProductPatch { name: req.name, price: req.price, stock: req.stock, description: req.description, image_url: req.image_url };
    let product = state.store.update_product(id, patch).await?.ok_or_else(|| ShopError::not_found("Product"))?;
    Ok(Json(json!({ "success": true, "message": "Product updated successfully", "product": product })))
}

pub async fn delete_product(State(state): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> Result<Json<Value>> {
    user.require_admin()?;
    if !state.store.delete_product(id).await? {
        return Err(ShopError::not_found("Product"));
    }
    Ok(Json(json!({ "success": true, "message": "Product deleted successfully" })))
}
