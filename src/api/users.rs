use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::domain::aggregates::{Order, User};
use crate::domain::value_objects::Role;
use crate::store::{Page, UserFilter};
use crate::{Result, ShopError};
use super::extract::{lenient, Json, Path, Query};
use super::AppState;

const RECENT_ORDERS: i64 = 5;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(default, deserialize_with = "lenient")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub limit: Option<i64>,
    pub role: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest { pub role: String }

#[derive(Serialize)]
struct UserListing<'a> {
    #[serde(flatten)]
    user: &'a User,
    order_count: i64,
    last_active: DateTime<Utc>,
}

#[derive(Serialize)]
struct UserDetail<'a> {
    #[serde(flatten)]
    user: &'a User,
    recent_orders: Vec<Order>,
    last_active: DateTime<Utc>,
}

fn parse_role(raw: &str) -> Result<Role> {
    raw.trim().to_lowercase().parse().map_err(|_| ShopError::Validation("Invalid role".into()))
}

pub async fn list_users(State(state): State<AppState>, admin: AuthUser, Query(q): Query<UserQuery>) -> Result<Json<Value>> {
    admin.require_admin()?;
    let role = match q.role.as_deref().filter(|r| !r.is_empty() && *r != "all") {
        Some(raw) => Some(parse_role(raw)?),
        None => None,
    };
    let page = Page::new(q.page, q.limit, 10);
    let found = state.store.list_users(&UserFilter { role, search: q.search }, page).await?;
    let users: Vec<UserListing> = found.items.iter()
        .map(|row| UserListing { user: &row.user, order_count: row.order_count, last_active: row.user.last_active() })
        .collect();
    Ok(Json(json!({
        "success": true,
        "page": page.number,
        "pages": page.pages(found.total),
        "total": found.total,
        "limit": page.limit,
        "users": users,
    })))
}

pub async fn user_stats(State(state): State<AppState>, admin: AuthUser) -> Result<Json<Value>> {
    admin.require_admin()?;
    Ok(Json(json!({ "success": true, "stats": state.store.user_stats().await? })))
}

pub async fn get_user(State(state): State<AppState>, admin: AuthUser, Path(id): Path<Uuid>) -> Result<Json<Value>> {
    admin.require_admin()?;
    let user = state.store.find_user(id).await?.ok_or_else(|| ShopError::not_found("User"))?;
    let recent_orders = state.store.list_orders_for_user(id, Some(RECENT_ORDERS)).await?;
    let detail = UserDetail { user: &user, recent_orders, last_active: user.last_active() };
    Ok(Json(json!({ "success": true, "user": detail })))
}

pub async fn update_role(State(state): State<AppState>, admin: AuthUser, Path(id): Path<Uuid>, Json(req): Json<RoleRequest>) -> Result<Json<Value>> {
    admin.require_admin()?;
    let role = parse_role(&req.role)?;
    let user = state.store.change_user_role(id, role).await?;
    Ok(Json(json!({ "success": true, "message": "User role updated successfully", "user": user })))
}

pub async fn delete_user(State(state): State<AppState>, admin: AuthUser, Path(id): Path<Uuid>) -> Result<Json<Value>> {
    admin.require_admin()?;
    state.store.delete_user(id).await?;
    Ok(Json(json!({ "success": true, "message": "User deleted successfully" })))
}
