use axum::{extract::State, http::StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::auth::{hash_password, verify_password, AuthUser};
use crate::domain::aggregates::{user::check_password_policy, User, UserSummary};
use crate::domain::value_objects::Email;
use crate::{Result, ShopError};
use super::extract::Json;
use super::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[serde(default)]
    #[validate(email(message = "Please provide a valid email"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

pub async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> Result<(StatusCode, Json<Value>)> {
    req.validate()?;
    check_password_policy(&req.password)?;
    let email = Email::new(req.email.as_str()).map_err(|e| ShopError::Validation(e.to_string()))?;
    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(ShopError::Validation("User already exists".into()));
    }
    let user = User::register(req.name.as_str(), email, hash_password(&req.password)?)?;
    state.store.insert_user(&user).await?;
    let token = state.tokens.issue(user.id())?;
    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "message": "User registered successfully",
        "user": UserSummary::from(&user),
        "token": token,
    }))))
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Result<Json<Value>> {
    req.validate()?;
    let invalid = || ShopError::Unauthorized("Invalid credentials".into());
    let email = Email::new(req.email.as_str()).map_err(|_| invalid())?;
    let mut user = state.store.find_user_by_email(&email).await?.ok_or_else(invalid)?;
    if !verify_password(&req.password, user.password_hash()) {
        info!(user_id = %user.id(), "login rejected");
        return Err(invalid());
    }
    user.record_login();
    state.store.save_login(&user).await?;
    let token = state.tokens.issue(user.id())?;
    Ok(Json(json!({
        "success": true,
        "message": "Login successful",
        "user": UserSummary::from(&user),
        "token": token,
    })))
}

pub async fn profile(AuthUser(user): AuthUser) -> Json<Value> {
    Json(json!({ "success": true, "user": user }))
}
