//! User Aggregate

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use crate::domain::value_objects::{Email, Role};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct User {
    id: Uuid,
    name: String,
    email: String,
    #[serde(skip)]
    password_hash: String,
    #[sqlx(try_from = "String")]
    role: Role,
    last_login: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl User {
    /// `password_hash` must already be a PHC string; see [`crate::auth::hash_password`].
    pub fn register(name: impl Into<String>, email: Email, password_hash: String) -> Result<Self, UserError> {
        let name = name.into().trim().to_string();
        if name.is_empty() { return Err(UserError::MissingName); }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(), name, email: email.into(), password_hash, role: Role::User,
            last_login: None, created_at: now, updated_at: now,
        })
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn email(&self) -> &str { &self.email }
    pub fn password_hash(&self) -> &str { &self.password_hash }
    pub fn role(&self) -> Role { self.role }
    pub fn last_login(&self) -> Option<DateTime<Utc>> { self.last_login }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn last_active(&self) -> DateTime<Utc> { self.last_login.unwrap_or(self.created_at) }

    pub fn record_login(&mut self) { let now = Utc::now(); self.last_login = Some(now); self.updated_at = now; }
    pub fn change_role(&mut self, role: Role) { self.role = role; self.updated_at = Utc::now(); }
}

/// Public projection returned by the auth endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct UserSummary { pub id: Uuid, pub name: String, pub email: String, pub role: Role }

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self { Self { id: u.id, name: u.name.clone(), email: u.email.clone(), role: u.role } }
}

pub fn check_password_policy(password: &str) -> Result<(), UserError> {
    if password.chars().count() < MIN_PASSWORD_LEN { Err(UserError::WeakPassword) } else { Ok(()) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum UserError { MissingName, WeakPassword }
impl std::error::Error for UserError {}
impl std::fmt::Display for UserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingName => write!(f, "Name is required"),
            Self::WeakPassword => write!(f, "Password must be at least {} characters", MIN_PASSWORD_LEN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_register_defaults() {
        let u = User::register(" Jane ", Email::new("JANE@example.com").unwrap(), "hash".into()).unwrap();
        assert_eq!(u.name(), "Jane");
        assert_eq!(u.email(), "jane@example.com");
        assert_eq!(u.role(), Role::User);
        assert_eq!(u.last_active(), u.created_at());
    }
    #[test]
    fn test_password_hash_not_serialised() {
        let u = User::register("Jane", Email::new("jane@example.com").unwrap(), "secret-hash".into()).unwrap();
        let json = serde_json::to_string(&u).unwrap();
        assert!(!json.contains("secret-hash"));
    }
    #[test]
    fn test_password_policy() {
        assert_eq!(check_password_policy("12345").unwrap_err(), UserError::WeakPassword);
        assert!(check_password_policy("123456").is_ok());
    }
}
