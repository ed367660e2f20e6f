//! Password hashing, bearer tokens and the authenticated-user extractor.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::{extract::FromRequestParts, http::{header::AUTHORIZATION, request::Parts}};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::domain::aggregates::User;
use crate::domain::value_objects::Role;
use crate::{Result, ShopError};

/// Hashes with argon2id and a fresh random salt; returns a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ShopError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is unreadable");
            false
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signing and verification keys plus the token lifetime.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, user_id: Uuid) -> Result<String> {
        let now = Utc::now();
        let claims = Claims { sub: user_id, iat: now.timestamp(), exp: (now + self.ttl).timestamp() };
        encode(&Header::default(), &claims, &self.encoding).map_err(|e| ShopError::Internal(format!("token signing failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "rejected bearer token");
                ShopError::Unauthorized("Not authorized".into())
            })
    }
}

/// The caller, resolved from `Authorization: Bearer <token>`.
#[derive(Clone, Debug)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> Uuid { self.0.id() }
    pub fn role(&self) -> Role { self.0.role() }

    pub fn require_staff(&self) -> Result<()> {
        if self.role().is_staff() { Ok(()) } else { Err(self.denied()) }
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.role() == Role::Admin { Ok(()) } else { Err(self.denied()) }
    }

    /// Owners act on their own records; admins act on anyone's.
    pub fn require_owner_or_admin(&self, owner: Uuid) -> Result<()> {
        if self.id() == owner || self.role() == Role::Admin { Ok(()) } else { Err(ShopError::Forbidden("Not authorized".into())) }
    }

    pub fn require_owner(&self, owner: Uuid) -> Result<()> {
        if self.id() == owner { Ok(()) } else { Err(ShopError::Forbidden("Not authorized".into())) }
    }

    fn denied(&self) -> ShopError {
        tracing::info!(user_id = %self.id(), role = %self.role(), "access denied");
        ShopError::Forbidden("Access denied. Insufficient permissions.".into())
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ShopError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ShopError::Unauthorized("No token provided".into()))?;
        let claims = state.tokens.verify(token)?;
        let user = state
            .store
            .find_user(claims.sub)
            .await?
            .ok_or_else(|| ShopError::Unauthorized("User not found".into()))?;
        Ok(AuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Email;

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-phc-string"));
    }

    #[test]
    fn test_token_issue_and_verify() {
        let keys = TokenKeys::new("secret", 1);
        let id = Uuid::now_v7();
        let claims = keys.verify(&keys.issue(id).unwrap()).unwrap();
        assert_eq!(claims.sub, id);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_token_wrong_secret_or_expired() {
        let id = Uuid::now_v7();
        let token = TokenKeys::new("secret", 1).issue(id).unwrap();
        assert!(matches!(TokenKeys::new("other", 1).verify(&token), Err(ShopError::Unauthorized(_))));
        let expired = TokenKeys::new("secret", -2).issue(id).unwrap();
        assert!(TokenKeys::new("secret", 1).verify(&expired).is_err());
    }

    #[test]
    fn test_role_guards() {
        let user = User::register("Jane", Email::new("jane@example.com").unwrap(), "h".into()).unwrap();
        let owner = user.id();
        let mut admin = user.clone();
        admin.change_role(Role::Admin);
        let plain = AuthUser(user);
        assert!(plain.require_staff().is_err());
        assert!(plain.require_owner_or_admin(owner).is_ok());
        assert!(plain.require_owner_or_admin(Uuid::now_v7()).is_err());
        let admin = AuthUser(admin);
        assert!(admin.require_admin().is_ok());
        assert!(admin.require_owner_or_admin(Uuid::now_v7()).is_ok());
    }
}
