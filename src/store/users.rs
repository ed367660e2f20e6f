use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::User;
use crate::domain::value_objects::{Email, Role};
use crate::{Result, ShopError};
use super::{contains_pattern, is_unique_violation, Page, Paged, Store};

#[derive(Clone, Debug, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    /// Substring of name or email.
    pub search: Option<String>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct UserWithOrders {
    #[sqlx(flatten)]
    pub user: User,
    pub order_count: i64,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct UserStats {
    pub total: i64,
    pub admin: i64,
    pub manager: i64,
    pub user: i64,
    pub new_this_week: i64,
    pub active_today: i64,
}

impl Store {
    pub async fn insert_user(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, name, email, password_hash, role, last_login, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)")
            .bind(user.id()).bind(user.name()).bind(user.email()).bind(user.password_hash())
            .bind(user.role().as_str()).bind(user.last_login()).bind(user.created_at()).bind(user.created_at())
            .execute(&self.db).await
            .map_err(|e| if is_unique_violation(&e) { ShopError::Validation("User already exists".into()) } else { e.into() })?;
        info!(user_id = %user.id(), "user registered");
        Ok(())
    }

    pub async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1").bind(id).fetch_optional(&self.db).await?)
    }

    pub async fn find_user_by_email(&self, email: &Email) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1").bind(email.as_str()).fetch_optional(&self.db).await?)
    }

    pub async fn save_login(&self, user: &User) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = $2, updated_at = NOW() WHERE id = $1")
            .bind(user.id()).bind(user.last_login()).execute(&self.db).await?;
        Ok(())
    }

    /// Newest first, with each user's order count.
    pub async fn list_users(&self, filter: &UserFilter, page: Page) -> Result<Paged<UserWithOrders>> {
        let role = filter.role.map(|r| r.as_str());
        let pattern = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(contains_pattern);
        let items = sqlx::query_as::<_, UserWithOrders>(
            "SELECT u.*, (SELECT COUNT(*) FROM orders o WHERE o.user_id = u.id) AS order_count FROM users u \
             WHERE ($1::text IS NULL OR u.role = $1) AND ($2::text IS NULL OR u.name ILIKE $2 OR u.email ILIKE $2) \
             ORDER BY u.created_at DESC LIMIT $3 OFFSET $4")
            .bind(role).bind(&pattern).bind(page.limit).bind(page.offset())
            .fetch_all(&self.db).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users u WHERE ($1::text IS NULL OR u.role = $1) AND ($2::text IS NULL OR u.name ILIKE $2 OR u.email ILIKE $2)")
            .bind(role).bind(&pattern).fetch_one(&self.db).await?;
        Ok(Paged { items, total: total.0 })
    }

    pub async fn user_stats(&self) -> Result<UserStats> {
        Ok(sqlx::query_as::<_, UserStats>(
            "SELECT COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE role = 'admin') AS admin, \
             COUNT(*) FILTER (WHERE role = 'manager') AS manager, \
             COUNT(*) FILTER (WHERE role = 'user') AS \"user\", \
             COUNT(*) FILTER (WHERE created_at >= NOW() - INTERVAL '7 days') AS new_this_week, \
             COUNT(*) FILTER (WHERE last_login >= date_trunc('day', NOW())) AS active_today \
             FROM users")
            .fetch_one(&self.db).await?)
    }

    /// Refuses to demote the only remaining admin.
    pub async fn change_user_role(&self, id: Uuid, role: Role) -> Result<User> {
        let mut tx = self.db.begin().await?;
        let mut user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await?
            .ok_or_else(|| ShopError::not_found("User"))?;
        if user.role() == Role::Admin && role != Role::Admin && admin_count(&mut tx).await? <= 1 {
            return Err(ShopError::Validation("Cannot change the last admin's role".into()));
        }
        user.change_role(role);
        sqlx::query("UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1")
            .bind(id).bind(role.as_str()).execute(&mut *tx).await?;
        tx.commit().await?;
        info!(user_id = %id, role = %role, "user role changed");
        Ok(user)
    }

    /// Deletes the user and every order they placed.
    pub async fn delete_user(&self, id: Uuid) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await?
            .ok_or_else(|| ShopError::not_found("User"))?;
        if user.role() == Role::Admin && admin_count(&mut tx).await? <= 1 {
            return Err(ShopError::Validation("Cannot delete the last admin".into()));
        }
        let orders = sqlx::query("DELETE FROM orders WHERE user_id = $1").bind(id).execute(&mut *tx).await?.rows_affected();
        sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        info!(user_id = %id, orders, "user deleted");
        Ok(())
    }
}

/// Counts admins, holding their row locks until the transaction ends.
async fn admin_count(conn: &mut sqlx::PgConnection) -> Result<i64> {
    let admins = sqlx::query("SELECT id FROM users WHERE role = 'admin' ORDER BY id FOR UPDATE").fetch_all(&mut *conn).await?;
    Ok(admins.len() as i64)
}
