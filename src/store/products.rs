use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{Product, ProductPatch};
use crate::domain::events::DomainEvent;
use crate::Result;
use super::{contains_pattern, Page, Paged, Store};

impl Store {
    pub async fn insert_product(&self, product: &mut Product) -> Result<Vec<DomainEvent>> {
        sqlx::query("INSERT INTO products (id, name, description, price, stock, image_url, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)")
            .bind(product.id()).bind(product.name()).bind(product.description()).bind(product.price())
            .bind(product.stock()).bind(product.image_url()).bind(product.created_at()).bind(product.updated_at())
            .execute(&self.db).await?;
        info!(product_id = %product.id(), name = product.name(), "product created");
        Ok(product.take_events())
    }

    pub async fn find_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1").bind(id).fetch_optional(&self.db).await?)
    }

    /// Newest first; `keyword` matches the name case-insensitively.
    pub async fn list_products(&self, keyword: Option<&str>, page: Page) -> Result<Paged<Product>> {
        let pattern = keyword.map(str::trim).filter(|k| !k.is_empty()).map(contains_pattern);
        let items = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE ($1::text IS NULL OR name ILIKE $1) ORDER BY created_at DESC LIMIT $2 OFFSET $3")
            .bind(&pattern).bind(page.limit).bind(page.offset())
            .fetch_all(&self.db).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE ($1::text IS NULL OR name ILIKE $1)")
            .bind(&pattern).fetch_one(&self.db).await?;
        Ok(Paged { items, total: total.0 })
    }

    /// Applies the patch under a row lock so it cannot race an order's stock change.
    pub async fn update_product(&self, id: Uuid, patch: ProductPatch) -> Result<Option<Product>> {
        let mut tx = self.db.begin().await?;
        let Some(mut product) = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await? else { return Ok(None) };
        product.apply(patch)?;
        sqlx::query("UPDATE products SET name = $2, description = $3, price = $4, stock = $5, image_url = $6, updated_at = $7 WHERE id = $1")
            .bind(product.id()).bind(product.name()).bind(product.description()).bind(product.price())
            .bind(product.stock()).bind(product.image_url()).bind(product.updated_at())
            .execute(&mut *tx).await?;
        tx.commit().await?;
        info!(product_id = %id, "product updated");
        Ok(Some(product))
    }

    /// Existing order items keep their snapshot of the product.
    pub async fn delete_product(&self, id: Uuid) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM products WHERE id = $1").bind(id).execute(&self.db).await?.rows_affected() > 0;
        if deleted { info!(product_id = %id, "product deleted"); }
        Ok(deleted)
    }
}

/// Row-locks the given products, in id order.
pub(super) async fn lock_products(conn: &mut PgConnection, ids: &[Uuid]) -> Result<Vec<Product>> {
    if ids.is_empty() { return Ok(Vec::new()); }
    Ok(sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE")
        .bind(ids).fetch_all(&mut *conn).await?)
}

/// Persists new stock levels and drains the products' events.
pub(super) async fn write_stock(conn: &mut PgConnection, products: Vec<Product>) -> Result<Vec<DomainEvent>> {
    let mut events = Vec::new();
    for mut product in products {
        sqlx::query("UPDATE products SET stock = $2, updated_at = $3 WHERE id = $1")
            .bind(product.id()).bind(product.stock()).bind(product.updated_at())
            .execute(&mut *conn).await?;
        events.extend(product.take_events());
    }
    Ok(events)
}
