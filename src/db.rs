use anyhow::Result;
use anyhow::anyhow;
use sqlx::Pool;
use sqlx::Row;
use sqlx::Sqlite;
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteRow;
use teloxide::types::FileId;
use tracing::instrument;

use crate::models::CategoryRow;
use crate::models::OrderRow;
use crate::models::OrderStatus;
use crate::models::ProductRow;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct Db {
  pool: Pool<Sqlite>,
}

impl Db {
  pub async fn connect(database_path: &str) -> Result<Self> {
    let options = SqliteConnectOptions::new()
      .filename(database_path)
      .create_if_missing(true)
      .foreign_keys(true)
      .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
    MIGRATOR.run(&pool).await?;
    Ok(Self { pool })
  }

  #[allow(dead_code)]
  pub fn pool(&self) -> &Pool<Sqlite> {
    &self.pool
  }

  #[instrument(skip(self))]
  pub async fn upsert_user(
    &self,
    id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
  ) -> Result<()> {
    sqlx::query(
      r#"
      INSERT INTO users (id, username, first_name, last_name)
      VALUES (?, ?, ?, ?)
      ON CONFLICT (id) DO UPDATE SET
        username = excluded.username,
        first_name = excluded.first_name,
        last_name = excluded.last_name
      "#,
    )
    .bind(id)
    .bind(username)
    .bind(first_name)
    .bind(last_name)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn notifications_disabled(&self, user_id: i64) -> Result<bool> {
    let value = sqlx::query_scalar::<_, bool>("SELECT notifications_disabled FROM users WHERE id = ?")
      .bind(user_id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(value.unwrap_or(false))
  }

  #[instrument(skip(self))]
  pub async fn set_notifications_disabled(&self, user_id: i64, disabled: bool) -> Result<()> {
    sqlx::query("UPDATE users SET notifications_disabled = ? WHERE id = ?")
      .bind(disabled)
      .bind(user_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  #[instrument(skip(self, user_ids))]
  pub async fn filter_notifications_allowed(&self, user_ids: &[i64]) -> Result<Vec<i64>> {
    let mut allowed = Vec::with_capacity(user_ids.len());
    for user_id in user_ids {
      if !self.notifications_disabled(*user_id).await? {
        allowed.push(*user_id);
      }
    }
    Ok(allowed)
  }

  #[instrument(skip(self))]
  pub async fn list_user_ids(&self) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM users")
      .fetch_all(&self.pool)
      .await?;
    Ok(ids)
  }

  #[instrument(skip(self))]
  pub async fn list_categories(&self) -> Result<Vec<CategoryRow>> {
    let rows = sqlx::query("SELECT id, name FROM categories ORDER BY name")
      .fetch_all(&self.pool)
      .await?;
    Ok(
      rows
        .into_iter()
        .map(|row| CategoryRow {
          id: row.get("id"),
          name: row.get("name"),
        })
        .collect(),
    )
  }

  #[instrument(skip(self))]
  pub async fn find_category_by_name(&self, name: &str) -> Result<Option<CategoryRow>> {
    let row = sqlx::query("SELECT id, name FROM categories WHERE LOWER(name) = LOWER(?) LIMIT 1")
      .bind(name)
      .fetch_optional(&self.pool)
      .await?;
    Ok(row.map(|row| CategoryRow {
      id: row.get("id"),
      name: row.get("name"),
    }))
  }

  #[instrument(skip(self))]
  pub async fn create_category(&self, name: &str) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>("INSERT INTO categories (name) VALUES (?) RETURNING id")
      .bind(name)
      .fetch_one(&self.pool)
      .await?;
    Ok(id)
  }

  #[instrument(skip(self))]
  pub async fn delete_category(&self, category_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM categories WHERE id = ?")
      .bind(category_id)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  #[instrument(skip(self, image_file_ids))]
  pub async fn create_product(
    &self,
    category_id: i64,
    title: &str,
    description: Option<&str>,
    price_cents: i64,
    stock: i64,
    image_file_ids: &[String],
  ) -> Result<i64> {
    let cover_image = image_file_ids.first().map(|id| id.as_str());
    let id = sqlx::query_scalar::<_, i64>(
      r#"
      INSERT INTO products (category_id, title, description, price_cents, stock, image_file_id, is_new)
      VALUES (?, ?, ?, ?, ?, ?, TRUE)
      RETURNING id
      "#,
    )
    .bind(category_id)
    .bind(title)
    .bind(description)
    .bind(price_cents)
    .bind(stock)
    .bind(cover_image)
    .fetch_one(&self.pool)
    .await?;

    for (position, file_id) in image_file_ids.iter().enumerate() {
      sqlx::query("INSERT INTO product_images (product_id, file_id, position) VALUES (?, ?, ?)")
        .bind(id)
        .bind(file_id)
        .bind(position as i64)
        .execute(&self.pool)
        .await?;
    }
    Ok(id)
  }

  #[instrument(skip(self))]
  pub async fn get_product(&self, product_id: i64) -> Result<Option<ProductRow>> {
    let row = sqlx::query(
      r#"
      SELECT id, category_id, title, description, price_cents, stock, image_file_id, is_active, is_new, created_at
      FROM products
      WHERE id = ?
      "#,
    )
    .bind(product_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(row.as_ref().map(product_from_row))
  }

  #[instrument(skip(self))]
  pub async fn list_products_by_category(&self, category_id: i64) -> Result<Vec<ProductRow>> {
    let rows = sqlx::query(
      r#"
      SELECT id, category_id, title, description, price_cents, stock, image_file_id, is_active, is_new, created_at
      FROM products
      WHERE category_id = ?
      ORDER BY created_at DESC
      "#,
    )
    .bind(category_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows.iter().map(product_from_row).collect())
  }

  #[instrument(skip(self))]
  pub async fn delete_product(&self, product_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM products WHERE id = ?")
      .bind(product_id)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  #[instrument(skip(self))]
  pub async fn deactivate_product(&self, product_id: i64) -> Result<()> {
    sqlx::query("UPDATE products SET is_active = FALSE WHERE id = ?")
      .bind(product_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  /// Takes one unit off the shelf. Returns false when nothing was left.
  #[instrument(skip(self))]
  pub async fn take_stock_unit(&self, product_id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE products SET stock = stock - 1 WHERE id = ? AND stock > 0")
      .bind(product_id)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  #[instrument(skip(self))]
  pub async fn list_product_images(&self, product_id: i64) -> Result<Vec<FileId>> {
    let rows = sqlx::query(
      r#"
      SELECT file_id
      FROM product_images
      WHERE product_id = ?
      ORDER BY position ASC, id ASC
      "#,
    )
    .bind(product_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(|row| row.get::<String, _>("file_id").into()).collect())
  }

  #[instrument(skip(self))]
  pub async fn list_new_products(&self) -> Result<Vec<ProductRow>> {
    let rows = sqlx::query(
      r#"
      SELECT id, category_id, title, description, price_cents, stock, image_file_id, is_active, is_new, created_at
      FROM products
      WHERE is_new = TRUE AND is_active = TRUE
      ORDER BY created_at DESC
      "#,
    )
    .fetch_all(&self.pool)
    .await?;
    Ok(rows.iter().map(product_from_row).collect())
  }

  #[instrument(skip(self, product_ids))]
  pub async fn clear_new_product_flags(&self, product_ids: &[i64]) -> Result<()> {
    for product_id in product_ids {
      sqlx::query("UPDATE products SET is_new = FALSE WHERE id = ?")
        .bind(product_id)
        .execute(&self.pool)
        .await?;
    }
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn create_order(
    &self,
    payload: &str,
    user_id: i64,
    product_id: i64,
    product_title: &str,
    amount_cents: i64,
    currency: &str,
  ) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
      r#"
      INSERT INTO orders (payload, user_id, product_id, product_title, amount_cents, currency)
      VALUES (?, ?, ?, ?, ?, ?)
      RETURNING id
      "#,
    )
    .bind(payload)
    .bind(user_id)
    .bind(product_id)
    .bind(product_title)
    .bind(amount_cents)
    .bind(currency)
    .fetch_one(&self.pool)
    .await?;
    Ok(id)
  }

  #[instrument(skip(self))]
  pub async fn find_order_by_payload(&self, payload: &str) -> Result<Option<OrderRow>> {
    let row = sqlx::query(
      r#"
      SELECT
        id, payload, user_id, product_id, product_title, amount_cents, currency,
        status, voucher_code, telegram_charge_id, provider_charge_id, created_at, paid_at
      FROM orders
      WHERE payload = ?
      "#,
    )
    .bind(payload)
    .fetch_optional(&self.pool)
    .await?;
    row.as_ref().map(order_from_row).transpose()
  }

  #[instrument(skip(self, voucher_code, telegram_charge_id, provider_charge_id))]
  pub async fn mark_order_paid(
    &self,
    order_id: i64,
    voucher_code: &str,
    telegram_charge_id: &str,
    provider_charge_id: &str,
  ) -> Result<()> {
    sqlx::query(
      r#"
      UPDATE orders
      SET status = 'paid',
          voucher_code = ?,
          telegram_charge_id = ?,
          provider_charge_id = ?,
          paid_at = datetime('now')
      WHERE id = ?
      "#,
    )
    .bind(voucher_code)
    .bind(telegram_charge_id)
    .bind(provider_charge_id)
    .bind(order_id)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn mark_order_cancelled(&self, order_id: i64) -> Result<()> {
    sqlx::query("UPDATE orders SET status = 'cancelled' WHERE id = ? AND status = 'pending'")
      .bind(order_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  #[instrument(skip(self))]
  pub async fn list_orders_for_user(&self, user_id: i64) -> Result<Vec<OrderRow>> {
    let rows = sqlx::query(
      r#"
      SELECT
        id, payload, user_id, product_id, product_title, amount_cents, currency,
        status, voucher_code, telegram_charge_id, provider_charge_id, created_at, paid_at
      FROM orders
      WHERE user_id = ?
      ORDER BY created_at DESC
      "#,
    )
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;
    rows.iter().map(order_from_row).collect()
  }
}

fn product_from_row(row: &SqliteRow) -> ProductRow {
  ProductRow {
    id: row.get("id"),
    category_id: row.get("category_id"),
    title: row.get("title"),
    description: row.get("description"),
    price_cents: row.get("price_cents"),
    stock: row.get("stock"),
    image_file_id: row.get::<Option<String>, _>("image_file_id").map(Into::into),
    is_active: row.get("is_active"),
    is_new: row.get("is_new"),
    created_at: row.get("created_at"),
  }
}

fn order_from_row(row: &SqliteRow) -> Result<OrderRow> {
  let status_raw: String = row.get("status");
  let status = OrderStatus::parse(&status_raw).ok_or_else(|| anyhow!("unknown order status: {status_raw}"))?;
  Ok(OrderRow {
    id: row.get("id"),
    payload: row.get("payload"),
    user_id: row.get("user_id"),
    product_id: row.get("product_id"),
    product_title: row.get("product_title"),
    amount_cents: row.get("amount_cents"),
    currency: row.get("currency"),
    status,
    voucher_code: row.get("voucher_code"),
    telegram_charge_id: row.get("telegram_charge_id"),
    provider_charge_id: row.get("provider_charge_id"),
    created_at: row.get("created_at"),
    paid_at: row.get("paid_at"),
  })
}
