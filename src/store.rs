use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;

use crate::models::{PriceValue, Product, ProductId, ProductSnapshot, TrackingStatus};
use crate::utils::error::AppError;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS products (
        id TEXT PRIMARY KEY NOT NULL,
        url TEXT NOT NULL,
        snapshot TEXT,
        status TEXT NOT NULL,
        tracked INTEGER NOT NULL,
        failure_count INTEGER NOT NULL,
        last_error TEXT,
        poll_interval_secs INTEGER NOT NULL,
        last_checked TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS price_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        product_id TEXT NOT NULL,
        amount TEXT NOT NULL,
        currency_code TEXT,
        raw TEXT NOT NULL,
        recorded_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_price_history_product ON price_history (product_id, recorded_at)",
];

#[derive(FromRow)]
struct ProductRow {
    id: String,
    url: String,
    snapshot: Option<String>,
    status: String,
    tracked: bool,
    failure_count: i64,
    last_error: Option<String>,
    poll_interval_secs: i64,
    last_checked: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = AppError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let snapshot = row
            .snapshot
            .as_deref()
            .map(serde_json::from_str::<ProductSnapshot>)
            .transpose()?;
        let status = TrackingStatus::from_str(&row.status).map_err(AppError::Validation)?;
        let poll_interval_secs = u64::try_from(row.poll_interval_secs).map_err(|_| {
            AppError::Validation(format!(
                "stored poll interval {} for product {} is negative",
                row.poll_interval_secs, row.id
            ))
        })?;

        Ok(Product {
            id: ProductId::from(row.id),
            url: row.url,
            snapshot,
            status,
            tracked: row.tracked,
            failure_count: u32::try_from(row.failure_count).unwrap_or(u32::MAX),
            last_error: row.last_error,
            poll_interval_secs,
            last_checked: row.last_checked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// One recorded valid price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub product_id: ProductId,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub currency_code: Option<String>,
    pub raw: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct PricePointRow {
    product_id: String,
    amount: String,
    currency_code: Option<String>,
    raw: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<PricePointRow> for PricePoint {
    type Error = AppError;

    fn try_from(row: PricePointRow) -> Result<Self, Self::Error> {
        let amount = Decimal::from_str(&row.amount)
            .map_err(|e| AppError::Validation(format!("stored amount '{}': {}", row.amount, e)))?;
        Ok(PricePoint {
            product_id: ProductId::from(row.product_id),
            amount,
            currency_code: row.currency_code,
            raw: row.raw,
            recorded_at: row.recorded_at,
        })
    }
}

/// SQLite persistence for the product set and its price history.
#[derive(Clone)]
pub struct ProductStore {
    pool: SqlitePool,
}

impl ProductStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        if let Some(parent) = options.clone().get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Every connection to an in-memory database is a separate database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, AppError> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<(), AppError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn upsert(&self, product: &Product) -> Result<(), AppError> {
        Self::upsert_with(&self.pool, product).await
    }

    async fn upsert_with<'e, E>(executor: E, product: &Product) -> Result<(), AppError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let snapshot = product
            .snapshot
            .as_ref()
            .map(|s| serde_json::to_string(&s.detached()))
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO products (id, url, snapshot, status, tracked, failure_count, last_error,
                                     poll_interval_secs, last_checked, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
               ON CONFLICT(id) DO UPDATE SET
                   url = excluded.url,
                   snapshot = excluded.snapshot,
                   status = excluded.status,
                   tracked = excluded.tracked,
                   failure_count = excluded.failure_count,
                   last_error = excluded.last_error,
                   poll_interval_secs = excluded.poll_interval_secs,
                   last_checked = excluded.last_checked,
                   updated_at = excluded.updated_at"#,
        )
        .bind(product.id.as_str())
        .bind(&product.url)
        .bind(snapshot)
        .bind(product.status.as_str())
        .bind(product.tracked)
        .bind(i64::from(product.failure_count))
        .bind(&product.last_error)
        .bind(i64::try_from(product.poll_interval_secs).unwrap_or(i64::MAX))
        .bind(product.last_checked)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Replace the whole product table with `products` in one transaction.
    pub async fn save_all(&self, products: &[Product]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM products").execute(&mut *tx).await?;
        for product in products {
            Self::upsert_with(&mut *tx, product).await?;
        }

        tx.commit().await?;
        tracing::debug!("Saved {} products", products.len());
        Ok(())
    }

    pub async fn load_all(&self) -> Result<Vec<Product>, AppError> {
        let rows: Vec<ProductRow> = sqlx::query_as(
            r#"SELECT id, url, snapshot, status, tracked, failure_count, last_error,
                      poll_interval_secs, last_checked, created_at, updated_at
               FROM products ORDER BY created_at, id"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Product::try_from).collect()
    }

    pub async fn delete(&self, id: &ProductId) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM price_history WHERE product_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn record_price(&self, id: &ProductId, price: &PriceValue, at: DateTime<Utc>) -> Result<(), AppError> {
        if !price.valid {
            return Err(AppError::Validation("only valid prices are recorded".to_string()));
        }

        sqlx::query("INSERT INTO price_history (product_id, amount, currency_code, raw, recorded_at) VALUES (?, ?, ?, ?, ?)")
            .bind(id.as_str())
            .bind(price.decimal.to_string())
            .bind(&price.currency_code)
            .bind(&price.raw)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Oldest first.
    pub async fn price_history(&self, id: &ProductId) -> Result<Vec<PricePoint>, AppError> {
        let rows: Vec<PricePointRow> = sqlx::query_as(
            "SELECT product_id, amount, currency_code, raw, recorded_at FROM price_history WHERE product_id = ? ORDER BY recorded_at, id",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PricePoint::try_from).collect()
    }
}
