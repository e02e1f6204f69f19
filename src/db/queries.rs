use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::models::product::{FreshnessRecord, ProductData, ProductKey};

fn key_from_row(row: &sqlx::postgres::PgRow) -> Result<ProductKey, sqlx::Error> {
    let raw: String = row.try_get("product_key")?;
    ProductKey::parse(&raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Insert keys that are not yet known, as never renewed. Returns the number
/// of new rows.
pub async fn register_products(pool: &PgPool, keys: &[ProductKey]) -> Result<u64, sqlx::Error> {
    let raw: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();

    let result = sqlx::query(
        r#"
        INSERT INTO product_store (product_key)
        SELECT * FROM UNNEST($1::text[])
        ON CONFLICT (product_key) DO NOTHING
        "#,
    )
    .bind(raw)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Get the freshness record of one product
pub async fn get_record(
    pool: &PgPool,
    key: &ProductKey,
) -> Result<Option<FreshnessRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT product_key, renewed_at
        FROM product_store
        WHERE product_key = $1
        "#,
    )
    .bind(key.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(|r| -> Result<FreshnessRecord, sqlx::Error> {
        Ok(FreshnessRecord {
            key: key_from_row(&r)?,
            last_renewed_at: r.try_get("renewed_at")?,
        })
    })
    .transpose()
}

/// Get the stored product data of one product
pub async fn get_product(
    pool: &PgPool,
    key: &ProductKey,
) -> Result<Option<ProductData>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT data
        FROM product_store
        WHERE product_key = $1
        "#,
    )
    .bind(key.as_str())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => {
            let data: Option<Json<ProductData>> = r.try_get("data")?;
            Ok(data.map(|d| d.0))
        }
        None => Ok(None),
    }
}

/// Count products renewed at or before `cutoff` (or never renewed)
pub async fn count_stale(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS stale
        FROM product_store
        WHERE renewed_at IS NULL OR renewed_at <= $1
        "#,
    )
    .bind(cutoff)
    .fetch_one(pool)
    .await?;

    let count: i64 = row.try_get("stale")?;
    Ok(count as u64)
}

/// Check whether any product is stale
pub async fn has_stale(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM product_store
            WHERE renewed_at IS NULL OR renewed_at <= $1
        ) AS has_stale
        "#,
    )
    .bind(cutoff)
    .fetch_one(pool)
    .await?;

    row.try_get("has_stale")
}

/// Stale keys in insertion order
pub async fn stale_keys(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<Vec<ProductKey>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT product_key
        FROM product_store
        WHERE renewed_at IS NULL OR renewed_at <= $1
        ORDER BY id ASC
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    rows.iter().map(key_from_row).collect()
}

/// All known keys in insertion order
pub async fn all_keys(pool: &PgPool) -> Result<Vec<ProductKey>, sqlx::Error> {
    let rows = sqlx::query("SELECT product_key FROM product_store ORDER BY id ASC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(key_from_row).collect()
}

/// Upsert the renewal time of one product
pub async fn mark_renewed(
    pool: &PgPool,
    key: &ProductKey,
    renewed_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO product_store (product_key, renewed_at)
        VALUES ($1, $2)
        ON CONFLICT (product_key) DO UPDATE
        SET renewed_at = EXCLUDED.renewed_at
        "#,
    )
    .bind(key.as_str())
    .bind(renewed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Upsert fetched product data together with its renewal time
pub async fn store_product(
    pool: &PgPool,
    key: &ProductKey,
    data: &ProductData,
    renewed_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO product_store (product_key, renewed_at, data)
        VALUES ($1, $2, $3)
        ON CONFLICT (product_key) DO UPDATE
        SET renewed_at = EXCLUDED.renewed_at,
            data = EXCLUDED.data
        "#,
    )
    .bind(key.as_str())
    .bind(renewed_at)
    .bind(Json(data))
    .execute(pool)
    .await?;

    Ok(())
}

/// Forget every renewal time so all products become stale
pub async fn reset_all(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE product_store SET renewed_at = NULL")
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
