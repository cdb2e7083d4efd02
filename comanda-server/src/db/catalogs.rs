//! Versioned product and route catalogs.
//!
//! Catalogs are immutable once written; activation flips the single active
//! bit under the caller's transaction. The loader orders product entries
//! alphabetically by `norm_name`, which fixes the deterministic scan order
//! the fuzzy matcher breaks ties with.

use super::fmt_ts;
use chrono::Utc;
use comanda_common::Result;
use sqlx::{Row, SqliteConnection};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ProductEntry {
    pub product_id: String,
    pub norm_name: String,
    pub family: i64,
}

/// One loaded products catalog version, entries in scan order
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    pub version: i64,
    pub entries: Vec<ProductEntry>,
}

impl ProductCatalog {
    pub fn find_exact(&self, norm_name: &str) -> Option<&ProductEntry> {
        self.entries.iter().find(|e| e.norm_name == norm_name)
    }
}

/// One loaded routes catalog version
#[derive(Debug, Clone)]
pub struct RouteCatalog {
    pub version: i64,
    pub routes: HashSet<String>,
}

impl RouteCatalog {
    pub fn contains(&self, norm_name: &str) -> bool {
        self.routes.contains(norm_name)
    }
}

/// Write a new (inactive) products catalog version
pub async fn create_products_catalog(
    conn: &mut SqliteConnection,
    entries: &[(String, String, i64)],
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO products_catalogs (active, created_at) VALUES (0, ?)")
        .bind(fmt_ts(Utc::now()))
        .execute(&mut *conn)
        .await?;
    let version = result.last_insert_rowid();

    for (product_id, norm_name, family) in entries {
        sqlx::query(
            "INSERT INTO catalog_products (catalog_version, product_id, norm_name, family) VALUES (?, ?, ?, ?)",
        )
        .bind(version)
        .bind(product_id)
        .bind(norm_name)
        .bind(family)
        .execute(&mut *conn)
        .await?;
    }

    Ok(version)
}

/// Write a new (inactive) routes catalog version
pub async fn create_routes_catalog(
    conn: &mut SqliteConnection,
    route_norms: &[String],
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO routes_catalogs (active, created_at) VALUES (0, ?)")
        .bind(fmt_ts(Utc::now()))
        .execute(&mut *conn)
        .await?;
    let version = result.last_insert_rowid();

    for norm in route_norms {
        sqlx::query("INSERT INTO catalog_routes (catalog_version, norm_name) VALUES (?, ?)")
            .bind(version)
            .bind(norm)
            .execute(&mut *conn)
            .await?;
    }

    Ok(version)
}

/// Make one products catalog version the active one
pub async fn activate_products(conn: &mut SqliteConnection, version: i64) -> Result<()> {
    sqlx::query("UPDATE products_catalogs SET active = 0 WHERE active = 1")
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE products_catalogs SET active = 1, activated_at = ? WHERE version = ?")
        .bind(fmt_ts(Utc::now()))
        .bind(version)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Make one routes catalog version the active one
pub async fn activate_routes(conn: &mut SqliteConnection, version: i64) -> Result<()> {
    sqlx::query("UPDATE routes_catalogs SET active = 0 WHERE active = 1")
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE routes_catalogs SET active = 1, activated_at = ? WHERE version = ?")
        .bind(fmt_ts(Utc::now()))
        .bind(version)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn active_products_version(conn: &mut SqliteConnection) -> Result<Option<i64>> {
    let version = sqlx::query_scalar::<_, i64>(
        "SELECT version FROM products_catalogs WHERE active = 1",
    )
    .fetch_optional(&mut *conn)
    .await?;
    Ok(version)
}

pub async fn active_routes_version(conn: &mut SqliteConnection) -> Result<Option<i64>> {
    let version = sqlx::query_scalar::<_, i64>(
        "SELECT version FROM routes_catalogs WHERE active = 1",
    )
    .fetch_optional(&mut *conn)
    .await?;
    Ok(version)
}

pub async fn load_products(
    conn: &mut SqliteConnection,
    version: i64,
) -> Result<ProductCatalog> {
    let rows = sqlx::query(
        "SELECT product_id, norm_name, family FROM catalog_products WHERE catalog_version = ? ORDER BY norm_name ASC",
    )
    .bind(version)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ProductCatalog {
        version,
        entries: rows
            .into_iter()
            .map(|row| ProductEntry {
                product_id: row.get("product_id"),
                norm_name: row.get("norm_name"),
                family: row.get("family"),
            })
            .collect(),
    })
}

pub async fn load_routes(conn: &mut SqliteConnection, version: i64) -> Result<RouteCatalog> {
    let rows = sqlx::query("SELECT norm_name FROM catalog_routes WHERE catalog_version = ?")
        .bind(version)
        .fetch_all(&mut *conn)
        .await?;

    Ok(RouteCatalog {
        version,
        routes: rows.into_iter().map(|row| row.get("norm_name")).collect(),
    })
}
