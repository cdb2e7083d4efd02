//! Catalog activation.
//!
//! Writing catalog versions (XLSX upload, validation) is an external
//! collaborator; the core owns the activation flip itself: one
//! transaction moves the single active bit and appends the activation
//! event.

use crate::publisher::EventPublisher;
use crate::{db, error::ApiResult};
use comanda_common::events::DispatchEvent;
use sqlx::SqlitePool;
use tracing::info;

/// Make one products catalog version the active one
pub async fn activate_products(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    version: i64,
    actor: Option<&str>,
) -> ApiResult<()> {
    let mut tx = pool.begin().await?;
    db::catalogs::activate_products(&mut tx, version).await?;
    let staged = db::events::append(
        &mut tx,
        &DispatchEvent::ProductsActivated { version },
        actor,
    )
    .await?;
    tx.commit().await?;

    publisher.broadcast_all(vec![staged]);
    info!(version, "products catalog activated");
    Ok(())
}

/// Make one routes catalog version the active one
pub async fn activate_routes(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    version: i64,
    actor: Option<&str>,
) -> ApiResult<()> {
    let mut tx = pool.begin().await?;
    db::catalogs::activate_routes(&mut tx, version).await?;
    let staged = db::events::append(
        &mut tx,
        &DispatchEvent::RoutesActivated { version },
        actor,
    )
    .await?;
    tx.commit().await?;

    publisher.broadcast_all(vec![staged]);
    info!(version, "routes catalog activated");
    Ok(())
}
