//! Batch processing of one lote: parse, match, assign, all inside one
//! transaction.
//!
//! `process_lote` is idempotent: an OK lote is a no-op, an ERROR lote may
//! be retried (the retry re-snapshots the active catalog versions).
//! Semantic failures commit the lote with its error status; an unexpected
//! failure rolls everything back and records ERROR_PARSE out-of-band, so
//! a lote never ends up with partial clients or lines.

use crate::publisher::EventPublisher;
use crate::{assignment, db, matcher, parser};
use chrono::Utc;
use comanda_common::events::{DispatchEvent, StoredEvent};
use comanda_common::normalize::normalize;
use comanda_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

/// Process one lote end to end. Never returns an error for per-lote
/// semantic problems; those are recorded on the lote and published.
pub async fn process_lote(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    fuzzy_threshold: f64,
    lote_id: Uuid,
) -> Result<()> {
    match process_inner(pool, publisher, fuzzy_threshold, lote_id).await {
        Ok(()) => Ok(()),
        Err(err) => {
            // Unexpected failure: the transaction is already rolled back.
            warn!(lote = %lote_id, error = %err, "lote processing failed");
            let mut conn = pool.acquire().await?;
            db::lotes::set_status(&mut conn, lote_id, "ERROR_PARSE", Some(&err.to_string()))
                .await?;
            drop(conn);
            publisher
                .publish(DispatchEvent::LoteProcessError {
                    lote_id,
                    error: err.to_string(),
                })
                .await?;
            Ok(())
        }
    }
}

async fn process_inner(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    fuzzy_threshold: f64,
    lote_id: Uuid,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    let mut staged: Vec<StoredEvent> = Vec::new();

    let lote = db::lotes::get(&mut tx, lote_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("lote {}", lote_id)))?;

    // Re-processing a successful lote is a no-op.
    if lote.parse_status == "OK" {
        return Ok(());
    }

    let Some(shift) = db::shifts::active_shift(&mut tx).await? else {
        db::lotes::set_status(&mut tx, lote_id, "ERROR_PARSE", Some("no active shift")).await?;
        tx.commit().await?;
        return Ok(());
    };

    // Snapshot the active catalog versions and bind them to the lote. A
    // retried ERROR lote lands here again, which re-binds to whatever is
    // active now.
    let products_version = db::catalogs::active_products_version(&mut tx).await?;
    let routes_version = db::catalogs::active_routes_version(&mut tx).await?;
    let (Some(products_version), Some(routes_version)) = (products_version, routes_version)
    else {
        db::lotes::set_status(&mut tx, lote_id, "ERROR_PARSE", Some("no active catalog")).await?;
        tx.commit().await?;
        return Ok(());
    };
    db::lotes::bind_catalogs(&mut tx, lote_id, products_version, routes_version).await?;

    let products = db::catalogs::load_products(&mut tx, products_version).await?;
    let routes = db::catalogs::load_routes(&mut tx, routes_version).await?;

    // Subject → route.
    let route_key = parser::subject_route_key(&lote.subject_raw);
    if !routes.contains(&route_key) {
        db::lotes::set_status(&mut tx, lote_id, "ERROR_ROUTE", Some("route not in catalog"))
            .await?;
        staged.push(
            db::events::append(
                &mut tx,
                &DispatchEvent::RouteParseError {
                    lote_id,
                    route_norm: route_key,
                },
                None,
            )
            .await?,
        );
        tx.commit().await?;
        publisher.broadcast_all(staged);
        return Ok(());
    }

    db::route_days::find_or_create(&mut tx, shift.id, &route_key).await?;
    db::lotes::bind_route(&mut tx, lote_id, &route_key).await?;

    // Body → clients and lines.
    let parsed = parser::parse_body(&lote.body_raw);
    if !parsed.is_success() {
        let detail = parsed
            .diagnostics
            .iter()
            .map(|d| d.message.clone())
            .collect::<Vec<_>>()
            .join("; ");
        let detail = if detail.is_empty() {
            "no clients found".to_string()
        } else {
            detail
        };
        db::lotes::set_status(&mut tx, lote_id, "ERROR_PARSE", Some(&detail)).await?;
        staged.push(
            db::events::append(
                &mut tx,
                &DispatchEvent::BodyParseError { lote_id, detail },
                None,
            )
            .await?,
        );
        tx.commit().await?;
        publisher.broadcast_all(staged);
        return Ok(());
    }

    let mut line_count = 0usize;
    let client_count = parsed.clients.len();

    for client in &parsed.clients {
        let client_order_id = db::lotes::insert_client_order(
            &mut tx,
            lote_id,
            &client.name,
            &normalize(&client.name),
            client.observations.as_deref(),
        )
        .await?;

        for (idx, parsed_line) in client.lines.iter().enumerate() {
            let product_norm = normalize(&parsed_line.product);

            let matched = matcher::match_product(&products, &parsed_line.product, fuzzy_threshold);

            let (family, match_method, match_score, operator) = match matched {
                None => {
                    staged.push(
                        db::events::append(
                            &mut tx,
                            &DispatchEvent::ProductNotFound {
                                lote_id,
                                product_raw: parsed_line.product.clone(),
                                product_norm: product_norm.clone(),
                            },
                            None,
                        )
                        .await?,
                    );
                    // Unmatched lines land in the catch-all family and are
                    // never assigned.
                    (6i64, None, None, None)
                }
                Some(m) => {
                    if m.method == matcher::MatchMethod::Fuzzy {
                        staged.push(
                            db::events::append(
                                &mut tx,
                                &DispatchEvent::ProductFuzzyMatch {
                                    lote_id,
                                    product_raw: parsed_line.product.clone(),
                                    matched_norm: m.norm_name.clone(),
                                    score: m.score,
                                },
                                None,
                            )
                            .await?,
                        );
                    }

                    let assigned =
                        assignment::assign_operator(&mut tx, shift.id, &client.name, m.family)
                            .await?;
                    if assigned.is_none() {
                        staged.push(
                            db::events::append(
                                &mut tx,
                                &DispatchEvent::EmptyOperatorPool {
                                    lote_id,
                                    functional_code: m.family,
                                },
                                None,
                            )
                            .await?,
                        );
                    }

                    (
                        m.family,
                        Some(m.method.as_str().to_string()),
                        Some(m.score),
                        assigned.map(|a| a.operator),
                    )
                }
            };

            let assigned_at = operator.is_some().then(Utc::now);
            db::lotes::insert_line(
                &mut tx,
                &db::lotes::NewLine {
                    client_order_id,
                    seq_in_client: idx as i64 + 1,
                    quantity: parsed_line.quantity,
                    unit_raw: parsed_line.unit.clone(),
                    product_raw: parsed_line.product.clone(),
                    product_norm,
                    price: Some(parsed_line.price),
                    match_method,
                    match_score,
                    family,
                    functional_code: family,
                    operator,
                    assigned_at,
                },
            )
            .await?;
            line_count += 1;
        }
    }

    db::lotes::set_status(&mut tx, lote_id, "OK", None).await?;
    staged.push(
        db::events::append(
            &mut tx,
            &DispatchEvent::LoteProcessed {
                lote_id,
                route_norm: route_key.clone(),
                clients: client_count,
                lines: line_count,
            },
            None,
        )
        .await?,
    );

    tx.commit().await?;
    publisher.broadcast_all(staged);

    info!(lote = %lote_id, route = %route_key, clients = client_count, lines = line_count, "lote processed");

    // The route state step runs after commit in its own transaction.
    crate::route_state::evaluate_route(pool, publisher, shift.id, &route_key).await?;

    Ok(())
}
