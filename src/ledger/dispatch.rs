//! Outbound dispatch batches, their lines and photo evidence.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::{collect_rows, now_stamp};
use crate::error::{LedgerError, Result};
use crate::ledger::{audit, catalog, clients};
use crate::model::{
    clean_optional, Actor, DateRange, DispatchBatch, DispatchLine, DispatchPhoto, DispatchStatus,
    PhotoStage, Product, ProductRef,
};

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchLineInput {
    pub name: String,
    pub brand: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDispatch {
    pub client: String,
    #[serde(default)]
    pub order_number: Option<String>,
    pub items: Vec<DispatchLineInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedLine {
    pub product: ProductRef,
    pub requested: i64,
    pub dispatched: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub batch_id: i64,
    pub processed: Vec<ProcessedLine>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchEditLine {
    #[serde(default)]
    pub entry_id: Option<i64>,
    pub name: String,
    pub brand: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchEdit {
    pub client: String,
    #[serde(default)]
    pub order_number: Option<String>,
    pub items: Vec<DispatchEditLine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchFilter {
    pub operator: Option<String>,
    pub client: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Existing catalog product for a dispatch line; dispatches never create
/// products.
fn existing_product(conn: &Connection, name: &str, brand: &str, line: usize) -> Result<Product> {
    let (name, brand) = catalog::product_key(name, brand, line)?;
    catalog::find_by_name_brand(conn, &name, &brand)?.ok_or_else(|| {
        LedgerError::validation(format!(
            "line {line}: product {name} / {brand} is not in the inventory"
        ))
    })
}

fn insert_entry(
    conn: &Connection,
    batch_id: i64,
    product_id: i64,
    requested: i64,
    dispatched: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO dispatch_entries (batch_id, product_id, requested, quantity, short, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            batch_id,
            product_id,
            requested,
            dispatched,
            dispatched < requested,
            now_stamp()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Ships goods to a client. A line asking for more than is on hand ships
/// what there is, is flagged short, and produces a warning.
pub fn create_dispatch(conn: &Connection, actor: &Actor, input: &NewDispatch) -> Result<DispatchOutcome> {
    let client = clients::find_or_create(conn, &input.client)?;
    if input.items.is_empty() {
        return Err(LedgerError::validation("send at least one item"));
    }
    let mut lines = Vec::with_capacity(input.items.len());
    for (idx, item) in input.items.iter().enumerate() {
        if item.quantity <= 0 {
            return Err(LedgerError::validation(format!(
                "line {}: quantity must be greater than zero",
                idx + 1
            )));
        }
        let product = existing_product(conn, &item.name, &item.brand, idx + 1)?;
        lines.push((product.id, item.quantity));
    }
    let order_number = clean_optional(input.order_number.as_deref());

    conn.execute(
        "INSERT INTO dispatch_batches (client_id, user_id, order_number, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![client.id, actor.user_id, order_number, now_stamp()],
    )?;
    let batch_id = conn.last_insert_rowid();
    let order_label = order_number.as_deref().unwrap_or("no order");

    let mut processed = Vec::with_capacity(lines.len());
    let mut warnings = Vec::new();
    for (idx, (product_id, requested)) in lines.into_iter().enumerate() {
        let product = catalog::get_product(conn, product_id)?;
        let dispatched = product.stock.min(requested);
        if dispatched < requested {
            warnings.push(format!(
                "line {}: only {} unit(s) of {} on hand; dispatching {}",
                idx + 1,
                product.stock,
                product.label(),
                dispatched
            ));
        }
        catalog::adjust_stock(conn, product_id, -dispatched, idx + 1)?;
        let entry_id = insert_entry(conn, batch_id, product_id, requested, dispatched)?;
        audit::record(
            conn,
            actor,
            "dispatch_product",
            "dispatch_entries",
            Some(entry_id),
            format!(
                "Dispatched {} (id {product_id}): requested {requested}, sent {dispatched}, order {order_label}",
                product.label()
            ),
        )?;
        processed.push(ProcessedLine {
            product: product.to_ref(),
            requested,
            dispatched,
        });
    }

    audit::record(
        conn,
        actor,
        "create_dispatch",
        "dispatch_batches",
        Some(batch_id),
        format!(
            "Created dispatch #{batch_id} for client {} (order {order_label})",
            client.name
        ),
    )?;
    Ok(DispatchOutcome {
        batch_id,
        processed,
        warnings,
    })
}

/// Rewrites a dispatch. Stock moves by `old - new` per line, netted per
/// product; unlike creation, an edit that leaves any product below zero is
/// refused outright.
pub fn edit_dispatch(conn: &Connection, actor: &Actor, batch_id: i64, edit: &DispatchEdit) -> Result<DispatchBatch> {
    let batch = get_dispatch(conn, batch_id)?;
    let client = clients::find_or_create(conn, &edit.client)?;
    if edit.items.is_empty() {
        return Err(LedgerError::validation("send at least one item"));
    }
    let order_number = clean_optional(edit.order_number.as_deref());
    conn.execute(
        "UPDATE dispatch_batches SET client_id = ?1, order_number = ?2 WHERE id = ?3",
        params![client.id, order_number, batch_id],
    )?;

    let existing: HashMap<i64, (i64, i64)> = batch
        .items
        .iter()
        .map(|l| (l.entry_id, (l.product.id, l.dispatched)))
        .collect();
    let mut seen = HashSet::new();
    let mut deltas = catalog::StockDeltas::default();

    for (idx, line) in edit.items.iter().enumerate() {
        let n = idx + 1;
        if line.quantity < 0 {
            return Err(LedgerError::validation(format!("line {n}: quantity cannot be negative")));
        }
        let product = existing_product(conn, &line.name, &line.brand, n)?;

        match line.entry_id {
            Some(entry_id) => {
                let (old_product, old_qty) = *existing.get(&entry_id).ok_or_else(|| {
                    LedgerError::validation(format!(
                        "line {n}: entry {entry_id} does not belong to dispatch {batch_id}"
                    ))
                })?;
                if !seen.insert(entry_id) {
                    return Err(LedgerError::validation(format!(
                        "line {n}: entry {entry_id} listed twice"
                    )));
                }
                deltas.add(old_product, old_qty, n);
                deltas.add(product.id, -line.quantity, n);
                conn.execute(
                    "UPDATE dispatch_entries
                     SET product_id = ?1, requested = ?2, quantity = ?2, short = 0
                     WHERE id = ?3",
                    params![product.id, line.quantity, entry_id],
                )?;
            }
            None => {
                deltas.add(product.id, -line.quantity, n);
                let entry_id = insert_entry(conn, batch_id, product.id, line.quantity, line.quantity)?;
                seen.insert(entry_id);
            }
        }
    }

    let mut removed = 0;
    for (entry_id, (product_id, qty)) in &existing {
        if !seen.contains(entry_id) {
            deltas.add(*product_id, *qty, 0);
            conn.execute("DELETE FROM dispatch_entries WHERE id = ?1", params![entry_id])?;
            removed += 1;
        }
    }
    deltas.apply(conn)?;

    audit::record(
        conn,
        actor,
        "edit_dispatch",
        "dispatch_batches",
        Some(batch_id),
        format!(
            "Edited dispatch #{batch_id}: client {}, order {}, {} line(s), {removed} removed",
            client.name,
            order_number.as_deref().unwrap_or("no order"),
            edit.items.len()
        ),
    )?;
    get_dispatch(conn, batch_id)
}

/// Cancels a dispatch, returning its units to stock. The returned batch
/// still lists its photos so the caller can remove the files.
pub fn delete_dispatch(conn: &Connection, actor: &Actor, batch_id: i64) -> Result<DispatchBatch> {
    let batch = get_dispatch(conn, batch_id)?;
    for (idx, line) in batch.items.iter().enumerate() {
        catalog::adjust_stock(conn, line.product.id, line.dispatched, idx + 1)?;
    }
    conn.execute("DELETE FROM dispatch_batches WHERE id = ?1", params![batch_id])?;
    audit::record(
        conn,
        actor,
        "delete_dispatch",
        "dispatch_batches",
        Some(batch_id),
        format!("Deleted dispatch #{batch_id} for client {}", batch.client),
    )?;
    Ok(batch)
}

fn dispatch_lines(conn: &Connection, batch_id: i64) -> Result<Vec<DispatchLine>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, p.id, p.name, p.brand, e.requested, e.quantity, e.short
         FROM dispatch_entries e JOIN products p ON p.id = e.product_id
         WHERE e.batch_id = ?1 ORDER BY e.id ASC",
    )?;
    let rows = stmt.query_map(params![batch_id], |r| {
        Ok(DispatchLine {
            entry_id: r.get(0)?,
            product: ProductRef {
                id: r.get(1)?,
                name: r.get(2)?,
                brand: r.get(3)?,
            },
            requested: r.get(4)?,
            dispatched: r.get(5)?,
            short: r.get(6)?,
        })
    })?;
    collect_rows(rows)
}

struct BatchHeader {
    id: i64,
    client_id: i64,
    client: String,
    operator: Option<String>,
    order_number: Option<String>,
    created_at: String,
}

const HEADER_SELECT: &str = "SELECT b.id, b.client_id, c.name, u.name, b.order_number, b.created_at
     FROM dispatch_batches b
     JOIN clients c ON c.id = b.client_id
     LEFT JOIN users u ON u.id = b.user_id";

fn header_from_row(r: &Row<'_>) -> rusqlite::Result<BatchHeader> {
    Ok(BatchHeader {
        id: r.get(0)?,
        client_id: r.get(1)?,
        client: r.get(2)?,
        operator: r.get(3)?,
        order_number: r.get(4)?,
        created_at: r.get(5)?,
    })
}

fn assemble(conn: &Connection, h: BatchHeader) -> Result<DispatchBatch> {
    let items = dispatch_lines(conn, h.id)?;
    Ok(DispatchBatch {
        id: h.id,
        client_id: h.client_id,
        client: h.client,
        operator: h.operator,
        order_number: h.order_number,
        created_at: h.created_at,
        status: DispatchStatus::of(&items),
        items,
        photos: list_photos(conn, h.id)?,
    })
}

pub fn get_dispatch(conn: &Connection, batch_id: i64) -> Result<DispatchBatch> {
    let header = conn
        .query_row(
            &format!("{HEADER_SELECT} WHERE b.id = ?1"),
            params![batch_id],
            header_from_row,
        )
        .optional()?
        .ok_or_else(|| LedgerError::not_found(format!("dispatch {batch_id} not found")))?;
    assemble(conn, header)
}

/// Batches linked to an order number, newest first.
pub fn for_order(conn: &Connection, order_number: &str) -> Result<Vec<DispatchBatch>> {
    let mut stmt = conn.prepare(&format!(
        "{HEADER_SELECT} WHERE b.order_number = ?1 ORDER BY b.id DESC"
    ))?;
    let headers = collect_rows(stmt.query_map(params![order_number], header_from_row)?)?;
    headers.into_iter().map(|h| assemble(conn, h)).collect()
}

/// Dispatch history. Operator matches username or display name; all text
/// filters are case-insensitive substrings.
pub fn history(conn: &Connection, filter: &DispatchFilter) -> Result<Vec<DispatchBatch>> {
    let range = DateRange::parse(filter.start.as_deref(), filter.end.as_deref())?;
    let mut sql = format!("{HEADER_SELECT} WHERE 1 = 1");
    let mut args: Vec<String> = Vec::new();

    if let Some(op) = filter.operator.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        args.push(op.to_lowercase());
        let n = args.len();
        sql.push_str(&format!(
            " AND (instr(lower(COALESCE(u.username, '')), ?{n}) > 0 OR instr(lower(COALESCE(u.name, '')), ?{n}) > 0)"
        ));
    }
    if let Some(cl) = filter.client.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        args.push(cl.to_lowercase());
        sql.push_str(&format!(" AND instr(lower(c.name), ?{}) > 0", args.len()));
    }
    if let Some(lo) = range.lower_bound() {
        args.push(lo);
        sql.push_str(&format!(" AND b.created_at >= ?{}", args.len()));
    }
    if let Some(hi) = range.upper_bound() {
        args.push(hi);
        sql.push_str(&format!(" AND b.created_at < ?{}", args.len()));
    }
    sql.push_str(" ORDER BY b.created_at DESC, b.id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let headers = collect_rows(stmt.query_map(params_from_iter(args.iter()), header_from_row)?)?;
    headers.into_iter().map(|h| assemble(conn, h)).collect()
}

fn photo_from_row(r: &Row<'_>) -> rusqlite::Result<DispatchPhoto> {
    let stage: String = r.get(2)?;
    let path: String = r.get(3)?;
    Ok(DispatchPhoto {
        id: r.get(0)?,
        batch_id: r.get(1)?,
        stage: PhotoStage::parse(&stage).unwrap_or(PhotoStage::Exit),
        url: format!("/uploads/{path}"),
        path,
        created_at: r.get(4)?,
    })
}

pub fn list_photos(conn: &Connection, batch_id: i64) -> Result<Vec<DispatchPhoto>> {
    let mut stmt = conn.prepare(
        "SELECT id, batch_id, stage, path, created_at FROM dispatch_photos
         WHERE batch_id = ?1 ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![batch_id], photo_from_row)?;
    collect_rows(rows)
}

/// Records a stored photo file against a batch.
pub fn add_photo(
    conn: &Connection,
    actor: &Actor,
    batch_id: i64,
    stage: PhotoStage,
    path: &str,
) -> Result<DispatchPhoto> {
    ensure_exists(conn, batch_id)?;
    conn.execute(
        "INSERT INTO dispatch_photos (batch_id, stage, path, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![batch_id, stage.as_str(), path, now_stamp()],
    )?;
    let id = conn.last_insert_rowid();
    audit::record(
        conn,
        actor,
        "upload_dispatch_photo",
        "dispatch_batches",
        Some(batch_id),
        format!("Uploaded {} photo for dispatch #{batch_id}", stage.as_str()),
    )?;
    Ok(conn.query_row(
        "SELECT id, batch_id, stage, path, created_at FROM dispatch_photos WHERE id = ?1",
        params![id],
        photo_from_row,
    )?)
}

/// Deletes the photo row; the caller removes the file after commit.
pub fn remove_photo(conn: &Connection, actor: &Actor, batch_id: i64, photo_id: i64) -> Result<DispatchPhoto> {
    let photo = conn
        .query_row(
            "SELECT id, batch_id, stage, path, created_at FROM dispatch_photos
             WHERE id = ?1 AND batch_id = ?2",
            params![photo_id, batch_id],
            photo_from_row,
        )
        .optional()?
        .ok_or_else(|| {
            LedgerError::not_found(format!("photo {photo_id} not found on dispatch {batch_id}"))
        })?;
    conn.execute("DELETE FROM dispatch_photos WHERE id = ?1", params![photo_id])?;
    audit::record(
        conn,
        actor,
        "delete_dispatch_photo",
        "dispatch_batches",
        Some(batch_id),
        format!(
            "Deleted {} photo {photo_id} from dispatch #{batch_id}",
            photo.stage.as_str()
        ),
    )?;
    Ok(photo)
}

pub fn ensure_exists(conn: &Connection, batch_id: i64) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM dispatch_batches WHERE id = ?1",
            params![batch_id],
            |r| r.get(0),
        )
        .optional()?;
    found
        .map(|_| ())
        .ok_or_else(|| LedgerError::not_found(format!("dispatch {batch_id} not found")))
}
