//! Purchase orders and their reconciliation against dispatched goods.
//!
//! A dispatch batch belongs to an order through its `order_number`; no
//! other link is stored, so renumbering an order rewrites that column on
//! every linked batch.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use crate::db::{collect_rows, now_stamp};
use crate::error::{LedgerError, Result};
use crate::ledger::{audit, catalog, clients, dispatch};
use crate::model::{clean_text, Actor, OrderDetail, OrderLine, OrderStatus, OrderSummary, ProductRef};

#[derive(Debug, Clone, Deserialize)]
pub struct OrderLineInput {
    pub name: String,
    pub brand: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub number: String,
    pub client: String,
    pub items: Vec<OrderLineInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderEditLine {
    #[serde(default)]
    pub item_id: Option<i64>,
    pub name: String,
    pub brand: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderEdit {
    pub number: String,
    pub client: String,
    pub items: Vec<OrderEditLine>,
}

/// Complete when every line is covered, partial when anything has shipped,
/// pending otherwise. An order without lines is pending.
pub fn order_status(lines: &[OrderLine]) -> OrderStatus {
    if lines.is_empty() {
        return OrderStatus::Pending;
    }
    if lines.iter().all(|l| l.dispatched >= l.requested) {
        OrderStatus::Complete
    } else if lines.iter().any(|l| l.dispatched > 0) {
        OrderStatus::Partial
    } else {
        OrderStatus::Pending
    }
}

/// Spreads the dispatched total of each product over that product's lines
/// in line order. Whatever is left after the last line lands on it.
pub fn allocate(items: &[(i64, ProductRef, i64)], shipped: &HashMap<i64, i64>) -> Vec<OrderLine> {
    let mut remaining = shipped.clone();
    let mut last_line: HashMap<i64, usize> = HashMap::new();
    for (idx, (_, product, _)) in items.iter().enumerate() {
        last_line.insert(product.id, idx);
    }

    items
        .iter()
        .enumerate()
        .map(|(idx, (item_id, product, requested))| {
            let left = remaining.entry(product.id).or_insert(0);
            let dispatched = if last_line.get(&product.id) == Some(&idx) {
                *left
            } else {
                (*left).min(*requested)
            };
            *left -= dispatched;
            OrderLine {
                item_id: *item_id,
                product: product.clone(),
                requested: *requested,
                dispatched,
                pending: (requested - dispatched).max(0),
            }
        })
        .collect()
}

fn validate_number(raw: &str) -> Result<String> {
    let number = clean_text(raw);
    if number.is_empty() {
        return Err(LedgerError::validation("order number is required"));
    }
    Ok(number)
}

fn ensure_number_free(conn: &Connection, number: &str, except: Option<i64>) -> Result<()> {
    let taken: Option<i64> = conn
        .query_row(
            "SELECT id FROM purchase_orders WHERE number = ?1",
            params![number],
            |r| r.get(0),
        )
        .optional()?;
    match taken {
        Some(id) if Some(id) != except => Err(LedgerError::Conflict(format!(
            "order number {number} already exists"
        ))),
        _ => Ok(()),
    }
}

fn line_product(conn: &Connection, name: &str, brand: &str, quantity: i64, line: usize) -> Result<i64> {
    let (name, brand) = catalog::product_key(name, brand, line)?;
    if quantity <= 0 {
        return Err(LedgerError::validation(format!(
            "line {line}: quantity must be greater than zero"
        )));
    }
    Ok(catalog::find_or_create(conn, &name, &brand)?.id)
}

pub fn create_order(conn: &Connection, actor: &Actor, input: &NewOrder) -> Result<OrderDetail> {
    let number = validate_number(&input.number)?;
    ensure_number_free(conn, &number, None)?;
    let client = clients::find_or_create(conn, &input.client)?;
    if input.items.is_empty() {
        return Err(LedgerError::validation("add at least one item"));
    }

    conn.execute(
        "INSERT INTO purchase_orders (number, client_id, created_at) VALUES (?1, ?2, ?3)",
        params![number, client.id, now_stamp()],
    )?;
    let order_id = conn.last_insert_rowid();
    for (idx, item) in input.items.iter().enumerate() {
        let product_id = line_product(conn, &item.name, &item.brand, item.quantity, idx + 1)?;
        conn.execute(
            "INSERT INTO purchase_order_items (order_id, product_id, quantity) VALUES (?1, ?2, ?3)",
            params![order_id, product_id, item.quantity],
        )?;
    }

    audit::record(
        conn,
        actor,
        "create_purchase_order",
        "purchase_orders",
        Some(order_id),
        format!(
            "Created order {number} for {} with {} item(s)",
            client.name,
            input.items.len()
        ),
    )?;
    order_detail(conn, order_id)
}

pub fn edit_order(conn: &Connection, actor: &Actor, order_id: i64, edit: &OrderEdit) -> Result<OrderDetail> {
    let current = order_detail(conn, order_id)?;
    let number = validate_number(&edit.number)?;
    ensure_number_free(conn, &number, Some(order_id))?;
    let client = clients::find_or_create(conn, &edit.client)?;
    if edit.items.is_empty() {
        return Err(LedgerError::validation("add at least one item"));
    }

    conn.execute(
        "UPDATE purchase_orders SET number = ?1, client_id = ?2 WHERE id = ?3",
        params![number, client.id, order_id],
    )?;
    if number != current.number {
        conn.execute(
            "UPDATE dispatch_batches SET order_number = ?1 WHERE order_number = ?2",
            params![number, current.number],
        )?;
    }

    let existing: HashSet<i64> = current.items.iter().map(|l| l.item_id).collect();
    let mut kept = HashSet::new();
    for (idx, line) in edit.items.iter().enumerate() {
        let n = idx + 1;
        let product_id = line_product(conn, &line.name, &line.brand, line.quantity, n)?;
        match line.item_id {
            Some(item_id) => {
                if !existing.contains(&item_id) {
                    return Err(LedgerError::validation(format!(
                        "line {n}: item {item_id} does not belong to order {}",
                        current.number
                    )));
                }
                if !kept.insert(item_id) {
                    return Err(LedgerError::validation(format!("line {n}: item {item_id} listed twice")));
                }
                conn.execute(
                    "UPDATE purchase_order_items SET product_id = ?1, quantity = ?2 WHERE id = ?3",
                    params![product_id, line.quantity, item_id],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO purchase_order_items (order_id, product_id, quantity) VALUES (?1, ?2, ?3)",
                    params![order_id, product_id, line.quantity],
                )?;
                kept.insert(conn.last_insert_rowid());
            }
        }
    }
    for item_id in existing.difference(&kept) {
        conn.execute("DELETE FROM purchase_order_items WHERE id = ?1", params![item_id])?;
    }

    let renumbered = if number != current.number {
        format!(" (renumbered from {})", current.number)
    } else {
        String::new()
    };
    audit::record(
        conn,
        actor,
        "edit_purchase_order",
        "purchase_orders",
        Some(order_id),
        format!(
            "Edited order {number}{renumbered}: client {}, {} item(s)",
            client.name,
            edit.items.len()
        ),
    )?;
    order_detail(conn, order_id)
}

/// Removes the order and its items. Linked dispatches stay but lose their
/// order number.
pub fn delete_order(conn: &Connection, actor: &Actor, order_id: i64) -> Result<OrderSummary> {
    let summary = summary(conn, order_id)?;
    let detached = conn.execute(
        "UPDATE dispatch_batches SET order_number = NULL WHERE order_number = ?1",
        params![summary.number],
    )?;
    conn.execute("DELETE FROM purchase_orders WHERE id = ?1", params![order_id])?;
    audit::record(
        conn,
        actor,
        "delete_purchase_order",
        "purchase_orders",
        Some(order_id),
        format!(
            "Deleted order {} ({detached} dispatch(es) detached)",
            summary.number
        ),
    )?;
    Ok(summary)
}

struct OrderHeader {
    id: i64,
    number: String,
    client_id: i64,
    client: String,
    created_at: String,
}

fn header(conn: &Connection, order_id: i64) -> Result<OrderHeader> {
    conn.query_row(
        "SELECT o.id, o.number, o.client_id, c.name, o.created_at
         FROM purchase_orders o JOIN clients c ON c.id = o.client_id
         WHERE o.id = ?1",
        params![order_id],
        |r| {
            Ok(OrderHeader {
                id: r.get(0)?,
                number: r.get(1)?,
                client_id: r.get(2)?,
                client: r.get(3)?,
                created_at: r.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found(format!("order {order_id} not found")))
}

fn order_lines(conn: &Connection, order_id: i64, number: &str) -> Result<Vec<OrderLine>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, p.id, p.name, p.brand, i.quantity
         FROM purchase_order_items i JOIN products p ON p.id = i.product_id
         WHERE i.order_id = ?1 ORDER BY i.id ASC",
    )?;
    let items = collect_rows(stmt.query_map(params![order_id], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            ProductRef {
                id: r.get(1)?,
                name: r.get(2)?,
                brand: r.get(3)?,
            },
            r.get::<_, i64>(4)?,
        ))
    })?)?;

    let mut stmt = conn.prepare(
        "SELECT e.product_id, SUM(e.quantity)
         FROM dispatch_entries e JOIN dispatch_batches b ON b.id = e.batch_id
         WHERE b.order_number = ?1 GROUP BY e.product_id",
    )?;
    let shipped: HashMap<i64, i64> = collect_rows(
        stmt.query_map(params![number], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?,
    )?
    .into_iter()
    .collect();

    Ok(allocate(&items, &shipped))
}

fn summary(conn: &Connection, order_id: i64) -> Result<OrderSummary> {
    let h = header(conn, order_id)?;
    let lines = order_lines(conn, h.id, &h.number)?;
    Ok(OrderSummary {
        id: h.id,
        number: h.number,
        client: h.client,
        created_at: h.created_at,
        status: order_status(&lines),
        requested_units: lines.iter().map(|l| l.requested).sum(),
        dispatched_units: lines.iter().map(|l| l.dispatched).sum(),
    })
}

/// Every order, newest first, with its computed status.
pub fn list_orders(conn: &Connection) -> Result<Vec<OrderSummary>> {
    let mut stmt = conn.prepare("SELECT id FROM purchase_orders ORDER BY created_at DESC, id DESC")?;
    let ids = collect_rows(stmt.query_map([], |r| r.get::<_, i64>(0))?)?;
    ids.into_iter().map(|id| summary(conn, id)).collect()
}

pub fn order_detail(conn: &Connection, order_id: i64) -> Result<OrderDetail> {
    let h = header(conn, order_id)?;
    let items = order_lines(conn, h.id, &h.number)?;
    let dispatches = dispatch::for_order(conn, &h.number)?;
    Ok(OrderDetail {
        id: h.id,
        status: order_status(&items),
        number: h.number,
        client_id: h.client_id,
        client: h.client,
        created_at: h.created_at,
        items,
        dispatches,
    })
}

pub fn order_detail_by_number(conn: &Connection, number: &str) -> Result<OrderDetail> {
    let number = number.trim();
    let id: i64 = conn
        .query_row(
            "SELECT id FROM purchase_orders WHERE number = ?1",
            params![number],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| LedgerError::not_found(format!("order {number} not found")))?;
    order_detail(conn, id)
}
