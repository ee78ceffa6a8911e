//! Stock-in ledger: receipts, their entries and stock adjustments.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;

use crate::db::{collect_rows, now_stamp};
use crate::error::{LedgerError, Result};
use crate::ledger::{audit, catalog};
use crate::model::{Actor, DateRange, ProductRef, ReceiptKind, ReceiptLine, StockReceipt};

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptLineInput {
    pub name: String,
    pub brand: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptEditLine {
    #[serde(default)]
    pub entry_id: Option<i64>,
    pub name: String,
    pub brand: String,
    pub quantity: i64,
}

fn insert_receipt(conn: &Connection, actor: &Actor, kind: ReceiptKind) -> Result<i64> {
    conn.execute(
        "INSERT INTO stock_receipts (user_id, kind, created_at) VALUES (?1, ?2, ?3)",
        params![actor.user_id, kind.as_str(), now_stamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_entry(conn: &Connection, receipt_id: i64, product_id: i64, quantity: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO inventory_entries (receipt_id, product_id, quantity, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![receipt_id, product_id, quantity, now_stamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Books received goods. Unknown products are created on first sight.
pub fn create_receipt(conn: &Connection, actor: &Actor, lines: &[ReceiptLineInput]) -> Result<StockReceipt> {
    if lines.is_empty() {
        return Err(LedgerError::validation("send at least one item"));
    }
    let mut keyed = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        let key = catalog::product_key(&line.name, &line.brand, idx + 1)?;
        if line.quantity <= 0 {
            return Err(LedgerError::validation(format!(
                "line {}: quantity must be greater than zero",
                idx + 1
            )));
        }
        keyed.push((key, line.quantity));
    }

    let receipt_id = insert_receipt(conn, actor, ReceiptKind::Receipt)?;
    for (idx, ((name, brand), qty)) in keyed.iter().enumerate() {
        let product = catalog::find_or_create(conn, name, brand)?;
        catalog::adjust_stock(conn, product.id, *qty, idx + 1)?;
        let entry_id = insert_entry(conn, receipt_id, product.id, *qty)?;
        audit::record(
            conn,
            actor,
            "receive_product",
            "inventory_entries",
            Some(entry_id),
            format!(
                "Received {qty} unit(s) of {} (id {}) in receipt {receipt_id}",
                product.label(),
                product.id
            ),
        )?;
    }
    audit::record(
        conn,
        actor,
        "create_receipt",
        "stock_receipts",
        Some(receipt_id),
        format!("Created receipt #{receipt_id} with {} item(s)", keyed.len()),
    )?;
    get_receipt(conn, receipt_id)
}

/// Rewrites a receipt's lines. Stock moves by the difference between the
/// stored and the submitted quantity, so re-submitting the same edit is a
/// no-op.
pub fn edit_receipt(
    conn: &Connection,
    actor: &Actor,
    receipt_id: i64,
    lines: &[ReceiptEditLine],
) -> Result<StockReceipt> {
    let receipt = get_receipt(conn, receipt_id)?;
    if receipt.kind == ReceiptKind::Adjustment {
        return Err(LedgerError::validation("stock adjustments cannot be edited"));
    }
    if lines.is_empty() {
        return Err(LedgerError::validation("send at least one item"));
    }

    let existing: HashMap<i64, (i64, i64)> = receipt
        .items
        .iter()
        .map(|i| (i.entry_id, (i.product.id, i.quantity)))
        .collect();
    let mut seen = HashSet::new();
    let mut deltas = catalog::StockDeltas::default();

    for (idx, line) in lines.iter().enumerate() {
        let n = idx + 1;
        if line.quantity < 0 {
            return Err(LedgerError::validation(format!("line {n}: quantity cannot be negative")));
        }
        let (name, brand) = catalog::product_key(&line.name, &line.brand, n)?;
        let product = catalog::find_or_create(conn, &name, &brand)?;

        match line.entry_id {
            Some(entry_id) => {
                let (old_product, old_qty) = *existing.get(&entry_id).ok_or_else(|| {
                    LedgerError::validation(format!(
                        "line {n}: entry {entry_id} does not belong to receipt {receipt_id}"
                    ))
                })?;
                if !seen.insert(entry_id) {
                    return Err(LedgerError::validation(format!(
                        "line {n}: entry {entry_id} listed twice"
                    )));
                }
                deltas.add(old_product, -old_qty, n);
                deltas.add(product.id, line.quantity, n);
                conn.execute(
                    "UPDATE inventory_entries SET product_id = ?1, quantity = ?2 WHERE id = ?3",
                    params![product.id, line.quantity, entry_id],
                )?;
            }
            None => {
                deltas.add(product.id, line.quantity, n);
                let entry_id = insert_entry(conn, receipt_id, product.id, line.quantity)?;
                seen.insert(entry_id);
            }
        }
    }

    let mut removed = 0;
    for (entry_id, (product_id, qty)) in &existing {
        if !seen.contains(entry_id) {
            deltas.add(*product_id, -qty, 0);
            conn.execute("DELETE FROM inventory_entries WHERE id = ?1", params![entry_id])?;
            removed += 1;
        }
    }
    deltas.apply(conn)?;

    audit::record(
        conn,
        actor,
        "edit_receipt",
        "stock_receipts",
        Some(receipt_id),
        format!(
            "Edited receipt #{receipt_id}: {} line(s) kept or added, {removed} removed",
            lines.len()
        ),
    )?;
    get_receipt(conn, receipt_id)
}

/// Deletes a receipt and takes its units back out of stock.
pub fn delete_receipt(conn: &Connection, actor: &Actor, receipt_id: i64) -> Result<StockReceipt> {
    let receipt = get_receipt(conn, receipt_id)?;
    for (idx, item) in receipt.items.iter().enumerate() {
        catalog::adjust_stock(conn, item.product.id, -item.quantity, idx + 1)?;
    }
    conn.execute("DELETE FROM stock_receipts WHERE id = ?1", params![receipt_id])?;
    audit::record(
        conn,
        actor,
        "delete_receipt",
        "stock_receipts",
        Some(receipt_id),
        format!(
            "Deleted receipt #{receipt_id} ({} unit(s) removed from stock)",
            receipt.total_units()
        ),
    )?;
    Ok(receipt)
}

/// Journals a signed stock correction for one product.
pub(crate) fn record_adjustment(conn: &Connection, actor: &Actor, product_id: i64, delta: i64) -> Result<i64> {
    let product = catalog::adjust_stock(conn, product_id, delta, 1)?;
    let receipt_id = insert_receipt(conn, actor, ReceiptKind::Adjustment)?;
    let entry_id = insert_entry(conn, receipt_id, product_id, delta)?;
    audit::record(
        conn,
        actor,
        "stock_adjustment",
        "inventory_entries",
        Some(entry_id),
        format!(
            "Adjusted stock of {} (id {product_id}) by {delta:+} to {}",
            product.label(),
            product.stock
        ),
    )?;
    Ok(entry_id)
}

fn receipt_lines(conn: &Connection, receipt_id: i64) -> Result<Vec<ReceiptLine>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, p.id, p.name, p.brand, e.quantity
         FROM inventory_entries e JOIN products p ON p.id = e.product_id
         WHERE e.receipt_id = ?1 ORDER BY e.id ASC",
    )?;
    let rows = stmt.query_map(params![receipt_id], |r| {
        Ok(ReceiptLine {
            entry_id: r.get(0)?,
            product: ProductRef {
                id: r.get(1)?,
                name: r.get(2)?,
                brand: r.get(3)?,
            },
            quantity: r.get(4)?,
        })
    })?;
    collect_rows(rows)
}

type ReceiptHeader = (i64, String, Option<String>, String);

fn header_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ReceiptHeader> {
    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
}

fn assemble(conn: &Connection, (id, kind, operator, created_at): ReceiptHeader) -> Result<StockReceipt> {
    Ok(StockReceipt {
        id,
        kind: ReceiptKind::parse(&kind).unwrap_or(ReceiptKind::Receipt),
        operator,
        created_at,
        items: receipt_lines(conn, id)?,
    })
}

pub fn get_receipt(conn: &Connection, receipt_id: i64) -> Result<StockReceipt> {
    let header = conn
        .query_row(
            "SELECT r.id, r.kind, u.name, r.created_at
             FROM stock_receipts r LEFT JOIN users u ON u.id = r.user_id
             WHERE r.id = ?1",
            params![receipt_id],
            header_from_row,
        )
        .optional()?
        .ok_or_else(|| LedgerError::not_found(format!("receipt {receipt_id} not found")))?;
    assemble(conn, header)
}

/// Receipts inside the day range, newest first.
pub fn history(conn: &Connection, range: &DateRange) -> Result<Vec<StockReceipt>> {
    let mut sql = String::from(
        "SELECT r.id, r.kind, u.name, r.created_at
         FROM stock_receipts r LEFT JOIN users u ON u.id = r.user_id WHERE 1 = 1",
    );
    let mut args = Vec::new();
    if let Some(lo) = range.lower_bound() {
        args.push(lo);
        sql.push_str(&format!(" AND r.created_at >= ?{}", args.len()));
    }
    if let Some(hi) = range.upper_bound() {
        args.push(hi);
        sql.push_str(&format!(" AND r.created_at < ?{}", args.len()));
    }
    sql.push_str(" ORDER BY r.id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let headers = collect_rows(stmt.query_map(params_from_iter(args.iter()), header_from_row)?)?;
    headers.into_iter().map(|h| assemble(conn, h)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::ledger::catalog::get_product;
    use crate::ledger::testing::{actor, seed_user};

    fn line(name: &str, qty: i64) -> ReceiptLineInput {
        ReceiptLineInput { name: name.into(), brand: "Acme".into(), quantity: qty }
    }

    fn edit(entry_id: Option<i64>, name: &str, qty: i64) -> ReceiptEditLine {
        ReceiptEditLine { entry_id, name: name.into(), brand: "Acme".into(), quantity: qty }
    }

    #[test]
    fn receipt_creates_products_and_adds_stock() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "op", false));
            let r = create_receipt(tx, &a, &[line("Drill", 3), line("drill", 2), line("Saw", 1)])?;
            assert_eq!(r.items.len(), 3);
            assert_eq!(r.operator.as_deref(), Some("op name"));
            let drill = get_product(tx, r.items[0].product.id)?;
            assert_eq!(drill.stock, 5);
            assert_eq!(r.items[1].product.id, drill.id);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn invalid_lines_are_rejected_before_any_write() {
        let db = Database::open_in_memory().unwrap();
        let a = db.transaction(|tx| Ok(actor(seed_user(tx, "op", false)))).unwrap();
        let res = db.transaction(|tx| create_receipt(tx, &a, &[line("Drill", 3), line("", 2)]));
        assert!(matches!(res, Err(LedgerError::Validation(_))));
        let res = db.transaction(|tx| create_receipt(tx, &a, &[line("Drill", 0)]));
        assert!(matches!(res, Err(LedgerError::Validation(_))));
        let count: i64 = db
            .transaction(|tx| Ok(tx.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn edits_diff_against_stored_quantity() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "op", false));
            let r = create_receipt(tx, &a, &[line("Drill", 10)])?;
            let entry = r.items[0].entry_id;
            let pid = r.items[0].product.id;

            let mut applied = 10;
            for qty in [4, 12, 12, 0, 7] {
                edit_receipt(tx, &a, r.id, &[edit(Some(entry), "Drill", qty)])?;
                applied = qty;
                assert_eq!(get_product(tx, pid)?.stock, applied);
            }
            assert_eq!(applied, 7);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn edit_moves_units_between_products_and_drops_omitted_lines() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "op", false));
            let r = create_receipt(tx, &a, &[line("Drill", 5), line("Saw", 2)])?;
            let drill = r.items[0].product.id;
            let saw = r.items[1].product.id;

            let edited = edit_receipt(
                tx,
                &a,
                r.id,
                &[edit(Some(r.items[0].entry_id), "Hammer", 5), edit(None, "Saw", 1)],
            )?;
            assert_eq!(edited.items.len(), 2);
            assert_eq!(get_product(tx, drill)?.stock, 0);
            assert_eq!(get_product(tx, saw)?.stock, 1);
            assert_eq!(get_product(tx, edited.items[0].product.id)?.name, "Hammer");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn edit_refuses_negative_stock() {
        let db = Database::open_in_memory().unwrap();
        let (a, r) = db
            .transaction(|tx| {
                let a = actor(seed_user(tx, "op", false));
                let r = create_receipt(tx, &a, &[line("Drill", 5)])?;
                let pid = r.items[0].product.id;
                tx.execute("UPDATE products SET stock = 1 WHERE id = ?1", params![pid])?;
                Ok((a, r))
            })
            .unwrap();
        let res = db.transaction(|tx| edit_receipt(tx, &a, r.id, &[edit(Some(r.items[0].entry_id), "Drill", 0)]));
        assert!(matches!(res, Err(LedgerError::InsufficientStock { .. })));
    }

    #[test]
    fn swapping_mislabeled_lines_only_checks_final_stock() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "op", false));
            let r = create_receipt(tx, &a, &[line("Drill", 5), line("Saw", 5)])?;
            let (drill, saw) = (r.items[0].product.id, r.items[1].product.id);
            tx.execute("UPDATE products SET stock = 0", [])?;

            let edited = edit_receipt(
                tx,
                &a,
                r.id,
                &[edit(Some(r.items[0].entry_id), "Saw", 5), edit(Some(r.items[1].entry_id), "Drill", 5)],
            )?;
            assert_eq!(edited.items[0].product.id, saw);
            assert_eq!(edited.items[1].product.id, drill);
            assert_eq!(get_product(tx, drill)?.stock, 0);
            assert_eq!(get_product(tx, saw)?.stock, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_receipt_takes_units_back() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "op", false));
            let r = create_receipt(tx, &a, &[line("Drill", 5)])?;
            delete_receipt(tx, &a, r.id)?;
            assert_eq!(get_product(tx, r.items[0].product.id)?.stock, 0);
            assert!(matches!(get_receipt(tx, r.id), Err(LedgerError::NotFound(_))));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn history_respects_date_range() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "op", false));
            let old = create_receipt(tx, &a, &[line("Drill", 1)])?;
            tx.execute(
                "UPDATE stock_receipts SET created_at = '2021-06-01 08:00:00' WHERE id = ?1",
                params![old.id],
            )?;
            create_receipt(tx, &a, &[line("Drill", 1)])?;

            assert_eq!(history(tx, &DateRange::default())?.len(), 2);
            let june = DateRange::parse(Some("01/06/2021"), Some("2021-06-30"))?;
            let found = history(tx, &june)?;
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, old.id);
            Ok(())
        })
        .unwrap();
    }
}
