//! Product catalog: lookup, edits, reference accounting and merge.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::collect_rows;
use crate::error::{LedgerError, Result};
use crate::ledger::{audit, inventory};
use crate::model::{clean_optional, clean_text, Actor, Product, ProductUsage};

const SUGGEST_LIMIT: i64 = 10;

pub(crate) fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        brand: row.get(2)?,
        stock: row.get(3)?,
    })
}

pub fn list_products(conn: &Connection) -> Result<Vec<Product>> {
    let mut stmt = conn.prepare("SELECT id, name, brand, stock FROM products ORDER BY id ASC")?;
    let rows = stmt.query_map([], product_from_row)?;
    collect_rows(rows)
}

pub fn get_product(conn: &Connection, id: i64) -> Result<Product> {
    conn.query_row(
        "SELECT id, name, brand, stock FROM products WHERE id = ?1",
        params![id],
        product_from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found(format!("product {id} not found")))
}

/// Autocomplete: products whose name or brand contains `q`.
pub fn suggest(conn: &Connection, q: &str) -> Result<Vec<Product>> {
    let q = q.trim().to_lowercase();
    if q.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT id, name, brand, stock FROM products
         WHERE instr(lower(name), ?1) > 0 OR instr(lower(brand), ?1) > 0
         ORDER BY name ASC, id ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![q, SUGGEST_LIMIT], product_from_row)?;
    collect_rows(rows)
}

/// Case-insensitive exact match on name and brand.
pub fn find_by_name_brand(conn: &Connection, name: &str, brand: &str) -> Result<Option<Product>> {
    Ok(conn
        .query_row(
            "SELECT id, name, brand, stock FROM products
             WHERE name = ?1 COLLATE NOCASE AND brand = ?2 COLLATE NOCASE
             ORDER BY id ASC LIMIT 1",
            params![name, brand],
            product_from_row,
        )
        .optional()?)
}

pub(crate) fn find_or_create(conn: &Connection, name: &str, brand: &str) -> Result<Product> {
    if let Some(p) = find_by_name_brand(conn, name, brand)? {
        return Ok(p);
    }
    conn.execute(
        "INSERT INTO products (name, brand, stock) VALUES (?1, ?2, 0)",
        params![name, brand],
    )?;
    Ok(Product {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        brand: brand.to_string(),
        stock: 0,
    })
}

/// Validated `(name, brand)` pair from raw input.
pub(crate) fn product_key(name: &str, brand: &str, line: usize) -> Result<(String, String)> {
    let (name, brand) = (clean_text(name), clean_text(brand));
    if name.is_empty() || brand.is_empty() {
        return Err(LedgerError::validation(format!(
            "line {line}: product name and brand are required"
        )));
    }
    Ok((name, brand))
}

pub fn create_product(conn: &Connection, actor: &Actor, name: &str, brand: &str) -> Result<Product> {
    let (name, brand) = product_key(name, brand, 1)?;
    if let Some(existing) = find_by_name_brand(conn, &name, &brand)? {
        return Err(LedgerError::Conflict(format!(
            "product {} already exists with id {}",
            existing.label(),
            existing.id
        )));
    }
    let product = find_or_create(conn, &name, &brand)?;
    audit::record(
        conn,
        actor,
        "create_product",
        "products",
        Some(product.id),
        format!("Created product {} (id {})", product.label(), product.id),
    )?;
    Ok(product)
}

/// Applies a signed delta to on-hand stock. This is the only place stock
/// is written besides merge.
pub fn adjust_stock(conn: &Connection, product_id: i64, delta: i64, line: usize) -> Result<Product> {
    let mut product = get_product(conn, product_id)?;
    if delta == 0 {
        return Ok(product);
    }
    let next = product.stock + delta;
    if next < 0 {
        return Err(LedgerError::InsufficientStock {
            line,
            product: product.label(),
            requested: -delta,
            available: product.stock,
        });
    }
    conn.execute(
        "UPDATE products SET stock = ?1 WHERE id = ?2",
        params![next, product_id],
    )?;
    product.stock = next;
    Ok(product)
}

/// Net stock change per product over a multi-line edit. Applied once at the
/// end, so only the resulting stock must be non-negative; the line reported
/// on failure is the first line that touched the product.
#[derive(Debug, Default)]
pub(crate) struct StockDeltas {
    net: BTreeMap<i64, (i64, usize)>,
}

impl StockDeltas {
    pub(crate) fn add(&mut self, product_id: i64, delta: i64, line: usize) {
        self.net.entry(product_id).or_insert((0, line)).0 += delta;
    }

    pub(crate) fn apply(self, conn: &Connection) -> Result<()> {
        for (product_id, (delta, line)) in self.net {
            adjust_stock(conn, product_id, delta, line)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductUpdate {
    pub name: String,
    pub brand: String,
    pub stock: i64,
}

/// Renames a product and/or corrects its stock. A stock change is journaled
/// as an adjustment receipt rather than written directly.
pub fn update_product(conn: &Connection, actor: &Actor, id: i64, update: &ProductUpdate) -> Result<Product> {
    let (name, brand) = product_key(&update.name, &update.brand, 1)?;
    if update.stock < 0 {
        return Err(LedgerError::validation("stock must be zero or greater"));
    }
    let current = get_product(conn, id)?;
    if let Some(other) = find_by_name_brand(conn, &name, &brand)? {
        if other.id != id {
            return Err(LedgerError::Conflict(format!(
                "product {} already exists with id {}; merge instead",
                other.label(),
                other.id
            )));
        }
    }

    conn.execute(
        "UPDATE products SET name = ?1, brand = ?2 WHERE id = ?3",
        params![name, brand, id],
    )?;
    let delta = update.stock - current.stock;
    if delta != 0 {
        inventory::record_adjustment(conn, actor, id, delta)?;
    }
    let product = get_product(conn, id)?;
    audit::record(
        conn,
        actor,
        "update_product",
        "products",
        Some(id),
        format!(
            "Updated product {} (id {}) with stock {} (was {})",
            product.label(),
            id,
            product.stock,
            current.stock
        ),
    )?;
    Ok(product)
}

pub fn usage(conn: &Connection, id: i64) -> Result<ProductUsage> {
    let count = |table: &str| -> Result<i64> {
        Ok(conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE product_id = ?1"),
            params![id],
            |r| r.get(0),
        )?)
    };
    Ok(ProductUsage::new(
        count("inventory_entries")?,
        count("dispatch_entries")?,
        count("purchase_order_items")?,
    ))
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryReference {
    pub id: i64,
    pub receipt_id: i64,
    pub quantity: i64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReference {
    pub id: i64,
    pub dispatch_id: i64,
    pub order_number: Option<String>,
    pub quantity: i64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItemReference {
    pub id: i64,
    pub order_id: i64,
    pub order_number: String,
    pub quantity: i64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductReferences {
    pub product: Product,
    pub inventory_entries: Vec<InventoryReference>,
    pub dispatch_entries: Vec<DispatchReference>,
    pub purchase_order_items: Vec<OrderItemReference>,
}

/// Every row referencing the product, newest first.
pub fn references(conn: &Connection, id: i64) -> Result<ProductReferences> {
    let product = get_product(conn, id)?;

    let mut stmt = conn.prepare(
        "SELECT id, receipt_id, quantity, created_at FROM inventory_entries
         WHERE product_id = ?1 ORDER BY id DESC",
    )?;
    let inventory_entries = collect_rows(stmt.query_map(params![id], |r| {
        Ok(InventoryReference {
            id: r.get(0)?,
            receipt_id: r.get(1)?,
            quantity: r.get(2)?,
            date: r.get(3)?,
        })
    })?)?;

    let mut stmt = conn.prepare(
        "SELECT e.id, e.batch_id, b.order_number, e.quantity, b.created_at
         FROM dispatch_entries e JOIN dispatch_batches b ON b.id = e.batch_id
         WHERE e.product_id = ?1 ORDER BY e.id DESC",
    )?;
    let dispatch_entries = collect_rows(stmt.query_map(params![id], |r| {
        Ok(DispatchReference {
            id: r.get(0)?,
            dispatch_id: r.get(1)?,
            order_number: r.get(2)?,
            quantity: r.get(3)?,
            date: r.get(4)?,
        })
    })?)?;

    let mut stmt = conn.prepare(
        "SELECT i.id, o.id, o.number, i.quantity, o.created_at
         FROM purchase_order_items i JOIN purchase_orders o ON o.id = i.order_id
         WHERE i.product_id = ?1 ORDER BY o.id DESC, i.id DESC",
    )?;
    let purchase_order_items = collect_rows(stmt.query_map(params![id], |r| {
        Ok(OrderItemReference {
            id: r.get(0)?,
            order_id: r.get(1)?,
            order_number: r.get(2)?,
            quantity: r.get(3)?,
            date: r.get(4)?,
        })
    })?)?;

    Ok(ProductReferences {
        product,
        inventory_entries,
        dispatch_entries,
        purchase_order_items,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReferenceSelection {
    pub inventory_entry_ids: Vec<i64>,
    pub dispatch_entry_ids: Vec<i64>,
    pub purchase_order_item_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletedReferences {
    pub inventory_entries: usize,
    pub dispatch_entries: usize,
    pub purchase_order_items: usize,
}

/// Deletes the selected rows that belong to this product, reversing their
/// effect on stock. Ids that belong to other products are ignored.
pub fn delete_references(
    conn: &Connection,
    actor: &Actor,
    id: i64,
    selection: &ReferenceSelection,
) -> Result<DeletedReferences> {
    let product = get_product(conn, id)?;
    let mut deleted = DeletedReferences::default();

    for (idx, entry_id) in selection.inventory_entry_ids.iter().enumerate() {
        let qty: Option<i64> = conn
            .query_row(
                "SELECT quantity FROM inventory_entries WHERE id = ?1 AND product_id = ?2",
                params![entry_id, id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(qty) = qty {
            adjust_stock(conn, id, -qty, idx + 1)?;
            conn.execute("DELETE FROM inventory_entries WHERE id = ?1", params![entry_id])?;
            deleted.inventory_entries += 1;
        }
    }

    for (idx, entry_id) in selection.dispatch_entry_ids.iter().enumerate() {
        let qty: Option<i64> = conn
            .query_row(
                "SELECT quantity FROM dispatch_entries WHERE id = ?1 AND product_id = ?2",
                params![entry_id, id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(qty) = qty {
            adjust_stock(conn, id, qty, idx + 1)?;
            conn.execute("DELETE FROM dispatch_entries WHERE id = ?1", params![entry_id])?;
            deleted.dispatch_entries += 1;
        }
    }

    for item_id in &selection.purchase_order_item_ids {
        deleted.purchase_order_items += conn.execute(
            "DELETE FROM purchase_order_items WHERE id = ?1 AND product_id = ?2",
            params![item_id, id],
        )?;
    }

    audit::record(
        conn,
        actor,
        "delete_product_refs",
        "products",
        Some(id),
        format!(
            "Deleted references of product {} (id {}): inventory {}, dispatches {}, order items {}",
            product.label(),
            id,
            deleted.inventory_entries,
            deleted.dispatch_entries,
            deleted.purchase_order_items
        ),
    )?;
    Ok(deleted)
}

/// Removes an unreferenced product.
pub fn delete_product(conn: &Connection, actor: &Actor, id: i64) -> Result<Product> {
    let product = get_product(conn, id)?;
    let usage = usage(conn, id)?;
    if usage.total > 0 {
        return Err(LedgerError::ProductInUse { product_id: id, usage });
    }
    conn.execute("DELETE FROM products WHERE id = ?1", params![id])?;
    audit::record(
        conn,
        actor,
        "delete_product",
        "products",
        Some(id),
        format!(
            "Deleted product {} (id {}, stock {})",
            product.label(),
            id,
            product.stock
        ),
    )?;
    Ok(product)
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
    pub target_id: i64,
    pub sources: Vec<i64>,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub new_brand: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub target: Product,
    pub merged_sources: Vec<i64>,
}

/// Folds every source product into the target: references are repointed,
/// stock is summed, sources are deleted. Run inside one transaction so a
/// failure leaves nothing half-moved.
pub fn merge_products(conn: &Connection, actor: &Actor, req: &MergeRequest) -> Result<MergeOutcome> {
    let mut sources = req.sources.clone();
    sources.sort_unstable();
    sources.dedup();
    if sources.is_empty() {
        return Err(LedgerError::validation("sources must list at least one product id"));
    }
    if sources.contains(&req.target_id) {
        return Err(LedgerError::validation("target_id cannot also be a source"));
    }
    let target = get_product(conn, req.target_id)?;

    let mut source_products = Vec::with_capacity(sources.len());
    let mut missing = Vec::new();
    for id in &sources {
        match get_product(conn, *id) {
            Ok(p) => source_products.push(p),
            Err(LedgerError::NotFound(_)) => missing.push(*id),
            Err(e) => return Err(e),
        }
    }
    if !missing.is_empty() {
        return Err(LedgerError::not_found(format!(
            "source products not found: {missing:?}"
        )));
    }

    let name = clean_optional(req.new_name.as_deref()).unwrap_or_else(|| target.name.clone());
    let brand = clean_optional(req.new_brand.as_deref()).unwrap_or_else(|| target.brand.clone());
    if let Some(other) = find_by_name_brand(conn, &name, &brand)? {
        if other.id != target.id && !sources.contains(&other.id) {
            return Err(LedgerError::Conflict(format!(
                "product {} already exists (id {})",
                other.label(),
                other.id
            )));
        }
    }
    conn.execute(
        "UPDATE products SET name = ?1, brand = ?2 WHERE id = ?3",
        params![name, brand, target.id],
    )?;

    for src in &source_products {
        for table in ["inventory_entries", "dispatch_entries", "purchase_order_items"] {
            conn.execute(
                &format!("UPDATE {table} SET product_id = ?1 WHERE product_id = ?2"),
                params![target.id, src.id],
            )?;
        }
        conn.execute(
            "UPDATE products SET stock = stock + ?1 WHERE id = ?2",
            params![src.stock, target.id],
        )?;
        conn.execute("DELETE FROM products WHERE id = ?1", params![src.id])?;
        audit::record(
            conn,
            actor,
            "merge_product",
            "products",
            Some(target.id),
            format!(
                "Merged product {} (id {}) into {}; references moved and stock {} added",
                src.label(),
                src.id,
                target.id,
                src.stock
            ),
        )?;
    }

    Ok(MergeOutcome {
        target: get_product(conn, target.id)?,
        merged_sources: sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::ledger::dispatch::{self, DispatchLineInput, NewDispatch};
    use crate::ledger::inventory::{self, ReceiptLineInput};
    use crate::ledger::orders::{self, NewOrder, OrderLineInput};
    use crate::ledger::testing::{actor, seed_user};

    fn receive(tx: &Connection, a: &Actor, name: &str, brand: &str, quantity: i64) -> Product {
        let receipt = inventory::create_receipt(
            tx,
            a,
            &[ReceiptLineInput { name: name.into(), brand: brand.into(), quantity }],
        )
        .unwrap();
        get_product(tx, receipt.items[0].product.id).unwrap()
    }

    fn total_references(tx: &Connection) -> i64 {
        tx.query_row(
            "SELECT (SELECT COUNT(*) FROM inventory_entries)
                  + (SELECT COUNT(*) FROM dispatch_entries)
                  + (SELECT COUNT(*) FROM purchase_order_items)",
            [],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn lookup_is_case_insensitive_and_exact() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "admin", true));
            create_product(tx, &a, "Cable", "Acme")?;
            assert!(find_by_name_brand(tx, "CABLE", "acme")?.is_some());
            assert!(find_by_name_brand(tx, "Cab", "Acme")?.is_none());
            assert!(matches!(
                create_product(tx, &a, "cable", "ACME"),
                Err(LedgerError::Conflict(_))
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn suggest_matches_name_or_brand() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "admin", true));
            create_product(tx, &a, "Steel bolt", "Forge")?;
            create_product(tx, &a, "Nut", "Boltworks")?;
            create_product(tx, &a, "Washer", "Forge")?;
            assert_eq!(suggest(tx, "BOLT")?.len(), 2);
            assert_eq!(suggest(tx, "forge")?.len(), 2);
            assert!(suggest(tx, "   ")?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_rejected_while_referenced() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "admin", true));
            let used = receive(tx, &a, "Glue", "Stik", 4);
            let unused = create_product(tx, &a, "Tape", "Stik")?;

            match delete_product(tx, &a, used.id) {
                Err(LedgerError::ProductInUse { usage, .. }) => {
                    assert_eq!(usage.inventory_entries, 1);
                    assert_eq!(usage.total, 1);
                }
                other => panic!("expected ProductInUse, got {other:?}"),
            }
            delete_product(tx, &a, unused.id)?;
            assert!(matches!(get_product(tx, unused.id), Err(LedgerError::NotFound(_))));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn merge_moves_every_reference_and_sums_stock() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "admin", true));
            let source = receive(tx, &a, "Paint white", "Dulux", 10);
            let target = receive(tx, &a, "White paint", "Dulux", 5);
            dispatch::create_dispatch(
                tx,
                &a,
                &NewDispatch {
                    client: "Acme".into(),
                    order_number: None,
                    items: vec![DispatchLineInput { name: "Paint white".into(), brand: "Dulux".into(), quantity: 3 }],
                },
            )?;
            orders::create_order(
                tx,
                &a,
                &NewOrder {
                    number: "PO-1".into(),
                    client: "Acme".into(),
                    items: vec![OrderLineInput { name: "Paint white".into(), brand: "Dulux".into(), quantity: 2 }],
                },
            )?;
            let before = total_references(tx);

            let outcome = merge_products(
                tx,
                &a,
                &MergeRequest {
                    target_id: target.id,
                    sources: vec![source.id, source.id],
                    new_name: Some(" Paint, white ".into()),
                    new_brand: None,
                },
            )?;

            assert_eq!(outcome.merged_sources, vec![source.id]);
            assert_eq!(outcome.target.name, "Paint, white");
            assert_eq!(outcome.target.stock, 7 + 5);
            assert_eq!(usage(tx, source.id)?.total, 0);
            assert_eq!(usage(tx, target.id)?.total, before);
            assert_eq!(total_references(tx), before);
            assert!(matches!(get_product(tx, source.id), Err(LedgerError::NotFound(_))));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn merge_validation_leaves_data_untouched() {
        let db = Database::open_in_memory().unwrap();
        let (a, target) = db
            .transaction(|tx| {
                let a = actor(seed_user(tx, "admin", true));
                let t = receive(tx, &a, "Rope", "Knot", 2);
                Ok((a, t))
            })
            .unwrap();

        let res = db.transaction(|tx| {
            merge_products(
                tx,
                &a,
                &MergeRequest { target_id: target.id, sources: vec![999], new_name: Some("Renamed".into()), new_brand: None },
            )
        });
        assert!(matches!(res, Err(LedgerError::NotFound(_))));
        let res = db.transaction(|tx| {
            merge_products(
                tx,
                &a,
                &MergeRequest { target_id: target.id, sources: vec![target.id], new_name: None, new_brand: None },
            )
        });
        assert!(matches!(res, Err(LedgerError::Validation(_))));

        let still = db.transaction(|tx| get_product(tx, target.id)).unwrap();
        assert_eq!(still.name, "Rope");
    }

    #[test]
    fn merge_rename_cannot_collide_with_an_unrelated_product() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "admin", true));
            let target = create_product(tx, &a, "Rope 10m", "Knot")?;
            let source = create_product(tx, &a, "Rope 10 m", "Knot")?;
            let bystander = create_product(tx, &a, "Twine", "Knot")?;

            let clash = merge_products(
                tx,
                &a,
                &MergeRequest { target_id: target.id, sources: vec![source.id], new_name: Some("twine".into()), new_brand: None },
            );
            assert!(matches!(clash, Err(LedgerError::Conflict(_))));
            assert_eq!(get_product(tx, bystander.id)?.name, "Twine");

            // Taking over a source's name is fine: the source goes away.
            let merged = merge_products(
                tx,
                &a,
                &MergeRequest { target_id: target.id, sources: vec![source.id], new_name: Some("Rope 10 m".into()), new_brand: None },
            )?;
            assert_eq!(merged.target.name, "Rope 10 m");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn stock_edit_is_journaled_as_adjustment() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "admin", true));
            let p = receive(tx, &a, "Fuse", "Volt", 10);
            let updated = update_product(
                tx,
                &a,
                p.id,
                &ProductUpdate { name: "Fuse 10A".into(), brand: "Volt".into(), stock: 4 },
            )?;
            assert_eq!(updated.stock, 4);
            assert_eq!(updated.name, "Fuse 10A");
            let entries: i64 = tx.query_row(
                "SELECT SUM(quantity) FROM inventory_entries WHERE product_id = ?1",
                params![p.id],
                |r| r.get(0),
            )?;
            assert_eq!(entries, 4);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn deleting_references_reverses_stock() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "admin", true));
            let p = receive(tx, &a, "Hinge", "Blum", 6);
            let refs = references(tx, p.id)?;
            assert_eq!(refs.inventory_entries.len(), 1);

            let deleted = delete_references(
                tx,
                &a,
                p.id,
                &ReferenceSelection {
                    inventory_entry_ids: vec![refs.inventory_entries[0].id, 12345],
                    ..Default::default()
                },
            )?;
            assert_eq!(deleted.inventory_entries, 1);
            assert_eq!(get_product(tx, p.id)?.stock, 0);
            assert_eq!(usage(tx, p.id)?.total, 0);
            Ok(())
        })
        .unwrap();
    }
}
