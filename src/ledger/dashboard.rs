//! Read-only overview figures for the landing page.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::collect_rows;
use crate::error::Result;
use crate::ledger::orders;
use crate::model::OrderStatus;

const SERIES_DAYS: i64 = 14;
const ACTIVE_CLIENT_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrderStatusCounts {
    pub complete: i64,
    pub partial: i64,
    pub pending: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub day: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopClient {
    pub client: String,
    pub dispatches: i64,
    pub units: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub products: i64,
    pub total_stock: i64,
    pub dispatch_batches: i64,
    pub clients: i64,
    pub orders: i64,
    pub critical_stock: i64,
    pub clients_last_30_days: i64,
    pub order_status: OrderStatusCounts,
    pub dispatch_series: Vec<DayCount>,
    pub top_clients: Vec<TopClient>,
}

pub fn stats(conn: &Connection, critical_threshold: i64) -> Result<DashboardStats> {
    stats_on(conn, critical_threshold, Utc::now().date_naive())
}

fn count(conn: &Connection, sql: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [], |r| r.get(0))?)
}

fn day_start(day: NaiveDate) -> String {
    format!("{} 00:00:00", day.format("%Y-%m-%d"))
}

/// Figures as seen on `today` (UTC).
pub fn stats_on(conn: &Connection, critical_threshold: i64, today: NaiveDate) -> Result<DashboardStats> {
    let critical_stock = conn.query_row(
        "SELECT COUNT(*) FROM products WHERE stock <= ?1",
        params![critical_threshold],
        |r| r.get(0),
    )?;
    let clients_last_30_days = conn.query_row(
        "SELECT COUNT(DISTINCT client_id) FROM dispatch_batches WHERE created_at >= ?1",
        params![day_start(today - Duration::days(ACTIVE_CLIENT_DAYS))],
        |r| r.get(0),
    )?;

    let first_day = today - Duration::days(SERIES_DAYS - 1);
    let mut stmt = conn.prepare(
        "SELECT substr(created_at, 1, 10) AS day, COUNT(*) FROM dispatch_batches
         WHERE created_at >= ?1 GROUP BY day",
    )?;
    let per_day: HashMap<String, i64> = collect_rows(stmt.query_map(params![day_start(first_day)], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
    })?)?
    .into_iter()
    .collect();
    let dispatch_series = (0..SERIES_DAYS)
        .map(|offset| {
            let day = (first_day + Duration::days(offset)).format("%Y-%m-%d").to_string();
            let count = per_day.get(&day).copied().unwrap_or(0);
            DayCount { day, count }
        })
        .collect();

    let mut stmt = conn.prepare(
        "SELECT c.name, COUNT(DISTINCT b.id), COALESCE(SUM(e.quantity), 0) AS units
         FROM clients c
         JOIN dispatch_batches b ON b.client_id = c.id
         LEFT JOIN dispatch_entries e ON e.batch_id = b.id
         GROUP BY c.id ORDER BY units DESC, c.name ASC LIMIT 3",
    )?;
    let top_clients = collect_rows(stmt.query_map([], |r| {
        Ok(TopClient {
            client: r.get(0)?,
            dispatches: r.get(1)?,
            units: r.get(2)?,
        })
    })?)?;

    let all_orders = orders::list_orders(conn)?;
    let mut order_status = OrderStatusCounts::default();
    for order in &all_orders {
        match order.status {
            OrderStatus::Complete => order_status.complete += 1,
            OrderStatus::Partial => order_status.partial += 1,
            OrderStatus::Pending => order_status.pending += 1,
        }
    }

    Ok(DashboardStats {
        products: count(conn, "SELECT COUNT(*) FROM products")?,
        total_stock: count(conn, "SELECT COALESCE(SUM(stock), 0) FROM products")?,
        dispatch_batches: count(conn, "SELECT COUNT(*) FROM dispatch_batches")?,
        clients: count(conn, "SELECT COUNT(*) FROM clients")?,
        orders: all_orders.len() as i64,
        critical_stock,
        clients_last_30_days,
        order_status,
        dispatch_series,
        top_clients,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::ledger::dispatch::{create_dispatch, DispatchLineInput, NewDispatch};
    use crate::ledger::inventory::{create_receipt, ReceiptLineInput};
    use crate::ledger::orders::{create_order, NewOrder, OrderLineInput};
    use crate::ledger::testing::{actor, seed_user};

    #[test]
    fn empty_database_has_zero_filled_series() {
        let db = Database::open_in_memory().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let stats = db.transaction(|tx| stats_on(tx, 5, today)).unwrap();
        assert_eq!(stats.products, 0);
        assert_eq!(stats.dispatch_series.len(), 14);
        assert_eq!(stats.dispatch_series[0].day, "2024-02-26");
        assert_eq!(stats.dispatch_series[13].day, "2024-03-10");
        assert!(stats.dispatch_series.iter().all(|d| d.count == 0));
        assert!(stats.top_clients.is_empty());
    }

    #[test]
    fn counts_reflect_activity() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "op", false));
            create_receipt(
                tx,
                &a,
                &[
                    ReceiptLineInput { name: "Drill".into(), brand: "Bosch".into(), quantity: 20 },
                    ReceiptLineInput { name: "Saw".into(), brand: "Bosch".into(), quantity: 3 },
                ],
            )?;
            for (client, qty) in [("Acme", 5), ("Acme", 1), ("Contoso", 4), ("Initech", 1), ("Globex", 2)] {
                create_dispatch(
                    tx,
                    &a,
                    &NewDispatch {
                        client: client.into(),
                        order_number: None,
                        items: vec![DispatchLineInput { name: "Drill".into(), brand: "Bosch".into(), quantity: qty }],
                    },
                )?;
            }
            tx.execute(
                "UPDATE dispatch_batches SET created_at = '2024-03-09 08:00:00' WHERE id = 1",
                [],
            )?;
            tx.execute(
                "UPDATE dispatch_batches SET created_at = '2024-03-10 08:00:00' WHERE id > 1",
                [],
            )?;
            tx.execute("UPDATE dispatch_batches SET created_at = '2023-01-01 08:00:00' WHERE id = 5", [])?;
            create_order(
                tx,
                &a,
                &NewOrder {
                    number: "PO-1".into(),
                    client: "Acme".into(),
                    items: vec![OrderLineInput { name: "Saw".into(), brand: "Bosch".into(), quantity: 1 }],
                },
            )?;

            let stats = stats_on(tx, 5, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap())?;
            assert_eq!(stats.products, 2);
            assert_eq!(stats.total_stock, 20 - 13 + 3);
            assert_eq!(stats.critical_stock, 1);
            assert_eq!(stats.dispatch_batches, 5);
            assert_eq!(stats.clients, 4);
            assert_eq!(stats.clients_last_30_days, 3);
            assert_eq!(stats.dispatch_series[12].count, 1);
            assert_eq!(stats.dispatch_series[13].count, 3);
            assert_eq!(stats.order_status, OrderStatusCounts { complete: 0, partial: 0, pending: 1 });
            let top: Vec<_> = stats.top_clients.iter().map(|c| (c.client.as_str(), c.units)).collect();
            assert_eq!(top, vec![("Acme", 6), ("Contoso", 4), ("Globex", 2)]);
            Ok(())
        })
        .unwrap();
    }
}
