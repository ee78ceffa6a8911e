//! Append-only record of user actions.

use rusqlite::{params, params_from_iter, Connection};
use serde::Deserialize;

use crate::db::{collect_rows, now_stamp};
use crate::error::Result;
use crate::model::{Actor, DateRange, LogEntry};

/// Appends one log row. Call it inside the same transaction as the
/// mutation it describes.
pub fn record(
    conn: &Connection,
    actor: &Actor,
    action: &str,
    table: &str,
    target_id: Option<i64>,
    details: impl AsRef<str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO logs (user_id, username, action, target_table, target_id, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            actor.user_id,
            actor.username,
            action,
            table,
            target_id,
            details.as_ref(),
            now_stamp()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    pub user: Option<String>,
    pub action: Option<String>,
    pub table: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Newest first. Text filters are case-insensitive substring matches.
pub fn query(conn: &Connection, filter: &LogFilter) -> Result<Vec<LogEntry>> {
    let range = DateRange::parse(filter.start.as_deref(), filter.end.as_deref())?;
    let mut sql = String::from(
        "SELECT id, username, action, target_table, target_id, details, created_at
         FROM logs WHERE 1 = 1",
    );
    let mut args: Vec<String> = Vec::new();

    for (column, needle) in [
        ("username", &filter.user),
        ("action", &filter.action),
        ("target_table", &filter.table),
    ] {
        if let Some(n) = needle.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            args.push(n.to_lowercase());
            sql.push_str(&format!(
                " AND instr(lower(COALESCE({column}, '')), ?{}) > 0",
                args.len()
            ));
        }
    }
    if let Some(lo) = range.lower_bound() {
        args.push(lo);
        sql.push_str(&format!(" AND created_at >= ?{}", args.len()));
    }
    if let Some(hi) = range.upper_bound() {
        args.push(hi);
        sql.push_str(&format!(" AND created_at < ?{}", args.len()));
    }
    sql.push_str(" ORDER BY created_at DESC, id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
        Ok(LogEntry {
            id: row.get(0)?,
            user: row.get(1)?,
            action: row.get(2)?,
            table: row.get(3)?,
            target_id: row.get(4)?,
            details: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;
    collect_rows(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::ledger::testing::{actor, seed_user};

    #[test]
    fn filters_by_user_action_and_table() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let alice = actor(seed_user(tx, "alice", true));
            let bob = actor(seed_user(tx, "bob", false));
            record(tx, &alice, "create_product", "products", Some(1), "created")?;
            record(tx, &bob, "dispatch_product", "dispatch_entries", Some(2), "sent")?;
            record(tx, &bob, "login", "users", Some(bob.user_id), "hello")?;

            let bobs = query(tx, &LogFilter { user: Some("BO".into()), ..Default::default() })?;
            assert_eq!(bobs.len(), 2);
            assert_eq!(bobs[0].action, "login");

            let dispatches = query(
                tx,
                &LogFilter { action: Some("dispatch".into()), table: Some("entries".into()), ..Default::default() },
            )?;
            assert_eq!(dispatches.len(), 1);
            assert_eq!(dispatches[0].user, "bob");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn date_window_excludes_other_days() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "alice", true));
            record(tx, &a, "login", "users", None, "")?;
            tx.execute("UPDATE logs SET created_at = '2020-01-01 10:00:00'", [])?;
            record(tx, &a, "logout", "users", None, "")?;

            let old = query(
                tx,
                &LogFilter { start: Some("2020-01-01".into()), end: Some("01/01/2020".into()), ..Default::default() },
            )?;
            assert_eq!(old.len(), 1);
            assert_eq!(old[0].action, "login");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn rows_survive_user_deletion() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let a = actor(seed_user(tx, "carol", false));
            record(tx, &a, "login", "users", None, "")?;
            tx.execute("DELETE FROM users WHERE id = ?1", [a.user_id])?;
            let all = query(tx, &LogFilter::default())?;
            assert_eq!(all[0].user, "carol");
            Ok(())
        })
        .unwrap();
    }
}
