use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{LedgerError, Result};
use crate::model::{clean_text, Client};

/// Looks a client up by name (case-insensitive), creating it when absent.
pub fn find_or_create(conn: &Connection, raw_name: &str) -> Result<Client> {
    let name = clean_text(raw_name);
    if name.is_empty() {
        return Err(LedgerError::validation("client name is required"));
    }
    let existing = conn
        .query_row(
            "SELECT id, name FROM clients WHERE name = ?1 COLLATE NOCASE",
            params![name],
            |r| Ok(Client { id: r.get(0)?, name: r.get(1)? }),
        )
        .optional()?;
    if let Some(client) = existing {
        return Ok(client);
    }
    conn.execute("INSERT INTO clients (name) VALUES (?1)", params![name])?;
    Ok(Client {
        id: conn.last_insert_rowid(),
        name,
    })
}
