//! Accounts: first-run setup, login, administration and self-service profile.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;

use crate::db::collect_rows;
use crate::error::{LedgerError, Result};
use crate::ledger::audit;
use crate::model::{clean_text, Actor, Theme, User};

const USER_COLUMNS: &str = "id, username, name, email, is_admin, theme";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let theme: String = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        is_admin: row.get(4)?,
        theme: Theme::parse(&theme).unwrap_or(Theme::Dark),
    })
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| LedgerError::PasswordHash(e.to_string()))
}

fn verify_password(stored_hash: &str, password: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn required(value: &str, field: &str) -> Result<String> {
    let v = clean_text(value);
    if v.is_empty() {
        return Err(LedgerError::validation(format!("{field} is required")));
    }
    Ok(v)
}

fn check_new_password(password: &str, repeat: &str) -> Result<()> {
    if password.is_empty() {
        return Err(LedgerError::validation("password is required"));
    }
    if password != repeat {
        return Err(LedgerError::validation("passwords do not match"));
    }
    Ok(())
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        user_from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found(format!("user {id} not found")))
}

fn admin_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users WHERE is_admin = 1", [], |r| r.get(0))?)
}

fn ensure_username_free(conn: &Connection, username: &str) -> Result<()> {
    let taken: Option<i64> = conn
        .query_row(
            "SELECT id FROM users WHERE username = ?1",
            params![username],
            |r| r.get(0),
        )
        .optional()?;
    match taken {
        Some(_) => Err(LedgerError::validation(format!("username {username} is taken"))),
        None => Ok(()),
    }
}

fn insert_user(conn: &Connection, input: &NewUser) -> Result<User> {
    let username = required(&input.username, "username")?;
    let name = required(&input.name, "name")?;
    let email = required(&input.email, "email")?;
    if input.password.is_empty() {
        return Err(LedgerError::validation("password is required"));
    }
    ensure_username_free(conn, &username)?;
    conn.execute(
        "INSERT INTO users (username, name, email, password_hash, is_admin) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![username, name, email, hash_password(&input.password)?, input.is_admin],
    )?;
    get_user(conn, conn.last_insert_rowid())
}

pub fn needs_setup(conn: &Connection) -> Result<bool> {
    let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    Ok(users == 0)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetupRequest {
    pub username: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub repeat_password: String,
}

/// Creates the first administrator. Refused once any account exists.
pub fn setup_admin(conn: &Connection, req: &SetupRequest) -> Result<User> {
    if !needs_setup(conn)? {
        return Err(LedgerError::Conflict("setup has already been completed".into()));
    }
    check_new_password(&req.password, &req.repeat_password)?;
    let user = insert_user(
        conn,
        &NewUser {
            username: req.username.clone(),
            name: req.name.clone(),
            email: req.email.clone(),
            password: req.password.clone(),
            is_admin: true,
        },
    )?;
    audit::record(
        conn,
        &Actor::from(&user),
        "setup_admin",
        "users",
        Some(user.id),
        format!("Created initial administrator {}", user.username),
    )?;
    Ok(user)
}

/// Verifies credentials and logs the login. Unknown users and wrong
/// passwords are indistinguishable to the caller.
pub fn authenticate(conn: &Connection, username: &str, password: &str) -> Result<User> {
    let found = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE username = ?1"),
            params![username.trim()],
            |r| Ok((user_from_row(r)?, r.get::<_, String>(6)?)),
        )
        .optional()?;
    let user = match found {
        Some((user, hash)) if verify_password(&hash, password) => user,
        _ => return Err(LedgerError::InvalidCredentials),
    };
    audit::record(
        conn,
        &Actor::from(&user),
        "login",
        "users",
        Some(user.id),
        format!("{} logged in", user.username),
    )?;
    Ok(user)
}

pub fn record_logout(conn: &Connection, actor: &Actor) -> Result<()> {
    audit::record(
        conn,
        actor,
        "logout",
        "users",
        Some(actor.user_id),
        format!("{} logged out", actor.username),
    )?;
    Ok(())
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))?;
    let rows = stmt.query_map([], user_from_row)?;
    collect_rows(rows)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
}

pub fn create_user(conn: &Connection, actor: &Actor, input: &NewUser) -> Result<User> {
    let user = insert_user(conn, input)?;
    audit::record(
        conn,
        actor,
        "create_user",
        "users",
        Some(user.id),
        format!(
            "Created user {} (admin={}, email {})",
            user.username, user.is_admin, user.email
        ),
    )?;
    Ok(user)
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserEdit {
    pub name: String,
    pub email: String,
    pub is_admin: bool,
}

pub fn edit_user(conn: &Connection, actor: &Actor, id: i64, edit: &UserEdit) -> Result<User> {
    let user = get_user(conn, id)?;
    let name = required(&edit.name, "name")?;
    let email = required(&edit.email, "email")?;
    if user.is_admin && !edit.is_admin && admin_count(conn)? <= 1 {
        return Err(LedgerError::Conflict("at least one administrator must remain".into()));
    }
    conn.execute(
        "UPDATE users SET name = ?1, email = ?2, is_admin = ?3 WHERE id = ?4",
        params![name, email, edit.is_admin, id],
    )?;
    audit::record(
        conn,
        actor,
        "edit_user",
        "users",
        Some(id),
        format!(
            "Edited user {}: name '{name}', email '{email}', admin={}",
            user.username, edit.is_admin
        ),
    )?;
    get_user(conn, id)
}

/// Replaces the password with a generated temporary one and returns it.
pub fn reset_password(conn: &Connection, actor: &Actor, id: i64) -> Result<String> {
    let user = get_user(conn, id)?;
    let temporary: String = uuid::Uuid::new_v4().simple().to_string().chars().take(12).collect();
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![hash_password(&temporary)?, id],
    )?;
    audit::record(
        conn,
        actor,
        "reset_password",
        "users",
        Some(id),
        format!("Reset password of {} to a temporary value", user.username),
    )?;
    Ok(temporary)
}

pub fn delete_user(conn: &Connection, actor: &Actor, id: i64) -> Result<User> {
    if id == actor.user_id {
        return Err(LedgerError::validation("you cannot delete your own account"));
    }
    let user = get_user(conn, id)?;
    if user.is_admin && admin_count(conn)? <= 1 {
        return Err(LedgerError::Conflict("at least one administrator must remain".into()));
    }
    conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
    audit::record(
        conn,
        actor,
        "delete_user",
        "users",
        Some(id),
        format!("Deleted user {} (id {id})", user.username),
    )?;
    Ok(user)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub email: String,
}

pub fn update_profile(conn: &Connection, actor: &Actor, update: &ProfileUpdate) -> Result<User> {
    let before = get_user(conn, actor.user_id)?;
    let name = required(&update.name, "name")?;
    let email = required(&update.email, "email")?;
    conn.execute(
        "UPDATE users SET name = ?1, email = ?2 WHERE id = ?3",
        params![name, email, actor.user_id],
    )?;
    audit::record(
        conn,
        actor,
        "update_profile",
        "users",
        Some(actor.user_id),
        format!(
            "Updated profile: name '{}' -> '{name}', email '{}' -> '{email}'",
            before.name, before.email
        ),
    )?;
    get_user(conn, actor.user_id)
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
    pub repeat_password: String,
}

pub fn change_password(conn: &Connection, actor: &Actor, change: &PasswordChange) -> Result<()> {
    if change.old_password.is_empty() {
        return Err(LedgerError::validation("current password is required"));
    }
    check_new_password(&change.new_password, &change.repeat_password)?;
    let stored: String = conn.query_row(
        "SELECT password_hash FROM users WHERE id = ?1",
        params![actor.user_id],
        |r| r.get(0),
    )?;
    if !verify_password(&stored, &change.old_password) {
        return Err(LedgerError::validation("current password is incorrect"));
    }
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![hash_password(&change.new_password)?, actor.user_id],
    )?;
    audit::record(
        conn,
        actor,
        "change_password",
        "users",
        Some(actor.user_id),
        "Changed own password from the profile page",
    )?;
    Ok(())
}

pub fn set_theme(conn: &Connection, actor: &Actor, raw: &str) -> Result<Theme> {
    let theme = Theme::parse(raw).ok_or_else(|| LedgerError::validation(format!("unknown theme {raw:?}")))?;
    conn.execute(
        "UPDATE users SET theme = ?1 WHERE id = ?2",
        params![theme.as_str(), actor.user_id],
    )?;
    audit::record(
        conn,
        actor,
        "change_theme",
        "users",
        Some(actor.user_id),
        format!("Switched interface theme to '{}'", theme.as_str()),
    )?;
    Ok(theme)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::ledger::audit::{query, LogFilter};

    fn setup(tx: &Connection) -> User {
        setup_admin(
            tx,
            &SetupRequest {
                username: "root".into(),
                name: "Root".into(),
                email: "root@example.com".into(),
                password: "s3cret".into(),
                repeat_password: "s3cret".into(),
            },
        )
        .unwrap()
    }

    fn clerk(tx: &Connection, admin: &Actor, username: &str, is_admin: bool) -> User {
        create_user(
            tx,
            admin,
            &NewUser {
                username: username.into(),
                name: "Clerk".into(),
                email: "clerk@example.com".into(),
                password: "pw".into(),
                is_admin,
            },
        )
        .unwrap()
    }

    #[test]
    fn setup_runs_once_and_login_verifies_hash() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            assert!(needs_setup(tx)?);
            let mismatch = setup_admin(
                tx,
                &SetupRequest {
                    username: "root".into(),
                    name: "Root".into(),
                    email: "r@x".into(),
                    password: "a".into(),
                    repeat_password: "b".into(),
                },
            );
            assert!(matches!(mismatch, Err(LedgerError::Validation(_))));

            let admin = setup(tx);
            assert!(admin.is_admin);
            assert!(!needs_setup(tx)?);
            assert!(matches!(
                setup_admin(
                    tx,
                    &SetupRequest {
                        username: "again".into(),
                        name: "x".into(),
                        email: "x".into(),
                        password: "p".into(),
                        repeat_password: "p".into(),
                    }
                ),
                Err(LedgerError::Conflict(_))
            ));

            assert_eq!(authenticate(tx, "root", "s3cret")?.id, admin.id);
            assert!(matches!(authenticate(tx, "root", "nope"), Err(LedgerError::InvalidCredentials)));
            assert!(matches!(authenticate(tx, "ghost", "s3cret"), Err(LedgerError::InvalidCredentials)));
            let logins = query(tx, &LogFilter { action: Some("login".into()), ..Default::default() })?;
            assert_eq!(logins.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn duplicate_username_is_a_validation_error() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let admin = Actor::from(&setup(tx));
            clerk(tx, &admin, "ana", false);
            let dup = create_user(
                tx,
                &admin,
                &NewUser { username: "ana".into(), name: "A".into(), email: "a@x".into(), password: "p".into(), is_admin: false },
            );
            assert!(matches!(dup, Err(LedgerError::Validation(_))));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn last_admin_cannot_be_removed_or_demoted() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let root = setup(tx);
            let admin = Actor::from(&root);
            let ana = clerk(tx, &admin, "ana", false);
            let ana_actor = Actor::from(&ana);

            assert!(matches!(delete_user(tx, &admin, root.id), Err(LedgerError::Validation(_))));
            assert!(matches!(delete_user(tx, &ana_actor, root.id), Err(LedgerError::Conflict(_))));
            let demote = UserEdit { name: "Root".into(), email: "r@x".into(), is_admin: false };
            assert!(matches!(edit_user(tx, &admin, root.id, &demote), Err(LedgerError::Conflict(_))));

            let promoted = edit_user(tx, &admin, ana.id, &UserEdit { name: "Ana".into(), email: "a@x".into(), is_admin: true })?;
            assert!(promoted.is_admin);
            edit_user(tx, &admin, root.id, &demote)?;
            delete_user(tx, &Actor::from(&promoted), root.id)?;
            assert_eq!(list_users(tx)?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn reset_and_change_password() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let admin = Actor::from(&setup(tx));
            let ana = clerk(tx, &admin, "ana", false);
            let temp = reset_password(tx, &admin, ana.id)?;
            assert_eq!(temp.len(), 12);
            assert!(authenticate(tx, "ana", "pw").is_err());
            let ana = Actor::from(&authenticate(tx, "ana", &temp)?);

            let wrong_old = PasswordChange { old_password: "pw".into(), new_password: "n".into(), repeat_password: "n".into() };
            assert!(matches!(change_password(tx, &ana, &wrong_old), Err(LedgerError::Validation(_))));
            change_password(
                tx,
                &ana,
                &PasswordChange { old_password: temp.clone(), new_password: "fresh".into(), repeat_password: "fresh".into() },
            )?;
            authenticate(tx, "ana", "fresh")?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn profile_and_theme_updates() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            let admin = Actor::from(&setup(tx));
            let updated = update_profile(tx, &admin, &ProfileUpdate { name: " Boss ".into(), email: "boss@x".into() })?;
            assert_eq!(updated.name, "Boss");
            assert!(update_profile(tx, &admin, &ProfileUpdate { name: "".into(), email: "x".into() }).is_err());

            assert_eq!(set_theme(tx, &admin, "light")?, Theme::Light);
            assert_eq!(get_user(tx, admin.user_id)?.theme, Theme::Light);
            assert!(matches!(set_theme(tx, &admin, "neon"), Err(LedgerError::Validation(_))));
            Ok(())
        })
        .unwrap();
    }
}
