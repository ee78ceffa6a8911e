//! Cookie sessions and the extractors that turn them into an [`Actor`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::error::LedgerError;
use crate::http::AppState;
use crate::ledger::users;
use crate::model::Actor;

pub const SESSION_COOKIE: &str = "ledger_session";

#[derive(Debug, Clone, Copy)]
struct Session {
    user_id: i64,
    expires_at: Instant,
}

/// In-memory token → user map. Sessions do not survive a restart.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Starts a session and returns its token.
    pub fn create(&self, user_id: i64) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut sessions = self.lock();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(
            token.clone(),
            Session {
                user_id,
                expires_at: now + self.ttl,
            },
        );
        token
    }

    pub fn lookup(&self, token: &str) -> Option<i64> {
        let mut sessions = self.lock();
        match sessions.get(token) {
            Some(s) if s.expires_at > Instant::now() => Some(s.user_id),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    pub fn revoke(&self, token: &str) {
        self.lock().remove(token);
    }

    /// Ends every session of a user, e.g. after the account is deleted.
    pub fn revoke_user(&self, user_id: i64) {
        self.lock().retain(|_, s| s.user_id != user_id);
    }
}

/// Session token from the `Cookie` header(s), if any.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

pub fn session_cookie(token: &str, ttl: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        ttl.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_cookie(secure: bool) -> String {
    session_cookie("", Duration::ZERO, secure)
}

/// Any signed-in user. The user row is re-read on every request so role
/// changes and deletions apply immediately.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Actor);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = LedgerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(LedgerError::Unauthenticated)?;
        let user_id = state.sessions.lookup(&token).ok_or(LedgerError::Unauthenticated)?;
        match state.db.call(move |tx| users::get_user(tx, user_id)).await {
            Ok(user) => Ok(CurrentUser(Actor::from(&user))),
            Err(LedgerError::NotFound(_)) => {
                state.sessions.revoke(&token);
                Err(LedgerError::Unauthenticated)
            }
            Err(e) => Err(e),
        }
    }
}

/// A signed-in administrator.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Actor);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = LedgerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(actor) = CurrentUser::from_request_parts(parts, state).await?;
        if !actor.is_admin {
            return Err(LedgerError::Forbidden);
        }
        Ok(AdminUser(actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn sessions_expire_and_revoke() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.create(1);
        let b = store.create(2);
        assert_eq!(store.lookup(&a), Some(1));
        store.revoke(&a);
        assert_eq!(store.lookup(&a), None);
        store.revoke_user(2);
        assert_eq!(store.lookup(&b), None);

        let expired = SessionStore::new(Duration::ZERO);
        let t = expired.create(3);
        assert_eq!(expired.lookup(&t), None);
    }

    #[test]
    fn token_is_read_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; ledger_session=abc123"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));
        headers.insert(COOKIE, HeaderValue::from_static("ledger_session="));
        assert_eq!(session_token(&headers), None);
    }

    #[test]
    fn cookie_attributes() {
        let c = session_cookie("tok", Duration::from_secs(3600), true);
        assert_eq!(c, "ledger_session=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=3600; Secure");
        assert!(clear_cookie(false).contains("Max-Age=0"));
    }
}
