use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_DATABASE: &str = "ledger.db";
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_CRITICAL_STOCK: i64 = 5;
pub const DEFAULT_SESSION_TTL_HOURS: u64 = 12;

/// Runtime settings, read from `LEDGER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub database: PathBuf,
    pub upload_dir: PathBuf,
    pub image_extensions: Vec<String>,
    pub max_upload_bytes: usize,
    pub critical_stock: i64,
    pub session_ttl: Duration,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unset or blank keys take their
    /// defaults; malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind: SocketAddr = get("LEDGER_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .context("LEDGER_BIND must be a socket address like 127.0.0.1:8080")?;

        let image_extensions = match get("LEDGER_IMAGE_EXTENSIONS") {
            Some(raw) => raw
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            None => DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        };

        let session_hours: u64 = parse_or(&get, "LEDGER_SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS)?;
        let secure_cookies = match get("LEDGER_SECURE_COOKIES").as_deref() {
            None => false,
            Some("1") | Some("true") | Some("yes") | Some("on") => true,
            Some("0") | Some("false") | Some("no") | Some("off") => false,
            Some(other) => anyhow::bail!("LEDGER_SECURE_COOKIES must be a boolean, got {other:?}"),
        };

        Ok(Config {
            bind,
            database: get("LEDGER_DATABASE")
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
                .into(),
            upload_dir: get("LEDGER_UPLOAD_DIR")
                .unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string())
                .into(),
            image_extensions,
            max_upload_bytes: parse_or(&get, "LEDGER_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            critical_stock: parse_or(&get, "LEDGER_CRITICAL_STOCK", DEFAULT_CRITICAL_STOCK)?,
            session_ttl: Duration::from_secs(session_hours * 3600),
            secure_cookies,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            database: DEFAULT_DATABASE.into(),
            upload_dir: DEFAULT_UPLOAD_DIR.into(),
            image_extensions: DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            critical_stock: DEFAULT_CRITICAL_STOCK,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_HOURS * 3600),
            secure_cookies: false,
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} has an invalid value {raw:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.bind.to_string(), DEFAULT_BIND);
        assert_eq!(cfg.database, PathBuf::from("ledger.db"));
        assert_eq!(cfg.image_extensions, vec!["png", "jpg", "jpeg", "webp"]);
        assert_eq!(cfg.critical_stock, 5);
        assert_eq!(cfg.session_ttl, Duration::from_secs(12 * 3600));
        assert!(!cfg.secure_cookies);
    }

    #[test]
    fn overrides_are_normalised() {
        let cfg = from_pairs(&[
            ("LEDGER_BIND", "0.0.0.0:9000"),
            ("LEDGER_IMAGE_EXTENSIONS", " .JPG, png ,,"),
            ("LEDGER_CRITICAL_STOCK", "2"),
            ("LEDGER_SECURE_COOKIES", "true"),
            ("LEDGER_UPLOAD_DIR", "  "),
        ])
        .unwrap();
        assert_eq!(cfg.bind.port(), 9000);
        assert_eq!(cfg.image_extensions, vec!["jpg", "png"]);
        assert_eq!(cfg.critical_stock, 2);
        assert!(cfg.secure_cookies);
        assert_eq!(cfg.upload_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn malformed_numbers_are_errors() {
        assert!(from_pairs(&[("LEDGER_MAX_UPLOAD_BYTES", "lots")]).is_err());
        assert!(from_pairs(&[("LEDGER_SESSION_TTL_HOURS", "-1")]).is_err());
        assert!(from_pairs(&[("LEDGER_BIND", "nowhere")]).is_err());
        assert!(from_pairs(&[("LEDGER_SECURE_COOKIES", "maybe")]).is_err());
    }
}
