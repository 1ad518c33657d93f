//! Runtime configuration.
//!
//! Values come from the environment first, then the credential store (for
//! the gateway URL written during setup), then built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::storage;

/// Default timeout for gateway requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_GATEWAY_URL: &str = "STOCK_DESK_GATEWAY_URL";
const ENV_TIMEOUT_SECS: &str = "STOCK_DESK_TIMEOUT_SECS";
const ENV_CACHE_DIR: &str = "STOCK_DESK_CACHE_DIR";
const ENV_LOG_DIR: &str = "STOCK_DESK_LOG_DIR";

#[derive(Debug, Clone, PartialEq)]
pub struct DeskConfig {
    pub gateway_url: String,
    pub request_timeout: Duration,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
}

/// Normalise a gateway URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/api` segment
pub fn normalize_gateway_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // "/api/" leaves one more slash behind
    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Base directory for application data (`$XDG_DATA_HOME`, `%LOCALAPPDATA%`
/// or `~/.local/share`).
pub fn data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("app.stockdesk")
}

impl DeskConfig {
    /// Build a configuration from an explicit lookup function. `from_env`
    /// passes `std::env::var`; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let gateway_url = lookup(ENV_GATEWAY_URL)
            .or_else(|| storage::get_credential(storage::KEY_GATEWAY_URL))
            .map(|u| normalize_gateway_url(&u))
            .filter(|u| !u.is_empty())
            .ok_or("Gateway URL not configured")?;

        let request_timeout = match lookup(ENV_TIMEOUT_SECS) {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("Invalid {ENV_TIMEOUT_SECS}: {raw}"))?;
                if secs == 0 {
                    return Err(format!("{ENV_TIMEOUT_SECS} must be greater than zero"));
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_TIMEOUT,
        };

        let cache_dir = lookup(ENV_CACHE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(data_dir);
        let log_dir = lookup(ENV_LOG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("logs"));

        Ok(Self {
            gateway_url,
            request_timeout,
            cache_dir,
            log_dir,
        })
    }

    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn url_normalisation() {
        assert_eq!(
            normalize_gateway_url("stock.example.com/api/"),
            "https://stock.example.com"
        );
        assert_eq!(
            normalize_gateway_url("localhost:8080"),
            "http://localhost:8080"
        );
        assert_eq!(
            normalize_gateway_url("https://stock.example.com//"),
            "https://stock.example.com"
        );
        assert_eq!(normalize_gateway_url("   "), "");
    }

    #[test]
    fn config_from_lookup() {
        let cfg = DeskConfig::from_lookup(lookup(&[
            (ENV_GATEWAY_URL, "desk.example.com/api"),
            (ENV_TIMEOUT_SECS, "5"),
            (ENV_CACHE_DIR, "/tmp/desk-cache"),
            (ENV_LOG_DIR, "/tmp/desk-logs"),
        ]))
        .unwrap();
        assert_eq!(cfg.gateway_url, "https://desk.example.com");
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.cache_dir, PathBuf::from("/tmp/desk-cache"));
        assert_eq!(cfg.log_dir, PathBuf::from("/tmp/desk-logs"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = DeskConfig::from_lookup(lookup(&[
            (ENV_GATEWAY_URL, "desk.example.com"),
            (ENV_TIMEOUT_SECS, "0"),
        ]))
        .unwrap_err();
        assert!(err.contains("greater than zero"), "unexpected: {err}");
    }

    #[test]
    fn data_dir_is_stable() {
        assert_eq!(data_dir(), data_dir());
        assert!(data_dir().to_string_lossy().contains("app.stockdesk"));
    }
}
