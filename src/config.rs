//! Server configuration

use std::env;
use std::str::FromStr;

/// Security, resource, and data-source settings for the autofill server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directories exposed as form resources; when non-empty, every path
    /// a tool reads or writes must fall inside one of them
    pub resource_dirs: Vec<String>,
    /// Allow URLs that resolve to private/reserved IPs (default: false)
    pub allow_private_urls: bool,
    /// Maximum download size in bytes for URL sources (default: 100MB)
    pub max_download_bytes: u64,
    /// Maximum total bytes in cache (default: 512MB)
    pub cache_max_bytes: usize,
    /// Maximum number of cache entries (default: 100)
    pub cache_max_entries: usize,
    /// SQLite database URL or file path for table-driven fills
    pub database_url: Option<String>,
    /// Create the demo `customers` table on first connect
    pub seed_demo_data: bool,
    /// Upper bound on records per batch fill (default: 1000)
    pub max_batch_records: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            allow_private_urls: false,
            max_download_bytes: 100 * 1024 * 1024, // 100MB
            cache_max_bytes: 512 * 1024 * 1024,    // 512MB
            cache_max_entries: 100,
            database_url: None,
            seed_demo_data: false,
            max_batch_records: 1000,
        }
    }
}

impl ServerConfig {
    /// Read settings from `PDF_AUTOFILL_*` environment variables, falling back
    /// to defaults for anything unset or unparsable
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str| {
            lookup(key)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        };

        Self {
            resource_dirs: lookup("PDF_AUTOFILL_RESOURCE_DIRS")
                .map(|dirs| {
                    dirs.split(',')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.resource_dirs),
            allow_private_urls: flag("PDF_AUTOFILL_ALLOW_PRIVATE_URLS")
                .unwrap_or(defaults.allow_private_urls),
            max_download_bytes: parsed(&lookup, "PDF_AUTOFILL_MAX_DOWNLOAD_BYTES")
                .unwrap_or(defaults.max_download_bytes),
            cache_max_bytes: parsed(&lookup, "PDF_AUTOFILL_CACHE_MAX_BYTES")
                .unwrap_or(defaults.cache_max_bytes),
            cache_max_entries: parsed(&lookup, "PDF_AUTOFILL_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.cache_max_entries),
            database_url: lookup("PDF_AUTOFILL_DATABASE")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            seed_demo_data: flag("PDF_AUTOFILL_SEED_DEMO").unwrap_or(defaults.seed_demo_data),
            max_batch_records: parsed(&lookup, "PDF_AUTOFILL_MAX_BATCH_RECORDS")
                .unwrap_or(defaults.max_batch_records),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
