//! Locating template bytes: files, uploads, URLs, and cached outputs

use crate::error::{Error, Result};
use crate::source::DocumentCache;
use base64::Engine;
use futures_util::StreamExt;
use rmcp::schemars::JsonSchema;
use serde::Serialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a PDF comes from
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PdfSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the PDF file
        path: String,
    },
    /// Base64 encoded PDF data
    Base64 {
        /// Base64 encoded PDF content
        base64: String,
    },
    /// URL to download PDF from
    Url {
        /// URL of the PDF file
        url: String,
    },
    /// Reference to a cached PDF
    CacheRef {
        /// Cache key from a previous call
        cache_key: String,
    },
}

const SOURCE_KEYS: [&str; 4] = ["path", "base64", "url", "cache_key"];

impl<'de> serde::Deserialize<'de> for PdfSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let value = serde_json::Value::deserialize(deserializer)?;
        let Some(obj) = value.as_object() else {
            return Err(D::Error::custom(format!(
                "Invalid source: expected an object with one of {:?}, got {}",
                SOURCE_KEYS,
                json_kind(&value)
            )));
        };

        for key in SOURCE_KEYS {
            let Some(v) = obj.get(key) else {
                continue;
            };
            let Some(s) = v.as_str().map(String::from) else {
                return Err(D::Error::custom(format!("\"{}\" must be a string", key)));
            };
            return Ok(match key {
                "path" => PdfSource::Path { path: s },
                "base64" => PdfSource::Base64 { base64: s },
                "url" => PdfSource::Url { url: s },
                _ => PdfSource::CacheRef { cache_key: s },
            });
        }

        let keys: Vec<&String> = obj.keys().collect();
        Err(D::Error::custom(format!(
            "Invalid source: expected an object with one of {:?}, got keys: {:?}",
            SOURCE_KEYS, keys
        )))
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Null => "null",
        serde_json::Value::Object(_) => "an object",
    }
}

impl PdfSource {
    /// Name shown in results and logs, never the raw upload
    pub fn describe(&self) -> String {
        match self {
            PdfSource::Path { path } => path.clone(),
            PdfSource::Base64 { .. } => "<base64>".to_string(),
            PdfSource::Url { url } => url.clone(),
            PdfSource::CacheRef { cache_key } => format!("<cache:{}>", cache_key),
        }
    }
}

/// Template bytes plus how to refer to them
#[derive(Debug, Clone)]
pub struct ResolvedPdf {
    pub data: Vec<u8>,
    pub source_name: String,
    /// Short name for derived files, e.g. the file stem of the template
    pub label: String,
}

/// File stem of the last path segment, or `fallback` when there is none
pub fn label_from_path(path: &str, fallback: &str) -> String {
    let segment = path.rsplit(['/', '\\']).next().unwrap_or(path);
    Path::new(segment)
        .file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn check_pdf_header(data: &[u8], what: &str) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: format!("{} is not a valid PDF file", what),
        });
    }
    Ok(())
}

/// Directory allow-list for every path a tool touches.
///
/// An empty list allows any path.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    roots: Vec<String>,
}

impl Sandbox {
    pub fn new(roots: Vec<String>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    fn contains(&self, canonical: &Path) -> bool {
        self.roots.iter().any(|root| {
            std::fs::canonicalize(root)
                .map(|root| canonical.starts_with(root))
                .unwrap_or(false)
        })
    }

    /// Check an existing file or directory
    pub fn check_existing(&self, path: &str) -> Result<PathBuf> {
        if self.roots.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let denied = || Error::PathAccessDenied {
            path: path.to_string(),
        };
        let canonical = std::fs::canonicalize(path).map_err(|_| denied())?;
        if self.contains(&canonical) {
            Ok(canonical)
        } else {
            Err(denied())
        }
    }

    /// Check a file that may not exist yet; its parent directory must
    pub fn check_output(&self, path: &str) -> Result<PathBuf> {
        if self.roots.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let denied = || Error::PathAccessDenied {
            path: path.to_string(),
        };
        let target = Path::new(path);
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let file_name = target.file_name().ok_or_else(denied)?;
        let canonical = std::fs::canonicalize(parent)
            .map_err(|_| denied())?
            .join(file_name);

        if self.contains(&canonical) {
            Ok(canonical)
        } else {
            Err(denied())
        }
    }

    /// Write bytes to a checked output path, creating parent directories
    pub fn write(&self, path: &str, data: &[u8]) -> Result<PathBuf> {
        let target = Path::new(path);
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                // Must exist before it can be canonicalized
                if !self.roots.is_empty() {
                    self.check_output(&parent.to_string_lossy())?;
                }
                std::fs::create_dir_all(parent)?;
            }
        }
        let checked = self.check_output(path)?;
        std::fs::write(&checked, data)?;
        Ok(checked)
    }
}

/// Turns a [`PdfSource`] into bytes
#[derive(Clone)]
pub struct SourceResolver {
    sandbox: Sandbox,
    cache: Arc<DocumentCache>,
    allow_private_urls: bool,
    max_download_bytes: u64,
}

impl SourceResolver {
    pub fn new(
        sandbox: Sandbox,
        cache: Arc<DocumentCache>,
        allow_private_urls: bool,
        max_download_bytes: u64,
    ) -> Self {
        Self {
            sandbox,
            cache,
            allow_private_urls,
            max_download_bytes,
        }
    }

    pub async fn resolve(&self, source: &PdfSource) -> Result<ResolvedPdf> {
        match source {
            PdfSource::Path { path } => {
                let checked = self.sandbox.check_existing(path)?;
                resolve_path(&checked)
            }
            PdfSource::Base64 { base64 } => resolve_base64(base64),
            PdfSource::Url { url } => {
                resolve_url(url, self.allow_private_urls, self.max_download_bytes).await
            }
            PdfSource::CacheRef { cache_key } => resolve_cache(cache_key, &self.cache),
        }
    }
}

pub fn resolve_path(path: &Path) -> Result<ResolvedPdf> {
    if !path.is_file() {
        return Err(Error::PdfNotFound {
            path: path.display().to_string(),
        });
    }

    let data = std::fs::read(path)?;
    check_pdf_header(&data, "File")?;

    let source_name = path.display().to_string();
    Ok(ResolvedPdf {
        label: label_from_path(&source_name, "form"),
        data,
        source_name,
    })
}

pub fn resolve_base64(encoded: &str) -> Result<ResolvedPdf> {
    let data = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
    check_pdf_header(&data, "Decoded data")?;

    Ok(ResolvedPdf {
        data,
        source_name: "<base64>".to_string(),
        label: "upload".to_string(),
    })
}

pub fn resolve_cache(key: &str, cache: &DocumentCache) -> Result<ResolvedPdf> {
    let entry = cache.get(key).ok_or_else(|| Error::CacheKeyNotFound {
        key: key.to_string(),
    })?;

    Ok(ResolvedPdf {
        data: entry.data,
        source_name: format!("<cache:{}>", key),
        label: entry.label,
    })
}

/// Loopback, private, link-local, CGNAT, and other non-public addresses
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (a == 100 && (b & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFE00) == 0xFC00
                || (first & 0xFFC0) == 0xFE80
        }
    }
}

async fn check_ssrf(url: &url::Url) -> Result<()> {
    let host = url.host_str().ok_or_else(|| Error::SourceResolution {
        reason: "URL has no host".to_string(),
    })?;
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::SourceResolution {
            reason: format!("DNS resolution failed for {}: {}", host, e),
        })?;

    for addr in addrs {
        if is_private_ip(&addr.ip()) {
            return Err(Error::SsrfBlocked {
                url: url.to_string(),
            });
        }
    }
    Ok(())
}

/// Download a template, refusing private hosts unless allowed and stopping
/// once the body passes `max_download_bytes`
pub async fn resolve_url(
    url: &str,
    allow_private_urls: bool,
    max_download_bytes: u64,
) -> Result<ResolvedPdf> {
    let parsed = url::Url::parse(url).map_err(|e| Error::SourceResolution {
        reason: format!("Invalid URL: {}", e),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::SourceResolution {
            reason: format!("Unsupported URL scheme: {}", parsed.scheme()),
        });
    }
    if !allow_private_urls {
        check_ssrf(&parsed).await?;
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;
    let response = client.get(parsed.clone()).send().await?;

    if !response.status().is_success() {
        return Err(Error::SourceResolution {
            reason: format!("HTTP request failed with status: {}", response.status()),
        });
    }

    if let Some(size) = response.content_length() {
        if size > max_download_bytes {
            return Err(Error::DownloadTooLarge {
                size,
                max_size: max_download_bytes,
            });
        }
    }

    let mut data = Vec::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk?);
        if data.len() as u64 > max_download_bytes {
            return Err(Error::DownloadTooLarge {
                size: data.len() as u64,
                max_size: max_download_bytes,
            });
        }
    }
    check_pdf_header(&data, "Downloaded data")?;

    Ok(ResolvedPdf {
        data,
        source_name: url.to_string(),
        label: label_from_path(parsed.path(), "download"),
    })
}
