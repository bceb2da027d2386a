//! Error types for PDF Autofill Server

use thiserror::Error;

/// Result type alias for PDF Autofill Server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for PDF Autofill Server
#[derive(Error, Debug)]
pub enum Error {
    /// PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// Template parsed but exposes no fillable fields
    #[error("No form fields detected in {source_name}")]
    NoFormFields { source_name: String },

    /// PDF is password protected and no password was provided
    #[error("PDF is password protected")]
    PasswordRequired,

    /// Incorrect password provided
    #[error("Incorrect password")]
    IncorrectPassword,

    /// Invalid field specification for form generation
    #[error("Invalid field specification: {reason}")]
    InvalidFieldSpec { reason: String },

    /// Cache key not found
    #[error("Cache key not found: {key}")]
    CacheKeyNotFound { key: String },

    /// Source resolution error
    #[error("Failed to resolve source: {reason}")]
    SourceResolution { reason: String },

    /// No record database configured
    #[error("No database configured")]
    DatabaseNotConfigured,

    /// Requested table does not exist in the record database
    #[error("Unknown table: {table}")]
    UnknownTable { table: String },

    /// Batch request exceeds the configured record limit
    #[error("Too many records: {count} (max: {max})")]
    TooManyRecords { count: usize, max: usize },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PDF object model error
    #[error("PDF object error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// qpdf error
    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },

    /// Background task failed to complete
    #[error("Task join error: {reason}")]
    TaskJoin { reason: String },

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// SSRF blocked (URL resolves to private/reserved IP)
    #[error("SSRF blocked: {url}")]
    SsrfBlocked { url: String },

    /// Download too large
    #[error("Download too large: {size} bytes (max: {max_size} bytes)")]
    DownloadTooLarge { size: u64, max_size: u64 },
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors, file sizes) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::NoFormFields { .. } => "No form fields detected".to_string(),
            Error::PasswordRequired => "PDF is password protected".to_string(),
            Error::IncorrectPassword => "Incorrect password".to_string(),
            Error::InvalidFieldSpec { reason } => {
                format!("Invalid field specification: {}", reason)
            }
            Error::CacheKeyNotFound { .. } => "Cache key not found".to_string(),
            Error::SourceResolution { .. } => "Failed to resolve PDF source".to_string(),
            Error::DatabaseNotConfigured => "No database configured".to_string(),
            Error::UnknownTable { table } => format!("Unknown table: {}", table),
            Error::TooManyRecords { count, max } => {
                format!("Too many records: {} (max: {})", count, max)
            }
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::HttpRequest(_) => "HTTP request failed".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Pdf(_) => "PDF processing error".to_string(),
            Error::Database(_) => "Database error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::QpdfError { .. } => "PDF processing error".to_string(),
            Error::TaskJoin { .. } => "Internal processing error".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::SsrfBlocked { .. } => "URL not allowed".to_string(),
            Error::DownloadTooLarge { max_size, .. } => {
                format!("Download exceeds maximum size of {} bytes", max_size)
            }
        }
    }

    /// Whether this error invalidates a whole template rather than a single record.
    pub fn is_template_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidPdf { .. }
                | Error::NoFormFields { .. }
                | Error::PasswordRequired
                | Error::IncorrectPassword
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_hides_internal_details() {
        let err = Error::NoFormFields {
            source_name: "/secret/path/form.pdf".to_string(),
        };
        assert_eq!(err.client_message(), "No form fields detected");
        assert!(err.to_string().contains("/secret/path/form.pdf"));

        let err = Error::PathAccessDenied {
            path: "/etc/passwd".to_string(),
        };
        assert_eq!(err.client_message(), "Access denied");
    }

    #[test]
    fn test_template_error_classification() {
        assert!(Error::PasswordRequired.is_template_error());
        assert!(Error::InvalidPdf {
            reason: "bad".to_string()
        }
        .is_template_error());
        assert!(!Error::UnknownTable {
            table: "x".to_string()
        }
        .is_template_error());
        assert!(!Error::DatabaseNotConfigured.is_template_error());
    }
}
