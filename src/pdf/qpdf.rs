//! qpdf FFI wrapper
//!
//! Covers what the object-level form code cannot do itself: stripping
//! encryption from password-protected templates, and stitching filled
//! documents into one printable bundle.

use crate::error::{Error, Result};
use qpdf::QPdf;

/// Wrapper for qpdf operations via FFI
pub struct QpdfWrapper;

/// Map qpdf crate errors to our error types
fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    match e.error_code() {
        qpdf::QPdfErrorCode::InvalidPassword => Error::IncorrectPassword,
        _ => Error::QpdfError {
            reason: e.to_string(),
        },
    }
}

impl QpdfWrapper {
    /// Decrypt a PDF (remove password protection)
    ///
    /// # Arguments
    /// * `input_data` - Raw PDF bytes
    /// * `password` - Password for the encrypted PDF (may be empty)
    ///
    /// # Returns
    /// The decrypted PDF as bytes
    pub fn decrypt(input_data: &[u8], password: &str) -> Result<Vec<u8>> {
        let qpdf =
            QPdf::read_from_memory_encrypted(input_data, password).map_err(map_qpdf_error)?;

        let mut writer = qpdf.writer();
        writer.preserve_encryption(false);
        writer.write_to_memory().map_err(map_qpdf_error)
    }

    /// Concatenate the pages of several PDFs into one document.
    ///
    /// Widgets travel with their pages, so filled values stay visible; the
    /// result is meant for printing rather than further filling.
    pub fn merge(inputs: &[&[u8]]) -> Result<Vec<u8>> {
        if inputs.is_empty() {
            return Err(Error::QpdfError {
                reason: "No input PDFs provided".to_string(),
            });
        }

        let dest = QPdf::empty();

        for (i, input_data) in inputs.iter().enumerate() {
            let source = QPdf::read_from_memory(input_data).map_err(|e| Error::QpdfError {
                reason: format!("Failed to read input PDF {}: {}", i, e),
            })?;

            let pages = source.get_pages().map_err(|e| Error::QpdfError {
                reason: format!("Failed to get pages from input PDF {}: {}", i, e),
            })?;

            for page in &pages {
                let copied = dest.copy_from_foreign(page);
                dest.add_page(&copied, false).map_err(map_qpdf_error)?;
            }
        }

        dest.writer().write_to_memory().map_err(map_qpdf_error)
    }

    /// Get the page count of a PDF
    pub fn get_page_count(input_data: &[u8]) -> Result<u32> {
        let qpdf = QPdf::read_from_memory(input_data).map_err(map_qpdf_error)?;
        qpdf.get_num_pages().map_err(map_qpdf_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::generator::{generate_form, FieldSpec};

    fn one_page_form(name: &str) -> Vec<u8> {
        generate_form(None, &[FieldSpec::new(name)]).unwrap()
    }

    #[test]
    fn test_merge_empty_rejected() {
        assert!(matches!(
            QpdfWrapper::merge(&[]),
            Err(Error::QpdfError { .. })
        ));
    }

    #[test]
    fn test_merge_concatenates_pages() {
        let a = one_page_form("a");
        let b = one_page_form("b");
        let merged = QpdfWrapper::merge(&[&a, &b]).unwrap();
        assert_eq!(QpdfWrapper::get_page_count(&merged).unwrap(), 2);
    }

    #[test]
    fn test_page_count_of_garbage_fails() {
        assert!(QpdfWrapper::get_page_count(b"not a pdf").is_err());
    }

    #[test]
    fn test_decrypt_unencrypted_passthrough() {
        let form = one_page_form("a");
        let out = QpdfWrapper::decrypt(&form, "").unwrap();
        assert_eq!(QpdfWrapper::get_page_count(&out).unwrap(), 1);
    }
}
