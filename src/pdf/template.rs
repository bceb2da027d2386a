//! Parsed form templates

use super::fields::{extract_fields, list_fields, FormField};
use super::qpdf::QpdfWrapper;
use crate::error::{Error, Result};
use lopdf::Document;
use std::collections::BTreeSet;

/// A parsed PDF form, loaded once and cloned for every fill.
///
/// Loading fails when the bytes are not a PDF, the password is missing or
/// wrong, or the document has no named form fields.
#[derive(Debug, Clone)]
pub struct FormTemplate {
    document: Document,
    fields: BTreeSet<String>,
    source_name: String,
}

fn has_pdf_header(data: &[u8]) -> bool {
    data.len() >= 4 && &data[0..4] == b"%PDF"
}

fn parse_document(data: &[u8]) -> Result<Document> {
    Document::load_mem(data).map_err(|e| Error::InvalidPdf {
        reason: e.to_string(),
    })
}

impl FormTemplate {
    /// Parse template bytes
    ///
    /// # Arguments
    /// * `data` - Raw PDF bytes
    /// * `password` - Password for encrypted templates
    /// * `source_name` - Label used in logs and errors
    pub fn load(data: &[u8], password: Option<&str>, source_name: impl Into<String>) -> Result<Self> {
        if !has_pdf_header(data) {
            return Err(Error::InvalidPdf {
                reason: "Not a valid PDF file".to_string(),
            });
        }

        let document = match password {
            Some(pwd) => parse_document(&QpdfWrapper::decrypt(data, pwd)?)?,
            None => match parse_document(data) {
                Ok(doc) if !doc.is_encrypted() => doc,
                first => {
                    // Encrypted documents with an empty user password still open.
                    let decrypted = QpdfWrapper::decrypt(data, "").map_err(|e| match e {
                        Error::IncorrectPassword => Error::PasswordRequired,
                        other => first.err().unwrap_or(other),
                    })?;
                    parse_document(&decrypted)?
                }
            },
        };

        Self::from_document(document, source_name)
    }

    /// Wrap an already parsed document
    pub fn from_document(document: Document, source_name: impl Into<String>) -> Result<Self> {
        let source_name = source_name.into();
        let fields = extract_fields(&document);
        if fields.is_empty() {
            return Err(Error::NoFormFields { source_name });
        }

        Ok(Self {
            document,
            fields,
            source_name,
        })
    }

    /// Names of every fillable field, sorted
    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    /// Detailed field listing
    pub fn list_fields(&self) -> Vec<FormField> {
        list_fields(&self.document)
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn page_count(&self) -> u32 {
        self.document.get_pages().len() as u32
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// A private copy of the template for one fill
    pub fn fresh_document(&self) -> Document {
        self.document.clone()
    }
}
