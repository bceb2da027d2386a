//! PDF form layer
//!
//! Field discovery, filling, and generation work on the `lopdf` object model;
//! qpdf handles decryption and merging.

mod fields;
mod filler;
mod generator;
mod qpdf;
mod template;
pub mod text;

pub use fields::{extract_fields, list_fields, FieldKind, FormField};
pub use filler::{fill, need_appearances, set_need_appearances, FieldValues, FillReport};
pub use generator::{generate_form, FieldSpec};
pub use qpdf::QpdfWrapper;
pub use template::FormTemplate;

use crate::error::Result;
use lopdf::Document;

/// Serialize a document to PDF bytes
pub fn save_document(document: &mut Document) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    document.save_to(&mut buffer)?;
    Ok(buffer)
}
