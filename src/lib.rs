//! PDF Autofill Server Library
//!
//! Discovers the fillable fields of PDF forms and fills them from tabular
//! records, one output document per record. The same operations are exposed
//! as MCP tools:
//! - `list_form_fields`: Field names, types, and values of form templates
//! - `fill_form`: Fill one form from a field to value map
//! - `fill_batch`: Fill a form once per database row or inline record
//! - `generate_form`: Create a blank fillable form
//! - `list_tables` / `read_table`: Browse the record database
//! - `list_pdfs`: List PDF files in a directory

pub mod batch;
pub mod config;
pub mod data;
pub mod error;
pub mod pdf;
pub mod server;
pub mod source;

pub use batch::{fill_all, BatchFill, FieldMapping, FilledDocument, RecordError, SkippedRecord};
pub use config::ServerConfig;
pub use error::{Error, Result};
pub use server::{run_server, run_server_with_config, AutofillServer};
pub use source::PdfSource;
