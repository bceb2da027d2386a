//! Template sources and the output cache

pub mod cache;
pub mod resolver;

pub use cache::{CachedPdf, DocumentCache};
pub use resolver::{label_from_path, PdfSource, ResolvedPdf, Sandbox, SourceResolver};
