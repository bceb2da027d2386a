//! MCP Server implementation using rmcp

use crate::batch::{fill_all, FieldMapping, FilledDocument, RecordError, SkippedRecord};
use crate::config::ServerConfig;
use crate::data::{Record, SqliteSource};
use crate::error::Error;
use crate::pdf::text::field_name_from_token;
use crate::pdf::{
    fill, generate_form, save_document, FieldSpec, FieldValues, FormTemplate, QpdfWrapper,
};
use crate::source::{label_from_path, DocumentCache, PdfSource, Sandbox, SourceResolver};
use anyhow::Result;
use base64::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, service::RequestContext, tool, tool_handler, tool_router, RoleServer,
    ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// PDF form autofill MCP server
#[derive(Clone)]
pub struct AutofillServer {
    cache: Arc<DocumentCache>,
    resolver: SourceResolver,
    sandbox: Sandbox,
    database: Arc<OnceCell<SqliteSource>>,
    tool_router: ToolRouter<Self>,
    config: Arc<ServerConfig>,
}

// ============================================================================
// Request/Response types for list_pdfs
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListPdfsParams {
    /// Directory to search for PDF files
    pub directory: String,
    /// Search subdirectories recursively (default: false)
    #[serde(default)]
    pub recursive: bool,
    /// Filename pattern to filter (e.g., "intake*.pdf"). Supports glob patterns.
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PdfFileInfo {
    /// Full path to the PDF file
    pub path: String,
    /// Filename only
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified time (ISO 8601 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListPdfsResult {
    pub directory: String,
    pub files: Vec<PdfFileInfo>,
    pub total_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for list_form_fields
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFormFieldsParams {
    /// Form templates to inspect
    pub sources: Vec<PdfSource>,
    /// Password for encrypted templates
    #[serde(default)]
    pub password: Option<String>,
    /// Cache each template and return its key for later fill calls
    #[serde(default)]
    pub cache: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FormFieldInfo {
    pub name: String,
    /// text, button, choice, signature, or unknown
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Pages (1-indexed) carrying a widget for this field
    pub pages: Vec<u32>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListFormFieldsResult {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub page_count: u32,
    pub fields: Vec<FormFieldInfo>,
    pub total_fields: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for fill_form
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FillFormParams {
    /// Form template
    pub source: PdfSource,
    /// Field name to value. Numbers and booleans are written as text.
    pub values: serde_json::Map<String, serde_json::Value>,
    /// Output file path (optional)
    #[serde(default)]
    pub output_path: Option<String>,
    /// Password for an encrypted template
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FillFormResult {
    pub source: String,
    /// Cache key for the filled PDF (always provided for chaining operations)
    pub output_cache_key: String,
    pub fields_filled: Vec<String>,
    /// Value keys that matched no field in the template
    pub unmatched_fields: Vec<String>,
    pub output_page_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for fill_batch
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FillBatchParams {
    /// Form template
    pub source: PdfSource,
    /// Database table supplying one record per row
    #[serde(default)]
    pub table: Option<String>,
    /// Inline records, used instead of a table
    #[serde(default)]
    pub records: Option<Vec<serde_json::Map<String, serde_json::Value>>>,
    /// Field name to column name; null or "" leaves a field unfilled.
    /// Defaults to matching field names with column names.
    #[serde(default)]
    pub mapping: Option<BTreeMap<String, Option<String>>>,
    /// Prefix for output names (`<label>_row<N>.pdf`); defaults to the table
    /// name, else the template name
    #[serde(default)]
    pub label: Option<String>,
    /// Directory to write each filled PDF into
    #[serde(default)]
    pub output_dir: Option<String>,
    /// Return each filled PDF as base64 in the response
    #[serde(default)]
    pub include_base64: bool,
    /// Also produce one merged PDF of every filled record
    #[serde(default)]
    pub merge: bool,
    /// Password for an encrypted template
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct BatchDocumentInfo {
    /// 1-based row of the source record
    pub row: usize,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub fields_filled: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RowIssueInfo {
    pub row: usize,
    pub reason: String,
}

impl From<SkippedRecord> for RowIssueInfo {
    fn from(skipped: SkippedRecord) -> Self {
        Self {
            row: skipped.row,
            reason: skipped.reason,
        }
    }
}

impl From<&RecordError> for RowIssueInfo {
    fn from(err: &RecordError) -> Self {
        Self {
            row: err.row,
            reason: err.source.client_message(),
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FillBatchResult {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub total_records: usize,
    /// Field to column mapping that was applied
    pub mapping: BTreeMap<String, Option<String>>,
    pub documents: Vec<BatchDocumentInfo>,
    /// Records with no data for any mapped field
    pub skipped: Vec<RowIssueInfo>,
    /// Records that failed to fill or to write
    pub failed: Vec<RowIssueInfo>,
    /// Filled documents returned without a cache key because the cache is full
    #[serde(skip_serializing_if = "is_zero")]
    pub uncached_documents: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for generate_form
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateFieldParam {
    /// Field name
    pub name: String,
    /// Label drawn beside the field (default: "<name>:")
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateFormParams {
    /// Text fields to lay out, top to bottom
    pub fields: Vec<GenerateFieldParam>,
    /// Heading drawn on the first page
    #[serde(default)]
    pub title: Option<String>,
    /// Output file path (optional)
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct GenerateFormResult {
    pub output_cache_key: String,
    pub fields: Vec<String>,
    pub page_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for list_tables / read_table
// ============================================================================

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListTablesResult {
    pub tables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadTableParams {
    /// Table name (see list_tables)
    pub table: String,
    /// Return at most this many rows (default: 50)
    #[serde(default = "default_row_limit")]
    pub limit: usize,
}

fn default_row_limit() -> usize {
    50
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReadTableResult {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub total_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output of the blocking half of a batch fill
struct BatchOutcome {
    mapping: FieldMapping,
    documents: Vec<FilledDocument>,
    failed: Vec<RecordError>,
    skipped: Vec<SkippedRecord>,
    merged: Option<crate::error::Result<Vec<u8>>>,
}

/// Records and the columns they were read with
struct RecordSet {
    columns: Vec<String>,
    records: Vec<Record>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

fn to_json<T: Serialize>(results: &[T]) -> String {
    let response = serde_json::json!({ "results": results });
    serde_json::to_string_pretty(&response).unwrap_or_default()
}

async fn run_blocking<T, F>(work: F) -> crate::error::Result<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::TaskJoin {
            reason: e.to_string(),
        })?
}

// ============================================================================
// Tool implementations
// ============================================================================

const SOURCE_FORMAT: &str = "Source format: one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}";

#[tool_router]
impl AutofillServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a server with full configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let cache = Arc::new(DocumentCache::new(
            config.cache_max_entries,
            config.cache_max_bytes,
        ));
        let sandbox = Sandbox::new(config.resource_dirs.clone());
        let resolver = SourceResolver::new(
            sandbox.clone(),
            Arc::clone(&cache),
            config.allow_private_urls,
            config.max_download_bytes,
        );

        Self {
            cache,
            resolver,
            sandbox,
            database: Arc::new(OnceCell::new()),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// List the fillable fields of PDF forms
    #[tool(
        description = "List the fillable form fields of one or more PDF templates: name, type, current value, and pages. Field names are what fill_form values and fill_batch mappings refer to.

Fields declared only through page widgets are included. A template with no fields reports an error.

Source format: each element must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn list_form_fields(
        &self,
        Parameters(params): Parameters<ListFormFieldsParams>,
    ) -> String {
        let mut results = Vec::new();

        for source in &params.sources {
            let result = self
                .process_list_form_fields(source, &params)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "list_form_fields failed");
                    ListFormFieldsResult {
                        source: source.describe(),
                        cache_key: None,
                        page_count: 0,
                        fields: vec![],
                        total_fields: 0,
                        error: Some(e.client_message()),
                    }
                });
            results.push(result);
        }

        to_json(&results)
    }

    /// Fill one form
    #[tool(
        description = "Fill a PDF form with values keyed by field name and produce a new PDF. Values are written as text; the output asks viewers to redraw field appearances.

Keys that match no field are reported in unmatched_fields, not treated as errors. Fields without a value keep their current content.

The output is always cached (output_cache_key) for chaining with other tools.

Source format: must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn fill_form(&self, Parameters(params): Parameters<FillFormParams>) -> String {
        let result = self.process_fill_form(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "fill_form failed");
            FillFormResult {
                source: params.source.describe(),
                output_cache_key: String::new(),
                fields_filled: vec![],
                unmatched_fields: vec![],
                output_page_count: 0,
                output_path: None,
                error: Some(e.client_message()),
            }
        });

        to_json(&[result])
    }

    /// Fill a form once per record
    #[tool(
        description = "Fill a PDF form once per record and return one PDF per record. Records come from a database table (table) or inline JSON objects (records).

mapping maps field names to column names; null or \"\" leaves a field unfilled. Without a mapping, each field is filled from the column with the same name (an \"id\" column is never used implicitly).

A record with no value for any mapped field is skipped and listed in skipped. A record that fails is listed in failed; the rest of the batch continues. Each output is cached and named <label>_row<N>.pdf. Set output_dir to write files, include_base64 to return bytes, merge to also build one combined PDF.

Source format: must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn fill_batch(&self, Parameters(params): Parameters<FillBatchParams>) -> String {
        let result = self.process_fill_batch(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "fill_batch failed");
            FillBatchResult {
                source: params.source.describe(),
                table: params.table.clone(),
                total_records: 0,
                mapping: BTreeMap::new(),
                documents: vec![],
                skipped: vec![],
                failed: vec![],
                uncached_documents: 0,
                merged_cache_key: None,
                merged_output_path: None,
                merge_error: None,
                error: Some(e.client_message()),
            }
        });

        to_json(&[result])
    }

    /// Create a blank fillable form
    #[tool(
        description = "Generate a blank fillable PDF form: one labelled text field per entry, laid out top to bottom on US Letter pages. Field names must be unique and non-empty.

The output is always cached (output_cache_key) so it can be passed straight to fill_form or fill_batch."
    )]
    async fn generate_form(&self, Parameters(params): Parameters<GenerateFormParams>) -> String {
        let result = self.process_generate_form(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "generate_form failed");
            GenerateFormResult {
                output_cache_key: String::new(),
                fields: vec![],
                page_count: 0,
                output_path: None,
                error: Some(e.client_message()),
            }
        });

        to_json(&[result])
    }

    /// List database tables
    #[tool(description = "List the tables of the configured record database.")]
    async fn list_tables(&self) -> String {
        let result = self.process_list_tables().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "list_tables failed");
            ListTablesResult {
                tables: vec![],
                error: Some(e.client_message()),
            }
        });

        to_json(&[result])
    }

    /// Preview a database table
    #[tool(
        description = "Read the columns and leading rows of a table in the configured record database. Use it to choose a fill_batch mapping."
    )]
    async fn read_table(&self, Parameters(params): Parameters<ReadTableParams>) -> String {
        let result = self.process_read_table(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "read_table failed");
            ReadTableResult {
                table: params.table.clone(),
                columns: vec![],
                rows: vec![],
                total_rows: 0,
                error: Some(e.client_message()),
            }
        });

        to_json(&[result])
    }

    /// List PDF files in a directory
    #[tool(
        description = "List PDF files in a directory. Useful for finding form templates before processing them.

Returns for each file:
- Full path (can be used directly with other tools)
- Filename
- File size in bytes
- Last modified time

Supports recursive search and glob pattern filtering."
    )]
    async fn list_pdfs(&self, Parameters(params): Parameters<ListPdfsParams>) -> String {
        let result = self.process_list_pdfs(&params).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "list_pdfs failed");
            ListPdfsResult {
                directory: params.directory.clone(),
                files: vec![],
                total_count: 0,
                error: Some(e.client_message()),
            }
        });

        to_json(&[result])
    }
}

impl AutofillServer {
    /// Lazily connected record database
    async fn database(&self) -> crate::error::Result<&SqliteSource> {
        let url = self
            .config
            .database_url
            .as_deref()
            .ok_or(Error::DatabaseNotConfigured)?;
        let seed = self.config.seed_demo_data;

        self.database
            .get_or_try_init(|| async move {
                let db = SqliteSource::connect(url).await?;
                if seed {
                    db.seed_demo().await?;
                }
                tracing::info!(database = url, "connected to record database");
                Ok(db)
            })
            .await
    }

    fn write_output(
        &self,
        output_path: Option<&str>,
        data: &[u8],
    ) -> crate::error::Result<Option<String>> {
        match output_path {
            Some(path) => {
                self.sandbox.write(path, data)?;
                Ok(Some(path.to_string()))
            }
            None => Ok(None),
        }
    }

    fn cache_output(&self, label: &str, data: Vec<u8>) -> Option<String> {
        let key = self.cache.insert(label, data);
        if key.is_none() {
            tracing::warn!(label, "output exceeds the cache budget and was not cached");
        }
        key
    }

    pub async fn process_list_form_fields(
        &self,
        source: &PdfSource,
        params: &ListFormFieldsParams,
    ) -> crate::error::Result<ListFormFieldsResult> {
        let resolved = self.resolver.resolve(source).await?;
        let source_name = resolved.source_name.clone();

        let data = resolved.data.clone();
        let password = params.password.clone();
        let name = source_name.clone();

        let (fields, page_count) = run_blocking(move || {
            let template = FormTemplate::load(&data, password.as_deref(), name)?;
            let fields: Vec<FormFieldInfo> = template
                .list_fields()
                .into_iter()
                .map(|f| FormFieldInfo {
                    name: f.name,
                    field_type: f.kind.as_str().to_string(),
                    value: f.value,
                    pages: f.pages,
                })
                .collect();
            Ok((fields, template.page_count()))
        })
        .await?;

        // Only templates that parsed are worth a key
        let cache_key = if params.cache {
            self.cache_output(&resolved.label, resolved.data)
        } else {
            None
        };

        Ok(ListFormFieldsResult {
            source: source_name,
            cache_key,
            page_count,
            total_fields: fields.len(),
            fields,
            error: None,
        })
    }

    pub async fn process_fill_form(
        &self,
        params: &FillFormParams,
    ) -> crate::error::Result<FillFormResult> {
        let resolved = self.resolver.resolve(&params.source).await?;
        let source_name = resolved.source_name.clone();

        let record = Record::from_json(&params.values);
        let values: FieldValues = record
            .columns()
            .filter_map(|column| {
                let text = record.get(column)?.fill_text()?;
                Some((field_name_from_token(column)?, text))
            })
            .collect();

        let data = resolved.data;
        let password = params.password.clone();
        let name = source_name.clone();

        let (output_data, report, output_page_count) = run_blocking(move || {
            let template = FormTemplate::load(&data, password.as_deref(), name)?;
            let mut document = template.fresh_document();
            let report = fill(&mut document, &values)?;
            let output = save_document(&mut document)?;
            Ok((output, report, template.page_count()))
        })
        .await?;

        let output_path = self.write_output(params.output_path.as_deref(), &output_data)?;
        let label = format!("{}_filled", resolved.label);
        let output_cache_key = self.cache_output(&label, output_data).unwrap_or_default();

        tracing::info!(
            source = %source_name,
            filled = report.filled.len(),
            unmatched = report.unmatched.len(),
            "filled form"
        );

        Ok(FillFormResult {
            source: source_name,
            output_cache_key,
            fields_filled: report.filled,
            unmatched_fields: report.unmatched,
            output_page_count,
            output_path,
            error: None,
        })
    }

    async fn load_records(&self, params: &FillBatchParams) -> crate::error::Result<RecordSet> {
        let set = match (&params.table, &params.records) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(Error::SourceResolution {
                    reason: "Provide exactly one of \"table\" or \"records\"".to_string(),
                })
            }
            (Some(table), None) => {
                let table = self.database().await?.read_table(table).await?;
                RecordSet {
                    columns: table.columns,
                    records: table.rows,
                }
            }
            (None, Some(rows)) => {
                let records: Vec<Record> = rows.iter().map(Record::from_json).collect();
                let mut columns: Vec<String> = Vec::new();
                for column in records.iter().flat_map(Record::columns) {
                    if !columns.iter().any(|c| c == column) {
                        columns.push(column.to_string());
                    }
                }
                RecordSet { columns, records }
            }
        };

        if set.records.len() > self.config.max_batch_records {
            return Err(Error::TooManyRecords {
                count: set.records.len(),
                max: self.config.max_batch_records,
            });
        }
        Ok(set)
    }

    pub async fn process_fill_batch(
        &self,
        params: &FillBatchParams,
    ) -> crate::error::Result<FillBatchResult> {
        let resolved = self.resolver.resolve(&params.source).await?;
        let source_name = resolved.source_name.clone();
        let RecordSet { columns, records } = self.load_records(params).await?;
        let total_records = records.len();

        let label = params
            .label
            .as_deref()
            .map(|l| label_from_path(l, &resolved.label))
            .or_else(|| params.table.clone())
            .unwrap_or_else(|| resolved.label.clone());

        let data = resolved.data;
        let password = params.password.clone();
        let mapping = params.mapping.clone().map(FieldMapping::from);
        let merge = params.merge;
        let name = source_name.clone();

        let outcome = run_blocking(move || {
            // Template errors end the whole batch here, before any record
            let template = FormTemplate::load(&data, password.as_deref(), name)?;
            let mapping = mapping.unwrap_or_else(|| FieldMapping::auto(template.fields(), &columns));

            let mut batch = fill_all(&template, &records, &mapping);
            let mut documents = Vec::new();
            let mut failed = Vec::new();
            for item in batch.by_ref() {
                match item {
                    Ok(document) => documents.push(document),
                    Err(err) => {
                        tracing::warn!(row = err.row, error = %err.source, "record fill failed");
                        failed.push(err);
                    }
                }
            }
            let skipped = batch.into_skipped();

            let merged = (merge && !documents.is_empty()).then(|| {
                let parts: Vec<&[u8]> = documents.iter().map(|d| d.data.as_slice()).collect();
                QpdfWrapper::merge(&parts)
            });

            Ok(BatchOutcome {
                mapping,
                documents,
                failed,
                skipped,
                merged,
            })
        })
        .await?;

        let mut failed: Vec<RowIssueInfo> = outcome.failed.iter().map(RowIssueInfo::from).collect();

        // One slot stays free so a cached template outlives its own batch
        let mut cache_slots = self.cache.capacity().saturating_sub(1);

        let mut merged_cache_key = None;
        let mut merged_output_path = None;
        let mut merge_error = None;
        match outcome.merged {
            Some(Ok(merged)) => {
                let stem = format!("{}_merged", label);
                if let Some(dir) = &params.output_dir {
                    let path = Path::new(dir).join(format!("{}.pdf", stem));
                    match self.write_output(Some(&path.to_string_lossy()), &merged) {
                        Ok(written) => merged_output_path = written,
                        Err(e) => {
                            tracing::warn!(error = %e, "writing merged document failed");
                            merge_error = Some(e.client_message());
                        }
                    }
                }
                if cache_slots > 0 {
                    cache_slots -= 1;
                    merged_cache_key = self.cache_output(&stem, merged);
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "merging filled documents failed");
                merge_error = Some(e.client_message());
            }
            None => {}
        }

        let engine = base64::engine::general_purpose::STANDARD;
        let mut documents = Vec::with_capacity(outcome.documents.len());
        let mut uncached_documents = 0;
        for document in outcome.documents {
            let file_name = document.file_name(&label);
            let output_path = match &params.output_dir {
                Some(dir) => {
                    let path = Path::new(dir).join(&file_name);
                    match self.write_output(Some(&path.to_string_lossy()), &document.data) {
                        Ok(written) => written,
                        Err(e) => {
                            tracing::warn!(row = document.row, error = %e, "writing filled record failed");
                            failed.push(RowIssueInfo {
                                row: document.row,
                                reason: e.client_message(),
                            });
                            continue;
                        }
                    }
                }
                None => None,
            };
            let base64 = params.include_base64.then(|| engine.encode(&document.data));
            let stem = file_name.trim_end_matches(".pdf").to_string();

            let cache_key = if cache_slots > 0 {
                cache_slots -= 1;
                self.cache_output(&stem, document.data)
            } else {
                None
            };
            if cache_key.is_none() {
                uncached_documents += 1;
            }

            documents.push(BatchDocumentInfo {
                row: document.row,
                cache_key,
                file_name,
                output_path,
                fields_filled: document.fields_filled,
                base64,
            });
        }

        // The byte budget can still evict earlier outputs of this batch
        for document in &mut documents {
            if document.cache_key.as_deref().is_some_and(|key| !self.cache.contains(key)) {
                document.cache_key = None;
                uncached_documents += 1;
            }
        }
        if merged_cache_key.as_deref().is_some_and(|key| !self.cache.contains(key)) {
            merged_cache_key = None;
        }
        if uncached_documents > 0 {
            tracing::warn!(
                uncached = uncached_documents,
                capacity = self.cache.capacity(),
                "batch outputs exceed the document cache, some were not cached"
            );
        }
        failed.sort_by_key(|issue| issue.row);

        tracing::info!(
            source = %source_name,
            records = total_records,
            filled = documents.len(),
            skipped = outcome.skipped.len(),
            failed = failed.len(),
            "batch fill finished"
        );

        Ok(FillBatchResult {
            source: source_name,
            table: params.table.clone(),
            total_records,
            mapping: outcome.mapping.into(),
            documents,
            skipped: outcome.skipped.into_iter().map(RowIssueInfo::from).collect(),
            failed,
            uncached_documents,
            merged_cache_key,
            merged_output_path,
            merge_error,
            error: None,
        })
    }

    pub async fn process_generate_form(
        &self,
        params: &GenerateFormParams,
    ) -> crate::error::Result<GenerateFormResult> {
        let specs: Vec<FieldSpec> = params
            .fields
            .iter()
            .map(|f| FieldSpec {
                name: f.name.clone(),
                label: f.label.clone(),
            })
            .collect();
        let title = params.title.clone();

        let (output_data, page_count) = run_blocking(move || {
            let data = generate_form(title.as_deref(), &specs)?;
            let page_count = QpdfWrapper::get_page_count(&data)?;
            Ok((data, page_count))
        })
        .await?;

        let output_path = self.write_output(params.output_path.as_deref(), &output_data)?;
        let label = params
            .output_path
            .as_deref()
            .map(|p| label_from_path(p, "form"))
            .unwrap_or_else(|| "form".to_string());
        let output_cache_key = self.cache_output(&label, output_data).unwrap_or_default();

        Ok(GenerateFormResult {
            output_cache_key,
            fields: params.fields.iter().map(|f| f.name.trim().to_string()).collect(),
            page_count,
            output_path,
            error: None,
        })
    }

    pub async fn process_list_tables(&self) -> crate::error::Result<ListTablesResult> {
        let tables = self.database().await?.list_tables().await?;
        Ok(ListTablesResult {
            tables,
            error: None,
        })
    }

    pub async fn process_read_table(
        &self,
        params: &ReadTableParams,
    ) -> crate::error::Result<ReadTableResult> {
        let table = self.database().await?.read_table(&params.table).await?;
        let total_rows = table.rows.len();

        Ok(ReadTableResult {
            table: table.name,
            columns: table.columns,
            rows: table
                .rows
                .iter()
                .take(params.limit)
                .map(Record::to_json)
                .collect(),
            total_rows,
            error: None,
        })
    }

    pub fn process_list_pdfs(
        &self,
        params: &ListPdfsParams,
    ) -> crate::error::Result<ListPdfsResult> {
        self.sandbox.check_existing(&params.directory)?;

        let dir_path = Path::new(&params.directory);
        if !dir_path.is_dir() {
            return Err(Error::PdfNotFound {
                path: params.directory.clone(),
            });
        }

        let pattern = params
            .pattern
            .as_ref()
            .and_then(|p| glob::Pattern::new(p).ok());

        let mut files = Vec::new();
        Self::collect_pdfs(dir_path, params.recursive, pattern.as_ref(), &mut files)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(ListPdfsResult {
            directory: params.directory.clone(),
            total_count: files.len() as u32,
            files,
            error: None,
        })
    }

    fn collect_pdfs(
        dir: &Path,
        recursive: bool,
        pattern: Option<&glob::Pattern>,
        files: &mut Vec<PdfFileInfo>,
    ) -> crate::error::Result<()> {
        for entry in std::fs::read_dir(dir)?.flatten() {
            let path = entry.path();

            if path.is_dir() {
                if recursive {
                    // Unreadable subdirectories are skipped
                    let _ = Self::collect_pdfs(&path, recursive, pattern, files);
                }
                continue;
            }

            let is_pdf = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
            if !path.is_file() || !is_pdf {
                continue;
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if pattern.is_some_and(|p| !p.matches(&name)) {
                continue;
            }

            let metadata = std::fs::metadata(&path).ok();
            let modified = metadata
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());

            files.push(PdfFileInfo {
                path: path.to_string_lossy().to_string(),
                name,
                size: metadata.map(|m| m.len()).unwrap_or(0),
                modified,
            });
        }

        Ok(())
    }
}

impl Default for AutofillServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for AutofillServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "PDF Autofill Server discovers the fields of PDF forms and fills them, \
                 one form at a time or once per database row. Start with list_form_fields, \
                 then fill_form or fill_batch. PDF files in configured directories are \
                 exposed as resources; reading one returns its fields. {}",
                SOURCE_FORMAT
            )),
        }
    }

    /// List PDF templates in configured directories
    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let mut resources = Vec::new();

        for dir in self.config.resource_dirs.iter() {
            let params = ListPdfsParams {
                directory: dir.clone(),
                recursive: true,
                pattern: None,
            };

            let Ok(listing) = self.process_list_pdfs(&params) else {
                continue;
            };
            for file in listing.files {
                let mut resource = RawResource::new(format!("file://{}", file.path), file.name);
                resource.mime_type = Some("application/pdf".to_string());
                resource.description = Some(format!("PDF form template ({} bytes)", file.size));
                resource.size = u32::try_from(file.size).ok();

                resources.push(Annotated {
                    raw: resource,
                    annotations: None,
                });
            }
        }

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
            meta: Default::default(),
        })
    }

    /// Read a PDF template resource and return its form fields as JSON
    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let uri = &request.uri;
        let Some(path) = uri.strip_prefix("file://") else {
            return Err(ErrorData::invalid_params(
                "Only file:// URIs are supported",
                None,
            ));
        };

        if self.sandbox.check_existing(path).is_err() {
            return Err(ErrorData::invalid_params(
                "Resource not found in configured directories",
                None,
            ));
        }

        let source = PdfSource::Path {
            path: path.to_string(),
        };
        let params = ListFormFieldsParams {
            sources: vec![source.clone()],
            password: None,
            cache: false,
        };

        match self.process_list_form_fields(&source, &params).await {
            Ok(result) => Ok(ReadResourceResult {
                contents: vec![ResourceContents::TextResourceContents {
                    uri: uri.clone(),
                    mime_type: Some("application/json".to_string()),
                    text: serde_json::to_string_pretty(&result).unwrap_or_default(),
                    meta: Default::default(),
                }],
            }),
            Err(e) => {
                tracing::warn!(error = %e, "read_resource failed");
                Err(ErrorData::internal_error(e.client_message(), None))
            }
        }
    }
}

/// Run the MCP server with default configuration
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    tracing::info!(
        resource_dirs = ?config.resource_dirs,
        database = config.database_url.as_deref().unwrap_or("<none>"),
        "PDF Autofill Server ready, waiting for connections..."
    );

    let server = AutofillServer::with_config(config);
    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}
