//! Batch filling: one filled document per data record

use crate::data::Record;
use crate::error::Error;
use crate::pdf::text::field_name_from_token;
use crate::pdf::{fill, save_document, FieldValues, FormTemplate};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;

/// Column that is never mapped implicitly
const ROW_ID_COLUMN: &str = "id";

/// Field name to column name.
///
/// An entry may be present but unset, meaning "do not fill this field".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, Option<String>>",
    into = "BTreeMap<String, Option<String>>"
)]
pub struct FieldMapping {
    entries: BTreeMap<String, Option<String>>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a field to a column. Field names may be given as raw name tokens
    /// (`(first_name)` or `/first_name`); a blank column leaves the field unset.
    pub fn insert(&mut self, field: &str, column: &str) {
        let Some(field) = field_name_from_token(field) else {
            return;
        };
        let column = column.trim();
        let column = (!column.is_empty()).then(|| column.to_string());
        self.entries.insert(field, column);
    }

    /// Keep a field in the mapping without a column
    pub fn unset(&mut self, field: &str) {
        if let Some(field) = field_name_from_token(field) {
            self.entries.insert(field, None);
        }
    }

    pub fn from_pairs<F, C>(pairs: impl IntoIterator<Item = (F, C)>) -> Self
    where
        F: AsRef<str>,
        C: AsRef<str>,
    {
        let mut mapping = Self::new();
        for (field, column) in pairs {
            mapping.insert(field.as_ref(), column.as_ref());
        }
        mapping
    }

    /// Default mapping: every field whose name is also a column maps to that
    /// column; the rest stay unset. The row id column is never picked.
    pub fn auto<'a>(
        fields: impl IntoIterator<Item = &'a String>,
        columns: &[String],
    ) -> Self {
        let mut mapping = Self::new();
        for field in fields {
            let matched = columns
                .iter()
                .find(|c| *c == field && c.as_str() != ROW_ID_COLUMN);
            match matched {
                Some(column) => mapping.insert(field, column),
                None => mapping.unset(field),
            }
        }
        mapping
    }

    /// Field to column for every set entry
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(f, c)| c.as_deref().map(|c| (f.as_str(), c)))
    }

    /// Number of fields that have a column
    pub fn mapped_len(&self) -> usize {
        self.entries().count()
    }

    /// Values for one record.
    ///
    /// Unset entries, columns the record lacks, and cells with no text are
    /// left out.
    pub fn values_for(&self, record: &Record) -> FieldValues {
        self.entries()
            .filter_map(|(field, column)| {
                let text = record.get(column)?.fill_text()?;
                Some((field.to_string(), text))
            })
            .collect()
    }
}

impl From<BTreeMap<String, Option<String>>> for FieldMapping {
    fn from(map: BTreeMap<String, Option<String>>) -> Self {
        let mut mapping = Self::new();
        for (field, column) in map {
            match column {
                Some(column) => mapping.insert(&field, &column),
                None => mapping.unset(&field),
            }
        }
        mapping
    }
}

impl From<FieldMapping> for BTreeMap<String, Option<String>> {
    fn from(mapping: FieldMapping) -> Self {
        mapping.entries
    }
}

/// A record that produced no document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
    /// 1-based row number
    pub row: usize,
    pub reason: String,
}

/// A record whose fill or serialization failed
#[derive(Debug, thiserror::Error)]
#[error("Row {row}: {source}")]
pub struct RecordError {
    pub row: usize,
    pub source: Error,
}

/// One filled output document
#[derive(Debug, Clone)]
pub struct FilledDocument {
    /// 1-based row number of the source record
    pub row: usize,
    pub data: Vec<u8>,
    pub fields_filled: Vec<String>,
}

impl FilledDocument {
    /// Conventional download name, `<label>_row<N>.pdf`
    pub fn file_name(&self, label: &str) -> String {
        format!("{}_row{}.pdf", label, self.row)
    }
}

/// Lazy sequence of filled documents, see [`fill_all`]
pub struct BatchFill<'a, I> {
    template: &'a FormTemplate,
    mapping: &'a FieldMapping,
    records: std::iter::Enumerate<I>,
    skipped: Vec<SkippedRecord>,
}

/// Fill the template once per record.
///
/// Documents are produced on demand, in record order, each from its own copy
/// of the template. Records with nothing to fill are skipped and reported via
/// [`BatchFill::skipped`]; a record that fails to fill yields an `Err` and the
/// batch moves on.
pub fn fill_all<'a, R>(
    template: &'a FormTemplate,
    records: R,
    mapping: &'a FieldMapping,
) -> BatchFill<'a, R::IntoIter>
where
    R: IntoIterator,
    R::Item: Borrow<Record>,
{
    BatchFill {
        template,
        mapping,
        records: records.into_iter().enumerate(),
        skipped: Vec::new(),
    }
}

impl<I> BatchFill<'_, I> {
    /// Records skipped so far
    pub fn skipped(&self) -> &[SkippedRecord] {
        &self.skipped
    }

    pub fn into_skipped(self) -> Vec<SkippedRecord> {
        self.skipped
    }

    fn fill_record(&self, row: usize, values: &FieldValues) -> Result<FilledDocument, RecordError> {
        let mut document = self.template.fresh_document();
        let report = fill(&mut document, values).map_err(|source| RecordError { row, source })?;
        let data = save_document(&mut document).map_err(|source| RecordError { row, source })?;

        tracing::debug!(row, fields = report.filled.len(), "filled record");

        Ok(FilledDocument {
            row,
            data,
            fields_filled: report.filled,
        })
    }
}

impl<I> Iterator for BatchFill<'_, I>
where
    I: Iterator,
    I::Item: Borrow<Record>,
{
    type Item = Result<FilledDocument, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (idx, record) = self.records.next()?;
            let row = idx + 1;
            let values = self.mapping.values_for(record.borrow());

            if values.is_empty() {
                tracing::warn!(
                    row,
                    template = self.template.source_name(),
                    "no data to fill, skipping record"
                );
                self.skipped.push(SkippedRecord {
                    row,
                    reason: "No mapped column has a value".to_string(),
                });
                continue;
            }

            return Some(self.fill_record(row, &values));
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.records.size_hint().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CellValue;
    use crate::pdf::{generate_form, list_fields, need_appearances, FieldSpec};
    use lopdf::{Document, Object};
    use pretty_assertions::assert_eq;

    fn template() -> FormTemplate {
        let bytes = generate_form(
            Some("Customer"),
            &[
                FieldSpec::new("first_name"),
                FieldSpec::new("last_name"),
                FieldSpec::new("email"),
            ],
        )
        .unwrap();
        FormTemplate::load(&bytes, None, "customers").unwrap()
    }

    fn identity_mapping() -> FieldMapping {
        FieldMapping::from_pairs([
            ("first_name", "first_name"),
            ("last_name", "last_name"),
            ("email", "email"),
        ])
    }

    fn customer(first: &str, last: &str, email: &str) -> Record {
        Record::new()
            .with("id", CellValue::Integer(1))
            .with_text("first_name", first)
            .with_text("last_name", last)
            .with_text("email", email)
    }

    fn field_values(data: &[u8]) -> BTreeMap<String, Option<String>> {
        let doc = Document::load_mem(data).unwrap();
        list_fields(&doc)
            .into_iter()
            .map(|f| (f.name, f.value))
            .collect()
    }

    #[test]
    fn test_alice_scenario() {
        let template = template();
        let mapping = identity_mapping();
        let records = [customer("Alice", "Smith", "alice@example.com")];

        let docs: Vec<_> = fill_all(&template, &records, &mapping)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].row, 1);
        assert_eq!(docs[0].file_name("customers"), "customers_row1.pdf");

        let values = field_values(&docs[0].data);
        assert_eq!(values["first_name"].as_deref(), Some("Alice"));
        assert_eq!(values["last_name"].as_deref(), Some("Smith"));
        assert_eq!(values["email"].as_deref(), Some("alice@example.com"));
        assert!(need_appearances(&Document::load_mem(&docs[0].data).unwrap()));
    }

    #[test]
    fn test_fill_is_repeatable() {
        let template = template();
        let mapping = identity_mapping();
        let record = customer("Alice", "Smith", "alice@example.com");

        let first = fill_all(&template, [&record], &mapping).next().unwrap().unwrap();
        let second = fill_all(&template, [&record], &mapping).next().unwrap().unwrap();

        assert_eq!(field_values(&first.data), field_values(&second.data));
    }

    #[test]
    fn test_records_do_not_leak_into_each_other() {
        let template = template();
        let mapping = identity_mapping();
        let a = customer("Alice", "Smith", "alice@example.com");
        // B has no email; A's must not carry over
        let b = Record::new()
            .with_text("first_name", "Bob")
            .with_text("last_name", "Jones");

        let batch: Vec<_> = fill_all(&template, [&a, &b], &mapping)
            .collect::<Result<_, _>>()
            .unwrap();
        let alone = fill_all(&template, [&b], &mapping).next().unwrap().unwrap();

        let b_after_a = field_values(&batch[1].data);
        assert_eq!(b_after_a, field_values(&alone.data));
        assert_eq!(b_after_a["email"], None);
    }

    #[test]
    fn test_blank_record_is_skipped_and_reported() {
        let template = template();
        let mapping = identity_mapping();
        let records = vec![
            customer("Alice", "Smith", "alice@example.com"),
            Record::new()
                .with("first_name", CellValue::Null)
                .with_text("last_name", "  ")
                .with("id", CellValue::Integer(2)),
            customer("Bob", "Jones", "bob@example.com"),
        ];

        let mut batch = fill_all(&template, records, &mapping);
        let rows: Vec<usize> = batch.by_ref().map(|doc| doc.unwrap().row).collect();

        assert_eq!(rows, vec![1, 3]);
        assert_eq!(batch.skipped().len(), 1);
        assert_eq!(batch.skipped()[0].row, 2);
    }

    #[test]
    fn test_batch_is_lazy() {
        let template = template();
        let mapping = identity_mapping();
        let records = [
            Record::new(),
            customer("Alice", "Smith", "alice@example.com"),
            customer("Bob", "Jones", "bob@example.com"),
        ];

        let mut batch = fill_all(&template, &records, &mapping);
        let first = batch.next().unwrap().unwrap();
        assert_eq!(first.row, 2);
        // Row 3 has not been touched yet
        assert_eq!(batch.skipped().len(), 1);
        assert_eq!(batch.next().unwrap().unwrap().row, 3);
        assert!(batch.next().is_none());
    }

    #[test]
    fn test_values_skip_unset_and_absent_columns() {
        let mut mapping = FieldMapping::from_pairs([("(first_name)", "given"), ("/email", "mail")]);
        mapping.unset("last_name");
        mapping.insert("phone", "");

        let record = Record::new()
            .with_text("given", "Alice")
            .with("age", CellValue::Integer(30));

        let values = mapping.values_for(&record);
        assert_eq!(values.len(), 1);
        assert_eq!(values["first_name"], "Alice");
        assert_eq!(mapping.mapped_len(), 2);
    }

    #[test]
    fn test_auto_mapping_matches_names_and_skips_id() {
        let fields: Vec<String> = ["email", "id", "first_name", "nickname"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let columns: Vec<String> = ["id", "first_name", "last_name", "email"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mapping = FieldMapping::auto(&fields, &columns);
        let entries: Vec<(&str, &str)> = mapping.entries().collect();
        assert_eq!(entries, vec![("email", "email"), ("first_name", "first_name")]);
    }

    #[test]
    fn test_mapping_from_json() {
        let mapping: FieldMapping = serde_json::from_value(serde_json::json!({
            "first_name": "first_name",
            "last_name": null,
            "email": ""
        }))
        .unwrap();
        let entries: Vec<(&str, &str)> = mapping.entries().collect();
        assert_eq!(entries, vec![("first_name", "first_name")]);

        let back = serde_json::to_value(&mapping).unwrap();
        assert_eq!(back["last_name"], serde_json::Value::Null);
    }

    #[test]
    fn test_unmapped_template_fields_stay_empty() {
        let template = template();
        let mapping = FieldMapping::from_pairs([("first_name", "first_name")]);
        let record = customer("Alice", "Smith", "alice@example.com");

        let doc = fill_all(&template, [record], &mapping).next().unwrap().unwrap();
        assert_eq!(doc.fields_filled, vec!["first_name"]);

        let values = field_values(&doc.data);
        assert_eq!(values["last_name"], None);
        assert_eq!(values["email"], None);
    }

    /// A template whose AcroForm reference points at a non-dictionary, so
    /// every fill fails when setting `NeedAppearances`
    fn unfillable_template() -> FormTemplate {
        let bytes = generate_form(None, &[FieldSpec::new("first_name")]).unwrap();
        let mut doc = Document::load_mem(&bytes).unwrap();
        let root = doc.trailer.get(b"Root").and_then(Object::as_reference).unwrap();
        let form_id = doc
            .get_dictionary(root)
            .and_then(|catalog| catalog.get(b"AcroForm"))
            .and_then(Object::as_reference)
            .unwrap();
        doc.objects.insert(form_id, Object::Integer(0));
        FormTemplate::from_document(doc, "unfillable").unwrap()
    }

    #[test]
    fn test_failed_records_carry_row_and_batch_continues() {
        let template = unfillable_template();
        let mapping = FieldMapping::from_pairs([("first_name", "first_name")]);
        let records = [
            Record::new().with_text("first_name", "Alice"),
            Record::new().with_text("first_name", ""),
            Record::new().with_text("first_name", "Bob"),
        ];

        let mut batch = fill_all(&template, &records, &mapping);
        let results: Vec<_> = batch.by_ref().collect();
        assert_eq!(results.len(), 2);

        let rows: Vec<usize> = results
            .iter()
            .map(|r| r.as_ref().unwrap_err().row)
            .collect();
        assert_eq!(rows, vec![1, 3]);
        assert!(results[0]
            .as_ref()
            .unwrap_err()
            .to_string()
            .starts_with("Row 1: "));

        let skipped: Vec<usize> = batch.skipped().iter().map(|s| s.row).collect();
        assert_eq!(skipped, vec![2]);
    }
}
