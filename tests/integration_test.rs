//! Integration tests for PDF Autofill Server

use lopdf::{dictionary, Document, Object, ObjectId, StringFormat};
use pdf_autofill_server::batch::{fill_all, FieldMapping};
use pdf_autofill_server::data::{CellValue, Record, SqliteSource};
use pdf_autofill_server::pdf::{
    extract_fields, fill, generate_form, list_fields, need_appearances, save_document,
    FieldSpec, FieldValues, FormTemplate, QpdfWrapper,
};
use pdf_autofill_server::Error;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use tempfile::TempDir;

fn customer_form() -> Vec<u8> {
    generate_form(
        Some("Customer details"),
        &[
            FieldSpec::new("first_name").with_label("First name:"),
            FieldSpec::new("last_name").with_label("Last name:"),
            FieldSpec::new("email").with_label("Email:"),
        ],
    )
    .expect("Failed to generate form")
}

fn customer_mapping() -> FieldMapping {
    FieldMapping::from_pairs([
        ("first_name", "first_name"),
        ("last_name", "last_name"),
        ("email", "email"),
    ])
}

fn field_values(data: &[u8]) -> BTreeMap<String, Option<String>> {
    let doc = Document::load_mem(data).expect("Output should parse");
    list_fields(&doc)
        .into_iter()
        .map(|f| (f.name, f.value))
        .collect()
}

/// A one-page document whose only field is a parent object reached through
/// its widget; the catalog has no AcroForm.
fn widget_only_form() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page_id = doc.new_object_id();

    let parent_id = doc.add_object(dictionary! {
        "FT" => "Tx",
        "T" => Object::String(b"applicant".to_vec(), StringFormat::Literal),
    });
    let widget_id: ObjectId = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "Parent" => parent_id,
        "P" => page_id,
        "Rect" => vec![150.into(), 685.into(), 450.into(), 705.into()],
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    doc.objects.insert(
        page_id,
        Object::Dictionary(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Annots" => vec![Object::Reference(widget_id)],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    save_document(&mut doc).expect("Failed to save widget-only form")
}

#[test]
fn test_generated_form_exposes_its_fields() {
    let doc = Document::load_mem(&customer_form()).unwrap();
    let names: Vec<String> = extract_fields(&doc).into_iter().collect();
    assert_eq!(names, vec!["email", "first_name", "last_name"]);
    assert!(!need_appearances(&doc));
}

#[test]
fn test_widget_parent_field_is_extracted_and_fillable() {
    let template = FormTemplate::load(&widget_only_form(), None, "widget.pdf").unwrap();
    assert_eq!(
        template.fields().iter().cloned().collect::<Vec<_>>(),
        vec!["applicant"]
    );

    let mapping = FieldMapping::from_pairs([("applicant", "name")]);
    let records = [Record::new().with_text("name", "Alice Smith")];
    let filled = fill_all(&template, &records, &mapping)
        .next()
        .unwrap()
        .unwrap();

    let values = field_values(&filled.data);
    assert_eq!(values["applicant"].as_deref(), Some("Alice Smith"));

    // The missing AcroForm is created so the flag has somewhere to live
    let doc = Document::load_mem(&filled.data).unwrap();
    assert!(need_appearances(&doc));
    assert_eq!(extract_fields(&doc).len(), 1);
}

#[test]
fn test_alice_scenario_end_to_end() {
    let template = FormTemplate::load(&customer_form(), None, "customers.pdf").unwrap();
    let records = vec![Record::new()
        .with("id", CellValue::Integer(1))
        .with_text("first_name", "Alice")
        .with_text("last_name", "Smith")
        .with_text("email", "alice@example.com")];

    let documents: Vec<_> = fill_all(&template, &records, &customer_mapping())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(documents.len(), 1);

    let values = field_values(&documents[0].data);
    assert_eq!(values["first_name"].as_deref(), Some("Alice"));
    assert_eq!(values["last_name"].as_deref(), Some("Smith"));
    assert_eq!(values["email"].as_deref(), Some("alice@example.com"));
    assert!(need_appearances(
        &Document::load_mem(&documents[0].data).unwrap()
    ));
}

#[test]
fn test_same_input_fills_identically() {
    let template = FormTemplate::load(&customer_form(), None, "customers.pdf").unwrap();
    let mut values = FieldValues::new();
    values.insert("first_name".to_string(), "Zoë".to_string());
    values.insert("email".to_string(), "zoe@example.com".to_string());

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let mut doc = template.fresh_document();
        fill(&mut doc, &values).unwrap();
        outputs.push(save_document(&mut doc).unwrap());
    }

    assert_eq!(field_values(&outputs[0]), field_values(&outputs[1]));
    assert_eq!(
        field_values(&outputs[0])["first_name"].as_deref(),
        Some("Zoë")
    );
}

#[test]
fn test_unmapped_fields_keep_original_values() {
    let template = FormTemplate::load(&customer_form(), None, "customers.pdf").unwrap();
    let mapping = FieldMapping::from_pairs([("email", "email")]);
    let record = Record::new()
        .with_text("first_name", "Alice")
        .with_text("email", "alice@example.com");

    let filled = fill_all(&template, [record], &mapping)
        .next()
        .unwrap()
        .unwrap();
    let values = field_values(&filled.data);
    assert_eq!(values["first_name"], None);
    assert_eq!(values["last_name"], None);
    assert_eq!(values["email"].as_deref(), Some("alice@example.com"));
}

#[test]
fn test_batch_records_are_independent() {
    let template = FormTemplate::load(&customer_form(), None, "customers.pdf").unwrap();
    let mapping = customer_mapping();
    let alice = Record::new()
        .with_text("first_name", "Alice")
        .with_text("last_name", "Smith")
        .with_text("email", "alice@example.com");
    let bob = Record::new().with_text("first_name", "Bob");

    let both: Vec<_> = fill_all(&template, [&alice, &bob], &mapping)
        .map(Result::unwrap)
        .collect();
    let alone = fill_all(&template, [&bob], &mapping)
        .next()
        .unwrap()
        .unwrap();

    assert_eq!(field_values(&both[1].data), field_values(&alone.data));
    assert_eq!(both[1].row, 2);
    assert_eq!(alone.row, 1);
}

#[test]
fn test_blank_records_are_skipped_with_notice() {
    let template = FormTemplate::load(&customer_form(), None, "customers.pdf").unwrap();
    let mapping = customer_mapping();
    let records = [
        Record::new().with_text("first_name", "").with("email", CellValue::Null),
        Record::new().with_text("unrelated", "value"),
    ];

    let mut batch = fill_all(&template, &records, &mapping);
    assert!(batch.next().is_none());

    let rows: Vec<usize> = batch.skipped().iter().map(|s| s.row).collect();
    assert_eq!(rows, vec![1, 2]);
}

#[test]
fn test_template_without_fields_fails_before_any_record() {
    let mut doc = Document::load_mem(&widget_only_form()).unwrap();
    for (_, page_id) in doc.get_pages() {
        doc.get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .remove(b"Annots");
    }
    let bytes = save_document(&mut doc).unwrap();

    let err = FormTemplate::load(&bytes, None, "blank.pdf").unwrap_err();
    assert!(matches!(err, Error::NoFormFields { .. }));
}

#[tokio::test]
async fn test_sqlite_rows_fill_and_merge() {
    let dir = TempDir::new().unwrap();
    let db = SqliteSource::connect(&dir.path().join("demo.db").to_string_lossy())
        .await
        .unwrap();
    db.seed_demo().await.unwrap();

    let table = db.read_table("customers").await.unwrap();
    let template = FormTemplate::load(&customer_form(), None, "customers.pdf").unwrap();
    let mapping = FieldMapping::auto(template.fields(), &table.columns);

    let documents: Vec<_> = fill_all(&template, &table.rows, &mapping)
        .collect::<Result<_, _>>()
        .unwrap();
    let names: Vec<String> = documents.iter().map(|d| d.file_name(&table.name)).collect();
    assert_eq!(names, vec!["customers_row1.pdf", "customers_row2.pdf"]);
    assert_eq!(
        field_values(&documents[1].data)["last_name"].as_deref(),
        Some("Jones")
    );

    let parts: Vec<&[u8]> = documents.iter().map(|d| d.data.as_slice()).collect();
    let merged = QpdfWrapper::merge(&parts).unwrap();
    assert_eq!(QpdfWrapper::get_page_count(&merged).unwrap(), 2);
}
