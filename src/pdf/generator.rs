//! Blank form generation: labelled single-line text fields on US Letter pages

use super::save_document;
use crate::error::{Error, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::collections::HashSet;

const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const LABEL_X: f32 = 50.0;
const FIELD_X: f32 = 150.0;
const FIELD_WIDTH: f32 = 300.0;
const FIELD_HEIGHT: f32 = 20.0;
const FIRST_ROW_Y: f32 = 700.0;
const ROW_SPACING: f32 = 50.0;
const BOTTOM_MARGIN: f32 = 80.0;
const TITLE_Y: f32 = 750.0;
const DEFAULT_APPEARANCE: &str = "/Helv 0 Tf 0 g";

/// One text field to place on a generated form
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Field name (`/T`)
    pub name: String,
    /// Label drawn left of the field; defaults to the name
    pub label: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn label_text(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("{}:", self.name),
        }
    }
}

fn validate(fields: &[FieldSpec]) -> Result<()> {
    if fields.is_empty() {
        return Err(Error::InvalidFieldSpec {
            reason: "at least one field is required".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for field in fields {
        let name = field.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidFieldSpec {
                reason: "field names must not be empty".to_string(),
            });
        }
        if !seen.insert(name) {
            return Err(Error::InvalidFieldSpec {
                reason: format!("duplicate field name '{}'", name),
            });
        }
    }
    Ok(())
}

fn rows_per_page() -> usize {
    ((FIRST_ROW_Y - BOTTOM_MARGIN) / ROW_SPACING) as usize + 1
}

fn text_op(font_size: i64, x: f32, y: f32, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), font_size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new("Tj", vec![Object::string_literal(text)]),
        Operation::new("ET", vec![]),
    ]
}

/// Build a PDF form with one labelled text field per `FieldSpec`.
///
/// Rows are 50pt apart from y=700 and continue onto further pages. The
/// optional title is drawn on the first page.
pub fn generate_form(title: Option<&str>, fields: &[FieldSpec]) -> Result<Vec<u8>> {
    validate(fields)?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut page_ids: Vec<ObjectId> = Vec::new();
    let mut field_ids: Vec<Object> = Vec::new();

    for (page_index, chunk) in fields.chunks(rows_per_page()).enumerate() {
        let page_id = doc.new_object_id();
        let mut operations = Vec::new();
        let mut annots = Vec::new();

        if page_index == 0 {
            if let Some(title) = title {
                operations.extend(text_op(16, LABEL_X, TITLE_Y, title));
            }
        }

        for (row, field) in chunk.iter().enumerate() {
            let y = FIRST_ROW_Y - row as f32 * ROW_SPACING;
            operations.extend(text_op(12, LABEL_X, y, &field.label_text()));

            let rect_bottom = y - 15.0;
            let widget_id = doc.add_object(dictionary! {
                "Type" => "Annot",
                "Subtype" => "Widget",
                "FT" => "Tx",
                "T" => Object::String(field.name.trim().as_bytes().to_vec(), StringFormat::Literal),
                "V" => Object::String(Vec::new(), StringFormat::Literal),
                "F" => 4,
                "P" => page_id,
                "Rect" => vec![
                    FIELD_X.into(),
                    rect_bottom.into(),
                    (FIELD_X + FIELD_WIDTH).into(),
                    (rect_bottom + FIELD_HEIGHT).into(),
                ],
                "DA" => Object::string_literal(DEFAULT_APPEARANCE),
                "MK" => dictionary! {
                    "BC" => vec![0.into(), 0.into(), 0.into()],
                },
            });
            annots.push(Object::Reference(widget_id));
            field_ids.push(Object::Reference(widget_id));
        }

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));

        doc.objects.insert(
            page_id,
            Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
                "Contents" => content_id,
                "Resources" => resources_id,
                "Annots" => annots,
            }),
        );
        page_ids.push(page_id);
    }

    let page_count = page_ids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => page_count,
        }),
    );

    let acroform_id = doc.add_object(dictionary! {
        "Fields" => field_ids,
        "DA" => Object::string_literal(DEFAULT_APPEARANCE),
        "DR" => dictionary! {
            "Font" => dictionary! { "Helv" => font_id },
        },
    });

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "AcroForm" => acroform_id,
    });
    doc.trailer.set("Root", catalog_id);

    save_document(&mut doc)
}
