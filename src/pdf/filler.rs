//! Writing values into form fields

use super::fields::{FieldIndex, FieldKind};
use super::text::encode_text;
use crate::error::{Error, Result};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, BTreeSet};

/// Field name to text value
pub type FieldValues = BTreeMap<String, String>;

/// Result of filling form fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillReport {
    /// Fields that received a value
    pub filled: Vec<String>,
    /// Mapping keys that matched no field in the document
    pub unmatched: Vec<String>,
}

/// Fill form fields in place.
///
/// Every field named in `values` gets `/V` set, and each of its widgets gets
/// `/AS` set, to the given value. Button fields take the value as a name,
/// all other kinds as a text string. The AcroForm is then flagged with
/// `NeedAppearances` so viewers redraw the fields from their values.
/// Keys that match no field are reported, not treated as errors.
pub fn fill(doc: &mut Document, values: &FieldValues) -> Result<FillReport> {
    let index = FieldIndex::build(doc);
    let mut filled = BTreeSet::new();

    for slot in index.slots() {
        let Some(value) = values.get(&slot.name) else {
            continue;
        };
        let Some(field_id) = slot.field_id else {
            tracing::debug!(field = %slot.name, "inline field definition cannot be updated");
            continue;
        };

        let value = match slot.kind {
            FieldKind::Button => Object::Name(value.as_bytes().to_vec()),
            _ => encode_text(value),
        };

        set_entry(doc, field_id, "V", value.clone());
        for widget in &slot.widgets {
            set_entry(doc, *widget, "AS", value.clone());
        }
        filled.insert(slot.name.clone());
    }

    let unmatched = values
        .keys()
        .filter(|name| !index.contains(name))
        .cloned()
        .collect();

    set_need_appearances(doc, &index.root_field_ids())?;

    Ok(FillReport {
        filled: filled.into_iter().collect(),
        unmatched,
    })
}

fn set_entry(doc: &mut Document, id: ObjectId, key: &str, value: Object) {
    if let Ok(dict) = doc.get_object_mut(id).and_then(Object::as_dict_mut) {
        dict.set(key, value);
    }
}

enum FormLocation {
    Indirect(ObjectId),
    Inline,
    Missing,
}

/// Set `NeedAppearances true` on the document's AcroForm, creating the
/// dictionary when the catalog has none.
pub fn set_need_appearances(doc: &mut Document, root_fields: &[ObjectId]) -> Result<()> {
    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| Error::InvalidPdf {
            reason: "Document has no catalog reference".to_string(),
        })?;

    let location = match doc.get_dictionary(root_id)?.get(b"AcroForm") {
        Ok(Object::Reference(id)) => FormLocation::Indirect(*id),
        Ok(Object::Dictionary(_)) => FormLocation::Inline,
        _ => FormLocation::Missing,
    };

    match location {
        FormLocation::Indirect(form_id) => {
            doc.get_object_mut(form_id)
                .and_then(Object::as_dict_mut)?
                .set("NeedAppearances", true);
        }
        FormLocation::Inline => {
            let catalog = doc.get_object_mut(root_id).and_then(Object::as_dict_mut)?;
            if let Ok(Object::Dictionary(form)) = catalog.get_mut(b"AcroForm") {
                form.set("NeedAppearances", true);
            }
        }
        FormLocation::Missing => {
            let mut form = Dictionary::new();
            form.set(
                "Fields",
                root_fields
                    .iter()
                    .map(|id| Object::Reference(*id))
                    .collect::<Vec<_>>(),
            );
            form.set("NeedAppearances", true);
            doc.get_object_mut(root_id)
                .and_then(Object::as_dict_mut)?
                .set("AcroForm", form);
        }
    }

    Ok(())
}

/// Read the `NeedAppearances` flag of a document's AcroForm.
pub fn need_appearances(doc: &Document) -> bool {
    super::fields::acroform(doc)
        .and_then(|form| form.get(b"NeedAppearances").ok())
        .and_then(|obj| obj.as_bool().ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fields::list_fields;
    use crate::pdf::generator::{generate_form, FieldSpec};
    use pretty_assertions::assert_eq;

    fn form(names: &[&str]) -> Document {
        let specs: Vec<FieldSpec> = names.iter().map(|n| FieldSpec::new(*n)).collect();
        let bytes = generate_form(None, &specs).unwrap();
        Document::load_mem(&bytes).unwrap()
    }

    fn values(pairs: &[(&str, &str)]) -> FieldValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn value_of(doc: &Document, name: &str) -> Option<String> {
        list_fields(doc)
            .into_iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value)
    }

    #[test]
    fn test_fill_sets_values_and_flag() {
        let mut doc = form(&["first_name", "email"]);
        let report = fill(
            &mut doc,
            &values(&[("first_name", "Alice"), ("email", "alice@example.com")]),
        )
        .unwrap();

        assert_eq!(report.filled, vec!["email", "first_name"]);
        assert!(report.unmatched.is_empty());
        assert_eq!(value_of(&doc, "first_name").as_deref(), Some("Alice"));
        assert!(need_appearances(&doc));
    }

    #[test]
    fn test_unknown_keys_are_reported_not_errors() {
        let mut doc = form(&["first_name"]);
        let report = fill(
            &mut doc,
            &values(&[("first_name", "Bob"), ("fax_number", "555")]),
        )
        .unwrap();
        assert_eq!(report.filled, vec!["first_name"]);
        assert_eq!(report.unmatched, vec!["fax_number"]);
    }

    #[test]
    fn test_unmapped_fields_keep_original_value() {
        let mut doc = form(&["first_name", "last_name"]);
        fill(&mut doc, &values(&[("first_name", "Alice")])).unwrap();
        assert_eq!(value_of(&doc, "last_name"), None);
    }

    #[test]
    fn test_appearance_state_written_on_widget() {
        let mut doc = form(&["first_name"]);
        fill(&mut doc, &values(&[("first_name", "Alice")])).unwrap();

        let index = FieldIndex::build(&doc);
        let slot = &index.slots()[0];
        let widget = doc.get_dictionary(slot.widgets[0]).unwrap();
        assert_eq!(
            widget.get(b"AS").ok().and_then(crate::pdf::text::object_text),
            Some("Alice".to_string())
        );
    }

    #[test]
    fn test_missing_acroform_is_created() {
        let mut doc = form(&["first_name"]);
        let root_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
        doc.get_object_mut(root_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .remove(b"AcroForm");
        assert!(!need_appearances(&doc));

        let report = fill(&mut doc, &values(&[("first_name", "Alice")])).unwrap();
        assert_eq!(report.filled, vec!["first_name"]);
        assert!(need_appearances(&doc));
        assert_eq!(value_of(&doc, "first_name").as_deref(), Some("Alice"));
    }

    #[test]
    fn test_empty_values_still_flag_document() {
        let mut doc = form(&["first_name"]);
        let report = fill(&mut doc, &FieldValues::new()).unwrap();
        assert!(report.filled.is_empty());
        assert!(need_appearances(&doc));
    }
}
