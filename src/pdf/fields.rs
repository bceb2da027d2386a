//! Form field discovery
//!
//! Fields are collected from two places: the AcroForm `Fields` array and the
//! widget annotations of every page. A widget without its own `/T` belongs to
//! the nearest ancestor reachable through `/Parent` that has one. Every step
//! tolerates missing structure; a broken branch contributes no fields.

use super::text::object_text;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeSet, HashMap};

/// Upper bound on `/Parent` hops, guards against reference cycles.
const MAX_PARENT_DEPTH: usize = 32;

/// Kind of form field, from the inheritable `/FT` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    Button,
    Choice,
    Signature,
    Unknown,
}

impl FieldKind {
    fn from_field_type(ft: &[u8]) -> Self {
        match ft {
            b"Tx" => FieldKind::Text,
            b"Btn" => FieldKind::Button,
            b"Ch" => FieldKind::Choice,
            b"Sig" => FieldKind::Signature,
            _ => FieldKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Button => "button",
            FieldKind::Choice => "choice",
            FieldKind::Signature => "signature",
            FieldKind::Unknown => "unknown",
        }
    }
}

/// A discovered form field
#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    /// Resolved field name (never empty)
    pub name: String,
    /// Field kind
    pub kind: FieldKind,
    /// Current value, if any
    pub value: Option<String>,
    /// Pages (1-indexed) carrying a widget for this field
    pub pages: Vec<u32>,
}

/// One field object together with the widgets that display it.
#[derive(Debug, Clone)]
pub(crate) struct FieldSlot {
    pub name: String,
    pub kind: FieldKind,
    pub value: Option<String>,
    /// `None` for fields declared inline rather than as indirect objects
    pub field_id: Option<ObjectId>,
    pub widgets: Vec<ObjectId>,
    pub pages: BTreeSet<u32>,
    /// Field has no `/Parent`, i.e. belongs in the AcroForm `Fields` array
    pub is_root: bool,
}

/// Index of every named field in a document
#[derive(Debug, Default)]
pub(crate) struct FieldIndex {
    slots: Vec<FieldSlot>,
    by_id: HashMap<ObjectId, usize>,
}

impl FieldIndex {
    pub(crate) fn build(doc: &Document) -> Self {
        let mut index = FieldIndex::default();

        if let Some(fields) = acroform(doc)
            .and_then(|form| form.get(b"Fields").ok())
            .and_then(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_array().ok())
        {
            for entry in fields {
                match entry {
                    Object::Reference(id) => {
                        if let Ok(dict) = doc.get_dictionary(*id) {
                            if let Some(slot) = index.object_slot(doc, *id, dict) {
                                if is_widget(dict) {
                                    index.slots[slot].widgets.push(*id);
                                }
                            }
                        }
                    }
                    Object::Dictionary(dict) => {
                        index.inline_slot(doc, dict);
                    }
                    _ => {}
                }
            }
        }

        for (page_number, page_id) in doc.get_pages() {
            for (annot_id, annot) in page_annotations(doc, page_id) {
                if !is_widget(annot) {
                    continue;
                }

                let slot = match owning_field(doc, annot_id, annot) {
                    Some((Some(owner_id), owner)) => index.object_slot(doc, owner_id, owner),
                    Some((None, owner)) => index.inline_slot(doc, owner),
                    None => None,
                };

                if let Some(slot) = slot {
                    let slot = &mut index.slots[slot];
                    if let Some(id) = annot_id {
                        if !slot.widgets.contains(&id) {
                            slot.widgets.push(id);
                        }
                    }
                    slot.pages.insert(page_number);
                }
            }
        }

        index
    }

    pub(crate) fn slots(&self) -> &[FieldSlot] {
        &self.slots
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.slots.iter().any(|slot| slot.name == name)
    }

    pub(crate) fn names(&self) -> BTreeSet<String> {
        self.slots.iter().map(|slot| slot.name.clone()).collect()
    }

    /// Indirect top-level fields, suitable for a fresh AcroForm `Fields` array
    pub(crate) fn root_field_ids(&self) -> Vec<ObjectId> {
        self.slots
            .iter()
            .filter(|slot| slot.is_root)
            .filter_map(|slot| slot.field_id)
            .collect()
    }

    fn object_slot(&mut self, doc: &Document, id: ObjectId, dict: &Dictionary) -> Option<usize> {
        if let Some(&slot) = self.by_id.get(&id) {
            return Some(slot);
        }

        let slot = new_slot(doc, dict, Some(id))?;
        self.slots.push(slot);
        let idx = self.slots.len() - 1;
        self.by_id.insert(id, idx);
        Some(idx)
    }

    fn inline_slot(&mut self, doc: &Document, dict: &Dictionary) -> Option<usize> {
        let slot = new_slot(doc, dict, None)?;
        if let Some(existing) = self
            .slots
            .iter()
            .position(|s| s.field_id.is_none() && s.name == slot.name)
        {
            return Some(existing);
        }
        self.slots.push(slot);
        Some(self.slots.len() - 1)
    }
}

fn new_slot(doc: &Document, dict: &Dictionary, field_id: Option<ObjectId>) -> Option<FieldSlot> {
    let name = field_name(doc, dict)?;
    let kind = inherited(doc, dict, b"FT")
        .and_then(|obj| match obj {
            Object::Name(ft) => Some(FieldKind::from_field_type(ft)),
            _ => None,
        })
        .unwrap_or(FieldKind::Unknown);
    let value = inherited(doc, dict, b"V")
        .and_then(object_text)
        .filter(|v| !v.is_empty());

    Some(FieldSlot {
        name,
        kind,
        value,
        field_id,
        widgets: Vec::new(),
        pages: BTreeSet::new(),
        is_root: !dict.has(b"Parent"),
    })
}

/// Collect the set of fillable field names in a document.
///
/// Returns an empty set when the document has no interactive form.
pub fn extract_fields(doc: &Document) -> BTreeSet<String> {
    FieldIndex::build(doc).names()
}

/// List every named field with its kind, current value, and pages, sorted by name.
pub fn list_fields(doc: &Document) -> Vec<FormField> {
    let mut fields: Vec<FormField> = FieldIndex::build(doc)
        .slots
        .into_iter()
        .map(|slot| FormField {
            name: slot.name,
            kind: slot.kind,
            value: slot.value,
            pages: slot.pages.into_iter().collect(),
        })
        .collect();
    fields.sort_by(|a, b| a.name.cmp(&b.name));
    fields
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<(Option<ObjectId>, &'a Dictionary)> {
    match obj {
        Object::Reference(id) => doc.get_dictionary(*id).ok().map(|d| (Some(*id), d)),
        Object::Dictionary(d) => Some((None, d)),
        _ => None,
    }
}

/// The catalog's interactive form dictionary, if any
pub(crate) fn acroform(doc: &Document) -> Option<&Dictionary> {
    let root = doc.trailer.get(b"Root").ok()?;
    let catalog = resolve(doc, root)?.as_dict().ok()?;
    resolve(doc, catalog.get(b"AcroForm").ok()?)?.as_dict().ok()
}

fn page_annotations(doc: &Document, page_id: ObjectId) -> Vec<(Option<ObjectId>, &Dictionary)> {
    let Some(annots) = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"Annots").ok())
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_array().ok())
    else {
        return Vec::new();
    };

    annots
        .iter()
        .filter_map(|entry| resolve_dict(doc, entry))
        .collect()
}

fn is_widget(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Widget")
}

fn field_name(doc: &Document, dict: &Dictionary) -> Option<String> {
    let obj = resolve(doc, dict.get(b"T").ok()?)?;
    let name = object_text(obj)?;
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// The field a widget annotation belongs to: itself when it carries a name,
/// otherwise the nearest named ancestor.
fn owning_field<'a>(
    doc: &'a Document,
    annot_id: Option<ObjectId>,
    annot: &'a Dictionary,
) -> Option<(Option<ObjectId>, &'a Dictionary)> {
    if field_name(doc, annot).is_some() {
        return Some((annot_id, annot));
    }

    let mut current = annot;
    for _ in 0..MAX_PARENT_DEPTH {
        let (parent_id, parent) = resolve_dict(doc, current.get(b"Parent").ok()?)?;
        if field_name(doc, parent).is_some() {
            return Some((parent_id, parent));
        }
        current = parent;
    }
    None
}

/// Look up a key on a field, falling back to its ancestors.
fn inherited<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = dict;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(obj) = current.get(key) {
            return resolve(doc, obj);
        }
        let (_, parent) = resolve_dict(doc, current.get(b"Parent").ok()?)?;
        current = parent;
    }
    None
}
