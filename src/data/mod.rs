//! Tabular records that feed form fills

mod sqlite;

pub use sqlite::SqliteSource;

use serde::Serialize;

/// One scalar cell of a record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    #[serde(serialize_with = "serialize_blob")]
    Blob(Vec<u8>),
}

fn serialize_blob<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("<{} bytes>", bytes.len()))
}

impl CellValue {
    /// Text written into a form field, if the cell has any.
    ///
    /// Null, binary, and whitespace-only cells have none.
    pub fn fill_text(&self) -> Option<String> {
        match self {
            CellValue::Null | CellValue::Blob(_) => None,
            CellValue::Integer(i) => Some(i.to_string()),
            CellValue::Real(f) => Some(f.to_string()),
            CellValue::Text(s) if s.trim().is_empty() => None,
            CellValue::Text(s) => Some(s.clone()),
        }
    }

    fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Text(b.to_string()),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Integer(i),
                None => n.as_f64().map(CellValue::Real).unwrap_or(CellValue::Null),
            },
            serde_json::Value::String(s) => CellValue::Text(s.clone()),
            other => CellValue::Text(other.to_string()),
        }
    }
}

/// One row of tabular data: ordered column name to value pairs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    cells: Vec<(String, CellValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column; a repeated column name replaces the earlier value
    pub fn with(mut self, column: impl Into<String>, value: CellValue) -> Self {
        let column = column.into();
        match self.cells.iter_mut().find(|(c, _)| *c == column) {
            Some((_, slot)) => *slot = value,
            None => self.cells.push((column, value)),
        }
        self
    }

    /// Convenience for text cells
    pub fn with_text(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(column, CellValue::Text(value.into()))
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Build a record from a JSON object, keeping its key order
    pub fn from_json(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        object
            .iter()
            .fold(Record::new(), |record, (k, v)| record.with(k.clone(), CellValue::from_json(v)))
    }

    /// JSON object view, used in tool responses
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .cells
            .iter()
            .map(|(c, v)| {
                (
                    c.clone(),
                    serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

/// A table read from a record source
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CellValue::Null, None)]
    #[case(CellValue::Text("   ".to_string()), None)]
    #[case(CellValue::Blob(vec![1, 2]), None)]
    #[case(CellValue::Integer(42), Some("42"))]
    #[case(CellValue::Real(19.99), Some("19.99"))]
    #[case(CellValue::Text("Alice".to_string()), Some("Alice"))]
    fn test_fill_text(#[case] cell: CellValue, #[case] expected: Option<&str>) {
        assert_eq!(cell.fill_text().as_deref(), expected);
    }

    #[test]
    fn test_record_lookup_and_replace() {
        let record = Record::new()
            .with_text("first_name", "Alice")
            .with("id", CellValue::Integer(1))
            .with_text("first_name", "Alicia");

        assert_eq!(record.len(), 2);
        assert_eq!(
            record.get("first_name"),
            Some(&CellValue::Text("Alicia".to_string()))
        );
        assert_eq!(record.get("missing"), None);
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["first_name", "id"]);
    }

    #[test]
    fn test_record_from_json() {
        let value = serde_json::json!({
            "email": "bob@example.com",
            "id": 2,
            "score": 1.5,
            "vip": true,
            "notes": null
        });
        let record = Record::from_json(value.as_object().unwrap());

        assert_eq!(record.get("id"), Some(&CellValue::Integer(2)));
        assert_eq!(record.get("score"), Some(&CellValue::Real(1.5)));
        assert_eq!(record.get("vip"), Some(&CellValue::Text("true".to_string())));
        assert_eq!(record.get("notes"), Some(&CellValue::Null));
        assert_eq!(record.to_json()["email"], "bob@example.com");
    }
}
