use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl std::fmt::Display for QuoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only view of a quotation as supplied by quotation storage.
///
/// The document carries whatever fields workflow conditions reference
/// (`totalAmount`, `customerType`, `customer.customerType`, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuotationSnapshot {
    pub id: QuoteId,
    pub document: Value,
}

impl QuotationSnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: QuoteId(id.into()), document: Value::Object(Map::new()) }
    }

    pub fn from_document(id: impl Into<String>, document: Value) -> Self {
        Self { id: QuoteId(id.into()), document }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.document.is_object() {
            self.document = Value::Object(Map::new());
        }
        if let Value::Object(fields) = &mut self.document {
            fields.insert(key.into(), value.into());
        }
        self
    }

    /// Resolves a dotted path. Numeric segments index into arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }

        let mut current = &self.document;
        for segment in path.split('.') {
            current = match current {
                Value::Object(fields) => fields.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        match current {
            Value::Null => None,
            value => Some(value),
        }
    }
}
