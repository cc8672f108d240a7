use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Keys owned by the record itself; form fields with these names are dropped.
const RESERVED_KEYS: &[&str] = &["id", "timestamp"];

/// Value of one form field. Repeated fields (checkbox groups, multi-selects)
/// keep every value, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Multi(Vec<String>),
}

impl FieldValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            FieldValue::Single(v) => vec![v.as_str()],
            FieldValue::Multi(vs) => vs.iter().map(|v| v.as_str()).collect(),
        }
    }
}

/// Submitted form data, built the way a browser's `FormData` is iterated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FormFields(BTreeMap<String, FieldValue>);

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; a second value under the same name turns the field into a list.
    pub fn append(&mut self, name: &str, value: &str) {
        match self.0.remove(name) {
            None => {
                self.0.insert(name.to_string(), FieldValue::Single(value.to_string()));
            }
            Some(FieldValue::Single(first)) => {
                self.0.insert(
                    name.to_string(),
                    FieldValue::Multi(vec![first, value.to_string()]),
                );
            }
            Some(FieldValue::Multi(mut values)) => {
                values.push(value.to_string());
                self.0.insert(name.to_string(), FieldValue::Multi(values));
            }
        }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut fields = Self::new();
        for (name, value) in pairs {
            fields.append(name, value);
        }
        fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A form submission made while offline, waiting for delivery.
///
/// Serializes flat: `{"id": .., "timestamp": .., "<field>": .., ...}`, which
/// is also the JSON body posted to the submit endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl PendingSubmission {
    /// New record with a time-based id (milliseconds since the epoch).
    pub fn new(fields: FormFields) -> Self {
        let now = Utc::now();
        Self::with_id(now.timestamp_millis().to_string(), now, fields)
    }

    pub fn with_id(id: String, timestamp: DateTime<Utc>, fields: FormFields) -> Self {
        let mut fields = fields.0;
        for key in RESERVED_KEYS {
            if fields.remove(*key).is_some() {
                warn!(field = *key, "Dropping form field that collides with record metadata");
            }
        }
        Self {
            id,
            timestamp,
            fields,
        }
    }

    /// Next candidate id after a collision.
    pub(crate) fn bump_id(&mut self) {
        self.id = match self.id.parse::<i64>() {
            Ok(n) => (n + 1).to_string(),
            Err(_) => format!("{}-1", self.id),
        };
    }
}
