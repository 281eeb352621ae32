//! The repository sink that built records are handed to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{common::Record, err::Error, mapping::schema::EntityClass};

pub mod memory;

/// A record together with its repository-assigned identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_new::new)]
pub struct StoredRecord {
    /// Repository-assigned identifier.
    #[serde(rename = "_id")]
    pub id: String,
    /// The stored fields.
    #[serde(flatten)]
    pub record: Record,
}

/// Storage backend for entity records.
///
/// One collection per entity class.  Transport, authentication and timeouts
/// are the implementation's business.
pub trait Repository {
    /// Insert records in order and return their identifiers in the same order.
    fn insert(&mut self, class: EntityClass, records: Vec<Record>) -> Result<Vec<String>, Error>;

    /// Records whose `field` equals `value` or is a list containing `value`.
    fn find_by(
        &self,
        class: EntityClass,
        field: &str,
        value: &Value,
    ) -> Result<Vec<StoredRecord>, Error>;

    /// Number of records matched by [`Repository::find_by`].
    fn count_by(&self, class: EntityClass, field: &str, value: &Value) -> Result<usize, Error> {
        Ok(self.find_by(class, field, value)?.len())
    }

    /// Set `fields` on the record with identifier `id`.
    fn update(&mut self, class: EntityClass, id: &str, fields: Record) -> Result<(), Error>;
}

/// Whether a stored field value matches `value` by equality or list membership.
pub fn field_matches(stored: &Value, value: &Value) -> bool {
    match stored {
        Value::Array(items) => items.contains(value) || stored == value,
        _ => stored == value,
    }
}
