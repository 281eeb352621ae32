//! Checks on input files before any record is built.

use std::collections::HashSet;

use itertools::Itertools;
use serde_json::{Map, Value};

use crate::{
    build::dialect::Dialect,
    err::Error,
    mapping::{schema::EntityClass, Registry},
};

/// Check that a tabular header has every column the dialect must provide.
///
/// AIRR files must carry all required fields; the other dialects only the
/// required non-nullable ones.
pub fn check_header(
    registry: &Registry,
    class: EntityClass,
    dialect: Dialect,
    header: &[String],
) -> Result<(), Error> {
    let present = header.iter().map(|s| s.as_str()).collect::<HashSet<_>>();
    let missing = registry
        .rows_for(class, |e| e.required && e.standard().is_some())
        .filter(|e| dialect == Dialect::Airr || !e.nullable)
        .filter_map(|e| e.name_in(dialect.column()))
        .filter(|name| !present.contains(name))
        .collect::<Vec<_>>();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::SchemaViolation(format!(
            "{} header lacks required column(s) {}",
            dialect,
            missing.iter().map(|name| format!("{:?}", name)).join(", ")
        )))
    }
}

/// The documents of a JSON input: a list of objects, or an object with a
/// single key holding such a list (e.g. `{"Repertoire": [...]}`).
pub fn documents(value: Value) -> Result<Vec<Map<String, Value>>, Error> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(object) if object.len() == 1 => match object.into_iter().next() {
            Some((_, Value::Array(items))) => items,
            Some((key, _)) => {
                return Err(Error::SchemaViolation(format!(
                    "expected a list under {:?}",
                    key
                )))
            }
            None => return Err(Error::SchemaViolation("empty document".to_string())),
        },
        _ => {
            return Err(Error::SchemaViolation(
                "expected a list of objects or an object wrapping one".to_string(),
            ))
        }
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(object) => Ok(object),
            other => Err(Error::SchemaViolation(format!(
                "element {} is not an object: {}",
                i, other
            ))),
        })
        .collect()
}

/// Check that `key` has a distinct value in every document that sets it.
pub fn check_unique(documents: &[Map<String, Value>], key: &str) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for document in documents {
        let Some(value) = document.get(key).filter(|v| !v.is_null()) else {
            continue;
        };
        if !seen.insert(value.to_string()) {
            return Err(Error::SchemaViolation(format!(
                "{} {} occurs more than once",
                key, value
            )));
        }
    }
    Ok(())
}
