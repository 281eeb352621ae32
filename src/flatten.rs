//! Flattening of nested AIRR documents (repertoires, cells, expression and
//! reactivity records) into records keyed by repository storage names.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::{
    coerce::{insert_coerced, ontology_id_key},
    common::Record,
    err::Error,
    mapping::{
        schema::{EntityClass, MappingEntry, ScalarType, STANDARD_VIEW},
        Registry,
    },
};

/// Canonical fields whose lists are always stored as lists of strings.
pub const STRING_LIST_FIELDS: &[&str] = &["keywords_study", "data_processing_files", "germline_alleles"];

/// Key of the data processing list; only one element of it is flattened.
const DATA_PROCESSING_KEY: &str = "data_processing";

/// Flattens documents of one entity class.
#[derive(Debug)]
pub struct Flattener<'a> {
    registry: &'a Registry,
    class: EntityClass,
    /// View the document keys are looked up in.
    source_view: String,
    /// Paths already reported as unmapped.
    warned: HashSet<String>,
}

fn is_ontology(object: &Map<String, Value>) -> bool {
    object.len() == 2 && object.contains_key("label") && object.contains_key("id")
}

fn is_primary(object: &Value) -> bool {
    matches!(object.get("primary_annotation"), Some(Value::Bool(true)))
        || matches!(object.get("primary_annotation"), Some(Value::String(s)) if s.eq_ignore_ascii_case("true"))
}

impl<'a> Flattener<'a> {
    pub fn new(registry: &'a Registry, class: EntityClass) -> Self {
        Self {
            registry,
            class,
            source_view: STANDARD_VIEW.to_string(),
            warned: HashSet::new(),
        }
    }

    /// Flatten one document.
    pub fn flatten(&mut self, document: &Map<String, Value>) -> Result<Record, Error> {
        let mut result = Record::new();
        let mut path = Vec::new();
        self.walk(document, &mut path, &mut result)?;
        Ok(result)
    }

    fn walk(
        &mut self,
        object: &Map<String, Value>,
        path: &mut Vec<String>,
        out: &mut Record,
    ) -> Result<(), Error> {
        for (key, value) in object {
            path.push(key.clone());
            let result = self.visit(key, value, path, out);
            path.pop();
            result?;
        }
        Ok(())
    }

    fn visit(
        &mut self,
        key: &str,
        value: &Value,
        path: &mut Vec<String>,
        out: &mut Record,
    ) -> Result<(), Error> {
        let registry = self.registry;
        let subclass = path.len().checked_sub(2).map(|i| path[i].as_str());
        let entry = registry.lookup_in_subclass(key, &self.source_view, self.class, subclass);

        match value {
            Value::Object(object) => {
                if is_ontology(object) {
                    self.emit(key, value, entry, path, out)
                } else if entry.map(|e| e.storage_type()) == Some(ScalarType::Object) {
                    self.emit(key, value, entry, path, out)
                } else {
                    self.walk(object, path, out)
                }
            }
            Value::Array(items) => {
                let canonical = entry.and_then(|e| e.canonical()).unwrap_or(key);
                if STRING_LIST_FIELDS.contains(&canonical) {
                    let strings = items
                        .iter()
                        .map(|item| match item {
                            Value::String(_) => item.clone(),
                            other => Value::String(other.to_string()),
                        })
                        .collect::<Vec<_>>();
                    self.emit(key, &Value::Array(strings), entry, path, out)
                } else if key == DATA_PROCESSING_KEY && !items.is_empty() {
                    let chosen = if items.len() > 1 {
                        match items.iter().find(|item| is_primary(item)) {
                            Some(primary) => primary,
                            None => {
                                tracing::warn!(
                                    "no primary data_processing among {} entries, using the first",
                                    items.len()
                                );
                                &items[0]
                            }
                        }
                    } else {
                        &items[0]
                    };
                    self.descend(key, chosen, path, out)
                } else if !items.is_empty() && items.iter().all(Value::is_object) {
                    if entry.map(|e| e.storage_type()) == Some(ScalarType::Object) {
                        self.emit(key, value, entry, path, out)
                    } else if items.len() == 1 {
                        self.descend(key, &items[0], path, out)
                    } else {
                        Err(Error::ArrayCardinality {
                            path: path.join("."),
                            len: items.len(),
                        })
                    }
                } else {
                    self.emit(key, value, entry, path, out)
                }
            }
            _ => self.emit(key, value, entry, path, out),
        }
    }

    fn descend(
        &mut self,
        key: &str,
        element: &Value,
        path: &mut Vec<String>,
        out: &mut Record,
    ) -> Result<(), Error> {
        match element {
            Value::Object(object) => {
                if is_ontology(object) {
                    let entry = self.registry.lookup(key, &self.source_view, Some(self.class));
                    self.emit(key, element, entry, path, out)
                } else {
                    self.walk(object, path, out)
                }
            }
            _ => Err(Error::SchemaViolation(format!(
                "expected object in list at {:?}",
                path.join(".")
            ))),
        }
    }

    fn emit(
        &mut self,
        key: &str,
        value: &Value,
        entry: Option<&MappingEntry>,
        path: &[String],
        out: &mut Record,
    ) -> Result<(), Error> {
        let storage_view = self.registry.storage_view();
        match entry.and_then(|e| e.name_in(storage_view).map(|name| (e, name))) {
            Some((entry, name)) => insert_coerced(out, name, entry, value),
            None => {
                let dotted = path.join(".");
                if self.warned.insert(dotted.clone()) {
                    tracing::warn!(
                        "no repository mapping for {} field {:?}, storing as {:?}",
                        self.class,
                        dotted,
                        key
                    );
                }
                match value {
                    Value::Object(object) if is_ontology(object) => {
                        out.insert(key.to_string(), object["label"].clone());
                        out.insert(ontology_id_key(key), object["id"].clone());
                    }
                    _ => {
                        out.insert(key.to_string(), value.clone());
                    }
                }
                Ok(())
            }
        }
    }
}
