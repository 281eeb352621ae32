//! Coercion of values into the scalar types declared by the mapping table.

use serde_json::{Map, Number, Value};

use crate::{
    common::Record,
    err::Error,
    mapping::schema::{MappingEntry, ScalarType},
};

/// Parse the boolean spellings accepted in input files and mapping flags.
pub fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim() {
        "T" | "t" | "True" | "TRUE" | "true" | "1" => Some(true),
        "F" | "f" | "False" | "FALSE" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Whether the value counts as missing: null or a blank string.
pub fn is_null_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Name of the field holding the identifier of an ontology field.
pub fn ontology_id_key(name: &str) -> String {
    format!("{}_id", name)
}

/// What a field is coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Type to produce.
    pub scalar: ScalarType,
    /// Type declared by the AIRR standard, if any.
    pub source: Option<ScalarType>,
    pub nullable: bool,
    pub is_array: bool,
}

impl Target {
    /// Storage target of a mapping row.
    pub fn of(entry: &MappingEntry) -> Self {
        Self {
            scalar: entry.storage_type(),
            source: entry.airr_type,
            nullable: entry.nullable,
            is_array: entry.is_array,
        }
    }

    /// Element target if values are stored as lists.
    fn element(&self) -> Option<Target> {
        let scalar = match (self.is_array, self.scalar) {
            (_, ScalarType::Array) => match self.source {
                Some(
                    s @ (ScalarType::String
                    | ScalarType::Integer
                    | ScalarType::Number
                    | ScalarType::Boolean
                    | ScalarType::Object),
                ) => s,
                _ => ScalarType::String,
            },
            (true, scalar) => scalar,
            (false, _) => return None,
        };
        Some(Target {
            scalar,
            source: self.source,
            nullable: true,
            is_array: false,
        })
    }
}

/// Result of a coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    /// A single value.
    Value(Value),
    /// An ontology term, stored as two fields.
    Ontology { label: Value, id: Value },
}

fn mismatch(field: &str, value: &Value, target: ScalarType) -> Error {
    Error::TypeMismatch {
        field: field.to_string(),
        value: value.to_string(),
        target: target.to_string(),
    }
}

/// Coerce `value` of `field` into `target`.
pub fn coerce(field: &str, value: &Value, target: &Target) -> Result<Coerced, Error> {
    if let Some(element) = target.element() {
        return coerce_array(field, value, &element).map(Coerced::Value);
    }

    if is_null_like(value) {
        if !target.nullable {
            return Err(Error::NullOnRequired {
                field: field.to_string(),
            });
        }
        return Ok(match target.scalar {
            ScalarType::Ontology => Coerced::Ontology {
                label: Value::Null,
                id: Value::Null,
            },
            _ => Coerced::Value(Value::Null),
        });
    }

    match target.scalar {
        ScalarType::String => to_string(field, value).map(Coerced::Value),
        ScalarType::Integer => to_integer(field, value, target.source).map(Coerced::Value),
        ScalarType::Number => to_number(field, value).map(Coerced::Value),
        ScalarType::Boolean => to_boolean(field, value).map(Coerced::Value),
        ScalarType::Object => match (target.source, value) {
            (Some(ScalarType::Object), Value::Object(_)) => Ok(Coerced::Value(value.clone())),
            _ => Err(mismatch(field, value, ScalarType::Object)),
        },
        ScalarType::Ontology => to_ontology(field, value, target.nullable),
        ScalarType::Array => Err(mismatch(field, value, ScalarType::Array)),
    }
}

fn coerce_array(field: &str, value: &Value, element: &Target) -> Result<Value, Error> {
    let coerce_element = |item: &Value| -> Result<Value, Error> {
        match coerce(field, item, element)? {
            Coerced::Value(value) => Ok(value),
            Coerced::Ontology { label, id } => {
                let mut term = Map::new();
                term.insert("label".to_string(), label);
                term.insert("id".to_string(), id);
                Ok(Value::Object(term))
            }
        }
    };

    let items = match value {
        Value::Null => Vec::new(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| coerce_element(&Value::String(token.to_string())))
            .collect::<Result<Vec<_>, _>>()?,
        Value::Array(items) => items
            .iter()
            .map(coerce_element)
            .collect::<Result<Vec<_>, _>>()?,
        Value::Object(_) if element.scalar != ScalarType::Object => {
            return Err(mismatch(field, value, ScalarType::Array))
        }
        _ => vec![coerce_element(value)?],
    };
    Ok(Value::Array(items))
}

fn to_string(field: &str, value: &Value) -> Result<Value, Error> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        _ => Err(mismatch(field, value, ScalarType::String)),
    }
}

fn whole_number(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn to_integer(field: &str, value: &Value, source: Option<ScalarType>) -> Result<Value, Error> {
    let result = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole_number)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_number))
        }
        Value::Bool(b) if source == Some(ScalarType::Boolean) => Some(i64::from(*b)),
        _ => None,
    };
    result
        .map(|i| Value::Number(i.into()))
        .ok_or_else(|| mismatch(field, value, ScalarType::Integer))
}

fn to_number(field: &str, value: &Value) -> Result<Value, Error> {
    let result = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    result
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| mismatch(field, value, ScalarType::Number))
}

fn to_boolean(field: &str, value: &Value) -> Result<Value, Error> {
    let result = match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => parse_bool_str(s),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    };
    result
        .map(Value::Bool)
        .ok_or_else(|| mismatch(field, value, ScalarType::Boolean))
}

fn to_ontology(field: &str, value: &Value, nullable: bool) -> Result<Coerced, Error> {
    let (label, id) = match value {
        Value::Object(term) if term.contains_key("label") || term.contains_key("id") => (
            term.get("label").cloned().unwrap_or(Value::Null),
            term.get("id").cloned().unwrap_or(Value::Null),
        ),
        Value::String(_) => (value.clone(), Value::Null),
        _ => return Err(mismatch(field, value, ScalarType::Ontology)),
    };
    if !nullable && is_null_like(&label) {
        return Err(Error::NullOnRequired {
            field: field.to_string(),
        });
    }
    Ok(Coerced::Ontology { label, id })
}

/// Coerce `value` for the storage field `name` and insert the result into
/// `record`.
///
/// Ontology terms become two fields.  A bare label keeps an identifier that is
/// already present in the record.
pub fn insert_coerced(
    record: &mut Record,
    name: &str,
    entry: &MappingEntry,
    value: &Value,
) -> Result<(), Error> {
    match coerce(name, value, &Target::of(entry))? {
        Coerced::Value(coerced) => {
            record.insert(name.to_string(), coerced);
        }
        Coerced::Ontology { label, id } => {
            record.insert(name.to_string(), label);
            let id_key = ontology_id_key(name);
            if value.is_object() {
                record.insert(id_key, id);
            } else {
                record.entry(id_key).or_insert(id);
            }
        }
    }
    Ok(())
}
