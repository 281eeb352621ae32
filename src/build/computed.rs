//! Fields computed from rearrangement and clone columns.

use itertools::Itertools;
use serde_json::Value;

use crate::{
    coerce::is_null_like,
    gene_call::{self, GeneCall},
};

/// Minimal length of indexed junction substrings, exclusive.
const MIN_SUBSTRING_LEN: usize = 3;

/// All distinct substrings of `s` longer than three characters.
///
/// Used as search index over amino acid junctions.
pub fn substrings(s: &str) -> Vec<String> {
    let chars = s.chars().collect::<Vec<_>>();
    (0..chars.len())
        .flat_map(|start| {
            let chars = &chars;
            (start + MIN_SUBSTRING_LEN + 1..=chars.len())
                .map(move |end| chars[start..end].iter().collect::<String>())
        })
        .unique()
        .collect()
}

/// Character count of a text value; null-like values have no length.
pub fn text_length(value: &Value) -> Value {
    match value {
        Value::String(s) if !is_null_like(value) => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

/// Parse a gene call column into its normalized form.
///
/// Accepts the raw call string or a list of calls.
pub fn parse_gene_value(value: &Value) -> Option<GeneCall> {
    match value {
        Value::Null => Some(GeneCall::default()),
        Value::String(s) => Some(gene_call::parse(s)),
        Value::Array(items) => {
            let joined = items.iter().filter_map(Value::as_str).join(",");
            Some(gene_call::parse(&joined))
        }
        _ => None,
    }
}

/// Convert a string list into a JSON list.
pub fn string_list(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}
