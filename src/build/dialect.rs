//! Input dialects of tabular rearrangement files.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{common::Record, gene_call::rewrite_legacy};

/// Values the legacy dialect uses to mark missing data.
const LEGACY_MISSING: &[&str] = &["na", "unknown", "no data", "unresolved"];

/// The annotation tool dialect of a tabular file.
#[derive(
    Serialize,
    Deserialize,
    clap::ValueEnum,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    /// AIRR TSV as written by IgBLAST and other AIRR-compliant tools.
    #[default]
    Airr,
    /// MiXCR export.
    Mixcr,
    /// Legacy Adaptive immunoSEQ export.
    Adaptive,
    /// Tool-independent tabular file named through the `ir_general` column.
    General,
}

impl Dialect {
    /// Column of the mapping table with this dialect's field names.
    pub fn column(&self) -> &'static str {
        match self {
            Dialect::Airr => "igblast",
            Dialect::Mixcr => "mixcr",
            Dialect::Adaptive => "adaptive",
            Dialect::General => "ir_general",
        }
    }

    /// Default name recorded as `ir_annotation_tool`.
    pub fn annotation_tool(&self) -> &'static str {
        match self {
            Dialect::Airr | Dialect::General => "AIRR",
            Dialect::Mixcr => "MiXCR",
            Dialect::Adaptive => "Adaptive",
        }
    }

    /// Prefix for columns without a mapping.
    pub fn unmapped_prefix(&self) -> Option<&'static str> {
        match self {
            Dialect::Adaptive => Some("ad_"),
            _ => None,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Dialect::Adaptive)
    }
}

/// Replace the legacy missing-data markers by empty strings.
pub fn clear_missing(value: &mut Value) {
    if let Value::String(s) = value {
        if LEGACY_MISSING.contains(&s.as_str()) {
            s.clear();
        }
    }
}

fn is_blank(s: &str) -> bool {
    s.is_empty() || s == "no data" || s == "unknown"
}

/// Combine a legacy resolved call with its tie columns into one call string.
///
/// * allele ties `01,03` on `TCRBV02-01` give `TCRBV02-01*01,TCRBV02-01*03`
/// * gene ties are used when present, cut at `/`
/// * a resolved call like `TCRBV12-03/12-04*01` is expanded to both genes
pub fn resolve_ties(resolved: &str, allele_ties: &str, gene_ties: &str) -> String {
    if !is_blank(allele_ties) {
        allele_ties
            .split(',')
            .map(|allele| format!("{}*{}", resolved, allele.trim()))
            .join(",")
    } else if !is_blank(gene_ties) && !is_blank(resolved) {
        gene_ties
            .split(',')
            .map(|gene| gene.split('/').next().unwrap_or_default().trim())
            .join(",")
    } else if !is_blank(gene_ties) {
        gene_ties.to_string()
    } else if resolved.contains('/') && resolved.len() > 5 && resolved.is_ascii() {
        let (base, allele) = match resolved.rsplit_once('*') {
            Some((base, allele)) => (base, format!("*{}", allele)),
            None => (resolved, String::new()),
        };
        let locus = &resolved[..5];
        base.trim_start_matches(locus)
            .split('/')
            .map(|gene| format!("{}{}{}", locus, gene.trim(), allele))
            .join(",")
    } else {
        resolved.to_string()
    }
}

/// Apply tie resolution and IMGT renaming to the gene call in `call_name`.
///
/// Tie columns carry the unmapped-column prefix, e.g. `ad_v_allele_ties`.
pub fn normalize_legacy_call(record: &mut Record, call_name: &str, gene_type: char) {
    let text = |record: &Record, key: &str| match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    let Some(Value::String(resolved)) = record.get(call_name) else {
        return;
    };
    let resolved = resolved.clone();
    let allele_ties = text(record, &format!("ad_{}_allele_ties", gene_type));
    let gene_ties = text(record, &format!("ad_{}_gene_ties", gene_type));

    let merged = resolve_ties(&resolved, &allele_ties, &gene_ties);
    record.insert(call_name.to_string(), Value::String(rewrite_legacy(&merged)));
}

/// Fields derived from the legacy `frame_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags {
    pub productive: bool,
    pub stop_codon: Option<bool>,
    pub vj_in_frame: Option<bool>,
}

/// Interpret a legacy frame type (`In`, `Out`, `Stop`).
pub fn frame_flags(frame_type: &str) -> FrameFlags {
    match frame_type {
        "In" => FrameFlags {
            productive: true,
            stop_codon: Some(false),
            vj_in_frame: Some(true),
        },
        "Stop" => FrameFlags {
            productive: false,
            stop_codon: Some(true),
            vj_in_frame: Some(false),
        },
        "Out" => FrameFlags {
            productive: false,
            stop_codon: None,
            vj_in_frame: Some(false),
        },
        _ => FrameFlags {
            productive: false,
            stop_codon: None,
            vj_in_frame: None,
        },
    }
}
