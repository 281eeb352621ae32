//! Entity classes, scalar types and mapping entries.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Column holding the canonical field name (unique within an entity class).
pub const CANONICAL_VIEW: &str = "ir_id";
/// Column holding the AIRR standard name.
pub const STANDARD_VIEW: &str = "airr";
/// Default column holding the repository storage name.
pub const DEFAULT_STORAGE_VIEW: &str = "ir_repository";
/// Column holding the entity class.
pub const CLASS_COLUMN: &str = "ir_class";
/// Column holding the entity subclass (e.g. `study`, `subject`).
pub const SUBCLASS_COLUMN: &str = "ir_subclass";
/// Column holding the AIRR scalar type.
pub const AIRR_TYPE_COLUMN: &str = "airr_type";
pub const REQUIRED_COLUMN: &str = "airr_required";
pub const NULLABLE_COLUMN: &str = "airr_nullable";
pub const IS_ARRAY_COLUMN: &str = "airr_is_array";

/// Canonical name of the field linking child records to their repertoire.
pub const LINK_FIELD: &str = "ir_annotation_set_metadata_id";
/// Canonical name of the repertoire's list of data file names.
pub const FILES_FIELD: &str = "data_processing_files";
/// Unqualified canonical names of the timestamp fields, used when a mapping
/// has no class-qualified rows.
pub const CREATED_AT_FIELD: &str = "ir_created_at";
pub const UPDATED_AT_FIELD: &str = "ir_updated_at";
/// Canonical names of the repertoire identifiers copied to child records.
pub const REPERTOIRE_ID_FIELDS: [&str; 3] =
    ["repertoire_id", "data_processing_id", "sample_processing_id"];

/// The entity classes of the AIRR data model.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    enum_map::Enum,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum EntityClass {
    Repertoire,
    Rearrangement,
    Clone,
    Cell,
    #[strum(to_string = "CellExpression", serialize = "Expression")]
    Expression,
    Reactivity,
}

impl EntityClass {
    /// Lower-case name used in class-qualified field names and collection file names.
    pub fn slug(&self) -> &'static str {
        match self {
            EntityClass::Repertoire => "repertoire",
            EntityClass::Rearrangement => "rearrangement",
            EntityClass::Clone => "clone",
            EntityClass::Cell => "cell",
            EntityClass::Expression => "expression",
            EntityClass::Reactivity => "reactivity",
        }
    }

    /// Canonical name of the primary key.
    pub fn primary_key(&self) -> &'static str {
        match self {
            EntityClass::Repertoire => "repertoire_id",
            EntityClass::Rearrangement => "rearrangement_id",
            EntityClass::Clone => "clone_id",
            EntityClass::Cell => "cell_id",
            EntityClass::Expression => "expression_id",
            EntityClass::Reactivity => "reactivity_id",
        }
    }

    /// Canonical name of the field that keeps the tool-assigned primary key
    /// once the repository id has been written over it.
    pub fn provenance_key(&self) -> Option<&'static str> {
        match self {
            EntityClass::Repertoire => None,
            EntityClass::Rearrangement => Some("ir_rearrangement_id"),
            EntityClass::Clone => Some("ir_clone_id"),
            EntityClass::Cell => Some("ir_cell_id"),
            EntityClass::Expression => Some("ir_expression_id"),
            EntityClass::Reactivity => Some("ir_reactivity_id"),
        }
    }

    /// Canonical name of the repertoire field caching the number of child records.
    pub fn count_field(&self) -> Option<&'static str> {
        match self {
            EntityClass::Repertoire => None,
            EntityClass::Rearrangement => Some("ir_sequence_count"),
            EntityClass::Clone => Some("ir_clone_count"),
            EntityClass::Cell => Some("ir_cell_count"),
            EntityClass::Expression => Some("ir_expression_count"),
            EntityClass::Reactivity => Some("ir_reactivity_count"),
        }
    }

    pub fn created_at_field(&self) -> String {
        format!("ir_created_at_{}", self.slug())
    }

    pub fn updated_at_field(&self) -> String {
        format!("ir_updated_at_{}", self.slug())
    }

    /// Parse a class cell of the mapping table, e.g. `IR_Rearrangement`.
    ///
    /// Returns the class and whether the row belongs to the extension variant.
    pub fn parse_tag(tag: &str) -> Option<(Self, bool)> {
        match tag.strip_prefix("IR_") {
            Some(base) => base.parse().ok().map(|class| (class, true)),
            None => tag.parse().ok().map(|class| (class, false)),
        }
    }
}

/// Scalar types used in the `*_type` columns of the mapping table.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScalarType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Ontology,
    Array,
}

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingEntry {
    /// Entity class of the row.
    pub class: EntityClass,
    /// Whether the row belongs to the `IR_` extension variant of the class.
    pub extension: bool,
    /// Value of the `ir_subclass` column.
    pub subclass: String,
    /// Whether the AIRR standard requires the field.
    pub required: bool,
    /// Whether the field may be null; empty cells count as nullable.
    pub nullable: bool,
    /// Whether the AIRR standard declares the field as array.
    pub is_array: bool,
    /// Type in the AIRR standard.
    pub airr_type: Option<ScalarType>,
    /// Type in the repository storage view.
    pub repository_type: Option<ScalarType>,
    /// Non-empty cells of the row, by column name.
    pub views: IndexMap<String, String>,
}

impl MappingEntry {
    /// The name of this field in `view`, if any.
    pub fn name_in(&self, view: &str) -> Option<&str> {
        self.views.get(view).map(|s| s.as_str())
    }

    /// The canonical field name.
    pub fn canonical(&self) -> Option<&str> {
        self.name_in(CANONICAL_VIEW)
    }

    /// The AIRR standard name.
    pub fn standard(&self) -> Option<&str> {
        self.name_in(STANDARD_VIEW)
    }

    /// Type used when coercing values of this field for storage.
    ///
    /// Falls back to the AIRR type and then to string.
    pub fn storage_type(&self) -> ScalarType {
        self.repository_type
            .or(self.airr_type)
            .unwrap_or(ScalarType::String)
    }
}
