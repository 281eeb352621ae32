//! The mapping registry: relates canonical fields to their names in the views
//! of the mapping table.

use std::{
    collections::{HashMap, HashSet},
    io::Read,
    path::Path,
};

use enum_map::EnumMap;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::{coerce::parse_bool_str, common::io::open_read_maybe_gz, err::Error};

pub mod cli;
pub mod schema;

use schema::{
    EntityClass, MappingEntry, ScalarType, AIRR_TYPE_COLUMN, CANONICAL_VIEW, CLASS_COLUMN,
    CREATED_AT_FIELD, IS_ARRAY_COLUMN, NULLABLE_COLUMN, REQUIRED_COLUMN, SUBCLASS_COLUMN,
    UPDATED_AT_FIELD,
};

/// Row indices by field name, for one view.
#[derive(Debug, Default)]
struct ViewIndex {
    /// Rows of all classes.
    any: HashMap<String, Vec<usize>>,
    /// Rows per class, base and extension variant together.
    by_class: EnumMap<EntityClass, HashMap<String, Vec<usize>>>,
}

/// The loaded mapping table.
///
/// Immutable after load.  All lookups go through per-view hash indices built
/// at load time.
#[derive(Debug)]
pub struct Registry {
    /// Column names in file order.
    columns: Vec<String>,
    /// Name of the column holding repository storage names.
    storage_view: String,
    /// Rows in file order.
    entries: Vec<MappingEntry>,
    /// Index per view column.
    index: HashMap<String, ViewIndex>,
}

/// Columns that hold metadata rather than field names.
const META_COLUMNS: &[&str] = &[
    CLASS_COLUMN,
    SUBCLASS_COLUMN,
    REQUIRED_COLUMN,
    NULLABLE_COLUMN,
    IS_ARRAY_COLUMN,
];

impl Registry {
    /// Load the mapping table from a (possibly gzip-compressed) TSV file.
    pub fn from_path<P: AsRef<Path>>(path: P, storage_view: &str) -> Result<Self, Error> {
        tracing::debug!("loading mapping table from {:?}", path.as_ref());
        let reader = open_read_maybe_gz(path)?;
        Self::from_reader(reader, storage_view)
    }

    /// Load the mapping table from a reader over TSV text.
    pub fn from_reader<R: Read>(reader: R, storage_view: &str) -> Result<Self, Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let columns = csv_reader
            .headers()?
            .iter()
            .map(|s| s.trim().to_string())
            .collect::<Vec<_>>();
        for required in [CLASS_COLUMN, SUBCLASS_COLUMN, storage_view] {
            if !columns.iter().any(|c| c == required) {
                return Err(Error::MappingInvalid(format!(
                    "missing column {:?} in header",
                    required
                )));
            }
        }
        let repository_type_column = format!("{}_type", storage_view);

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        for (i, record) in csv_reader.records().enumerate() {
            let record = record?;
            let line_no = i + 2;
            let views = columns
                .iter()
                .zip(record.iter())
                .map(|(column, value)| (column, value.trim()))
                .filter(|(_, value)| !value.is_empty())
                .map(|(column, value)| (column.clone(), value.to_string()))
                .collect::<IndexMap<_, _>>();
            let Some(class_tag) = views.get(CLASS_COLUMN) else {
                tracing::debug!("skipping mapping line {} without entity class", line_no);
                continue;
            };
            let (class, extension) = EntityClass::parse_tag(class_tag).ok_or_else(|| {
                Error::MappingInvalid(format!(
                    "unknown entity class {:?} in line {}",
                    class_tag, line_no
                ))
            })?;

            let entry = MappingEntry {
                class,
                extension,
                subclass: views.get(SUBCLASS_COLUMN).cloned().unwrap_or_default(),
                required: parse_flag(&views, REQUIRED_COLUMN, false, line_no)?,
                nullable: parse_flag(&views, NULLABLE_COLUMN, true, line_no)?,
                is_array: parse_flag(&views, IS_ARRAY_COLUMN, false, line_no)?,
                airr_type: parse_type(&views, AIRR_TYPE_COLUMN, line_no)?,
                repository_type: parse_type(&views, &repository_type_column, line_no)?,
                views,
            };
            if let Some(canonical) = entry.canonical() {
                if !seen.insert((class, canonical.to_string())) {
                    return Err(Error::MappingAmbiguous {
                        field: canonical.to_string(),
                        class: class.to_string(),
                    });
                }
            }
            entries.push(entry);
        }

        let mut index: HashMap<String, ViewIndex> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            for (column, value) in &entry.views {
                if META_COLUMNS.contains(&column.as_str()) || column.ends_with("_type") {
                    continue;
                }
                let view_index = index.entry(column.clone()).or_default();
                view_index.any.entry(value.clone()).or_default().push(idx);
                view_index.by_class[entry.class]
                    .entry(value.clone())
                    .or_default()
                    .push(idx);
            }
        }

        warn_duplicates(&index);
        tracing::debug!(
            "loaded {} mapping rows over {} columns",
            entries.len(),
            columns.len()
        );

        Ok(Self {
            columns,
            storage_view: storage_view.to_string(),
            entries,
            index,
        })
    }

    /// Name of the repository storage view.
    pub fn storage_view(&self) -> &str {
        &self.storage_view
    }

    /// Column names of the mapping table in file order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows in file order.
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the mapping table has the column `view`.
    pub fn has_column(&self, view: &str) -> bool {
        self.columns.iter().any(|c| c == view)
    }

    fn rows_matching(&self, field: &str, view: &str, class: Option<EntityClass>) -> &[usize] {
        let Some(view_index) = self.index.get(view) else {
            return &[];
        };
        let by_name = match class {
            Some(class) => &view_index.by_class[class],
            None => &view_index.any,
        };
        by_name.get(field).map(|rows| rows.as_slice()).unwrap_or(&[])
    }

    /// The row whose `from_view` is `field`, optionally restricted to a class.
    ///
    /// When several rows match, the first is returned.  Duplicates within a
    /// class are reported once when the table is loaded.
    pub fn lookup(
        &self,
        field: &str,
        from_view: &str,
        class: Option<EntityClass>,
    ) -> Option<&MappingEntry> {
        self.rows_matching(field, from_view, class)
            .first()
            .map(|idx| &self.entries[*idx])
    }

    /// Like [`Registry::lookup`] but prefers the row of `subclass` when the name is
    /// used in several sub-objects of the class.
    pub fn lookup_in_subclass(
        &self,
        field: &str,
        from_view: &str,
        class: EntityClass,
        subclass: Option<&str>,
    ) -> Option<&MappingEntry> {
        let rows = self.rows_matching(field, from_view, Some(class));
        if rows.len() > 1 {
            if let Some(subclass) = subclass {
                if let Some(idx) = rows
                    .iter()
                    .find(|idx| self.entries[**idx].subclass == subclass)
                {
                    return Some(&self.entries[*idx]);
                }
            }
        }
        self.lookup(field, from_view, Some(class))
    }

    /// Translate `field` from `from_view` to `to_view`.
    pub fn resolve(
        &self,
        field: &str,
        from_view: &str,
        to_view: &str,
        class: Option<EntityClass>,
    ) -> Option<&str> {
        self.lookup(field, from_view, class)
            .and_then(|entry| entry.name_in(to_view))
    }

    /// Rows of `class` (base and extension variant) that satisfy `predicate`.
    pub fn rows_for<'a, P>(
        &'a self,
        class: EntityClass,
        predicate: P,
    ) -> impl Iterator<Item = &'a MappingEntry> + 'a
    where
        P: Fn(&MappingEntry) -> bool + 'a,
    {
        self.entries
            .iter()
            .filter(move |entry| entry.class == class && predicate(entry))
    }

    /// Storage name of the canonical field in `class`.
    pub fn storage_name(&self, canonical: &str, class: EntityClass) -> Option<&str> {
        self.resolve(canonical, CANONICAL_VIEW, &self.storage_view, Some(class))
    }

    /// Storage name of the canonical field, failing with `MappingMissing`.
    pub fn require_storage_name(&self, canonical: &str, class: EntityClass) -> Result<&str, Error> {
        self.storage_name(canonical, class)
            .ok_or_else(|| Error::MappingMissing {
                field: canonical.to_string(),
                view: self.storage_view.clone(),
            })
    }

    /// Storage name of the creation timestamp of `class`.
    ///
    /// Tries `ir_created_at_<class>` first, then `ir_created_at`.
    pub fn created_at_name(&self, class: EntityClass) -> Result<&str, Error> {
        self.timestamp_name(&class.created_at_field(), CREATED_AT_FIELD, class)
    }

    /// Storage name of the update timestamp of `class`, see
    /// [`Registry::created_at_name`].
    pub fn updated_at_name(&self, class: EntityClass) -> Result<&str, Error> {
        self.timestamp_name(&class.updated_at_field(), UPDATED_AT_FIELD, class)
    }

    fn timestamp_name(
        &self,
        qualified: &str,
        bare: &str,
        class: EntityClass,
    ) -> Result<&str, Error> {
        self.storage_name(qualified, class)
            .or_else(|| self.storage_name(bare, class))
            .ok_or_else(|| Error::MappingMissing {
                field: qualified.to_string(),
                view: self.storage_view.clone(),
            })
    }

    /// The row whose storage name is `name` in `class`.
    pub fn storage_entry(&self, name: &str, class: EntityClass) -> Option<&MappingEntry> {
        self.lookup(name, &self.storage_view, Some(class))
    }

    /// Whether `name` is a storage name of `class`, counting the `_id` companion
    /// field of ontology fields.
    pub fn is_storage_name(&self, name: &str, class: EntityClass) -> bool {
        if !self.rows_matching(name, &self.storage_view, Some(class)).is_empty() {
            return true;
        }
        name.strip_suffix("_id")
            .and_then(|base| self.storage_entry(base, class))
            .map(|entry| entry.storage_type() == ScalarType::Ontology)
            .unwrap_or(false)
    }
}

/// Report every name that several rows of one class share in a view.
fn warn_duplicates(index: &HashMap<String, ViewIndex>) {
    for (view, view_index) in index.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        for (class, by_name) in view_index.by_class.iter() {
            for (name, rows) in by_name.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
                if rows.len() > 1 {
                    tracing::warn!(
                        "duplicate mapping for {:?} in view {:?} (class {}), lookups use the first of {} rows",
                        name,
                        view,
                        class,
                        rows.len()
                    );
                }
            }
        }
    }
}

/// Parse a flag cell; an absent cell gives `default`.
///
/// `airr_nullable` defaults to true, following the AIRR schema where fields
/// are nullable unless declared otherwise.  The other flags default to false.
fn parse_flag(
    views: &IndexMap<String, String>,
    column: &str,
    default: bool,
    line_no: usize,
) -> Result<bool, Error> {
    match views.get(column) {
        None => Ok(default),
        Some(value) => parse_bool_str(value).ok_or_else(|| {
            Error::MappingInvalid(format!(
                "invalid flag {:?} in column {:?}, line {}",
                value, column, line_no
            ))
        }),
    }
}

fn parse_type(
    views: &IndexMap<String, String>,
    column: &str,
    line_no: usize,
) -> Result<Option<ScalarType>, Error> {
    views
        .get(column)
        .map(|value| {
            value.parse::<ScalarType>().map_err(|_| {
                Error::MappingInvalid(format!(
                    "invalid type {:?} in column {:?}, line {}",
                    value, column, line_no
                ))
            })
        })
        .transpose()
}

/// Registry over the mapping table shipped with the tests.
#[cfg(test)]
pub(crate) fn test_registry() -> Registry {
    Registry::from_path("tests/data/mapping.tsv", schema::DEFAULT_STORAGE_VIEW)
        .expect("could not load test mapping")
}
