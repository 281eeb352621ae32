//! Loading of repertoire documents.

use std::{collections::HashSet, path::Path};

use serde_json::Value;
use strum::IntoEnumIterator;

use super::{validate, IngestSummary, Ingester};
use crate::{
    build::{RecordBuilder, Source},
    coerce::is_null_like,
    common::{io::open_read_maybe_gz, Record},
    err::Error,
    flatten::Flattener,
    mapping::schema::{EntityClass, FILES_FIELD, REPERTOIRE_ID_FIELDS},
    repository::Repository,
};

/// Publication dates kept on repertoire records.
const PUBLISH_DATE: &str = "adc_publish_date";
const UPDATE_DATE: &str = "adc_update_date";

/// The data file names listed in `record[files_name]`.
fn data_files(record: &Record, files_name: &str) -> Vec<String> {
    match record.get(files_name) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

impl<'a, R: Repository + ?Sized> Ingester<'a, R> {
    /// Load a JSON file (optionally gzip-compressed) of repertoire documents.
    pub fn load_repertoires<P: AsRef<Path>>(&mut self, path: P) -> Result<IngestSummary, Error> {
        tracing::info!("loading repertoires from {:?}", path.as_ref());
        let value: Value = serde_json::from_reader(open_read_maybe_gz(&path)?)?;
        self.load_repertoire_value(value)
    }

    /// Load repertoire documents.
    ///
    /// All documents are built before the first one is stored, so that a bad
    /// document leaves the repository untouched.  In update mode, repertoires
    /// are matched on their identifiers and updated in place; documents
    /// without a match are skipped.
    pub fn load_repertoire_value(&mut self, value: Value) -> Result<IngestSummary, Error> {
        let class = EntityClass::Repertoire;
        let registry = self.registry;
        let documents = validate::documents(value)?;
        let files_name = registry.require_storage_name(FILES_FIELD, class)?;

        let mut flattener = Flattener::new(registry, class);
        let mut builder = RecordBuilder::new(registry, class, Source::Document, self.clock);
        let mut records = Vec::with_capacity(documents.len());
        let mut listed = HashSet::new();
        for document in &documents {
            let mut record = builder.build(flattener.flatten(document)?)?;
            self.stamp(&mut record);
            for file in data_files(&record, files_name) {
                if !listed.insert(file.clone()) {
                    return Err(Error::SchemaViolation(format!(
                        "data file {:?} is listed by more than one repertoire",
                        file
                    )));
                }
            }
            records.push(record);
        }

        let mut summary = IngestSummary::default();
        for record in records {
            if self.cancellation.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            summary.built += 1;
            let existing = if self.config.update {
                self.find_existing(&record)?
            } else {
                None
            };
            self.check_file_collisions(&record, files_name, existing.as_deref())?;
            if self.config.skipload {
                continue;
            }
            match existing {
                Some(id) => self.update_repertoire(&id, record)?,
                None if self.config.update => {
                    tracing::warn!(
                        "no stored repertoire matches {}, skipping it",
                        self.describe_ids(&record)
                    );
                    continue;
                }
                None => self.insert_repertoire(record)?,
            }
            summary.stored += 1;
        }
        summary.chunks = usize::from(summary.built > 0);
        tracing::info!("stored {} repertoires", summary.stored);
        Ok(summary)
    }

    /// Set the publication dates and zero the child counts.
    fn stamp(&self, record: &mut Record) {
        let registry = self.registry;
        let class = EntityClass::Repertoire;
        let now = Value::String(self.clock.now_string());
        for canonical in [PUBLISH_DATE, UPDATE_DATE] {
            if let Some(name) = registry.storage_name(canonical, class) {
                record.insert(name.to_string(), now.clone());
            }
        }
        for child in EntityClass::iter() {
            if let Some(name) = child
                .count_field()
                .and_then(|field| registry.storage_name(field, class))
            {
                record.insert(name.to_string(), Value::from(0));
            }
        }
    }

    fn describe_ids(&self, record: &Record) -> String {
        REPERTOIRE_ID_FIELDS
            .iter()
            .map(|canonical| {
                let value = self
                    .registry
                    .storage_name(canonical, EntityClass::Repertoire)
                    .and_then(|name| record.get(name))
                    .cloned()
                    .unwrap_or(Value::Null);
                format!("{}={}", canonical, value)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The stored repertoire with the same identifiers as `record`.
    fn find_existing(&self, record: &Record) -> Result<Option<String>, Error> {
        let class = EntityClass::Repertoire;
        let ids = REPERTOIRE_ID_FIELDS
            .iter()
            .filter_map(|canonical| {
                let name = self.registry.storage_name(canonical, class)?;
                let value = record.get(name).filter(|v| !is_null_like(v))?;
                Some((name, value))
            })
            .collect::<Vec<_>>();
        let Some((first_name, first_value)) = ids.first() else {
            return Ok(None);
        };

        let mut found = self
            .repository
            .find_by(class, first_name, first_value)?
            .into_iter()
            .filter(|stored| {
                ids.iter()
                    .all(|(name, value)| stored.record.get(*name) == Some(*value))
            })
            .collect::<Vec<_>>();
        match found.len() {
            0 => Ok(None),
            1 => Ok(Some(found.remove(0).id)),
            count => Err(Error::SchemaViolation(format!(
                "{} stored repertoires match {}",
                count,
                self.describe_ids(record)
            ))),
        }
    }

    /// Fail if another stored repertoire lists one of `record`'s data files.
    fn check_file_collisions(
        &self,
        record: &Record,
        files_name: &str,
        existing: Option<&str>,
    ) -> Result<(), Error> {
        for file in data_files(record, files_name) {
            let found = self.repository.find_by(
                EntityClass::Repertoire,
                files_name,
                &Value::String(file.clone()),
            )?;
            if let Some(other) = found.iter().find(|stored| Some(stored.id.as_str()) != existing) {
                return Err(Error::SchemaViolation(format!(
                    "data file {:?} is already listed by repertoire {}",
                    file, &other.id
                )));
            }
        }
        Ok(())
    }

    /// Insert a new repertoire and fill its empty identifiers with its id.
    fn insert_repertoire(&mut self, record: Record) -> Result<(), Error> {
        let class = EntityClass::Repertoire;
        let registry = self.registry;
        let missing = REPERTOIRE_ID_FIELDS
            .iter()
            .filter_map(|canonical| registry.storage_name(canonical, class))
            .filter(|name| record.get(*name).map(is_null_like).unwrap_or(true))
            .collect::<Vec<_>>();

        let id = self
            .repository
            .insert(class, vec![record])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Repository("insert returned no id".to_string()))?;
        if !missing.is_empty() {
            let fields = missing
                .into_iter()
                .map(|name| (name.to_string(), Value::String(id.clone())))
                .collect::<Record>();
            self.repository.update(class, &id, fields)?;
        }
        tracing::debug!("inserted repertoire {}", &id);
        Ok(())
    }

    /// Replace the fields of a stored repertoire, keeping its creation time,
    /// publication date and child counts.
    fn update_repertoire(&mut self, id: &str, mut record: Record) -> Result<(), Error> {
        let class = EntityClass::Repertoire;
        let registry = self.registry;
        let kept = std::iter::once(PUBLISH_DATE)
            .chain(EntityClass::iter().filter_map(|child| child.count_field()))
            .filter_map(|canonical| registry.storage_name(canonical, class))
            .chain(registry.created_at_name(class).ok())
            .collect::<Vec<_>>();
        for name in kept {
            record.shift_remove(name);
        }
        self.repository.update(class, id, record)?;
        tracing::info!("updated repertoire {}", id);
        Ok(())
    }
}
