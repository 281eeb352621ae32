//! The ingest orchestrator: streams input files through the record builder
//! into the repository.

use std::{io::Read, path::Path};

use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;
use thousands::Separable;

use crate::{
    build::{dialect::Dialect, RecordBuilder, Source},
    common::{
        io::{data_file_name, open_read_maybe_gz},
        trace_rss_now, Cancellation, Clock, Record,
    },
    err::Error,
    flatten::Flattener,
    link::{RepertoireInfo, RepertoireLinker},
    mapping::{
        schema::{EntityClass, CANONICAL_VIEW, LINK_FIELD, STANDARD_VIEW},
        Registry,
    },
    repository::Repository,
};

pub mod cli;
pub mod repertoire;
pub mod validate;

/// Default number of records handed to the repository at once.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Configuration of the orchestrator.
#[derive(Debug, Clone, Serialize, derive_builder::Builder)]
#[builder(default)]
pub struct IngestConfig {
    /// Number of records handed to the repository at once.
    pub chunk_size: usize,
    /// Build records but do not store them.
    pub skipload: bool,
    /// Update repertoires that already exist instead of inserting them.
    pub update: bool,
    /// Annotation tool recorded on rearrangements instead of the dialect's.
    pub annotation_tool: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            skipload: false,
            update: false,
            annotation_tool: None,
        }
    }
}

/// Outcome of loading one file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Records built.
    pub built: usize,
    /// Records inserted or updated in the repository.
    pub stored: usize,
    /// Chunks processed.
    pub chunks: usize,
    /// Whether loading stopped early on request.
    pub cancelled: bool,
    /// Child count written to the repertoire, if it was updated.
    pub count: Option<usize>,
}

/// Loads files of one repository.
pub struct Ingester<'a, R: Repository + ?Sized> {
    registry: &'a Registry,
    repository: &'a mut R,
    clock: &'a dyn Clock,
    config: IngestConfig,
    cancellation: Cancellation,
}

impl<'a, R: Repository + ?Sized> Ingester<'a, R> {
    pub fn new(
        registry: &'a Registry,
        repository: &'a mut R,
        clock: &'a dyn Clock,
        config: IngestConfig,
    ) -> Self {
        Self {
            registry,
            repository,
            clock,
            config,
            cancellation: Cancellation::default(),
        }
    }

    /// Stop at the next chunk boundary once `cancellation` is triggered.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    fn chunk_size(&self) -> usize {
        self.config.chunk_size.max(1)
    }

    /// Load a tabular file (optionally gzip-compressed) of `class` records.
    pub fn load_tabular<P: AsRef<Path>>(
        &mut self,
        class: EntityClass,
        dialect: Dialect,
        path: P,
    ) -> Result<IngestSummary, Error> {
        tracing::info!(
            "loading {} records from {:?} ({})",
            class,
            path.as_ref(),
            dialect
        );
        let file_name = data_file_name(&path);
        let reader = open_read_maybe_gz(&path)?;
        self.load_tabular_reader(class, dialect, &file_name, reader)
    }

    /// Load tabular `class` records for the data file `file_name` from `reader`.
    pub fn load_tabular_reader<Rd: Read>(
        &mut self,
        class: EntityClass,
        dialect: Dialect,
        file_name: &str,
        reader: Rd,
    ) -> Result<IngestSummary, Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .quoting(false)
            .from_reader(reader);
        let header = csv_reader
            .headers()?
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        if !self.registry.has_column(dialect.column()) {
            return Err(Error::MappingInvalid(format!(
                "no {:?} column for the {} dialect",
                dialect.column(),
                dialect
            )));
        }
        validate::check_header(self.registry, class, dialect, &header)?;

        let repertoire = self.link(file_name)?;
        let mut builder =
            RecordBuilder::new(self.registry, class, Source::Tabular(dialect), self.clock)
                .with_repertoire(repertoire.clone())
                .with_annotation_tool(self.config.annotation_tool.clone());

        let mut summary = IngestSummary::default();
        let chunk_size = self.chunk_size();
        for chunk in &csv_reader.into_records().chunks(chunk_size) {
            if self.cancellation.is_cancelled() {
                return Ok(self.cancelled(class, file_name, summary));
            }
            let records = chunk
                .map(|row| {
                    let row = row?;
                    let record = header
                        .iter()
                        .cloned()
                        .zip(row.iter().map(|field| Value::String(field.to_string())))
                        .collect::<Record>();
                    builder.build(record)
                })
                .collect::<Result<Vec<_>, Error>>()?;
            self.store_chunk(class, records, &mut summary)?;
        }

        summary.count = self.update_count(class, &repertoire);
        Ok(summary)
    }

    /// Load a JSON file (optionally gzip-compressed) of `class` documents.
    pub fn load_documents<P: AsRef<Path>>(
        &mut self,
        class: EntityClass,
        path: P,
    ) -> Result<IngestSummary, Error> {
        tracing::info!("loading {} documents from {:?}", class, path.as_ref());
        let file_name = data_file_name(&path);
        let value: Value = serde_json::from_reader(open_read_maybe_gz(&path)?)?;
        self.load_document_value(class, &file_name, value)
    }

    /// Load the `class` documents of the data file `file_name`.
    pub fn load_document_value(
        &mut self,
        class: EntityClass,
        file_name: &str,
        value: Value,
    ) -> Result<IngestSummary, Error> {
        let registry = self.registry;
        let documents = validate::documents(value)?;
        if class == EntityClass::Cell {
            let primary_key = class.primary_key();
            let key = registry
                .resolve(primary_key, CANONICAL_VIEW, STANDARD_VIEW, Some(class))
                .unwrap_or(primary_key);
            validate::check_unique(&documents, key)?;
        }

        let repertoire = self.link(file_name)?;
        let mut flattener = Flattener::new(registry, class);
        let mut builder = RecordBuilder::new(registry, class, Source::Document, self.clock)
            .with_repertoire(repertoire.clone());

        let mut summary = IngestSummary::default();
        let chunk_size = self.chunk_size();
        for chunk in &documents.iter().chunks(chunk_size) {
            if self.cancellation.is_cancelled() {
                return Ok(self.cancelled(class, file_name, summary));
            }
            let records = chunk
                .map(|document| builder.build(flattener.flatten(document)?))
                .collect::<Result<Vec<_>, Error>>()?;
            self.store_chunk(class, records, &mut summary)?;
        }

        summary.count = self.update_count(class, &repertoire);
        Ok(summary)
    }

    fn link(&self, file_name: &str) -> Result<RepertoireInfo, Error> {
        RepertoireLinker::new(self.registry).link(&*self.repository, file_name)
    }

    fn cancelled(
        &self,
        class: EntityClass,
        file_name: &str,
        mut summary: IngestSummary,
    ) -> IngestSummary {
        tracing::warn!(
            "loading {} records from {:?} cancelled after {} records",
            class,
            file_name,
            summary.stored.separate_with_commas()
        );
        summary.cancelled = true;
        summary
    }

    fn store_chunk(
        &mut self,
        class: EntityClass,
        records: Vec<Record>,
        summary: &mut IngestSummary,
    ) -> Result<(), Error> {
        summary.chunks += 1;
        summary.built += records.len();
        if self.config.skipload {
            tracing::info!(
                "built {} {} records, not storing them",
                summary.built.separate_with_commas(),
                class
            );
            return Ok(());
        }

        let ids = self.repository.insert(class, records)?;
        self.write_back_ids(class, &ids)?;
        summary.stored += ids.len();
        tracing::info!(
            "stored {} {} records",
            summary.stored.separate_with_commas(),
            class
        );
        trace_rss_now();
        Ok(())
    }

    /// Write the repository ids over the primary keys of new records.
    fn write_back_ids(&mut self, class: EntityClass, ids: &[String]) -> Result<(), Error> {
        let registry = self.registry;
        let primary_key = registry.require_storage_name(class.primary_key(), class)?;
        let updated_at = registry.updated_at_name(class)?;
        let now = self.clock.now_string();
        for id in ids {
            let mut fields = Record::new();
            fields.insert(primary_key.to_string(), Value::String(id.clone()));
            fields.insert(updated_at.to_string(), Value::String(now.clone()));
            self.repository.update(class, id, fields)?;
        }
        Ok(())
    }

    /// Refresh the repertoire's cached count of `class` records.
    ///
    /// Failures are logged and otherwise ignored.
    fn update_count(&mut self, class: EntityClass, repertoire: &RepertoireInfo) -> Option<usize> {
        if self.config.skipload {
            return None;
        }
        match self.try_update_count(class, repertoire) {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    "could not update {} count of repertoire {}: {}",
                    class,
                    &repertoire.link_id,
                    e
                );
                None
            }
        }
    }

    fn try_update_count(
        &mut self,
        class: EntityClass,
        repertoire: &RepertoireInfo,
    ) -> Result<Option<usize>, Error> {
        let Some(count_field) = class.count_field() else {
            return Ok(None);
        };
        let registry = self.registry;
        let parent = EntityClass::Repertoire;
        let count_name = registry.require_storage_name(count_field, parent)?;
        let updated_at = registry.updated_at_name(parent)?;
        let link_name = registry.require_storage_name(LINK_FIELD, class)?;

        let link_id = Value::String(repertoire.link_id.clone());
        let count = self.repository.count_by(class, link_name, &link_id)?;
        let mut fields = Record::new();
        fields.insert(count_name.to_string(), Value::from(count));
        fields.insert(updated_at.to_string(), Value::String(self.clock.now_string()));
        self.repository.update(parent, &repertoire.link_id, fields)?;

        tracing::info!(
            "repertoire {} has {} {} records",
            &repertoire.link_id,
            count.separate_with_commas(),
            class
        );
        Ok(Some(count))
    }
}
