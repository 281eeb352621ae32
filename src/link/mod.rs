//! Linking of child records to their repertoire, and of child collections to
//! each other after ingest.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    coerce::is_null_like,
    err::Error,
    mapping::{
        schema::{EntityClass, FILES_FIELD, REPERTOIRE_ID_FIELDS},
        Registry,
    },
    repository::Repository,
};

pub mod children;
pub mod cli;

/// What child records learn about their repertoire.
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct RepertoireInfo {
    /// Repository id of the repertoire record.
    pub link_id: String,
    /// The repertoire's own identifiers that are set, by canonical name.
    pub ids: IndexMap<String, Value>,
}

/// Resolves data file names to repertoires.
///
/// Results are cached per file name for the lifetime of the linker, i.e. one
/// orchestration.
#[derive(Debug)]
pub struct RepertoireLinker<'a> {
    registry: &'a Registry,
    cache: HashMap<String, RepertoireInfo>,
}

impl<'a> RepertoireLinker<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            cache: HashMap::new(),
        }
    }

    /// The repertoire whose data file list contains `file_name`.
    pub fn link<R: Repository + ?Sized>(
        &mut self,
        repository: &R,
        file_name: &str,
    ) -> Result<RepertoireInfo, Error> {
        if let Some(info) = self.cache.get(file_name) {
            return Ok(info.clone());
        }

        let class = EntityClass::Repertoire;
        let files_field = self.registry.require_storage_name(FILES_FIELD, class)?;
        let mut found =
            repository.find_by(class, files_field, &Value::String(file_name.to_string()))?;
        let stored = match found.len() {
            0 => {
                return Err(Error::RepertoireNotFound {
                    file: file_name.to_string(),
                })
            }
            1 => found.remove(0),
            count => {
                return Err(Error::RepertoireAmbiguous {
                    file: file_name.to_string(),
                    count,
                })
            }
        };

        let ids = REPERTOIRE_ID_FIELDS
            .iter()
            .filter_map(|canonical| {
                let name = self.registry.storage_name(canonical, class)?;
                let value = stored.record.get(name).filter(|v| !is_null_like(v))?;
                Some((canonical.to_string(), value.clone()))
            })
            .collect::<IndexMap<_, _>>();
        tracing::info!(
            "data file {:?} belongs to repertoire {} ({:?})",
            file_name,
            &stored.id,
            &ids
        );

        let info = RepertoireInfo::new(stored.id, ids);
        self.cache.insert(file_name.to_string(), info.clone());
        Ok(info)
    }
}
