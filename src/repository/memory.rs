//! In-memory repository, optionally persisted as JSON lines.

use std::{
    io::{BufRead, BufWriter, Write},
    path::{Path, PathBuf},
};

use enum_map::EnumMap;
use indexmap::IndexMap;
use serde_json::Value;
use strum::IntoEnumIterator;
use thousands::Separable;

use crate::{
    common::{io::open_read_maybe_gz, Record},
    err::Error,
    mapping::schema::EntityClass,
    repository::{field_matches, Repository, StoredRecord},
};

/// The records of one entity class.
#[derive(Debug, Default, Clone)]
struct Collection {
    next_id: u64,
    records: IndexMap<String, Record>,
}

/// Repository holding all collections in memory.
///
/// With a directory attached, collections are read from and written to
/// `<dir>/<class>.jsonl`, one stored record per line.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    collections: EnumMap<EntityClass, Collection>,
    dir: Option<PathBuf>,
}

impl MemoryRepository {
    /// An empty repository without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    fn collection_path(dir: &Path, class: EntityClass) -> PathBuf {
        dir.join(format!("{}.jsonl", class.slug()))
    }

    /// Open the repository persisted in `dir`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut repository = Self {
            collections: EnumMap::default(),
            dir: Some(dir.clone()),
        };
        for class in EntityClass::iter() {
            let path = Self::collection_path(&dir, class);
            if !path.exists() {
                continue;
            }
            let collection = &mut repository.collections[class];
            for line in open_read_maybe_gz(&path)?.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let stored: StoredRecord = serde_json::from_str(&line)?;
                if let Ok(numeric) = stored.id.parse::<u64>() {
                    collection.next_id = collection.next_id.max(numeric + 1);
                }
                collection.records.insert(stored.id, stored.record);
            }
            tracing::debug!(
                "loaded {} {} records from {:?}",
                collection.records.len().separate_with_commas(),
                class,
                &path
            );
        }
        Ok(repository)
    }

    /// Write all collections back to the directory given to [`MemoryRepository::open`].
    pub fn save(&self) -> Result<(), Error> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        for (class, collection) in &self.collections {
            let path = Self::collection_path(dir, class);
            if collection.records.is_empty() && !path.exists() {
                continue;
            }
            let tmp = tempfile::NamedTempFile::new_in(dir)?;
            {
                let mut writer = BufWriter::new(tmp.as_file());
                for (id, record) in &collection.records {
                    let stored = StoredRecord::new(id.clone(), record.clone());
                    serde_json::to_writer(&mut writer, &stored)?;
                    writer.write_all(b"\n")?;
                }
                writer.flush()?;
            }
            tmp.persist(&path)
                .map_err(|e| Error::Repository(format!("could not write {:?}: {}", &path, e)))?;
        }
        Ok(())
    }

    /// Number of records of a class.
    pub fn len(&self, class: EntityClass) -> usize {
        self.collections[class].records.len()
    }

    /// Record by identifier.
    pub fn get(&self, class: EntityClass, id: &str) -> Option<&Record> {
        self.collections[class].records.get(id)
    }
}

impl Repository for MemoryRepository {
    fn insert(&mut self, class: EntityClass, records: Vec<Record>) -> Result<Vec<String>, Error> {
        let collection = &mut self.collections[class];
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = collection.next_id.to_string();
            collection.next_id += 1;
            collection.records.insert(id.clone(), record);
            ids.push(id);
        }
        Ok(ids)
    }

    fn find_by(
        &self,
        class: EntityClass,
        field: &str,
        value: &Value,
    ) -> Result<Vec<StoredRecord>, Error> {
        Ok(self.collections[class]
            .records
            .iter()
            .filter(|(_, record)| {
                record
                    .get(field)
                    .map(|stored| field_matches(stored, value))
                    .unwrap_or(false)
            })
            .map(|(id, record)| StoredRecord::new(id.clone(), record.clone()))
            .collect())
    }

    fn update(&mut self, class: EntityClass, id: &str, fields: Record) -> Result<(), Error> {
        let record = self.collections[class]
            .records
            .get_mut(id)
            .ok_or_else(|| Error::Repository(format!("no {} record with id {:?}", class, id)))?;
        record.extend(fields);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::MemoryRepository;
    use crate::{
        common::Record,
        mapping::schema::EntityClass,
        repository::Repository,
    };

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn insert_assigns_sequential_ids() -> Result<(), anyhow::Error> {
        let mut repository = MemoryRepository::new();

        let ids = repository.insert(
            EntityClass::Cell,
            vec![record(&[("cell_id", json!("a"))]), record(&[("cell_id", json!("b"))])],
        )?;
        let more = repository.insert(EntityClass::Cell, vec![record(&[])])?;

        assert_eq!(ids, vec!["0".to_string(), "1".to_string()]);
        assert_eq!(more, vec!["2".to_string()]);
        assert_eq!(repository.len(EntityClass::Cell), 3);
        assert_eq!(repository.len(EntityClass::Clone), 0);

        Ok(())
    }

    #[test]
    fn find_by_list_membership() -> Result<(), anyhow::Error> {
        let mut repository = MemoryRepository::new();
        repository.insert(
            EntityClass::Repertoire,
            vec![
                record(&[("data_processing_files", json!(["a.tsv", "b.tsv"]))]),
                record(&[("data_processing_files", json!(["c.tsv"]))]),
            ],
        )?;

        let found = repository.find_by(EntityClass::Repertoire, "data_processing_files", &json!("b.tsv"))?;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "0");
        assert_eq!(
            repository.count_by(EntityClass::Repertoire, "data_processing_files", &json!("x.tsv"))?,
            0
        );

        Ok(())
    }

    #[test]
    fn update_sets_fields() -> Result<(), anyhow::Error> {
        let mut repository = MemoryRepository::new();
        let ids = repository.insert(EntityClass::Clone, vec![record(&[("clone_id", json!("c1"))])])?;

        repository.update(EntityClass::Clone, &ids[0], record(&[("clone_id", json!(ids[0]))]))?;

        assert_eq!(repository.get(EntityClass::Clone, "0").unwrap()["clone_id"], json!("0"));
        assert!(repository
            .update(EntityClass::Clone, "17", Record::new())
            .is_err());

        Ok(())
    }

    #[test]
    fn save_and_reopen() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        {
            let mut repository = MemoryRepository::open(tmp_dir.join("repo"))?;
            repository.insert(
                EntityClass::Rearrangement,
                vec![record(&[("sequence_id", json!("r1")), ("v_call", json!(["IGHV3-23*01"]))])],
            )?;
            repository.save()?;
        }

        let mut repository = MemoryRepository::open(tmp_dir.join("repo"))?;
        assert_eq!(
            repository.get(EntityClass::Rearrangement, "0").unwrap()["v_call"],
            json!(["IGHV3-23*01"])
        );
        let ids = repository.insert(EntityClass::Rearrangement, vec![Record::new()])?;
        assert_eq!(ids, vec!["1".to_string()]);

        let text = std::fs::read_to_string(tmp_dir.join("repo").join("rearrangement.jsonl"))?;
        assert_eq!(text.lines().next(), Some(r#"{"_id":"0","sequence_id":"r1","v_call":["IGHV3-23*01"]}"#));

        Ok(())
    }
}
