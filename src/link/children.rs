//! Post-ingest linking of child collections to parent collections.
//!
//! Tools label cells and clones with their own identifiers (e.g. barcodes).
//! After both files are loaded, the child's foreign key is rewritten from the
//! tool label to the repository id of the parent record.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::{
    common::{Clock, Record},
    err::Error,
    link::RepertoireLinker,
    mapping::{
        schema::{EntityClass, LINK_FIELD},
        Registry,
    },
    repository::Repository,
};

/// The child/parent collection pairs that can be linked.
#[derive(
    Serialize,
    clap::ValueEnum,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LinkKind {
    /// Expression records to cells.
    ExpressionCell,
    /// Rearrangements to cells.
    RearrangementCell,
    /// Rearrangements to clones.
    RearrangementClone,
    /// Reactivity records to cells.
    ReactivityCell,
}

impl LinkKind {
    pub fn child(&self) -> EntityClass {
        match self {
            LinkKind::ExpressionCell => EntityClass::Expression,
            LinkKind::RearrangementCell | LinkKind::RearrangementClone => {
                EntityClass::Rearrangement
            }
            LinkKind::ReactivityCell => EntityClass::Reactivity,
        }
    }

    pub fn parent(&self) -> EntityClass {
        match self {
            LinkKind::RearrangementClone => EntityClass::Clone,
            _ => EntityClass::Cell,
        }
    }

    /// Canonical name of the foreign key in the child class.
    pub fn foreign_key(&self) -> &'static str {
        self.parent().primary_key()
    }
}

/// Outcome of linking one child file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkSummary {
    /// Children whose foreign key was rewritten.
    pub updated: usize,
    /// Children already pointing at a parent's repository id.
    pub already_linked: usize,
    /// Children whose label matches no parent, or that have no label.
    pub unmatched: usize,
    /// Parent labels seen more than once; the first parent wins.
    pub duplicate_labels: usize,
}

/// Index from parent tool label to parent repository id.
#[derive(Debug, Default)]
struct ParentIndex {
    by_label: HashMap<String, String>,
    ids: HashSet<String>,
    duplicates: usize,
}

fn text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn parent_index<R: Repository + ?Sized>(
    repository: &R,
    registry: &Registry,
    parent: EntityClass,
    link_id: &str,
) -> Result<ParentIndex, Error> {
    let link_name = registry.require_storage_name(LINK_FIELD, parent)?;
    let id_name = registry.require_storage_name(parent.primary_key(), parent)?;
    let label_name = match parent.provenance_key() {
        Some(key) => registry.require_storage_name(key, parent)?,
        None => id_name,
    };

    let mut index = ParentIndex::default();
    for stored in repository.find_by(parent, link_name, &Value::String(link_id.to_string()))? {
        let id = text(stored.record.get(id_name)).unwrap_or_else(|| stored.id.clone());
        index.ids.insert(id.clone());
        let Some(label) = text(stored.record.get(label_name)) else {
            continue;
        };
        if index.by_label.contains_key(&label) {
            tracing::warn!(
                "{} label {:?} occurs more than once in repertoire {}, keeping the first",
                parent,
                &label,
                link_id
            );
            index.duplicates += 1;
        } else {
            index.by_label.insert(label, id);
        }
    }
    Ok(index)
}

/// Rewrite the foreign keys of the records loaded from `child_file` to the
/// repository ids of the records loaded from `parent_file`.
pub fn link_children<R: Repository + ?Sized>(
    repository: &mut R,
    registry: &Registry,
    clock: &dyn Clock,
    kind: LinkKind,
    child_file: &str,
    parent_file: &str,
) -> Result<LinkSummary, Error> {
    let (child, parent) = (kind.child(), kind.parent());

    let mut linker = RepertoireLinker::new(registry);
    let child_repertoire = linker.link(&*repository, child_file)?;
    let parent_repertoire = linker.link(&*repository, parent_file)?;

    let index = parent_index(&*repository, registry, parent, &parent_repertoire.link_id)?;
    tracing::debug!(
        "indexed {} {} labels of repertoire {}",
        index.by_label.len(),
        parent,
        &parent_repertoire.link_id
    );

    let link_name = registry.require_storage_name(LINK_FIELD, child)?;
    let key_name = registry.require_storage_name(kind.foreign_key(), child)?;
    let updated_name = registry.updated_at_name(child)?;
    let children = repository.find_by(
        child,
        link_name,
        &Value::String(child_repertoire.link_id.clone()),
    )?;

    let mut summary = LinkSummary {
        duplicate_labels: index.duplicates,
        ..Default::default()
    };
    let now = clock.now_string();
    for stored in children {
        let Some(label) = text(stored.record.get(key_name)) else {
            summary.unmatched += 1;
            continue;
        };
        match index.by_label.get(&label) {
            Some(parent_id) if *parent_id == label => summary.already_linked += 1,
            Some(parent_id) => {
                let mut fields = Record::new();
                fields.insert(key_name.to_string(), Value::String(parent_id.clone()));
                fields.insert(updated_name.to_string(), Value::String(now.clone()));
                repository.update(child, &stored.id, fields)?;
                summary.updated += 1;
            }
            None if index.ids.contains(&label) => summary.already_linked += 1,
            None => {
                tracing::debug!("no {} labelled {:?} for {} {}", parent, &label, child, &stored.id);
                summary.unmatched += 1;
            }
        }
    }
    if summary.unmatched > 0 {
        tracing::warn!(
            "{} of the {} records from {:?} have no {} in {:?}",
            summary.unmatched,
            child,
            child_file,
            parent,
            parent_file
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::{link_children, LinkKind, LinkSummary};
    use crate::{
        common::{FixedClock, Record},
        err::ErrorKind,
        link::test::two_repertoires,
        mapping::{schema::EntityClass, test_registry},
        repository::{memory::MemoryRepository, Repository},
    };

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn clock() -> FixedClock {
        FixedClock::new(chrono::Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap())
    }

    /// Cells 2 and 3 in repertoire 0, expression records 0..3 pointing at
    /// cell barcodes.
    fn loaded() -> MemoryRepository {
        let mut repository = two_repertoires();
        // Filler so that repository ids and labels differ.
        repository
            .insert(EntityClass::Cell, vec![Record::new(), Record::new()])
            .unwrap();
        repository
            .insert(
                EntityClass::Cell,
                vec![
                    record(&[
                        ("cell_id", json!("2")),
                        ("ir_cell_id", json!("AAAC-1")),
                        ("ir_annotation_set_metadata_id", json!("0")),
                    ]),
                    record(&[
                        ("cell_id", json!("3")),
                        ("ir_cell_id", json!("CCCG-1")),
                        ("ir_annotation_set_metadata_id", json!("0")),
                    ]),
                ],
            )
            .unwrap();
        repository
            .insert(
                EntityClass::Expression,
                vec![
                    record(&[
                        ("cell_id", json!("AAAC-1")),
                        ("ir_annotation_set_metadata_id", json!("0")),
                    ]),
                    record(&[
                        ("cell_id", json!("CCCG-1")),
                        ("ir_annotation_set_metadata_id", json!("0")),
                    ]),
                    record(&[
                        ("cell_id", json!("TTTT-1")),
                        ("ir_annotation_set_metadata_id", json!("0")),
                    ]),
                    record(&[
                        ("cell_id", json!("AAAC-1")),
                        ("ir_annotation_set_metadata_id", json!("1")),
                    ]),
                ],
            )
            .unwrap();
        repository
    }

    #[test]
    fn expression_to_cell() -> Result<(), anyhow::Error> {
        let registry = test_registry();
        let mut repository = loaded();

        let summary = link_children(
            &mut repository,
            &registry,
            &clock(),
            LinkKind::ExpressionCell,
            "cells1.json",
            "cells1.json",
        )?;

        assert_eq!(
            summary,
            LinkSummary {
                updated: 2,
                already_linked: 0,
                unmatched: 1,
                duplicate_labels: 0,
            }
        );
        let first = repository.get(EntityClass::Expression, "0").unwrap();
        assert_eq!(first["cell_id"], json!("2"));
        assert_eq!(first["ir_updated_at"], json!("2024-05-02T08:00:00+00:00"));
        assert_eq!(
            repository.get(EntityClass::Expression, "1").unwrap()["cell_id"],
            json!("3")
        );
        assert_eq!(
            repository.get(EntityClass::Expression, "2").unwrap()["cell_id"],
            json!("TTTT-1")
        );
        // Other repertoire untouched.
        assert_eq!(
            repository.get(EntityClass::Expression, "3").unwrap()["cell_id"],
            json!("AAAC-1")
        );

        Ok(())
    }

    #[test]
    fn linking_twice_is_stable() -> Result<(), anyhow::Error> {
        let registry = test_registry();
        let mut repository = loaded();
        let run = |repository: &mut MemoryRepository| {
            link_children(
                repository,
                &registry,
                &clock(),
                LinkKind::ExpressionCell,
                "sample1.tsv",
                "cells1.json",
            )
        };

        run(&mut repository)?;
        let again = run(&mut repository)?;

        assert_eq!(again.updated, 0);
        assert_eq!(again.already_linked, 2);
        assert_eq!(
            repository.get(EntityClass::Expression, "0").unwrap()["cell_id"],
            json!("2")
        );

        Ok(())
    }

    #[test]
    fn unknown_parent_file() {
        let registry = test_registry();
        let mut repository = loaded();

        let err = link_children(
            &mut repository,
            &registry,
            &clock(),
            LinkKind::RearrangementCell,
            "sample1.tsv",
            "nope.json",
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RepertoireNotFound);
    }

    #[rstest::rstest]
    #[case(LinkKind::ExpressionCell, EntityClass::Expression, EntityClass::Cell, "cell_id")]
    #[case(LinkKind::RearrangementCell, EntityClass::Rearrangement, EntityClass::Cell, "cell_id")]
    #[case(LinkKind::RearrangementClone, EntityClass::Rearrangement, EntityClass::Clone, "clone_id")]
    #[case(LinkKind::ReactivityCell, EntityClass::Reactivity, EntityClass::Cell, "cell_id")]
    fn kinds(
        #[case] kind: LinkKind,
        #[case] child: EntityClass,
        #[case] parent: EntityClass,
        #[case] foreign_key: &str,
    ) {
        assert_eq!(kind.child(), child);
        assert_eq!(kind.parent(), parent);
        assert_eq!(kind.foreign_key(), foreign_key);
    }

    #[test]
    fn kind_names() {
        assert_eq!(LinkKind::RearrangementClone.to_string(), "rearrangement-clone");
    }

    #[test]
    fn repository_ids_are_not_overwritten() -> Result<(), anyhow::Error> {
        let registry = test_registry();
        let mut repository = loaded();
        repository.update(
            EntityClass::Expression,
            "2",
            record(&[("cell_id", json!("3"))]),
        )?;

        let summary = link_children(
            &mut repository,
            &registry,
            &clock(),
            LinkKind::ExpressionCell,
            "sample1.tsv",
            "cells1.json",
        )?;

        assert_eq!(summary.already_linked, 1);
        assert_eq!(summary.unmatched, 0);

        Ok(())
    }
}
