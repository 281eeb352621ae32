//! The record builder: turns an input row or flattened document into a
//! record ready for the repository.
//!
//! Per record, in this order:
//!
//! 1. rename input columns to repository storage names
//! 2. attach computed fields (rearrangements and clones only)
//! 3. attach the repertoire link identifiers
//! 4. attach the creation and update timestamps
//! 5. keep the tool-assigned primary key under its `ir_` field
//! 6. coerce every mapped field to its storage type
//! 7. check required fields

use std::collections::HashSet;

use serde_json::Value;

use crate::{
    coerce::{insert_coerced, is_null_like},
    common::{Clock, Record},
    err::Error,
    link::RepertoireInfo,
    mapping::{
        schema::{EntityClass, LINK_FIELD, REPERTOIRE_ID_FIELDS},
        Registry,
    },
};

pub mod computed;
pub mod dialect;

use dialect::Dialect;

/// Gene types with a call column each.
const GENE_TYPES: [char; 3] = ['v', 'd', 'j'];

/// Where the input records come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Rows of a tabular file whose columns are named in the dialect's view.
    Tabular(Dialect),
    /// Flattened documents, already keyed by storage names.
    Document,
}

/// Builds repository records of one entity class.
///
/// One builder is used per input file; warnings about unmapped columns are
/// emitted once per builder.
pub struct RecordBuilder<'a> {
    registry: &'a Registry,
    class: EntityClass,
    source: Source,
    clock: &'a dyn Clock,
    repertoire: Option<RepertoireInfo>,
    /// Replaces the dialect's default `ir_annotation_tool`.
    annotation_tool: Option<String>,
    /// Output fields already reported as passed through or dropped.
    warned: HashSet<String>,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(
        registry: &'a Registry,
        class: EntityClass,
        source: Source,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            registry,
            class,
            source,
            clock,
            repertoire: None,
            annotation_tool: None,
            warned: HashSet::new(),
        }
    }

    /// Attach the link identifiers of `repertoire` to every record built.
    pub fn with_repertoire(mut self, repertoire: RepertoireInfo) -> Self {
        self.repertoire = Some(repertoire);
        self
    }

    /// Record `tool` as annotation tool of rearrangements.
    pub fn with_annotation_tool(mut self, tool: Option<String>) -> Self {
        self.annotation_tool = tool;
        self
    }

    /// Build one record.
    pub fn build(&mut self, input: Record) -> Result<Record, Error> {
        let mut record = self.rename(input);
        if let Source::Tabular(dialect) = self.source {
            if dialect.is_legacy() {
                self.apply_legacy(&mut record);
            }
        }
        if matches!(self.class, EntityClass::Rearrangement | EntityClass::Clone) {
            self.attach_computed(&mut record)?;
        }
        self.attach_links(&mut record)?;
        self.attach_timestamps(&mut record)?;
        self.preserve_provenance(&mut record);
        self.coerce_fields(&mut record)?;
        self.check_required(&mut record)?;
        Ok(record)
    }

    fn name(&self, canonical: &str) -> Option<&'a str> {
        self.registry.storage_name(canonical, self.class)
    }

    /// Whether `field` has not been warned about yet; marks it as warned.
    fn first_warning(&mut self, field: &str) -> bool {
        self.warned.insert(field.to_string())
    }

    fn rename(&mut self, input: Record) -> Record {
        let Source::Tabular(dialect) = self.source else {
            return input;
        };
        let registry = self.registry;
        let storage_view = registry.storage_view();

        let mut record = Record::with_capacity(input.len());
        for (column, mut value) in input {
            if dialect.is_legacy() {
                dialect::clear_missing(&mut value);
            }
            match registry.lookup(&column, dialect.column(), Some(self.class)) {
                Some(entry) => match entry.name_in(storage_view) {
                    Some(name) => {
                        record.insert(name.to_string(), value);
                    }
                    None => {
                        if self.first_warning(&column) {
                            tracing::warn!(
                                "{} column {:?} has no {} name, dropping it",
                                dialect,
                                column,
                                storage_view
                            );
                        }
                    }
                },
                None => {
                    let name = match dialect.unmapped_prefix() {
                        Some(prefix) => format!("{}{}", prefix, column),
                        None => column.clone(),
                    };
                    if self.first_warning(&name) {
                        tracing::warn!(
                            "unmapped {} column {:?}, storing as {:?}",
                            dialect,
                            column,
                            name
                        );
                    }
                    record.insert(name, value);
                }
            }
        }
        record
    }

    /// Tie resolution, renaming of legacy gene names, and frame type flags.
    fn apply_legacy(&self, record: &mut Record) {
        for gene_type in GENE_TYPES {
            if let Some(name) = self.name(&format!("{}_call", gene_type)) {
                dialect::normalize_legacy_call(record, name, gene_type);
            }
        }

        let Some(productive) = self.name("productive") else {
            return;
        };
        let frame_type = match record.get(productive) {
            Some(Value::String(s)) => s.clone(),
            _ => return,
        };
        let flags = dialect::frame_flags(&frame_type);
        record.insert(productive.to_string(), Value::Bool(flags.productive));
        let optional = |flag: Option<bool>| flag.map(Value::Bool).unwrap_or(Value::Null);
        if let Some(name) = self.name("stop_codon") {
            record.insert(name.to_string(), optional(flags.stop_codon));
        }
        if let Some(name) = self.name("vj_in_frame") {
            record.insert(name.to_string(), optional(flags.vj_in_frame));
        }
    }

    fn attach_computed(&self, record: &mut Record) -> Result<(), Error> {
        let mut locus = None;
        for gene_type in GENE_TYPES {
            let Some(call_name) = self.name(&format!("{}_call", gene_type)) else {
                continue;
            };
            let value = record.get(call_name).cloned().unwrap_or(Value::Null);
            let call = computed::parse_gene_value(&value).ok_or_else(|| Error::TypeMismatch {
                field: call_name.to_string(),
                value: value.to_string(),
                target: "gene call".to_string(),
            })?;

            record.insert(call_name.to_string(), computed::string_list(&call.calls));
            if let Some(name) = self.name(&format!("{}_gene", gene_type)) {
                record.insert(name.to_string(), computed::string_list(&call.genes));
            }
            if let Some(name) = self.name(&format!("{}_family", gene_type)) {
                record.insert(name.to_string(), computed::string_list(&call.families));
            }
            if gene_type == 'v' {
                locus = call.locus;
            }
        }

        if let (Some(name), Some(locus)) = (self.name("locus"), locus) {
            if record.get(name).map(is_null_like).unwrap_or(true) {
                record.insert(name.to_string(), Value::String(locus));
            }
        }

        let junction_aa = self
            .name("junction_aa")
            .and_then(|name| record.get(name))
            .cloned()
            .unwrap_or(Value::Null);
        if let Some(name) = self.name("ir_substring") {
            let index = match &junction_aa {
                Value::String(s) => computed::substrings(s),
                _ => Vec::new(),
            };
            record.insert(name.to_string(), computed::string_list(&index));
        }
        if let Some(name) = self.name("ir_junction_aa_length") {
            if record.get(name).map(is_null_like).unwrap_or(true) {
                record.insert(name.to_string(), computed::text_length(&junction_aa));
            }
        }
        if let Some(name) = self.name("junction_length") {
            if record.get(name).map(is_null_like).unwrap_or(true) {
                let junction = self
                    .name("junction")
                    .and_then(|junction| record.get(junction))
                    .cloned()
                    .unwrap_or(Value::Null);
                record.insert(name.to_string(), computed::text_length(&junction));
            }
        }

        if let (Source::Tabular(dialect), EntityClass::Rearrangement) = (self.source, self.class) {
            if let Some(name) = self.name("ir_annotation_tool") {
                let tool = self
                    .annotation_tool
                    .clone()
                    .unwrap_or_else(|| dialect.annotation_tool().to_string());
                record.insert(name.to_string(), Value::String(tool));
            }
        }
        Ok(())
    }

    fn attach_links(&self, record: &mut Record) -> Result<(), Error> {
        let Some(repertoire) = &self.repertoire else {
            return Ok(());
        };
        let link_name = self.registry.require_storage_name(LINK_FIELD, self.class)?;
        record.insert(
            link_name.to_string(),
            Value::String(repertoire.link_id.clone()),
        );

        for canonical in REPERTOIRE_ID_FIELDS {
            let (Some(name), Some(expected)) = (self.name(canonical), repertoire.ids.get(canonical))
            else {
                continue;
            };
            match record.get(name) {
                Some(found) if !is_null_like(found) && found != expected => {
                    return Err(Error::PresetLinkField {
                        field: name.to_string(),
                        found: found.to_string(),
                        expected: expected.to_string(),
                    });
                }
                _ => {
                    record.insert(name.to_string(), expected.clone());
                }
            }
        }
        Ok(())
    }

    fn attach_timestamps(&self, record: &mut Record) -> Result<(), Error> {
        let now = self.clock.now_string();
        for name in [
            self.registry.created_at_name(self.class)?,
            self.registry.updated_at_name(self.class)?,
        ] {
            record.insert(name.to_string(), Value::String(now.clone()));
        }
        Ok(())
    }

    fn preserve_provenance(&self, record: &mut Record) {
        let Some(provenance) = self.class.provenance_key().and_then(|key| self.name(key)) else {
            return;
        };
        let Some(primary) = self.name(self.class.primary_key()) else {
            return;
        };
        let value = match record.get(primary) {
            Some(value) if !is_null_like(value) => value.clone(),
            _ => return,
        };
        if record.get(provenance).map(is_null_like).unwrap_or(true) {
            record.insert(provenance.to_string(), value);
        }
    }

    fn coerce_fields(&mut self, record: &mut Record) -> Result<(), Error> {
        let registry = self.registry;
        let class = self.class;
        let names = record.keys().cloned().collect::<Vec<_>>();
        for name in names {
            match registry.storage_entry(&name, class) {
                Some(entry) => {
                    let value = record.get(&name).cloned().unwrap_or(Value::Null);
                    insert_coerced(record, &name, entry, &value)?;
                }
                None if registry.is_storage_name(&name, class) => (),
                None => {
                    if self.first_warning(&name) {
                        tracing::warn!("{} field {:?} is not mapped, storing as is", class, name);
                    }
                }
            }
        }
        Ok(())
    }

    fn check_required(&self, record: &mut Record) -> Result<(), Error> {
        let storage_view = self.registry.storage_view();
        for entry in self
            .registry
            .rows_for(self.class, |e| e.required && e.standard().is_some())
        {
            let Some(name) = entry.name_in(storage_view) else {
                continue;
            };
            match record.get(name) {
                None if entry.nullable => insert_coerced(record, name, entry, &Value::Null)?,
                None => {
                    return Err(Error::RequiredMissing {
                        field: name.to_string(),
                    })
                }
                Some(value) if !entry.nullable && is_null_like(value) => {
                    return Err(Error::NullOnRequired {
                        field: name.to_string(),
                    })
                }
                Some(_) => (),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tracing_test::traced_test;

    use super::{dialect::Dialect, RecordBuilder, Source};
    use crate::{
        common::{FixedClock, Record},
        err::ErrorKind,
        link::RepertoireInfo,
        mapping::{schema::EntityClass, test_registry},
    };

    fn clock() -> FixedClock {
        FixedClock::new(chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap())
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn repertoire() -> RepertoireInfo {
        let ids: IndexMap<String, Value> = [
            ("repertoire_id".to_string(), json!("rep1")),
            ("data_processing_id".to_string(), json!("dp1")),
        ]
        .into_iter()
        .collect();
        RepertoireInfo::new("7".to_string(), ids)
    }

    fn airr_row(sequence_id: &str, v_call: &str) -> Record {
        record(&[
            ("sequence_id", json!(sequence_id)),
            ("sequence", json!("GAGGTGCAG")),
            ("rev_comp", json!("F")),
            ("productive", json!("T")),
            ("v_call", json!(v_call)),
            ("d_call", json!("")),
            ("j_call", json!("IGHJ4*02")),
            ("junction", json!("TGTGCGAGA")),
            ("junction_aa", json!("CASSL")),
            ("duplicate_count", json!("12")),
        ])
    }

    #[test]
    fn legacy_gene_call_rewrite() {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Adaptive),
            &clock,
        );

        let result = builder
            .build(record(&[
                ("sequence_id", json!("r1")),
                ("rearrangement", json!("TGTGCCAGC")),
                ("frame_type", json!("In")),
                ("v_resolved", json!("TCRBV20-01*01")),
                ("d_resolved", json!("unresolved")),
                ("j_resolved", json!("TCRBJ02-07*01")),
                ("amino_acid", json!("CASSL")),
                ("cdr3_length", json!("15")),
                ("templates", json!("3")),
            ]))
            .unwrap();

        assert_eq!(result["v_call"], json!(["TRBV20-1*01"]));
        assert_eq!(result["v_gene"], json!(["TRBV20-1"]));
        assert_eq!(result["v_family"], json!(["TRBV20"]));
        assert_eq!(result["d_call"], json!([]));
        assert_eq!(result["j_call"], json!(["TRBJ2-7*01"]));
        assert_eq!(result["j_gene"], json!(["TRBJ2-7"]));
        assert_eq!(result["locus"], json!("TRB"));
        assert_eq!(result["sequence"], json!("TGTGCCAGC"));
        assert_eq!(result["junction_length"], json!(15));
        assert_eq!(result["junction_aa_length"], json!(5));
        assert_eq!(result["duplicate_count"], json!(3));
        assert_eq!(result["ir_annotation_tool"], json!("Adaptive"));
    }

    #[test]
    fn multi_call() {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Airr),
            &clock,
        );

        let result = builder
            .build(airr_row("s2", "IGHV3-23*01,IGHV3-23D*01"))
            .unwrap();

        assert_eq!(result["v_call"], json!(["IGHV3-23*01", "IGHV3-23D*01"]));
        assert_eq!(result["v_gene"], json!(["IGHV3-23", "IGHV3-23D"]));
        assert_eq!(result["v_family"], json!(["IGHV3"]));
        assert_eq!(result["locus"], json!("IGH"));
        assert_eq!(result["productive"], json!(true));
        assert_eq!(result["rev_comp"], json!(false));
        assert_eq!(result["duplicate_count"], json!(12));
        assert_eq!(result["junction_length"], json!(9));
        assert_eq!(result["ir_annotation_tool"], json!("AIRR"));
    }

    #[test]
    fn locus_comes_from_v_call_only() {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Airr),
            &clock,
        );
        let mut row = airr_row("s4", "");
        row.insert("d_call".into(), json!("IGHD3-10*01"));

        let result = builder.build(row).unwrap();

        assert_eq!(result["v_call"], json!([]));
        assert_eq!(result["j_call"], json!(["IGHJ4*02"]));
        assert!(result.get("locus").map(|v| v.is_null()).unwrap_or(true));
    }

    #[test]
    fn supplied_locus_is_kept() {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Airr),
            &clock,
        );
        let mut row = airr_row("s3", "IGHV3-23*01");
        row.insert("locus".into(), json!("IGK"));

        let result = builder.build(row).unwrap();

        assert_eq!(result["locus"], json!("IGK"));
    }

    #[rstest::rstest]
    #[case("In", json!(true), json!(false), json!(true))]
    #[case("Stop", json!(false), json!(true), json!(false))]
    #[case("Out", json!(false), Value::Null, json!(false))]
    fn productive_inference(
        #[case] frame_type: &str,
        #[case] productive: Value,
        #[case] stop_codon: Value,
        #[case] vj_in_frame: Value,
    ) {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Adaptive),
            &clock,
        );

        let result = builder
            .build(record(&[
                ("sequence_id", json!("r1")),
                ("frame_type", json!(frame_type)),
            ]))
            .unwrap();

        assert_eq!(result["productive"], productive);
        assert_eq!(result["stop_codon"], stop_codon);
        assert_eq!(result["vj_in_frame"], vj_in_frame);
    }

    #[test]
    fn required_field_missing() {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Airr),
            &clock,
        );
        let mut row = airr_row("s1", "IGHV3-23*01");
        row.shift_remove("sequence_id");

        let err = builder.build(row).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RequiredMissing);
    }

    #[test]
    fn required_field_empty() {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Airr),
            &clock,
        );

        let err = builder.build(airr_row("", "IGHV3-23*01")).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NullOnRequired);
    }

    #[test]
    fn nullable_required_fields_are_injected() {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Mixcr),
            &clock,
        );

        let result = builder
            .build(record(&[
                ("readId", json!("17")),
                ("bestVHit", json!("IGHV1-2*02")),
                ("aaSeqCDR3", json!("CAR")),
                ("readCount", json!("4")),
            ]))
            .unwrap();

        assert_eq!(result["sequence_id"], json!("17"));
        assert_eq!(result["rev_comp"], Value::Null);
        assert_eq!(result["productive"], Value::Null);
        assert_eq!(result["junction"], Value::Null);
        assert_eq!(result["substring"], json!([]));
        assert_eq!(result["junction_aa_length"], json!(3));
        assert_eq!(result["junction_length"], Value::Null);
        assert_eq!(result["ir_annotation_tool"], json!("MiXCR"));
    }

    #[test]
    fn substring_index() {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Clone,
            Source::Document,
            &clock,
        );

        let result = builder
            .build(record(&[("clone_id", json!("c1")), ("junction_aa", json!("CASS"))]))
            .unwrap();

        assert_eq!(result["substring"], json!(["CASS"]));
        assert_eq!(result["junction_aa_length"], json!(4));
        assert!(!result.contains_key("ir_annotation_tool"));
    }

    #[test]
    fn links_and_timestamps() {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Airr),
            &clock,
        )
        .with_repertoire(repertoire());

        let result = builder.build(airr_row("s1", "IGHV3-23*01")).unwrap();

        assert_eq!(result["ir_annotation_set_metadata_id"], json!("7"));
        assert_eq!(result["repertoire_id"], json!("rep1"));
        assert_eq!(result["data_processing_id"], json!("dp1"));
        assert!(!result.contains_key("sample_processing_id"));
        assert_eq!(result["ir_created_at"], json!("2024-03-01T12:30:05+00:00"));
        assert_eq!(result["ir_updated_at"], json!("2024-03-01T12:30:05+00:00"));
    }

    #[rstest::rstest]
    #[case(json!("rep1"), None)]
    #[case(json!(""), None)]
    #[case(json!("rep9"), Some(ErrorKind::PresetLinkField))]
    fn preset_repertoire_id(#[case] preset: Value, #[case] expected: Option<ErrorKind>) {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Airr),
            &clock,
        )
        .with_repertoire(repertoire());
        let mut row = airr_row("s1", "IGHV3-23*01");
        row.insert("repertoire_id".into(), preset);

        let result = builder.build(row);

        assert_eq!(result.err().map(|e| e.kind()), expected);
    }

    #[test]
    fn provenance_is_kept() {
        let registry = test_registry();
        let clock = clock();
        let mut builder =
            RecordBuilder::new(&registry, EntityClass::Cell, Source::Document, &clock)
                .with_repertoire(repertoire());

        let result = builder
            .build(record(&[
                ("cell_id", json!("AAACCTGAGCGATAGC-1")),
                ("virtual_pairing", json!("false")),
            ]))
            .unwrap();

        assert_eq!(result["ir_cell_id"], json!("AAACCTGAGCGATAGC-1"));
        assert_eq!(result["cell_id"], json!("AAACCTGAGCGATAGC-1"));
        assert_eq!(result["virtual_pairing"], json!(false));
        assert_eq!(result["rearrangements"], json!([]));
        assert_eq!(result["repertoire_id"], json!("rep1"));
    }

    #[test]
    fn missing_link_mapping() {
        let registry = crate::mapping::Registry::from_reader(
            "ir_class\tir_subclass\tir_id\tairr\tir_repository\n\
             Cell\tcell\tcell_id\tcell_id\tcell_id\n"
                .as_bytes(),
            "ir_repository",
        )
        .unwrap();
        let clock = clock();
        let mut builder =
            RecordBuilder::new(&registry, EntityClass::Cell, Source::Document, &clock)
                .with_repertoire(repertoire());

        let err = builder
            .build(record(&[("cell_id", json!("c1"))]))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MappingMissing);
    }

    #[test]
    fn unqualified_timestamp_mapping() {
        let registry = crate::mapping::Registry::from_reader(
            "ir_class\tir_subclass\tir_id\tairr\tir_repository\n\
             Cell\tcell\tcell_id\tcell_id\tcell_id\n\
             IR_Cell\tir_cell\tir_created_at\t\tir_created_at\n\
             IR_Cell\tir_cell\tir_updated_at\t\tir_updated_at\n"
                .as_bytes(),
            "ir_repository",
        )
        .unwrap();
        let clock = clock();
        let mut builder = RecordBuilder::new(&registry, EntityClass::Cell, Source::Document, &clock);

        let result = builder.build(record(&[("cell_id", json!("c1"))])).unwrap();

        assert_eq!(result["ir_created_at"], json!("2024-03-01T12:30:05+00:00"));
        assert_eq!(result["ir_updated_at"], json!("2024-03-01T12:30:05+00:00"));
    }

    #[test]
    fn missing_timestamp_mapping() {
        let registry = crate::mapping::Registry::from_reader(
            "ir_class\tir_subclass\tir_id\tairr\tir_repository\n\
             Cell\tcell\tcell_id\tcell_id\tcell_id\n"
                .as_bytes(),
            "ir_repository",
        )
        .unwrap();
        let clock = clock();
        let mut builder = RecordBuilder::new(&registry, EntityClass::Cell, Source::Document, &clock);

        let err = builder.build(record(&[("cell_id", json!("c1"))])).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MappingMissing);
        assert!(err.to_string().contains("ir_created_at_cell"), "{}", err);
    }

    #[traced_test]
    #[test]
    fn legacy_unmapped_columns_are_prefixed() {
        let registry = test_registry();
        let clock = clock();
        let mut builder = RecordBuilder::new(
            &registry,
            EntityClass::Rearrangement,
            Source::Tabular(Dialect::Adaptive),
            &clock,
        );
        let row = || {
            record(&[
                ("sequence_id", json!("r1")),
                ("v_resolved", json!("TCRBV02-01")),
                ("v_allele_ties", json!("01,03")),
                ("v_gene_ties", json!("no data")),
            ])
        };

        let first = builder.build(row()).unwrap();
        builder.build(row()).unwrap();

        assert_eq!(first["v_call"], json!(["TRBV2-1*01", "TRBV2-1*03"]));
        assert_eq!(first["ad_v_allele_ties"], json!("01,03"));
        assert_eq!(first["ad_v_gene_ties"], json!(""));
        assert!(logs_contain("unmapped adaptive column \"v_allele_ties\""));
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("\"v_allele_ties\""))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one warning, got {}", n)),
            }
        });
    }

    /// Every output field is a storage name of the class or a reported pass-through.
    #[traced_test]
    #[test]
    fn output_fields_are_mapped_or_reported() {
        let registry = test_registry();
        let clock = clock();

        for dialect in [Dialect::Airr, Dialect::Mixcr, Dialect::Adaptive] {
            let mut builder = RecordBuilder::new(
                &registry,
                EntityClass::Rearrangement,
                Source::Tabular(dialect),
                &clock,
            )
            .with_repertoire(repertoire());
            let mut row = record(&[("extra_column", json!("x"))]);
            for entry in registry.rows_for(EntityClass::Rearrangement, |e| {
                e.name_in(dialect.column()).is_some()
            }) {
                let value = match entry.canonical() {
                    Some("v_call") => json!("IGHV1-2*02"),
                    Some("productive") if dialect == Dialect::Adaptive => json!("In"),
                    Some("productive" | "rev_comp" | "vj_in_frame" | "stop_codon") => json!("T"),
                    Some("v_score" | "junction_length" | "duplicate_count") => json!("5"),
                    _ => json!("ABCDE"),
                };
                row.insert(entry.name_in(dialect.column()).unwrap().to_string(), value);
            }

            let result = builder.build(row).unwrap();

            for name in result.keys() {
                if !registry.is_storage_name(name, EntityClass::Rearrangement) {
                    assert!(
                        logs_contain(&format!("storing as {:?}", name)),
                        "{} not reported",
                        name
                    );
                }
            }
        }
    }
}
