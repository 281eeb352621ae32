//! Command line interface for the "load *" commands.

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use clap::Parser;
use thousands::Separable;

use crate::{
    build::dialect::Dialect,
    common::{io::data_file_name, trace_rss_now, StoreArgs, SystemClock},
    err::{Error, Scope},
    ingest::{IngestConfigBuilder, IngestSummary, Ingester, DEFAULT_CHUNK_SIZE},
    mapping::{schema::EntityClass, Registry},
    repository::{memory::MemoryRepository, Repository},
};

/// Command line arguments shared by the `load *` sub commands.
#[derive(Parser, Debug, Clone)]
#[command(about = "Load AIRR data files into the repository", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Number of records handed to the repository at once.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub database_chunk: usize,
    /// Build all records but do not store them.
    #[arg(long, default_value_t = false)]
    pub skipload: bool,
    /// Update stored repertoires instead of inserting new ones.
    #[arg(long, default_value_t = false)]
    pub update: bool,
    /// Annotation tool recorded on rearrangements, overriding the dialect's.
    #[arg(long)]
    pub annotation_tool: Option<String>,
    /// Input files; gzip-compressed files must end in `.gz`.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

/// Command line arguments for `load rearrangement`.
#[derive(Parser, Debug, Clone)]
#[command(about = "Load tabular rearrangement files", long_about = None)]
pub struct RearrangementArgs {
    #[command(flatten)]
    pub load: Args,
    /// Annotation tool dialect of the input files.
    #[arg(long, value_enum, default_value_t = Dialect::Airr)]
    pub dialect: Dialect,
}

fn is_json(path: &Path) -> bool {
    data_file_name(path).ends_with(".json")
}

/// Load one file of `class` records.
///
/// Clone files are read as JSON or TSV depending on their extension.
pub fn load_file<R: Repository + ?Sized>(
    ingester: &mut Ingester<'_, R>,
    class: EntityClass,
    dialect: Dialect,
    path: &Path,
) -> Result<IngestSummary, Error> {
    match class {
        EntityClass::Repertoire => ingester.load_repertoires(path),
        EntityClass::Rearrangement => ingester.load_tabular(class, dialect, path),
        EntityClass::Clone if !is_json(path) => ingester.load_tabular(class, Dialect::Airr, path),
        _ => ingester.load_documents(class, path),
    }
}

/// Main entry point for the `load rearrangement` command.
pub fn run_rearrangement(
    common_args: &crate::common::Args,
    args: &RearrangementArgs,
) -> Result<(), anyhow::Error> {
    run(common_args, EntityClass::Rearrangement, args.dialect, &args.load)
}

/// Main entry point for the `load *` commands.
///
/// A file that fails is reported and skipped; the command fails at the end
/// if any file failed.  Errors concerning the mapping stop the command at once.
pub fn run(
    common_args: &crate::common::Args,
    class: EntityClass,
    dialect: Dialect,
    args: &Args,
) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `load {}`", class.slug());
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);
    tracing::info!("  dialect = {}", dialect);

    let before_loading = Instant::now();
    let registry = Registry::from_path(&args.store.mapfile, &args.store.database_map)
        .map_err(|e| anyhow::anyhow!("could not load mapping {:?}: {}", &args.store.mapfile, e))?;
    let mut repository = MemoryRepository::open(&args.store.repository_dir).map_err(|e| {
        anyhow::anyhow!(
            "could not open repository {:?}: {}",
            &args.store.repository_dir,
            e
        )
    })?;
    tracing::info!(
        "...done loading mapping and repository in {:?}",
        before_loading.elapsed()
    );
    trace_rss_now();

    let config = IngestConfigBuilder::default()
        .chunk_size(args.database_chunk)
        .skipload(args.skipload)
        .update(args.update)
        .annotation_tool(args.annotation_tool.clone())
        .build()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    let clock = SystemClock;
    let mut failed = Vec::new();
    {
        let mut ingester = Ingester::new(&registry, &mut repository, &clock, config);
        for path in &args.paths {
            let before_file = Instant::now();
            match load_file(&mut ingester, class, dialect, path) {
                Ok(summary) => {
                    tracing::info!(
                        "...loaded {:?}: {} records built, {} stored in {:?}",
                        path,
                        summary.built.separate_with_commas(),
                        summary.stored.separate_with_commas(),
                        before_file.elapsed()
                    );
                }
                Err(e) if e.scope() == Scope::Mapping => {
                    return Err(anyhow::anyhow!("mapping problem in {:?}: {}", path, e));
                }
                Err(e) => {
                    tracing::error!("could not load {:?} ({} error): {}", path, e.kind(), e);
                    failed.push(path.clone());
                }
            }
        }
    }

    if !args.skipload {
        repository
            .save()
            .map_err(|e| anyhow::anyhow!("could not save repository: {}", e))?;
    }
    trace_rss_now();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} of {} files failed to load: {:?}",
            failed.len(),
            args.paths.len(),
            failed
        ))
    }
}
