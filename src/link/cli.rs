//! Command line interface for the "link" command.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::{
    common::{
        io::{data_file_name, open_read_maybe_gz},
        trace_rss_now, StoreArgs, SystemClock,
    },
    err::Error,
    link::children::{link_children, LinkKind, LinkSummary},
    mapping::Registry,
    repository::memory::MemoryRepository,
};

/// Command line arguments for the `link` command.
#[derive(Parser, Debug, Clone)]
#[command(about = "Point child records at their parent records", long_about = None)]
pub struct Args {
    /// The child and parent collections to link.
    #[arg(value_enum)]
    pub kind: LinkKind,
    #[command(flatten)]
    pub store: StoreArgs,
    /// Two-column TSV with the child file and the parent file per line.
    #[arg(long)]
    pub file_map: PathBuf,
}

/// A line of the file map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilePair {
    pub child_file: String,
    pub parent_file: String,
}

/// Read the file map; lines starting with `#` are skipped.
pub fn read_file_map<P: AsRef<Path>>(path: P) -> Result<Vec<FilePair>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(open_read_maybe_gz(&path)?);
    Ok(reader
        .deserialize()
        .collect::<Result<Vec<FilePair>, csv::Error>>()?)
}

/// Main entry point for the `link` command.
pub fn run(common_args: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `link {}`", args.kind);
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let registry = Registry::from_path(&args.store.mapfile, &args.store.database_map)
        .map_err(|e| anyhow::anyhow!("could not load mapping {:?}: {}", &args.store.mapfile, e))?;
    let mut repository = MemoryRepository::open(&args.store.repository_dir).map_err(|e| {
        anyhow::anyhow!(
            "could not open repository {:?}: {}",
            &args.store.repository_dir,
            e
        )
    })?;
    let pairs = read_file_map(&args.file_map)
        .map_err(|e| anyhow::anyhow!("could not read file map {:?}: {}", &args.file_map, e))?;
    trace_rss_now();

    let clock = SystemClock;
    let mut total = LinkSummary::default();
    let mut failed = 0;
    for pair in &pairs {
        let child_file = data_file_name(&pair.child_file);
        let parent_file = data_file_name(&pair.parent_file);
        match link_children(
            &mut repository,
            &registry,
            &clock,
            args.kind,
            &child_file,
            &parent_file,
        ) {
            Ok(summary) => {
                tracing::info!("...linked {:?} to {:?}: {:?}", &child_file, &parent_file, &summary);
                total.updated += summary.updated;
                total.already_linked += summary.already_linked;
                total.unmatched += summary.unmatched;
                total.duplicate_labels += summary.duplicate_labels;
            }
            Err(e) => {
                tracing::error!(
                    "could not link {:?} to {:?} ({} error): {}",
                    &child_file,
                    &parent_file,
                    e.kind(),
                    e
                );
                failed += 1;
            }
        }
    }

    repository
        .save()
        .map_err(|e| anyhow::anyhow!("could not save repository: {}", e))?;
    tracing::info!("{} over {} file pairs: {:?}", args.kind, pairs.len(), &total);

    if failed == 0 {
        Ok(())
    } else {
        Err(anyhow::anyhow!("{} of {} file pairs failed to link", failed, pairs.len()))
    }
}
