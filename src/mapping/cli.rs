//! Command line interface for "mapping check".

use std::path::PathBuf;

use clap::Parser;
use itertools::Itertools;
use strum::IntoEnumIterator;

use crate::{
    common::trace_rss_now,
    mapping::{
        schema::{EntityClass, CANONICAL_VIEW, DEFAULT_STORAGE_VIEW, STANDARD_VIEW},
        Registry,
    },
};

/// Command line arguments for `mapping check` sub command.
#[derive(Parser, Debug)]
#[command(about = "Load and summarize a mapping table", long_about = None)]
pub struct Args {
    /// Path to the mapping table (TSV).
    #[arg(long)]
    pub mapfile: PathBuf,
    /// Column of the mapping table holding repository storage names.
    #[arg(long, default_value = DEFAULT_STORAGE_VIEW)]
    pub database_map: String,
}

/// Main entry point for the `mapping check` command.
pub fn run(common_args: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `mapping check`");
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let registry = Registry::from_path(&args.mapfile, &args.database_map)
        .map_err(|e| anyhow::anyhow!("could not load mapping {:?}: {}", &args.mapfile, e))?;
    trace_rss_now();

    tracing::info!(
        "{} rows, columns: {}",
        registry.len(),
        registry.columns().iter().join(", ")
    );
    for class in EntityClass::iter() {
        let rows = registry.rows_for(class, |_| true).count();
        let standard = registry
            .rows_for(class, |e| e.standard().is_some())
            .count();
        let required = registry
            .rows_for(class, |e| e.standard().is_some() && e.required)
            .count();
        let unstored = registry
            .rows_for(class, |e| e.name_in(registry.storage_view()).is_none())
            .filter_map(|e| e.canonical())
            .join(", ");
        tracing::info!(
            "  {}: {} rows, {} standard, {} required",
            class,
            rows,
            standard,
            required
        );
        if !unstored.is_empty() {
            tracing::warn!("  {}: not stored in repository: {}", class, unstored);
        }
        if registry
            .storage_name(class.primary_key(), class)
            .is_none()
        {
            tracing::warn!(
                "  {}: no storage name for primary key {:?} ({})",
                class,
                class.primary_key(),
                CANONICAL_VIEW
            );
        }
    }
    if !registry.has_column(STANDARD_VIEW) {
        tracing::warn!("mapping has no {:?} column", STANDARD_VIEW);
    }

    Ok(())
}
