//! AIRR data loader main executable

pub mod build;
pub mod coerce;
pub mod common;
pub mod err;
pub mod flatten;
pub mod gene_call;
pub mod ingest;
pub mod link;
pub mod mapping;
pub mod repository;

use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

use crate::{build::dialect::Dialect, mapping::schema::EntityClass};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "AIRR immune repertoire data loader",
    long_about = "This tool maps, validates and loads AIRR repertoire data into a repository"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Mapping table related commands.
    Mapping(Mapping),
    /// Data loading commands.
    Load(Load),
    /// Post-load linking of child records to parent records.
    Link(link::cli::Args),
}

/// Parsing of "mapping *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Mapping {
    /// The sub command to run
    #[command(subcommand)]
    command: MappingCommands,
}

/// Enum supporting the parsing of "mapping *" sub commands.
#[derive(Debug, Subcommand)]
enum MappingCommands {
    Check(mapping::cli::Args),
}

/// Parsing of "load *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Load {
    /// The sub command to run
    #[command(subcommand)]
    command: LoadCommands,
}

/// Enum supporting the parsing of "load *" sub commands.
#[derive(Debug, Subcommand)]
enum LoadCommands {
    /// Load repertoire JSON files.
    Repertoire(ingest::cli::Args),
    /// Load tabular rearrangement files.
    Rearrangement(ingest::cli::RearrangementArgs),
    /// Load clone JSON or TSV files.
    Clone(ingest::cli::Args),
    /// Load cell JSON files.
    Cell(ingest::cli::Args),
    /// Load cell expression JSON files.
    Expression(ingest::cli::Args),
    /// Load reactivity JSON files.
    Reactivity(ingest::cli::Args),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Mapping(mapping) => match &mapping.command {
                MappingCommands::Check(args) => mapping::cli::run(&cli.common, args)?,
            },
            Commands::Load(load) => match &load.command {
                LoadCommands::Repertoire(args) => {
                    ingest::cli::run(&cli.common, EntityClass::Repertoire, Dialect::Airr, args)?
                }
                LoadCommands::Rearrangement(args) => {
                    ingest::cli::run_rearrangement(&cli.common, args)?
                }
                LoadCommands::Clone(args) => {
                    ingest::cli::run(&cli.common, EntityClass::Clone, Dialect::Airr, args)?
                }
                LoadCommands::Cell(args) => {
                    ingest::cli::run(&cli.common, EntityClass::Cell, Dialect::Airr, args)?
                }
                LoadCommands::Expression(args) => {
                    ingest::cli::run(&cli.common, EntityClass::Expression, Dialect::Airr, args)?
                }
                LoadCommands::Reactivity(args) => {
                    ingest::cli::run(&cli.common, EntityClass::Reactivity, Dialect::Airr, args)?
                }
            },
            Commands::Link(args) => link::cli::run(&cli.common, args)?,
        }

        Ok::<(), anyhow::Error>(())
    })?;
    term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

    Ok(())
}
