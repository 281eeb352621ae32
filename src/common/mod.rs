//! Common functionality.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use byte_unit::{Byte, UnitType};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

use crate::mapping::schema::DEFAULT_STORAGE_VIEW;

pub mod io;

/// A flat record: field names to JSON values, in insertion order.
pub type Record = indexmap::IndexMap<String, serde_json::Value>;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Arguments locating the mapping table and the repository.
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// Path to the mapping table (TSV, optionally gzip-compressed).
    #[arg(long)]
    pub mapfile: PathBuf,
    /// Column of the mapping table holding repository storage names.
    #[arg(long, default_value = DEFAULT_STORAGE_VIEW)]
    pub database_map: String,
    /// Directory holding the repository collections.
    #[arg(long)]
    pub repository_dir: PathBuf,
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    let rss = procfs::process::Process::myself().and_then(|me| me.stat());
    match rss {
        Ok(stat) => {
            let bytes = stat.rss * procfs::page_size();
            tracing::debug!(
                "RSS now: {:.2}",
                Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary)
            );
        }
        Err(e) => tracing::debug!("could not determine RSS: {}", e),
    }
}

/// Source of the wall-clock time written into `ir_created_at` and friends.
pub trait Clock {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// The current instant formatted as ISO-8601 with explicit offset.
    fn now_string(&self) -> String {
        format_timestamp(&self.now())
    }
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy, derive_new::new)]
pub struct FixedClock {
    instant: DateTime<Utc>,
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
    }
}

/// Format a UTC instant as `YYYY-MM-DDTHH:MM:SS+00:00`.
pub fn format_timestamp(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Cooperative cancellation flag, checked by the orchestrator at chunk boundaries.
///
/// Clones share the flag.
#[derive(Debug, Default, Clone)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    /// Request that processing stops at the next chunk boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
