//! CLI argument parsing for coprof

use clap::Parser;
use std::path::PathBuf;

use crate::config::{ReportFormat, SuspendPoint};

/// Parse `module.callable`, splitting at the last dot
pub fn parse_suspend_point(value: &str) -> Result<SuspendPoint, String> {
    match value.rsplit_once('.') {
        Some((module, name)) if !module.is_empty() && !name.is_empty() => {
            Ok(SuspendPoint::new(module, name))
        }
        _ => Err(format!("expected MODULE.CALLABLE, got '{}'", value)),
    }
}

#[derive(Parser, Debug)]
#[command(name = "coprof")]
#[command(version)]
#[command(about = "Call-tree profiler for cooperatively scheduled contexts", long_about = None)]
pub struct Cli {
    /// Recorded event log (JSON lines); `-` reads stdin
    #[arg(value_name = "EVENTS")]
    pub events: PathBuf,

    /// Write the ranked stats table to a file instead of stdout
    #[arg(long = "stats", value_name = "FILE")]
    pub stats: Option<PathBuf>,

    /// Write the per-context call trees to a file instead of stdout
    #[arg(short = 's', long = "summary", value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Write the raw call/return trace to a file
    #[arg(short = 't', long = "trace", value_name = "FILE")]
    pub trace: Option<PathBuf>,

    /// Count time spent blocked in the scheduler toward execution totals
    #[arg(short = 'b', long = "blocking")]
    pub blocking: bool,

    /// Annotate time columns with their share of the session
    #[arg(short = 'P', long = "percent")]
    pub percent: bool,

    /// Scheduler callable that suspends the calling context
    #[arg(long = "suspend-point", value_name = "MODULE.CALLABLE", value_parser = parse_suspend_point)]
    pub suspend_point: Option<SuspendPoint>,

    /// Stop profiling this many seconds into the recording
    #[arg(short = 'd', long = "duration", value_name = "SECS")]
    pub duration: Option<f64>,

    /// Load profiler configuration from a TOML file (flags override it)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(long = "format", value_enum)]
    pub format: Option<ReportFormat>,

    /// Enable debug logging to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
