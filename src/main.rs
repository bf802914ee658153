use anyhow::{Context, Result};
use clap::Parser;
use coprof::cli::Cli;
use coprof::clock::ManualClock;
use coprof::config::ProfilerConfig;
use coprof::output::OutputSink;
use coprof::{replay, Profiler};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Merge the optional config file with command-line overrides
fn build_config(args: &Cli) -> Result<ProfilerConfig> {
    let mut config = match &args.config {
        Some(path) => ProfilerConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ProfilerConfig::default(),
    };
    if args.blocking {
        config.include_blocking_time = true;
    }
    if args.percent {
        config.percentage_mode = true;
    }
    if let Some(point) = &args.suspend_point {
        config.suspend_point = Some(point.clone());
    }
    if let Some(format) = args.format {
        config.format = format;
    }
    Ok(config)
}

fn open_sink(path: Option<&Path>, default: OutputSink) -> Result<OutputSink> {
    match path {
        Some(path) => OutputSink::file(path)
            .with_context(|| format!("Failed to create output file {}", path.display())),
        None => Ok(default),
    }
}

fn open_events(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file =
        File::open(path).with_context(|| format!("Failed to open event log {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = build_config(&args)?;
    let clock = ManualClock::new();
    let mut profiler = Profiler::with_clock(config, clock.clone());
    profiler.set_stats_output(open_sink(args.stats.as_deref(), OutputSink::stdout())?);
    profiler.set_summary_output(open_sink(args.summary.as_deref(), OutputSink::stdout())?);
    profiler.set_trace_output(open_sink(args.trace.as_deref(), OutputSink::discard())?);

    let events = open_events(&args.events)?;

    match args.duration {
        Some(secs) => {
            let duration = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("Invalid --duration {}", secs))?;
            profiler.attach(duration);
            replay::replay(events, &mut profiler, &clock)
                .with_context(|| format!("Failed to replay {}", args.events.display()))?;
            profiler.detach()?;
        }
        None => {
            let (replayed, _) = profiler.profile(|p| replay::replay(events, p, &clock))?;
            replayed.with_context(|| format!("Failed to replay {}", args.events.display()))?;
        }
    }

    Ok(())
}
