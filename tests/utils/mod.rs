// Shared helpers for integration tests

#![allow(dead_code)]

use coprof::call_site::CallSite;
use coprof::clock::ManualClock;
use coprof::config::ProfilerConfig;
use coprof::output::OutputSink;
use coprof::Profiler;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Writer whose contents can be read back after the profiler wrote to it
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    pub fn sink(&self) -> OutputSink {
        OutputSink::from_writer(self.clone())
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Profiler on a manual clock with stats and summary captured
pub struct Harness {
    pub profiler: Profiler<ManualClock>,
    pub clock: ManualClock,
    pub stats: Capture,
    pub summary: Capture,
}

impl Harness {
    pub fn new(config: ProfilerConfig) -> Self {
        let clock = ManualClock::new();
        let mut profiler = Profiler::with_clock(config, clock.clone());
        let stats = Capture::default();
        let summary = Capture::default();
        profiler.set_stats_output(stats.sink());
        profiler.set_summary_output(summary.sink());
        Self {
            profiler,
            clock,
            stats,
            summary,
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.clock.advance(std::time::Duration::from_millis(ms));
    }
}

pub fn site(name: &str) -> CallSite {
    CallSite::new("app", name)
}

pub fn secs_close(actual: std::time::Duration, expected: f64) -> bool {
    (actual.as_secs_f64() - expected).abs() < 1e-9
}
