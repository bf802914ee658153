//! Replay of recorded event logs
//!
//! An event log is JSON lines, one event per line, each carrying the
//! offset in seconds at which it was observed:
//!
//! ```text
//! {"at": 0.000, "context": 1, "event": "call", "site": {"module": "app", "name": "main"}}
//! {"at": 0.020, "context": 1, "event": "suspend"}
//! {"at": 0.120, "context": 1, "event": "resume"}
//! {"at": 0.125, "context": 1, "event": "return", "site": {"module": "app", "name": "main"}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Replay drives a
//! [`ManualClock`] so the profiler sees the recorded timing.

use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::time::Duration;

use crate::clock::ManualClock;
use crate::error::{ProfilerError, Result};
use crate::event::TraceEvent;
use crate::profiler::Profiler;

/// One line of an event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Seconds since the start of the recording
    pub at: f64,
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// Counters from a replay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub events: usize,
    pub skipped_lines: usize,
}

fn malformed(line: usize, message: impl Into<String>) -> ProfilerError {
    ProfilerError::Replay {
        line,
        message: message.into(),
    }
}

/// Parse one log line; None for blank and comment lines
pub fn parse_line(text: &str, line: usize) -> Result<Option<RecordedEvent>> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let record: RecordedEvent =
        serde_json::from_str(trimmed).map_err(|e| malformed(line, e.to_string()))?;
    if !record.at.is_finite() || record.at < 0.0 {
        return Err(malformed(line, format!("invalid timestamp {}", record.at)));
    }
    Ok(Some(record))
}

/// Feed every event of `reader` to `profiler`, moving `clock` along
pub fn replay(
    reader: impl BufRead,
    profiler: &mut Profiler<ManualClock>,
    clock: &ManualClock,
) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    let mut last = Duration::ZERO;

    for (index, text) in reader.lines().enumerate() {
        let line = index + 1;
        let text = text?;
        let Some(record) = parse_line(&text, line)? else {
            stats.skipped_lines += 1;
            continue;
        };

        let at = Duration::from_secs_f64(record.at);
        if at < last {
            return Err(malformed(line, "timestamp goes backwards"));
        }
        last = at;
        clock.set(at);

        profiler.handle_event(&record.event)?;
        stats.events += 1;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_site::CallSite;
    use crate::config::ProfilerConfig;
    use crate::event::ContextId;
    use crate::output::OutputSink;
    use std::io::Cursor;

    fn profiler(clock: &ManualClock) -> Profiler<ManualClock> {
        let mut profiler = Profiler::with_clock(ProfilerConfig::default(), clock.clone());
        profiler.set_stats_output(OutputSink::discard());
        profiler.set_summary_output(OutputSink::discard());
        profiler
    }

    #[test]
    fn test_parse_call_line() {
        let record = parse_line(
            r#"{"at": 0.5, "context": 2, "event": "call", "site": {"module": "m", "name": "f"}}"#,
            1,
        )
        .unwrap()
        .unwrap();
        assert_eq!(record.at, 0.5);
        assert_eq!(record.event, TraceEvent::call(ContextId(2), CallSite::new("m", "f")));
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        assert!(parse_line("", 1).unwrap().is_none());
        assert!(parse_line("   # recorded on host-a", 2).unwrap().is_none());
    }

    #[test]
    fn test_parse_reports_line_number() {
        let err = parse_line("{not json", 7).unwrap_err();
        assert!(matches!(err, ProfilerError::Replay { line: 7, .. }));
    }

    #[test]
    fn test_parse_rejects_negative_timestamp() {
        let err = parse_line(r#"{"at": -1.0, "context": 1, "event": "resume"}"#, 3).unwrap_err();
        assert!(matches!(err, ProfilerError::Replay { line: 3, .. }));
    }

    #[test]
    fn test_replay_accrues_recorded_time() {
        let log = r#"
# f calls g
{"at": 0.00, "context": 1, "event": "call", "site": {"module": "app", "name": "f"}}
{"at": 0.02, "context": 1, "event": "call", "site": {"module": "app", "name": "g"}}
{"at": 0.07, "context": 1, "event": "return", "site": {"module": "app", "name": "g"}}
{"at": 0.07, "context": 1, "event": "return", "site": {"module": "app", "name": "f"}}
"#;
        let clock = ManualClock::new();
        let mut profiler = profiler(&clock);
        profiler.attach_default();
        let stats = replay(Cursor::new(log), &mut profiler, &clock).unwrap();
        assert_eq!(stats.events, 4);
        assert_eq!(stats.skipped_lines, 2);

        let report = profiler.detach().unwrap().unwrap();
        let f = report.summary("app.f").unwrap();
        assert!((f.cumulative.as_secs_f64() - 0.07).abs() < 1e-6);
        assert!((f.own.as_secs_f64() - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_replay_rejects_time_going_backwards() {
        let log = concat!(
            r#"{"at": 1.0, "context": 1, "event": "suspend"}"#,
            "\n",
            r#"{"at": 0.5, "context": 1, "event": "resume"}"#,
            "\n"
        );
        let clock = ManualClock::new();
        let mut profiler = profiler(&clock);
        profiler.attach_default();
        let err = replay(Cursor::new(log), &mut profiler, &clock).unwrap_err();
        assert!(matches!(err, ProfilerError::Replay { line: 2, .. }));
    }
}
