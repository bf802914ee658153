//! Report rendering
//!
//! Renders a [`Report`] as a ranked stats table, as indented per-context
//! call trees, or as one JSON document. Also formats the raw trace lines
//! written while a session is attached.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;

use crate::aggregate::{CallSummary, ContextTree, Report};
use crate::event::{EventKind, TraceEvent};

/// Shown in the own-ratio column when cumulative time is zero
pub const INFINITE_RATIO: &str = "inf";

fn percent_of(part: Duration, total: Duration) -> f64 {
    if total.is_zero() {
        0.0
    } else {
        part.as_secs_f64() / total.as_secs_f64() * 100.0
    }
}

fn time_cell(value: Duration, total: Duration, percentage_mode: bool) -> String {
    if percentage_mode {
        format!("{:.6} ({:5.1}%)", value.as_secs_f64(), percent_of(value, total))
    } else {
        format!("{:.6}", value.as_secs_f64())
    }
}

/// Ranked table of call sites, highest cumulative time first
pub fn render_stats_table(report: &Report, percentage_mode: bool) -> String {
    let time_width = if percentage_mode { 21 } else { 12 };
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{:>40} {:>5} {:>tw$} {:>tw$} {:>tw$} {:>12} {:>8}",
        "Call Name",
        "Count",
        "Cumulative",
        "Own Cumul",
        "Child Cumul",
        "Per Call",
        "Own %",
        tw = time_width
    );
    let _ = writeln!(out, "{}", "=".repeat(40 + 5 + 3 * time_width + 12 + 8 + 6));

    let total = report.session_duration;
    for summary in &report.summaries {
        let _ = writeln!(
            out,
            "{:>40} {:>5} {:>tw$} {:>tw$} {:>tw$} {:>12.6} {:>8}",
            summary.name,
            summary.count,
            time_cell(summary.cumulative, total, percentage_mode),
            time_cell(summary.own, total, percentage_mode),
            time_cell(summary.children, total, percentage_mode),
            summary.per_call().as_secs_f64(),
            own_ratio_cell(summary),
            tw = time_width
        );
    }
    out
}

fn own_ratio_cell(summary: &CallSummary) -> String {
    summary
        .own_ratio()
        .map(|ratio| format!("{:.1}", ratio))
        .unwrap_or_else(|| INFINITE_RATIO.to_string())
}

/// Indented call-tree listing for every context
pub fn render_call_trees(report: &Report) -> String {
    let mut out = String::new();
    for tree in &report.trees {
        render_tree(&mut out, tree);
    }
    out
}

fn render_tree(out: &mut String, tree: &ContextTree) {
    let _ = writeln!(out, "{} (running {:.6})", tree.context, tree.total.as_secs_f64());
    for entry in &tree.entries {
        let _ = writeln!(
            out,
            "{} {} {:.6}",
            ".".repeat(entry.depth * 2),
            entry.name,
            entry.elapsed.as_secs_f64()
        );
    }
    out.push('\n');
}

/// One line of the raw trace stream
pub fn format_trace_line(event: &TraceEvent) -> String {
    match &event.kind {
        EventKind::Call { site } => {
            format!("[{}] call: {}: {}\n", event.context, site.module, site.name)
        }
        EventKind::Return { site } => {
            let line = site
                .line
                .map(|l| l.to_string())
                .unwrap_or_else(|| "?".to_string());
            format!(
                "[{}] return: {}: {}: {}\n",
                event.context, site.module, site.name, line
            )
        }
        EventKind::Suspend => format!("[{}] suspend\n", event.context),
        EventKind::Resume => format!("[{}] resume\n", event.context),
    }
}

/// A call site in the JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonCallSummary {
    pub name: String,
    pub count: u64,
    pub cumulative_secs: f64,
    pub own_secs: f64,
    pub children_secs: f64,
    pub per_call_secs: f64,
    /// Null when cumulative time is zero
    pub own_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub own_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children_pct: Option<f64>,
}

/// A call-tree line in the JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonTreeEntry {
    pub depth: usize,
    pub name: String,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonContextTree {
    pub context: u64,
    pub running_secs: f64,
    pub calls: Vec<JsonTreeEntry>,
}

/// Complete JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub version: String,
    pub session_secs: f64,
    pub calls: Vec<JsonCallSummary>,
    pub contexts: Vec<JsonContextTree>,
}

impl JsonReport {
    pub fn from_report(report: &Report, percentage_mode: bool) -> Self {
        let total = report.session_duration;
        let pct = |value: Duration| percentage_mode.then(|| percent_of(value, total));
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            session_secs: total.as_secs_f64(),
            calls: report
                .summaries
                .iter()
                .map(|s| JsonCallSummary {
                    name: s.name.clone(),
                    count: s.count,
                    cumulative_secs: s.cumulative.as_secs_f64(),
                    own_secs: s.own.as_secs_f64(),
                    children_secs: s.children.as_secs_f64(),
                    per_call_secs: s.per_call().as_secs_f64(),
                    own_ratio: s.own_ratio(),
                    cumulative_pct: pct(s.cumulative),
                    own_pct: pct(s.own),
                    children_pct: pct(s.children),
                })
                .collect(),
            contexts: report
                .trees
                .iter()
                .map(|t| JsonContextTree {
                    context: t.context.0,
                    running_secs: t.total.as_secs_f64(),
                    calls: t
                        .entries
                        .iter()
                        .map(|e| JsonTreeEntry {
                            depth: e.depth,
                            name: e.name.clone(),
                            elapsed_secs: e.elapsed.as_secs_f64(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
