//! Aggregation of call trees into per-call-site summaries
//!
//! Every activation is folded into the summary of its call site. A node's
//! own time is its elapsed time minus the elapsed time of its direct
//! children; the children's time is attributed to them, never to the
//! parent.

use fnv::FnvHashMap;
use std::time::Duration;

use crate::call_tree::CallTree;
use crate::event::ContextId;
use crate::registry::ContextRegistry;

/// Aggregate for one call site across all activations and contexts
#[derive(Debug, Clone, PartialEq)]
pub struct CallSummary {
    /// `module.callable`
    pub name: String,
    pub count: u64,
    pub cumulative: Duration,
    pub own: Duration,
    pub children: Duration,
}

impl CallSummary {
    fn new(name: String) -> Self {
        Self {
            name,
            count: 0,
            cumulative: Duration::ZERO,
            own: Duration::ZERO,
            children: Duration::ZERO,
        }
    }

    /// Average cumulative time per activation
    pub fn per_call(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.cumulative / count,
            Err(_) => Duration::from_secs_f64(self.cumulative.as_secs_f64() / self.count as f64),
        }
    }

    /// Own time as a percentage of cumulative time
    ///
    /// None when cumulative time is exactly zero; rendered as `inf`.
    pub fn own_ratio(&self) -> Option<f64> {
        if self.cumulative.is_zero() {
            None
        } else {
            Some(self.own.as_secs_f64() / self.cumulative.as_secs_f64() * 100.0)
        }
    }
}

/// One line of a context's call-tree dump
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    /// Nesting level; top-level calls are 0
    pub depth: usize,
    pub name: String,
    pub elapsed: Duration,
}

/// Call-tree dump of one context, in call order
#[derive(Debug, Clone, PartialEq)]
pub struct ContextTree {
    pub context: ContextId,
    /// Time the context itself was running
    pub total: Duration,
    pub entries: Vec<TreeEntry>,
}

/// Everything a session produced
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Wall time from attach to detach
    pub session_duration: Duration,
    /// Sorted by cumulative time, descending
    pub summaries: Vec<CallSummary>,
    pub trees: Vec<ContextTree>,
}

impl Report {
    pub fn summary(&self, name: &str) -> Option<&CallSummary> {
        self.summaries.iter().find(|s| s.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty() && self.trees.is_empty()
    }
}

/// Fold one tree into `summaries`, returning the time of its top-level calls
pub fn fold_tree(tree: &CallTree, summaries: &mut FnvHashMap<String, CallSummary>) -> Duration {
    let nodes = tree.nodes();

    let mut child_time = vec![Duration::ZERO; nodes.len()];
    for node in nodes.iter().skip(1) {
        if let Some(parent) = node.parent {
            child_time[parent.index()] += node.elapsed;
        }
    }

    for (node, children) in nodes.iter().zip(&child_time).skip(1) {
        let Some(site) = node.site.as_ref() else {
            continue;
        };
        let key = site.key();
        let summary = summaries
            .entry(key.clone())
            .or_insert_with(|| CallSummary::new(key));
        let own = node.elapsed.saturating_sub(*children);
        summary.count += 1;
        summary.cumulative += node.elapsed;
        summary.own += own;
        summary.children += node.elapsed - own;
    }

    child_time[tree.root().index()]
}

/// Summaries for every context, sorted by cumulative time descending
pub fn summarize(registry: &ContextRegistry) -> Vec<CallSummary> {
    let mut summaries = FnvHashMap::default();
    for (_, tree) in registry.iter() {
        fold_tree(tree, &mut summaries);
    }

    let mut sorted: Vec<CallSummary> = summaries.into_values().collect();
    sorted.sort_by(|a, b| {
        b.cumulative
            .cmp(&a.cumulative)
            .then_with(|| a.name.cmp(&b.name))
    });
    sorted
}

/// Flatten a context's tree into indented entries
pub fn dump_tree(context: ContextId, tree: &CallTree) -> ContextTree {
    let entries = tree
        .walk()
        .into_iter()
        .skip(1)
        .map(|(id, depth)| {
            let node = tree.node(id);
            TreeEntry {
                depth: depth - 1,
                name: node.name(),
                elapsed: node.elapsed,
            }
        })
        .collect();
    ContextTree {
        context,
        total: tree.node(tree.root()).elapsed,
        entries,
    }
}

/// Aggregate a session; contexts that never made a call get no tree
pub fn build_report(registry: &ContextRegistry, session_duration: Duration) -> Report {
    Report {
        session_duration,
        summaries: summarize(registry),
        trees: registry
            .iter()
            .filter(|(_, tree)| !tree.is_empty())
            .map(|(context, tree)| dump_tree(context, tree))
            .collect(),
    }
}
