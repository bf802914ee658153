//! Per-context call trees
//!
//! Nodes live in an arena and refer to each other by index. A child is
//! always pushed after its parent, so every node's index is greater than
//! its parent's; the aggregator relies on this to fold a tree bottom-up
//! with a single reverse scan.
//!
//! The tree also carries the timing walks. A context's open frames are the
//! chain from the cursor up to the root: pausing or resuming the context
//! pauses or resumes every frame on that chain, because while the context
//! is not running none of its open frames make progress.

use std::time::Duration;

use crate::call_site::CallSite;

/// Index of a node within its [`CallTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }

    /// Every tree's root sits at index 0
    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

const ROOT: NodeId = NodeId(0);

/// One activation of a callable
#[derive(Debug, Clone)]
pub struct CallNode {
    /// None only for the synthetic root
    pub site: Option<CallSite>,
    /// Accrued active time
    pub elapsed: Duration,
    /// When accrual last resumed; None while paused
    resumed_at: Option<Duration>,
    /// Children in call order
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    /// Entered through the scheduler's suspend point
    pub(crate) suspends: bool,
}

impl CallNode {
    fn new(site: Option<CallSite>, parent: Option<NodeId>, resumed_at: Option<Duration>) -> Self {
        Self {
            site,
            elapsed: Duration::ZERO,
            resumed_at,
            children: Vec::new(),
            parent,
            suspends: false,
        }
    }

    pub fn is_timing(&self) -> bool {
        self.resumed_at.is_some()
    }

    /// Display name; the root is labelled `<root>`
    pub fn name(&self) -> String {
        self.site
            .as_ref()
            .map(CallSite::key)
            .unwrap_or_else(|| "<root>".to_string())
    }

    fn pause(&mut self, now: Duration) {
        if let Some(resumed) = self.resumed_at.take() {
            self.elapsed += now.saturating_sub(resumed);
        }
    }

    fn resume(&mut self, now: Duration) {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(now);
        }
    }
}

/// Call tree of one execution context, with its cursor
#[derive(Debug, Clone)]
pub struct CallTree {
    nodes: Vec<CallNode>,
    current: NodeId,
}

impl CallTree {
    /// A tree holding only a paused root
    pub fn new() -> Self {
        Self {
            nodes: vec![CallNode::new(None, None, None)],
            current: ROOT,
        }
    }

    pub fn root(&self) -> NodeId {
        ROOT
    }

    /// The innermost open frame
    pub fn current(&self) -> NodeId {
        self.current
    }

    pub fn node(&self, id: NodeId) -> &CallNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[CallNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Number of open frames below the root
    pub fn depth(&self) -> usize {
        self.ancestors(self.current).count() - 1
    }

    /// Open a child of the cursor and move the cursor onto it
    ///
    /// The child only starts timing if its parent is timing, so a call made
    /// while the context is paused never accrues more than its parent.
    pub fn push_call(&mut self, site: CallSite, now: Duration) -> NodeId {
        let parent = self.current;
        let resumed_at = self.nodes[parent.0].is_timing().then_some(now);
        let id = NodeId(self.nodes.len());
        self.nodes.push(CallNode::new(Some(site), Some(parent), resumed_at));
        self.nodes[parent.0].children.push(id);
        self.current = id;
        id
    }

    pub(crate) fn mark_suspending(&mut self, id: NodeId) {
        self.nodes[id.0].suspends = true;
    }

    /// Close the cursor frame, accruing its running interval
    ///
    /// Returns None without touching the tree when the cursor is the root:
    /// there is no open call to return from.
    pub fn pop_return(&mut self, now: Duration) -> Option<NodeId> {
        let closed = self.current;
        let parent = self.nodes[closed.0].parent?;
        self.nodes[closed.0].pause(now);
        self.current = parent;
        Some(closed)
    }

    /// Pause accrual on the cursor frame and all its ancestors
    pub fn stop_timing(&mut self, now: Duration) {
        let mut next = Some(self.current);
        while let Some(id) = next {
            let node = &mut self.nodes[id.0];
            node.pause(now);
            next = node.parent;
        }
    }

    /// Resume accrual on the cursor frame and all its ancestors
    ///
    /// Frames already timing keep their original resume timestamp.
    pub fn start_timing(&mut self, now: Duration) {
        let mut next = Some(self.current);
        while let Some(id) = next {
            let node = &mut self.nodes[id.0];
            node.resume(now);
            next = node.parent;
        }
    }

    /// Whether the cursor frame is accruing time
    pub fn is_timing(&self) -> bool {
        self.nodes[self.current.0].is_timing()
    }

    /// Iterate from `id` up to and including the root
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |id| self.nodes[id.0].parent)
    }

    /// Depth-first pre-order walk, yielding each node with its depth
    pub fn walk(&self) -> Vec<(NodeId, usize)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root(), 0usize)];
        while let Some((id, depth)) = stack.pop() {
            out.push((id, depth));
            for child in self.nodes[id.0].children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        out
    }
}

impl Default for CallTree {
    fn default() -> Self {
        Self::new()
    }
}
