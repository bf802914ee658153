//! Trace event dispatcher
//!
//! Turns the host's event stream into per-context call trees. Exactly one
//! context runs at a time, so an event from a context other than the one
//! that produced the previous event means the scheduler switched: the
//! previous context's open frames are paused and the new context's frames
//! resume. Suspension at the scheduler's yield point pauses a context early
//! unless blocking time is being counted.

use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::call_site::CallSite;
use crate::call_tree::{CallTree, NodeId};
use crate::config::SuspendPoint;
use crate::error::{ProfilerError, Result};
use crate::event::{ContextId, EventKind, TraceEvent};
use crate::registry::ContextRegistry;

#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: ContextRegistry,
    active: Option<ContextId>,
    include_blocking_time: bool,
    suspend_point: Option<SuspendPoint>,
}

impl Dispatcher {
    pub fn new(include_blocking_time: bool, suspend_point: Option<SuspendPoint>) -> Self {
        Self {
            registry: ContextRegistry::new(),
            active: None,
            include_blocking_time,
            suspend_point,
        }
    }

    pub fn set_include_blocking_time(&mut self, enabled: bool) {
        self.include_blocking_time = enabled;
    }

    pub fn set_suspend_point(&mut self, point: Option<SuspendPoint>) {
        self.suspend_point = point;
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    /// Context that produced the most recent event
    pub fn active_context(&self) -> Option<ContextId> {
        self.active
    }

    /// Apply one event at time `now`
    ///
    /// Returns the node opened by a call event. A return arriving while the
    /// context has no open frame closes a frame that was already open when
    /// the session began; it is dropped.
    pub fn dispatch(&mut self, event: &TraceEvent, now: Duration) -> Result<Option<NodeId>> {
        let context = event.context;
        self.enter(context, now);

        match &event.kind {
            EventKind::Call { site } => Ok(Some(self.on_call(context, site, now))),
            EventKind::Return { site } => {
                self.on_return(context, site, now);
                Ok(None)
            }
            EventKind::Suspend => {
                if !self.include_blocking_time {
                    self.stop_timing(context, now);
                }
                Ok(None)
            }
            EventKind::Resume => {
                if !self.include_blocking_time {
                    self.start_timing(context, now);
                }
                Ok(None)
            }
        }
    }

    /// Close `node`, a frame this session opened on `context`
    ///
    /// `node` must be the context's innermost open frame; anything else
    /// means the host's call stack and the tree disagree.
    pub fn return_frame(
        &mut self,
        context: ContextId,
        site: &CallSite,
        node: NodeId,
        now: Duration,
    ) -> Result<()> {
        self.enter(context, now);
        let innermost = self
            .registry
            .get(context)
            .map(CallTree::current)
            .filter(|current| !current.is_root());
        if innermost != Some(node) {
            error!(%context, call_site = %site, "return does not close the innermost open call");
            return Err(ProfilerError::CorruptedStack {
                context,
                call_site: site.clone(),
            });
        }
        self.close_frame(context, site, now);
        Ok(())
    }

    fn enter(&mut self, context: ContextId, now: Duration) {
        let (_, created) = self.registry.get_or_create(context);
        if created {
            debug!(%context, "new execution context");
        }
        self.switch_to(context, now);
    }

    fn switch_to(&mut self, context: ContextId, now: Duration) {
        if self.active == Some(context) {
            return;
        }
        if let Some(previous) = self.active {
            trace!(from = %previous, to = %context, "context switch");
            self.stop_timing(previous, now);
        }
        self.active = Some(context);
        self.start_timing(context, now);
    }

    fn on_call(&mut self, context: ContextId, site: &CallSite, now: Duration) -> NodeId {
        let suspends = self
            .suspend_point
            .as_ref()
            .is_some_and(|point| point.matches(site));
        let include_blocking_time = self.include_blocking_time;
        let (tree, _) = self.registry.get_or_create(context);
        let node = tree.push_call(site.clone(), now);
        if suspends {
            tree.mark_suspending(node);
            if !include_blocking_time {
                tree.stop_timing(now);
            }
        }
        node
    }

    fn on_return(&mut self, context: ContextId, site: &CallSite, now: Duration) {
        let at_root = self
            .registry
            .get(context)
            .map_or(true, |tree| tree.current().is_root());
        if at_root {
            debug!(%context, call_site = %site, "return from a frame opened before the session");
            return;
        }
        self.close_frame(context, site, now);
    }

    fn close_frame(&mut self, context: ContextId, site: &CallSite, now: Duration) {
        let include_blocking_time = self.include_blocking_time;
        let Some(tree) = self.registry.get_mut(context) else {
            return;
        };
        let Some(closed) = tree.pop_return(now) else {
            return;
        };

        let node = tree.node(closed);
        if let Some(open) = node.site.as_ref().filter(|open| open.key() != site.key()) {
            warn!(%context, expected = %open, got = %site, "return does not match the open call");
        }
        if node.suspends && !include_blocking_time {
            tree.start_timing(now);
        }
    }

    /// Pause accrual on a context's open frames
    ///
    /// No-op for contexts without state, e.g. after re-attaching mid-run.
    pub fn stop_timing(&mut self, context: ContextId, now: Duration) {
        if let Some(tree) = self.registry.get_mut(context) {
            tree.stop_timing(now);
        }
    }

    /// Resume accrual on a context's open frames
    pub fn start_timing(&mut self, context: ContextId, now: Duration) {
        if let Some(tree) = self.registry.get_mut(context) {
            tree.start_timing(now);
        }
    }

    /// Pause every context so open frames carry their time up to `now`
    pub fn pause_all(&mut self, now: Duration) {
        for (_, tree) in self.registry.iter_mut() {
            tree.stop_timing(now);
        }
    }

    /// Drop all trees and forget the active context
    pub fn reset(&mut self) {
        self.registry.clear();
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ContextId = ContextId(1);
    const B: ContextId = ContextId(2);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn site(name: &str) -> CallSite {
        CallSite::new("app", name)
    }

    fn hub_switch() -> CallSite {
        CallSite::new("hub", "switch")
    }

    fn elapsed_of(d: &Dispatcher, context: ContextId, name: &str) -> Duration {
        let tree = d.registry().get(context).unwrap();
        tree.nodes()
            .iter()
            .filter(|n| n.site.as_ref().is_some_and(|s| s.name == name))
            .map(|n| n.elapsed)
            .sum()
    }

    #[test]
    fn test_call_creates_context_and_node() {
        let mut d = Dispatcher::default();
        d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap();

        let tree = d.registry().get(A).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.depth(), 1);
        assert_eq!(d.active_context(), Some(A));
    }

    #[test]
    fn test_nested_calls_accrue_time() {
        let mut d = Dispatcher::default();
        d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap();
        d.dispatch(&TraceEvent::call(A, site("g")), ms(20)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("g")), ms(70)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("f")), ms(70)).unwrap();

        assert_eq!(elapsed_of(&d, A, "g"), ms(50));
        assert_eq!(elapsed_of(&d, A, "f"), ms(70));
    }

    #[test]
    fn test_return_past_root_is_dropped() {
        let mut d = Dispatcher::default();
        d.dispatch(&TraceEvent::ret(A, site("serve")), ms(0)).unwrap();
        d.dispatch(&TraceEvent::call(A, site("handle")), ms(5)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("handle")), ms(15)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("serve")), ms(20)).unwrap();

        let tree = d.registry().get(A).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.current(), tree.root());
        assert_eq!(elapsed_of(&d, A, "handle"), ms(10));
    }

    #[test]
    fn test_return_frame_closes_innermost() {
        let mut d = Dispatcher::default();
        let f = d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap().unwrap();
        let g = d.dispatch(&TraceEvent::call(A, site("g")), ms(5)).unwrap().unwrap();
        d.return_frame(A, &site("g"), g, ms(10)).unwrap();
        d.return_frame(A, &site("f"), f, ms(12)).unwrap();

        assert_eq!(d.registry().get(A).unwrap().depth(), 0);
        assert_eq!(elapsed_of(&d, A, "f"), ms(12));
    }

    #[test]
    fn test_return_frame_out_of_order_is_fatal() {
        let mut d = Dispatcher::default();
        let f = d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap().unwrap();
        d.dispatch(&TraceEvent::call(A, site("g")), ms(5)).unwrap();

        let err = d.return_frame(A, &site("f"), f, ms(10)).unwrap_err();
        assert!(err.is_fatal());
        match err {
            ProfilerError::CorruptedStack { context, call_site } => {
                assert_eq!(context, A);
                assert_eq!(call_site, site("f"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_return_frame_on_empty_context_is_fatal() {
        let mut d = Dispatcher::default();
        let f = d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap().unwrap();
        let err = d.return_frame(B, &site("f"), f, ms(1)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_context_switch_pauses_previous_context() {
        let mut d = Dispatcher::default();
        d.dispatch(&TraceEvent::call(A, site("fa")), ms(0)).unwrap();
        d.dispatch(&TraceEvent::call(B, site("fb")), ms(10)).unwrap();
        d.dispatch(&TraceEvent::ret(B, site("fb")), ms(40)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("fa")), ms(45)).unwrap();

        assert_eq!(elapsed_of(&d, A, "fa"), ms(10));
        assert_eq!(elapsed_of(&d, B, "fb"), ms(30));
    }

    #[test]
    fn test_suspend_point_excludes_blocking_time() {
        let mut d = Dispatcher::new(false, Some(SuspendPoint::new("hub", "switch")));
        d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap();
        d.dispatch(&TraceEvent::call(A, hub_switch()), ms(5)).unwrap();
        d.dispatch(&TraceEvent::ret(A, hub_switch()), ms(105)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("f")), ms(110)).unwrap();

        assert_eq!(elapsed_of(&d, A, "switch"), Duration::ZERO);
        assert_eq!(elapsed_of(&d, A, "f"), ms(10));
    }

    #[test]
    fn test_suspend_point_with_blocking_time_included() {
        let mut d = Dispatcher::new(true, Some(SuspendPoint::new("hub", "switch")));
        d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap();
        d.dispatch(&TraceEvent::call(A, hub_switch()), ms(5)).unwrap();
        d.dispatch(&TraceEvent::ret(A, hub_switch()), ms(105)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("f")), ms(110)).unwrap();

        assert_eq!(elapsed_of(&d, A, "switch"), ms(100));
        assert_eq!(elapsed_of(&d, A, "f"), ms(110));
    }

    #[test]
    fn test_explicit_suspend_and_resume() {
        let mut d = Dispatcher::default();
        d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap();
        d.dispatch(&TraceEvent::suspend(A), ms(10)).unwrap();
        d.dispatch(&TraceEvent::resume(A), ms(500)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("f")), ms(520)).unwrap();

        assert_eq!(elapsed_of(&d, A, "f"), ms(30));
    }

    #[test]
    fn test_suspend_ignored_when_blocking_time_included() {
        let mut d = Dispatcher::new(true, None);
        d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap();
        d.dispatch(&TraceEvent::suspend(A), ms(10)).unwrap();
        d.dispatch(&TraceEvent::resume(A), ms(500)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("f")), ms(520)).unwrap();

        assert_eq!(elapsed_of(&d, A, "f"), ms(520));
    }

    #[test]
    fn test_calls_while_suspended_do_not_accrue() {
        let mut d = Dispatcher::default();
        d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap();
        d.dispatch(&TraceEvent::suspend(A), ms(10)).unwrap();
        d.dispatch(&TraceEvent::call(A, site("g")), ms(10)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("g")), ms(60)).unwrap();
        d.dispatch(&TraceEvent::resume(A), ms(60)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("f")), ms(70)).unwrap();

        assert_eq!(elapsed_of(&d, A, "g"), Duration::ZERO);
        assert_eq!(elapsed_of(&d, A, "f"), ms(20));
    }

    #[test]
    fn test_mismatched_return_still_pops() {
        let mut d = Dispatcher::default();
        d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap();
        d.dispatch(&TraceEvent::ret(A, site("other")), ms(5)).unwrap();
        assert_eq!(d.registry().get(A).unwrap().depth(), 0);
    }

    #[test]
    fn test_pause_all_settles_open_frames() {
        let mut d = Dispatcher::default();
        d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap();
        d.pause_all(ms(25));
        assert_eq!(elapsed_of(&d, A, "f"), ms(25));
    }

    #[test]
    fn test_timing_calls_without_state_are_noops() {
        let mut d = Dispatcher::default();
        d.stop_timing(A, ms(1));
        d.start_timing(A, ms(2));
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut d = Dispatcher::default();
        d.dispatch(&TraceEvent::call(A, site("f")), ms(0)).unwrap();
        d.reset();
        assert!(d.registry().is_empty());
        assert_eq!(d.active_context(), None);
    }
}
