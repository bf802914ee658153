//! Profiler sessions
//!
//! [`Profiler`] owns everything a tracing session needs: configuration,
//! output sinks, the dispatcher with its per-context trees, and the
//! attached/detached state. The host's instrumentation feeds it events
//! through [`Profiler::handle_event`]; while detached, events are dropped
//! after a cheap state check.
//!
//! A session ends on an explicit [`Profiler::detach`], or in-band when an
//! event (or a [`Profiler::poll`]) finds the expiration time has passed.
//! Either way the trees are aggregated, the report is written to the
//! sinks, and all per-context state is discarded.

use nix::sys::signal::Signal;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::aggregate::{build_report, Report};
use crate::call_site::CallSite;
use crate::call_tree::NodeId;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{ProfilerConfig, ReportFormat, SuspendPoint};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::event::{ContextId, TraceEvent};
use crate::output::OutputSink;
use crate::registry::ContextRegistry;
use crate::report::{format_trace_line, render_call_trees, render_stats_table, JsonReport};
use crate::signals;

/// Notifications a cooperative scheduler sends around its yield point
pub trait SchedulerObserver {
    /// `context` is about to give up control
    fn on_suspend(&mut self, context: ContextId) -> Result<()>;
    /// `context` is running again
    fn on_resume(&mut self, context: ContextId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Detached,
    Attached {
        started_at: Duration,
        expires_at: Option<Duration>,
    },
}

/// Call-tree profiler for cooperatively scheduled contexts
#[derive(Debug)]
pub struct Profiler<C: Clock = MonotonicClock> {
    clock: C,
    config: ProfilerConfig,
    dispatcher: Dispatcher,
    state: SessionState,
    stats_output: OutputSink,
    summary_output: OutputSink,
    trace_output: OutputSink,
    armed_signals: Vec<(Signal, Duration)>,
    last_report: Option<Report>,
    session: u64,
}

/// Handle for a frame opened by [`Profiler::on_call`]
///
/// Hosts that can keep per-frame state hand it back through
/// [`Profiler::on_frame_return`]. A token from an earlier session marks a
/// frame this session never saw open; a token that does not close the
/// innermost open frame marks a corrupted stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken {
    session: u64,
    context: ContextId,
    node: NodeId,
}

impl FrameToken {
    pub fn context(&self) -> ContextId {
        self.context
    }
}

impl Profiler<MonotonicClock> {
    pub fn new() -> Self {
        Self::with_config(ProfilerConfig::default())
    }

    pub fn with_config(config: ProfilerConfig) -> Self {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl Default for Profiler<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Profiler<C> {
    /// Profiler reading time from `clock`
    ///
    /// Stats and summary go to stdout; the trace stream is off.
    pub fn with_clock(config: ProfilerConfig, clock: C) -> Self {
        let dispatcher = Dispatcher::new(config.include_blocking_time, config.suspend_point.clone());
        Self {
            clock,
            config,
            dispatcher,
            state: SessionState::Detached,
            stats_output: OutputSink::stdout(),
            summary_output: OutputSink::stdout(),
            trace_output: OutputSink::discard(),
            armed_signals: Vec::new(),
            last_report: None,
            session: 0,
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn set_stats_output(&mut self, sink: OutputSink) {
        self.stats_output = sink;
    }

    pub fn set_summary_output(&mut self, sink: OutputSink) {
        self.summary_output = sink;
    }

    pub fn set_trace_output(&mut self, sink: OutputSink) {
        self.trace_output = sink;
    }

    pub fn enable_percentage_mode(&mut self, enabled: bool) {
        self.config.percentage_mode = enabled;
    }

    pub fn include_blocking_time(&mut self, enabled: bool) {
        self.config.include_blocking_time = enabled;
        self.dispatcher.set_include_blocking_time(enabled);
    }

    pub fn set_suspend_point(&mut self, point: Option<SuspendPoint>) {
        self.config.suspend_point = point.clone();
        self.dispatcher.set_suspend_point(point);
    }

    pub fn set_format(&mut self, format: ReportFormat) {
        self.config.format = format;
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.state, SessionState::Attached { .. })
    }

    /// Clock reading at which the current session ends, if bounded
    pub fn expires_at(&self) -> Option<Duration> {
        match self.state {
            SessionState::Attached { expires_at, .. } => expires_at,
            SessionState::Detached => None,
        }
    }

    /// Trees of the current session
    pub fn registry(&self) -> &ContextRegistry {
        self.dispatcher.registry()
    }

    /// Report produced by the most recent detach
    pub fn last_report(&self) -> Option<&Report> {
        self.last_report.as_ref()
    }

    /// Start a session lasting `duration`; no-op when already attached
    pub fn attach(&mut self, duration: Duration) {
        let now = self.clock.now();
        self.attach_until(now, Some(now + duration));
    }

    /// Start a session lasting the configured attach duration
    pub fn attach_default(&mut self) {
        self.attach(self.config.attach_duration);
    }

    fn attach_until(&mut self, now: Duration, expires_at: Option<Duration>) {
        if self.is_attached() {
            debug!("attach ignored: session already active");
            return;
        }
        self.session += 1;
        debug!(session = self.session, ?expires_at, "attaching profiler");
        self.state = SessionState::Attached {
            started_at: now,
            expires_at,
        };
    }

    /// End the session, write the report and clear all session state
    ///
    /// Returns None without writing anything when no session is active.
    /// Every sink is written and flushed even when an earlier one fails; the
    /// first failure is returned.
    pub fn detach(&mut self) -> Result<Option<Report>> {
        let now = self.clock.now();
        match self.finish(now) {
            Some((report, Ok(()))) => Ok(Some(report)),
            Some((_, Err(err))) => Err(err),
            None => Ok(None),
        }
    }

    /// End an expired session at its expiration time
    ///
    /// Write failures are logged, never handed to the traced program.
    fn expire(&mut self, now: Duration) -> Option<Report> {
        let end = self.expires_at().map_or(now, |expires_at| now.min(expires_at));
        info!("profiling session expired");
        let (report, written) = self.finish(end)?;
        if let Err(err) = written {
            error!(%err, "failed to write report for expired session");
        }
        Some(report)
    }

    fn finish(&mut self, end: Duration) -> Option<(Report, Result<()>)> {
        let SessionState::Attached { started_at, .. } = self.state else {
            return None;
        };
        self.state = SessionState::Detached;

        self.dispatcher.pause_all(end);
        let report = build_report(self.dispatcher.registry(), end.saturating_sub(started_at));
        self.dispatcher.reset();
        debug!(
            session = self.session,
            calls = report.summaries.len(),
            contexts = report.trees.len(),
            "detached profiler"
        );

        self.last_report = Some(report.clone());
        let written = self.emit(&report);
        Some((report, written))
    }

    fn emit(&mut self, report: &Report) -> Result<()> {
        let mut results = vec![self.trace_output.flush()];
        match self.config.format {
            ReportFormat::Text => {
                let table = render_stats_table(report, self.config.percentage_mode);
                results.push(self.stats_output.write_str(&table));
                results.push(self.summary_output.write_str(&render_call_trees(report)));
            }
            ReportFormat::Json => {
                let json = JsonReport::from_report(report, self.config.percentage_mode).to_json();
                results.push(match json {
                    Ok(json) => self.stats_output.write_str(&format!("{}\n", json)),
                    Err(err) => Err(err.into()),
                });
            }
        }
        results.push(self.stats_output.flush());
        results.push(self.summary_output.flush());
        results.into_iter().collect::<std::io::Result<()>>()?;
        Ok(())
    }

    /// Feed one event from the host runtime
    ///
    /// A corrupted call stack abandons the session without a report and is
    /// returned to the caller, which must stop feeding this stream.
    pub fn handle_event(&mut self, event: &TraceEvent) -> Result<()> {
        self.record(event).map(|_| ())
    }

    /// Report a call; the token is None when no session recorded it
    pub fn on_call(&mut self, context: ContextId, site: CallSite) -> Result<Option<FrameToken>> {
        let node = self.record(&TraceEvent::call(context, site))?;
        Ok(node.map(|node| FrameToken {
            session: self.session,
            context,
            node,
        }))
    }

    /// Report a return from the innermost open frame of `context`
    pub fn on_return(&mut self, context: ContextId, site: CallSite) -> Result<()> {
        self.handle_event(&TraceEvent::ret(context, site))
    }

    /// Report a return from the frame `token` was issued for
    pub fn on_frame_return(&mut self, token: FrameToken, site: CallSite) -> Result<()> {
        let Some(now) = self.admit() else {
            return Ok(());
        };
        if token.session != self.session {
            debug!(context = %token.context, call_site = %site, "return from a frame of an earlier session");
            return Ok(());
        }

        if self.trace_output.is_enabled() {
            self.write_trace(&TraceEvent::ret(token.context, site.clone()))?;
        }
        let result = self
            .dispatcher
            .return_frame(token.context, &site, token.node, now);
        self.guard(result)
    }

    fn record(&mut self, event: &TraceEvent) -> Result<Option<NodeId>> {
        let Some(now) = self.admit() else {
            return Ok(None);
        };
        self.write_trace(event)?;
        let result = self.dispatcher.dispatch(event, now);
        self.guard(result)
    }

    /// Clock reading for an incoming event, or None if it is dropped
    fn admit(&mut self) -> Option<Duration> {
        if self.is_attached() {
            let now = self.clock.now();
            if self.is_expired(now) {
                self.expire(now);
            }
        }
        self.poll_signals();
        self.is_attached().then(|| self.clock.now())
    }

    fn write_trace(&mut self, event: &TraceEvent) -> Result<()> {
        if self.trace_output.is_enabled() {
            self.trace_output.write_str(&format_trace_line(event))?;
        }
        Ok(())
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.abandon();
            }
        }
        result
    }

    /// Check expiration and armed signals without an event
    ///
    /// Returns the report if this poll ended the session.
    pub fn poll(&mut self) -> Option<Report> {
        let now = self.clock.now();
        let report = if self.is_expired(now) {
            self.expire(now)
        } else {
            None
        };
        self.poll_signals();
        report
    }

    fn is_expired(&self, now: Duration) -> bool {
        self.expires_at().is_some_and(|expires_at| now >= expires_at)
    }

    fn abandon(&mut self) {
        error!("call stack corrupted, discarding profiling session");
        self.dispatcher.reset();
        self.state = SessionState::Detached;
    }

    /// Attach for `duration` every time `signal` is delivered
    pub fn attach_on_signal(&mut self, signal: Signal, duration: Duration) -> Result<()> {
        signals::install(signal)?;
        self.armed_signals.retain(|(armed, _)| *armed != signal);
        self.armed_signals.push((signal, duration));
        self.config.attach_duration = duration;
        Ok(())
    }

    fn poll_signals(&mut self) {
        for i in 0..self.armed_signals.len() {
            let (signal, duration) = self.armed_signals[i];
            if signals::take_pending(signal) {
                info!(?signal, "attach signal received");
                self.attach(duration);
            }
        }
    }

    /// Run `f` inside a session and detach afterwards, even if `f` panics
    ///
    /// The session has no expiration. A panic is re-raised after the report
    /// has been written; errors returned by `f` are handed back untouched.
    pub fn profile<F, R>(&mut self, f: F) -> Result<(R, Option<Report>)>
    where
        F: FnOnce(&mut Self) -> R,
    {
        let now = self.clock.now();
        self.attach_until(now, None);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *self)));
        let report = self.detach();
        match outcome {
            Ok(value) => Ok((value, report?)),
            Err(payload) => {
                if let Err(err) = report {
                    error!(%err, "failed to write report for panicked profile run");
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

impl<C: Clock> SchedulerObserver for Profiler<C> {
    fn on_suspend(&mut self, context: ContextId) -> Result<()> {
        self.handle_event(&TraceEvent::suspend(context))
    }

    fn on_resume(&mut self, context: ContextId) -> Result<()> {
        self.handle_event(&TraceEvent::resume(context))
    }
}
