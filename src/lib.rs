//! coprof - call-tree profiler for cooperatively scheduled execution contexts
//!
//! This library consumes the call/return event stream of a host runtime in
//! which many lightweight contexts (coroutines, green threads) share one
//! scheduler. It rebuilds a call tree per context, times every activation
//! without double-counting across context switches, optionally excludes
//! time spent suspended in the scheduler, and reports cumulative, own and
//! child time per call site.

pub mod aggregate;
pub mod call_site;
pub mod call_tree;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod output;
pub mod profiler;
pub mod registry;
pub mod replay;
pub mod report;
pub mod signals;

pub use error::{ProfilerError, Result};
pub use profiler::{FrameToken, Profiler, SchedulerObserver};
