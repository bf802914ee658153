//! Events consumed by the profiler
//!
//! The host runtime's instrumentation turns every function entry and exit
//! into a [`TraceEvent`]. Scheduler integrations additionally report when
//! a context is about to yield and when it runs again.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::call_site::CallSite;

/// Opaque identity of a cooperatively scheduled execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// What happened on a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// A callable was entered
    Call { site: CallSite },
    /// The innermost open callable returned
    Return { site: CallSite },
    /// The context is about to yield to the scheduler
    Suspend,
    /// The context was scheduled again
    Resume,
}

/// One event from the host runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub context: ContextId,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl TraceEvent {
    pub fn call(context: ContextId, site: CallSite) -> Self {
        Self {
            context,
            kind: EventKind::Call { site },
        }
    }

    pub fn ret(context: ContextId, site: CallSite) -> Self {
        Self {
            context,
            kind: EventKind::Return { site },
        }
    }

    pub fn suspend(context: ContextId) -> Self {
        Self {
            context,
            kind: EventKind::Suspend,
        }
    }

    pub fn resume(context: ContextId) -> Self {
        Self {
            context,
            kind: EventKind::Resume,
        }
    }
}
