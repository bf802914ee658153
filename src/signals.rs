//! Signal-armed attach
//!
//! A signal handler may not allocate, lock or touch the profiler, so the
//! handler only sets the signal's bit in a process-wide pending mask. The
//! profiler drains the mask on every event and on explicit polls, and
//! attaches when an armed signal is pending.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ffi::c_int;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::Result;

static PENDING: AtomicU64 = AtomicU64::new(0);

fn bit(signal: Signal) -> u64 {
    1u64 << ((signal as c_int as u32) % 64)
}

extern "C" fn record_signal(signum: c_int) {
    if let Ok(signal) = Signal::try_from(signum) {
        PENDING.fetch_or(bit(signal), Ordering::SeqCst);
    }
}

/// Route `signal` to the pending mask
pub fn install(signal: Signal) -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(record_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only performs an atomic fetch_or, which is
    // async-signal-safe.
    unsafe { signal::sigaction(signal, &action) }?;
    debug!(?signal, "signal handler installed");
    Ok(())
}

/// Restore the default disposition of `signal`
pub fn uninstall(signal: Signal) -> Result<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: restoring the default disposition installs no Rust code.
    unsafe { signal::sigaction(signal, &action) }?;
    PENDING.fetch_and(!bit(signal), Ordering::SeqCst);
    Ok(())
}

/// Clear and report whether `signal` arrived since the last call
pub fn take_pending(signal: Signal) -> bool {
    let mask = bit(signal);
    PENDING.fetch_and(!mask, Ordering::SeqCst) & mask != 0
}
