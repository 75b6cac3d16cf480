//! Signal dispositions and the cooperative interrupt token.
//!
//! SIGPIPE is ignored so a closed pager pipe does not kill the process.
//! SIGINT sets an interrupt token that the command loop and the checker
//! poll at command and rule boundaries. The remaining fatal signals
//! release all held mailbox locks, restore the default disposition, and
//! re-raise.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::source::lock;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Signals that terminate the process after releasing held locks.
const FATAL_SIGNALS: [Signal; 7] = [
    Signal::SIGHUP,
    Signal::SIGQUIT,
    Signal::SIGILL,
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGSEGV,
    Signal::SIGTERM,
];

extern "C" fn on_interrupt(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_fatal(sig: libc::c_int) {
    lock::release_all_on_signal();
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}

/// Install all dispositions. Call once, early in `main`.
pub fn install() {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let interrupt = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let fatal = SigAction::new(
        SigHandler::Handler(on_fatal),
        SaFlags::empty(),
        SigSet::empty(),
    );

    unsafe {
        let _ = sigaction(Signal::SIGPIPE, &ignore);
        let _ = sigaction(Signal::SIGINT, &interrupt);
        for sig in FATAL_SIGNALS {
            let _ = sigaction(sig, &fatal);
        }
    }
}

/// True once SIGINT has been received; clears the token.
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

/// Peek at the token without clearing it.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
