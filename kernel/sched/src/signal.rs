//! Per-process signal state.
//!
//! Grounded on `original_source/src/include/core/proc.h`'s `PROC_SIG_*`
//! numbering and `signal_handler_t`: a fixed 32-signal namespace, three
//! 64-bit masks (pending/blocked/caught) and a handler table. `SIGKILL`
//! and `SIGSTOP` reject [`SignalState::set_handler`] exactly as the source
//! refuses to let those two be replaced.

/// Number of distinct signal numbers (`PROC_NSIG`).
pub const NSIG: u32 = 32;

/// Hangup detected on controlling terminal.
pub const SIGHUP: u32 = 1;
/// Interrupt from keyboard.
pub const SIGINT: u32 = 2;
/// Quit from keyboard.
pub const SIGQUIT: u32 = 3;
/// Illegal instruction.
pub const SIGILL: u32 = 4;
/// Trace/breakpoint trap.
pub const SIGTRAP: u32 = 5;
/// Abort signal.
pub const SIGABRT: u32 = 6;
/// Bus error.
pub const SIGBUS: u32 = 7;
/// Floating-point exception.
pub const SIGFPE: u32 = 8;
/// Kill signal. Cannot be caught, blocked, or ignored.
pub const SIGKILL: u32 = 9;
/// User-defined signal 1.
pub const SIGUSR1: u32 = 10;
/// Segmentation fault.
pub const SIGSEGV: u32 = 11;
/// User-defined signal 2.
pub const SIGUSR2: u32 = 12;
/// Broken pipe.
pub const SIGPIPE: u32 = 13;
/// Timer signal.
pub const SIGALRM: u32 = 14;
/// Termination signal.
pub const SIGTERM: u32 = 15;
/// Child stopped or terminated.
pub const SIGCHLD: u32 = 17;
/// Continue if stopped.
pub const SIGCONT: u32 = 18;
/// Stop process. Cannot be caught, blocked, or ignored.
pub const SIGSTOP: u32 = 19;

fn bit(sig: u32) -> u64 {
    debug_assert!(sig >= 1 && sig < NSIG, "signal number out of range: {sig}");
    1u64 << sig
}

/// What happens when a signal is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Run the process's default action (usually termination).
    Default,
    /// Drop the signal silently.
    Ignore,
    /// Invoke a user-installed handler, identified by an opaque address
    /// the architecture-specific trap-return path interprets.
    Handler(u64),
}

/// Signals whose default action is to be ignored rather than terminate the
/// process, matching the source's implicit treatment of `SIGCHLD`.
fn default_is_ignored(sig: u32) -> bool {
    sig == SIGCHLD || sig == SIGCONT
}

/// One process's signal-handling state: 32 dispositions plus the
/// pending/blocked/caught bitmasks.
#[derive(Debug, Clone)]
pub struct SignalState {
    handlers: [Disposition; NSIG as usize],
    pending: u64,
    blocked: u64,
    caught: u64,
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalState {
    /// Creates signal state with every signal at its default disposition
    /// and nothing pending, blocked, or caught.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handlers: [Disposition::Default; NSIG as usize],
            pending: 0,
            blocked: 0,
            caught: 0,
        }
    }

    /// Installs `disposition` for `sig`.
    ///
    /// # Errors
    /// Returns `Err(())` for `SIGKILL`/`SIGSTOP`, which can never have
    /// their handler replaced.
    pub fn set_handler(&mut self, sig: u32, disposition: Disposition) -> Result<(), ()> {
        if sig == SIGKILL || sig == SIGSTOP {
            return Err(());
        }
        self.handlers[sig as usize] = disposition;
        if matches!(disposition, Disposition::Handler(_)) {
            self.caught |= bit(sig);
        } else {
            self.caught &= !bit(sig);
        }
        Ok(())
    }

    /// The disposition currently installed for `sig`.
    #[must_use]
    pub fn handler(&self, sig: u32) -> Disposition {
        self.handlers[sig as usize]
    }

    /// Marks `sig` pending. Returns `true` if the signal was not already
    /// pending (used by the caller to decide whether to wake a sleeper).
    pub fn raise(&mut self, sig: u32) -> bool {
        let was_pending = self.pending & bit(sig) != 0;
        self.pending |= bit(sig);
        !was_pending
    }

    /// Sets which signals are blocked from delivery.
    pub fn set_blocked(&mut self, mask: u64) {
        self.blocked = mask;
    }

    /// Adds `sig` to the blocked set.
    pub fn block(&mut self, sig: u32) {
        self.blocked |= bit(sig);
    }

    /// Removes `sig` from the blocked set.
    pub fn unblock(&mut self, sig: u32) {
        self.blocked &= !bit(sig);
    }

    /// `true` if any unblocked signal is pending.
    #[must_use]
    pub fn has_deliverable(&self) -> bool {
        self.pending & !self.blocked != 0
    }

    /// Takes the lowest-numbered pending-and-unblocked signal, clearing its
    /// pending bit and returning it with its current disposition. Signals
    /// whose default action is to be ignored (`SIGCHLD`, `SIGCONT`) are
    /// drained without ever being returned, matching the source's treatment
    /// of "ignore for default-ignored signals".
    pub fn take_deliverable(&mut self) -> Option<(u32, Disposition)> {
        loop {
            let ready = self.pending & !self.blocked;
            if ready == 0 {
                return None;
            }
            let sig = ready.trailing_zeros();
            self.pending &= !bit(sig);
            let disposition = self.handlers[sig as usize];
            if disposition == Disposition::Default && default_is_ignored(sig) {
                continue;
            }
            return Some((sig, disposition));
        }
    }

    /// Raw pending mask, for `proc_dump_signals`-style introspection.
    #[must_use]
    pub const fn pending_mask(&self) -> u64 {
        self.pending
    }

    /// Raw blocked mask.
    #[must_use]
    pub const fn blocked_mask(&self) -> u64 {
        self.blocked
    }

    /// Raw caught mask (signals with a user handler installed).
    #[must_use]
    pub const fn caught_mask(&self) -> u64 {
        self.caught
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_nothing_pending() {
        let st = SignalState::new();
        assert!(!st.has_deliverable());
    }

    #[test]
    fn sigkill_and_sigstop_reject_handler_install() {
        let mut st = SignalState::new();
        assert!(st.set_handler(SIGKILL, Disposition::Ignore).is_err());
        assert!(st.set_handler(SIGSTOP, Disposition::Handler(0x1000)).is_err());
        assert!(st.set_handler(SIGTERM, Disposition::Ignore).is_ok());
    }

    #[test]
    fn raise_then_take_roundtrips() {
        let mut st = SignalState::new();
        assert!(st.raise(SIGTERM));
        assert!(st.has_deliverable());
        let (sig, disp) = st.take_deliverable().unwrap();
        assert_eq!(sig, SIGTERM);
        assert_eq!(disp, Disposition::Default);
        assert!(!st.has_deliverable());
    }

    #[test]
    fn raise_twice_reports_already_pending() {
        let mut st = SignalState::new();
        assert!(st.raise(SIGUSR1));
        assert!(!st.raise(SIGUSR1));
    }

    #[test]
    fn blocked_signal_is_not_deliverable() {
        let mut st = SignalState::new();
        st.block(SIGINT);
        st.raise(SIGINT);
        assert!(!st.has_deliverable());
        st.unblock(SIGINT);
        assert!(st.has_deliverable());
    }

    #[test]
    fn default_ignored_signal_is_drained_without_delivery() {
        let mut st = SignalState::new();
        st.raise(SIGCHLD);
        assert_eq!(st.take_deliverable(), None);
        assert_eq!(st.pending_mask(), 0);
    }

    #[test]
    fn lowest_numbered_signal_delivered_first() {
        let mut st = SignalState::new();
        st.raise(SIGTERM);
        st.raise(SIGINT);
        let (sig, _) = st.take_deliverable().unwrap();
        assert_eq!(sig, SIGINT);
    }

    #[test]
    fn handler_disposition_is_reported_on_delivery() {
        let mut st = SignalState::new();
        st.set_handler(SIGUSR2, Disposition::Handler(0xdead_beef)).unwrap();
        st.raise(SIGUSR2);
        assert_eq!(
            st.take_deliverable(),
            Some((SIGUSR2, Disposition::Handler(0xdead_beef)))
        );
    }
}
