//! The termination notice: an asynchronously-set, process-local flag.
//!
//! The signal handler only ever sets the flag; the coordinator's `step` only
//! ever reads-and-clears it. No other mutable state crosses the handler
//! boundary, so atomic flag semantics are all the synchronization needed.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGTERM, SIGUSR1};

/// Flag meaning "the scheduler intends to kill this job soon; checkpoint and
/// exit". Repeated raises before consumption are idempotent.
#[derive(Debug, Clone, Default)]
pub struct TerminationNotice {
    raised: Arc<AtomicBool>,
}

impl TerminationNotice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the notice to the scheduler's pre-termination signal (SIGUSR1)
    /// and, defensively, to SIGTERM.
    pub fn register(&self) -> io::Result<()> {
        signal_hook::flag::register(SIGUSR1, Arc::clone(&self.raised))?;
        signal_hook::flag::register(SIGTERM, Arc::clone(&self.raised))?;
        Ok(())
    }

    /// Raise the notice in-process (tests, programmatic shutdown).
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Whether the notice is currently raised, without clearing it.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Consume the notice: returns `true` at most once per raise.
    #[must_use]
    pub fn consume(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }

    /// The underlying flag, for sharing with an external signal handler.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.raised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_clears() {
        let notice = TerminationNotice::new();
        assert!(!notice.consume());

        notice.raise();
        assert!(notice.is_raised());
        assert!(notice.consume());
        assert!(!notice.consume());
    }

    #[test]
    fn test_repeated_raises_are_idempotent() {
        let notice = TerminationNotice::new();
        notice.raise();
        notice.raise();
        assert!(notice.consume());
        assert!(!notice.consume());
    }

    #[test]
    fn test_shared_flag_observes_raise() {
        let notice = TerminationNotice::new();
        let flag = notice.flag();
        flag.store(true, Ordering::SeqCst);
        assert!(notice.consume());
    }
}
