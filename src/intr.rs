//! Per-CPU ownership of the overflow interrupt.
//!
//! Each CPU carries one byte that arbitrates between the overflow handler,
//! which must never wait, and the reprogramming path, which may spin:
//!
//! ```text
//!   Inactive --claim--> Free --block--> Configuring --release--> Free
//!                        |  ^
//!          enter_handler |  | exit_handler
//!                        v  |
//!                     Processing
//! ```
//!
//! Only a successful compare-and-swap out of `Free` grants either side the
//! CPU, so the handler and a reprogram can never overlap.

use std::hint;
use std::sync::atomic::{AtomicU8, Ordering};

/// The state of one CPU's overflow interrupt ownership.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrState {
    /// Overflow interrupts on this CPU are not ours.
    Inactive = 0,
    /// We own the overflow interrupt and no one is using it.
    Free = 1,
    /// The overflow handler is running.
    Processing = 2,
    /// Counters are being reprogrammed; the handler must not run.
    Configuring = 3,
}

impl IntrState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => IntrState::Inactive,
            1 => IntrState::Free,
            2 => IntrState::Processing,
            _ => IntrState::Configuring,
        }
    }
}

#[derive(Debug)]
pub(crate) struct IntrLock(AtomicU8);

impl IntrLock {
    pub(crate) const fn new() -> Self {
        IntrLock(AtomicU8::new(IntrState::Inactive as u8))
    }

    pub(crate) fn get(&self) -> IntrState {
        IntrState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn cas(&self, from: IntrState, to: IntrState) -> Result<(), IntrState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(IntrState::from_u8)
    }

    /// Take ownership of the overflow interrupt. Returns false if it was
    /// already owned.
    pub(crate) fn claim(&self) -> bool {
        self.cas(IntrState::Inactive, IntrState::Free).is_ok()
    }

    /// Give up ownership, waiting out a running handler.
    pub(crate) fn surrender(&self) {
        loop {
            match self.cas(IntrState::Free, IntrState::Inactive) {
                Ok(()) | Err(IntrState::Inactive) => return,
                Err(_) => hint::spin_loop(),
            }
        }
    }

    /// Spin until the handler is out of the way and move to `Configuring`.
    ///
    /// Returns false, without blocking anything, if the CPU is `Inactive`.
    pub(crate) fn block(&self) -> bool {
        loop {
            match self.cas(IntrState::Free, IntrState::Configuring) {
                Ok(()) => return true,
                Err(IntrState::Inactive) => return false,
                Err(_) => hint::spin_loop(),
            }
        }
    }

    /// Leave `Configuring`.
    pub(crate) fn release(&self) {
        debug_assert_eq!(self.get(), IntrState::Configuring);
        self.0.store(IntrState::Free as u8, Ordering::Release);
    }

    /// Handler entry. Never waits: returns false if the CPU is not `Free`.
    pub(crate) fn enter_handler(&self) -> bool {
        self.cas(IntrState::Free, IntrState::Processing).is_ok()
    }

    pub(crate) fn exit_handler(&self) {
        debug_assert_eq!(self.get(), IntrState::Processing);
        self.0.store(IntrState::Free as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_handler_only_runs_when_free() {
        let l = IntrLock::new();
        assert!(!l.enter_handler());

        assert!(l.claim());
        assert!(!l.claim());
        assert!(l.enter_handler());
        assert_eq!(l.get(), IntrState::Processing);
        assert!(!l.enter_handler());
        l.exit_handler();

        assert!(l.block());
        assert!(!l.enter_handler());
        l.release();
        assert!(l.enter_handler());
        l.exit_handler();

        l.surrender();
        assert_eq!(l.get(), IntrState::Inactive);
    }

    #[test]
    fn test_block_inactive_is_noop() {
        let l = IntrLock::new();
        assert!(!l.block());
        assert_eq!(l.get(), IntrState::Inactive);
        l.surrender();
        assert_eq!(l.get(), IntrState::Inactive);
    }

    #[test]
    fn test_block_waits_for_handler() {
        let l = Arc::new(IntrLock::new());
        l.claim();
        assert!(l.enter_handler());

        let blocked = Arc::new(AtomicBool::new(false));
        let t = {
            let l = Arc::clone(&l);
            let blocked = Arc::clone(&blocked);
            thread::spawn(move || {
                assert!(l.block());
                blocked.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!blocked.load(Ordering::SeqCst));

        l.exit_handler();
        t.join().unwrap();
        assert!(blocked.load(Ordering::SeqCst));
        assert_eq!(l.get(), IntrState::Configuring);
    }
}
