//! Non-reentrant cycle guard for periodic work.

use std::sync::atomic::{AtomicBool, Ordering};

/// At most one holder at a time; a second `try_enter` while the first token is
/// alive returns `None`.
#[derive(Debug, Default)]
pub struct CycleGuard {
  running: AtomicBool,
}

impl CycleGuard {
  pub fn try_enter(&self) -> Option<CycleToken<'_>> {
    self
      .running
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| CycleToken { guard: self })
  }
}

/// Releases the guard when dropped, including on early return or panic.
#[must_use]
pub struct CycleToken<'a> {
  guard: &'a CycleGuard,
}

impl Drop for CycleToken<'_> {
  fn drop(&mut self) { self.guard.running.store(false, Ordering::Release); }
}
