//! Log emission that is safe to call from inside the allocator.
//!
//! A logger may allocate while formatting. When this crate backs the global
//! allocator that allocation comes straight back here, so each thread tracks
//! whether it is already emitting and drops nested records.

use std::cell::Cell;

thread_local! {
  static EMITTING: Cell<bool> = const { Cell::new(false) };
}

struct EmitGuard;

impl Drop for EmitGuard {
  fn drop(&mut self) {
    let _ = EMITTING.try_with(|flag| flag.set(false));
  }
}

fn enter() -> Option<EmitGuard> {
  EMITTING
    .try_with(|flag| {
      if flag.get() {
        None
      } else {
        flag.set(true);
        Some(EmitGuard)
      }
    })
    .ok()
    .flatten()
}

/// Runs `f` unless the calling thread is already inside `emit`, or its
/// thread-local storage has been torn down.
#[inline]
pub(crate) fn emit<F: FnOnce()>(f: F) {
  if let Some(_guard) = enter() {
    f();
  }
}

/// `log` macros routed through [`emit`], prefixed with the crate tag.
macro_rules! heap_log {
  ($level:ident, $($arg:tt)+) => {
    $crate::trace::emit(|| ::log::$level!("[brkalloc] {}", format_args!($($arg)+)))
  };
}

pub(crate) use heap_log;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nested_emission_is_suppressed() {
    let mut outer = 0;
    let mut inner = 0;

    emit(|| {
      outer += 1;
      emit(|| inner += 1);
    });

    assert_eq!(outer, 1);
    assert_eq!(inner, 0);
  }

  #[test]
  fn guard_resets_after_emission() {
    let mut count = 0;
    emit(|| count += 1);
    emit(|| count += 1);
    assert_eq!(count, 2);
  }
}
