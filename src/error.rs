use libc::c_int;
use thiserror::Error;

/// Failures reported by the heap.
///
/// None of these are fatal: the block chain is left exactly as it was before
/// the failing call and every previously returned address stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
  /// The growth primitive could not extend the heap.
  #[error("out of memory: could not grow the heap for {requested} bytes")]
  OutOfMemory { requested: usize },

  /// `count * size` does not fit in a `usize`.
  #[error("size overflow: {count} * {size} exceeds usize::MAX")]
  SizeOverflow { count: usize, size: usize },

  /// The requested alignment is stricter than the 16 byte alignment the heap
  /// guarantees.
  #[error("unsupported alignment {align}")]
  UnsupportedAlignment { align: usize },
}

impl HeapError {
  /// The `errno` value a C caller observes for this failure.
  ///
  /// Every kind maps to `ENOMEM`, matching what `calloc` reports for an
  /// overflowing product.
  pub const fn errno(self) -> c_int {
    match self {
      HeapError::OutOfMemory { .. }
      | HeapError::SizeOverflow { .. }
      | HeapError::UnsupportedAlignment { .. } => libc::ENOMEM,
    }
  }
}

pub type HeapResult<T> = Result<T, HeapError>;

/// Sets the calling thread's `errno`.
pub(crate) fn set_errno(value: c_int) {
  // SAFETY: the errno location is a valid, thread-local pointer for the whole
  // lifetime of the calling thread.
  unsafe {
    *errno_location() = value;
  }
}

/// Reads the calling thread's `errno`.
pub fn errno() -> c_int {
  // SAFETY: see `set_errno`.
  unsafe { *errno_location() }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "emscripten"))]
unsafe fn errno_location() -> *mut c_int {
  unsafe { libc::__errno_location() }
}

#[cfg(any(
  target_os = "macos",
  target_os = "ios",
  target_os = "freebsd",
  target_os = "dragonfly"
))]
unsafe fn errno_location() -> *mut c_int {
  unsafe { libc::__error() }
}

#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
unsafe fn errno_location() -> *mut c_int {
  unsafe { libc::__errno() }
}
