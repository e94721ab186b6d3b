//! `malloc`-style entry points.
//!
//! These mirror the C contract: failures come back as null with `errno` set to
//! `ENOMEM`, zero-sized requests come back as null with `errno` untouched, and
//! `free` never fails. Exporting them under the C symbol names is left to the
//! embedding crate.

use std::ptr::{self, NonNull};

use libc::c_void;

use crate::{
  error::{HeapResult, set_errno},
  grower::HeapGrower,
  locked::{GLOBAL, LockedHeap},
};

fn into_c(result: HeapResult<Option<NonNull<u8>>>) -> *mut c_void {
  match result {
    Ok(Some(address)) => address.as_ptr().cast(),
    Ok(None) => ptr::null_mut(),
    Err(err) => {
      set_errno(err.errno());
      ptr::null_mut()
    }
  }
}

impl<G: HeapGrower> LockedHeap<G> {
  /// `malloc(3)` on this heap.
  pub fn malloc(
    &self,
    size: usize,
  ) -> *mut c_void {
    into_c(self.allocate(size))
  }

  /// `calloc(3)` on this heap.
  pub fn calloc(
    &self,
    count: usize,
    size: usize,
  ) -> *mut c_void {
    into_c(self.zero_allocate(count, size))
  }

  /// `realloc(3)` on this heap. On failure the original block is untouched.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live address returned by this heap.
  pub unsafe fn realloc(
    &self,
    address: *mut c_void,
    size: usize,
  ) -> *mut c_void {
    unsafe { into_c(self.resize(NonNull::new(address.cast()), size)) }
  }

  /// `free(3)` on this heap.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live address returned by this heap.
  pub unsafe fn free(
    &self,
    address: *mut c_void,
  ) {
    unsafe { self.release(NonNull::new(address.cast())) }
  }
}

/// `malloc(3)` on the process-wide heap.
pub fn malloc(size: usize) -> *mut c_void {
  GLOBAL.malloc(size)
}

/// `calloc(3)` on the process-wide heap.
pub fn calloc(
  count: usize,
  size: usize,
) -> *mut c_void {
  GLOBAL.calloc(count, size)
}

/// `realloc(3)` on the process-wide heap.
///
/// # Safety
///
/// `address` must be null or a live address returned by the process-wide
/// heap.
pub unsafe fn realloc(
  address: *mut c_void,
  size: usize,
) -> *mut c_void {
  unsafe { GLOBAL.realloc(address, size) }
}

/// `free(3)` on the process-wide heap.
///
/// # Safety
///
/// `address` must be null or a live address returned by the process-wide
/// heap.
pub unsafe fn free(address: *mut c_void) {
  unsafe { GLOBAL.free(address) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::ReleasePolicy, error::errno, grower::ArenaGrower};

  fn locked(capacity: usize) -> LockedHeap<ArenaGrower> {
    LockedHeap::with_policy(ArenaGrower::with_capacity(capacity), ReleasePolicy::Reclaim)
  }

  #[test]
  fn malloc_failure_sets_enomem() {
    let heap = locked(64);
    set_errno(0);

    assert!(heap.malloc(1 << 20).is_null());
    assert_eq!(errno(), libc::ENOMEM);
  }

  #[test]
  fn zero_sized_requests_leave_errno_alone() {
    let heap = locked(64);
    set_errno(0);

    assert!(heap.malloc(0).is_null());
    assert!(heap.calloc(0, 8).is_null());
    assert!(heap.calloc(8, 0).is_null());
    assert_eq!(errno(), 0);
    assert!(heap.is_empty());
  }

  #[test]
  fn calloc_overflow_sets_enomem() {
    let heap = locked(64);
    set_errno(0);

    assert!(heap.calloc(usize::MAX / 2, 3).is_null());
    assert_eq!(errno(), libc::ENOMEM);
    assert!(heap.is_empty());
  }

  #[test]
  fn realloc_failure_keeps_the_original() {
    let heap = locked(128);

    unsafe {
      let original = heap.malloc(16).cast::<u8>();
      original.write_bytes(0x42, 16);
      set_errno(0);

      assert!(heap.realloc(original.cast(), 4096).is_null());
      assert_eq!(errno(), libc::ENOMEM);
      assert_eq!(*original.add(15), 0x42);
      assert_eq!(heap.stats().used_blocks, 1);
    }
  }

  #[test]
  fn free_null_is_a_no_op() {
    let heap = locked(64);
    set_errno(0);

    unsafe { heap.free(ptr::null_mut()) };
    assert_eq!(errno(), 0);
    assert!(heap.is_empty());
  }
}
