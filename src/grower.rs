use std::ptr::{self, NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::{
  align_to,
  block::PAYLOAD_ALIGN,
  error::{HeapError, HeapResult},
};

/// A contiguous region that can only grow.
///
/// The heap never gives memory back, so the only operation is "extend the
/// region by `bytes` and tell me where the new part starts". Implementations
/// must return addresses aligned to 16 bytes and must leave the region
/// untouched when they fail.
pub trait HeapGrower {
  /// Extends the region by `bytes` and returns the old boundary.
  ///
  /// # Safety
  ///
  /// The caller must have exclusive access to the grower for the duration of
  /// the call. `sbrk` in particular is not reentrant.
  unsafe fn grow(
    &mut self,
    bytes: usize,
  ) -> HeapResult<NonNull<u8>>;
}

/// Grows the process data segment with `sbrk(2)`.
///
/// ```text
///   High Address ┌─────────────────────┐
///                │       Stack         │ ↓ grows down
///                │                     │
///                │       Heap          │ ↑ grows up (sbrk)
///                ├─────────────────────┤ ← Program Break
///                │   Data / Text       │
///   Low Address  └─────────────────────┘
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

impl Sbrk {
  pub const fn new() -> Self {
    Self
  }

  /// Current program break, as reported by `sbrk(0)`.
  pub fn program_break() -> *mut u8 {
    // SAFETY: `sbrk(0)` only reads the current break.
    unsafe { sbrk(0) as *mut u8 }
  }
}

const SBRK_FAILED: *mut c_void = usize::MAX as *mut c_void;

impl HeapGrower for Sbrk {
  unsafe fn grow(
    &mut self,
    bytes: usize,
  ) -> HeapResult<NonNull<u8>> {
    // The break may be left anywhere by another brk user, so the slack is
    // requested up front and the returned address is aligned inside it.
    let increment = match bytes
      .checked_add(PAYLOAD_ALIGN - 1)
      .and_then(|total| intptr_t::try_from(total).ok())
    {
      Some(increment) => increment,
      None => return Err(HeapError::OutOfMemory { requested: bytes }),
    };

    unsafe {
      let address = sbrk(increment);
      if address == SBRK_FAILED {
        return Err(HeapError::OutOfMemory { requested: bytes });
      }

      let padding = align_to!(address as usize, PAYLOAD_ALIGN) - address as usize;
      NonNull::new((address as *mut u8).add(padding)).ok_or(HeapError::OutOfMemory { requested: bytes })
    }
  }
}

/// Grows inside a fixed buffer allocated up front.
///
/// Useful for bounded heaps and for tests that should neither move the real
/// program break nor depend on what else the process has done with it.
pub struct ArenaGrower {
  start: NonNull<Chunk>,
  chunks: usize,
  used: usize,
}

/// Arena storage unit, aligned like a block header.
#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct Chunk([u8; PAYLOAD_ALIGN]);

// SAFETY: the arena exclusively owns its buffer.
unsafe impl Send for ArenaGrower {}

impl ArenaGrower {
  /// Creates an arena able to hand out `capacity` bytes, rounded up to the
  /// payload alignment.
  pub fn with_capacity(capacity: usize) -> Self {
    let chunks = capacity.div_ceil(PAYLOAD_ALIGN);
    let buffer: Box<[Chunk]> = vec![Chunk([0; PAYLOAD_ALIGN]); chunks].into_boxed_slice();
    let start = NonNull::new(Box::into_raw(buffer).cast::<Chunk>()).unwrap_or(NonNull::dangling());

    Self { start, chunks, used: 0 }
  }

  /// Total bytes this arena can hand out.
  pub fn capacity(&self) -> usize {
    self.chunks * PAYLOAD_ALIGN
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.used
  }

  /// Bytes still available.
  pub fn remaining(&self) -> usize {
    self.capacity() - self.used
  }

  /// Returns `true` if `address` lies inside the arena.
  pub fn contains(
    &self,
    address: *const u8,
  ) -> bool {
    let start = self.start.as_ptr() as usize;
    (start..start + self.capacity()).contains(&(address as usize))
  }
}

impl HeapGrower for ArenaGrower {
  unsafe fn grow(
    &mut self,
    bytes: usize,
  ) -> HeapResult<NonNull<u8>> {
    if bytes > self.remaining() {
      return Err(HeapError::OutOfMemory { requested: bytes });
    }

    let address = unsafe { self.start.cast::<u8>().add(self.used) };
    self.used = align_to!(self.used + bytes, PAYLOAD_ALIGN);
    Ok(address)
  }
}

impl Drop for ArenaGrower {
  fn drop(&mut self) {
    if self.chunks == 0 {
      return;
    }
    // SAFETY: `start`/`chunks` came from `Box::into_raw` on a boxed slice of
    // exactly `chunks` elements.
    unsafe {
      drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.start.as_ptr(), self.chunks)));
    }
  }
}
