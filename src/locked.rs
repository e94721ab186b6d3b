use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use spin::Mutex;

use crate::{
  block::PAYLOAD_ALIGN,
  config::{self, ReleasePolicy},
  error::{HeapError, HeapResult},
  grower::{HeapGrower, Sbrk},
  heap::{self, BlockInfo, Heap, HeapStats, ReleaseOutcome},
  trace::heap_log,
};

/// The process-wide heap, growing the real program break.
///
/// There is exactly one per process. It starts empty and is never torn down;
/// every block it creates lives until the process exits.
///
/// Any other heap built on [`Sbrk`] would race this one for the program
/// break, so route everything through `GLOBAL` (or [`Global`]).
pub static GLOBAL: LockedHeap<Sbrk> = LockedHeap::new(Sbrk::new());

/// Handle to [`GLOBAL`] for `#[global_allocator]`.
///
/// ```rust,ignore
/// #[global_allocator]
/// static ALLOCATOR: brkalloc::Global = brkalloc::Global;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct Global;

/// A [`Heap`] behind a single spin lock.
///
/// Every operation that touches the chain or the grower runs with the lock
/// held, from the first-fit search through heap growth and linking. A block is
/// fully written and linked before the lock is released, so no thread ever
/// sees a half-initialized header.
///
/// The lock is a spin lock rather than a parking mutex because a parking
/// mutex may allocate while parking, which would re-enter this heap when it
/// backs the global allocator. For the same reason nothing is logged while
/// the lock is held.
///
/// The lock is not reentrant: none of these methods may be called from a
/// signal handler.
pub struct LockedHeap<G> {
  heap: Mutex<Heap<G>>,
  // The only copy of a fixed policy. It is read before locking, so the inner
  // heap never consults its own.
  policy: Option<ReleasePolicy>,
}

impl<G: HeapGrower> LockedHeap<G> {
  pub const fn new(grower: G) -> Self {
    Self {
      heap: Mutex::new(Heap::new(grower)),
      policy: None,
    }
  }

  pub const fn with_policy(
    grower: G,
    policy: ReleasePolicy,
  ) -> Self {
    Self {
      heap: Mutex::new(Heap::new(grower)),
      policy: Some(policy),
    }
  }

  /// Release policy in effect. Resolving the process-wide policy may read the
  /// environment, which allocates, so this is always called without the lock.
  fn release_policy(&self) -> ReleasePolicy {
    self.policy.unwrap_or_else(config::release_policy)
  }

  /// Thread-safe [`Heap::allocate`].
  pub fn allocate(
    &self,
    size: usize,
  ) -> HeapResult<Option<NonNull<u8>>> {
    // SAFETY: the lock gives this call exclusive access to the grower.
    let grant = unsafe { self.heap.lock().allocate_block(size) };

    match grant {
      Ok(Some(grant)) => {
        if !grant.reused {
          heap_log!(debug, "grew heap for a {} byte block at {:p}", size, grant.address);
        }
        heap_log!(trace, "allocate({}) -> {:p}", size, grant.address);
        Ok(Some(grant.address))
      }
      Ok(None) => Ok(None),
      Err(err) => {
        heap_log!(warn, "allocate({}) failed: {}", size, err);
        Err(err)
      }
    }
  }

  /// Thread-safe [`Heap::zero_allocate`]. Zeroing happens after the lock is
  /// released, on a block only the caller can reach.
  pub fn zero_allocate(
    &self,
    count: usize,
    size: usize,
  ) -> HeapResult<Option<NonNull<u8>>> {
    let total = match heap::zeroed_size(count, size) {
      Ok(Some(total)) => total,
      Ok(None) => return Ok(None),
      Err(err) => {
        heap_log!(warn, "zero_allocate({}, {}) failed: {}", count, size, err);
        return Err(err);
      }
    };

    // SAFETY: see `allocate`.
    let grant = unsafe { self.heap.lock().allocate_block(total) };

    match grant {
      Ok(Some(grant)) => {
        // SAFETY: the block was just marked used for this caller.
        unsafe { heap::zero_grant(grant) };
        heap_log!(trace, "zero_allocate({}, {}) -> {:p}", count, size, grant.address);
        Ok(Some(grant.address))
      }
      Ok(None) => Ok(None),
      Err(err) => {
        heap_log!(warn, "zero_allocate({}, {}) failed: {}", count, size, err);
        Err(err)
      }
    }
  }

  /// Thread-safe [`Heap::release`].
  ///
  /// # Safety
  ///
  /// `address` must be `None` or an address returned by this heap that the
  /// caller no longer uses.
  pub unsafe fn release(
    &self,
    address: Option<NonNull<u8>>,
  ) {
    if address.is_none() {
      return;
    }

    let policy = self.release_policy();
    let outcome = unsafe { self.heap.lock().release_with(address, policy) };

    match outcome {
      ReleaseOutcome::AlreadyFree => {
        heap_log!(warn, "release({:?}): block is already free", address);
      }
      outcome => {
        heap_log!(trace, "release({:?}) -> {:?}", address, outcome);
      }
    }
  }

  /// Thread-safe [`Heap::resize`].
  ///
  /// The lock is taken separately for the fresh allocation and for the
  /// release of the old block. The copy in between touches only blocks owned
  /// by the caller.
  ///
  /// # Safety
  ///
  /// `address` must be `None` or an address returned by this heap.
  pub unsafe fn resize(
    &self,
    address: Option<NonNull<u8>>,
    new_size: usize,
  ) -> HeapResult<Option<NonNull<u8>>> {
    unsafe {
      let Some(old) = address else {
        return self.allocate(new_size);
      };

      if new_size == 0 {
        self.release(Some(old));
        return Ok(None);
      }

      let old_size = heap::usable_size(old);
      if old_size >= new_size {
        heap_log!(trace, "resize({:p}, {}) in place, block holds {}", old, new_size, old_size);
        return Ok(Some(old));
      }

      let Some(new) = self.allocate(new_size)? else {
        return Ok(None);
      };
      old.copy_to_nonoverlapping(new, old_size);
      self.release(Some(old));

      heap_log!(trace, "resize({:p}, {}) moved to {:p}", old, new_size, new);
      Ok(Some(new))
    }
  }

  /// Usable bytes behind `address`.
  ///
  /// # Safety
  ///
  /// `address` must have been returned by this heap.
  pub unsafe fn usable_size(
    &self,
    address: NonNull<u8>,
  ) -> usize {
    unsafe { heap::usable_size(address) }
  }

  /// Calls `visit` for every block, head to tail, with the lock held.
  ///
  /// `visit` must not allocate from this heap: the lock is not reentrant.
  pub fn walk<F: FnMut(BlockInfo)>(
    &self,
    mut visit: F,
  ) {
    let heap = self.heap.lock();
    for block in heap.blocks() {
      visit(block);
    }
  }

  pub fn stats(&self) -> HeapStats {
    self.heap.lock().stats()
  }

  /// Number of blocks in the chain.
  pub fn len(&self) -> usize {
    self.heap.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.heap.lock().is_empty()
  }

  /// Policy fixed at construction, if any.
  pub fn fixed_policy(&self) -> Option<ReleasePolicy> {
    self.policy
  }
}

fn check_layout(layout: Layout) -> HeapResult<()> {
  if layout.align() > PAYLOAD_ALIGN {
    return Err(HeapError::UnsupportedAlignment { align: layout.align() });
  }
  Ok(())
}

fn into_raw(result: HeapResult<Option<NonNull<u8>>>) -> *mut u8 {
  match result {
    Ok(Some(address)) => address.as_ptr(),
    _ => ptr::null_mut(),
  }
}

unsafe impl<G: HeapGrower + Send> GlobalAlloc for LockedHeap<G> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if let Err(err) = check_layout(layout) {
      heap_log!(warn, "alloc({:?}) rejected: {}", layout, err);
      return ptr::null_mut();
    }
    into_raw(self.allocate(layout.size()))
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if let Err(err) = check_layout(layout) {
      heap_log!(warn, "alloc_zeroed({:?}) rejected: {}", layout, err);
      return ptr::null_mut();
    }
    into_raw(self.zero_allocate(1, layout.size()))
  }

  unsafe fn dealloc(
    &self,
    address: *mut u8,
    _layout: Layout,
  ) {
    unsafe { self.release(NonNull::new(address)) }
  }

  unsafe fn realloc(
    &self,
    address: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if let Err(err) = check_layout(layout) {
      heap_log!(warn, "realloc({:?}) rejected: {}", layout, err);
      return ptr::null_mut();
    }
    unsafe { into_raw(self.resize(NonNull::new(address), new_size)) }
  }
}

unsafe impl GlobalAlloc for Global {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    unsafe { GlobalAlloc::alloc(&GLOBAL, layout) }
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    unsafe { GlobalAlloc::alloc_zeroed(&GLOBAL, layout) }
  }

  unsafe fn dealloc(
    &self,
    address: *mut u8,
    layout: Layout,
  ) {
    unsafe { GlobalAlloc::dealloc(&GLOBAL, address, layout) }
  }

  unsafe fn realloc(
    &self,
    address: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    unsafe { GlobalAlloc::realloc(&GLOBAL, address, layout, new_size) }
  }
}
