use std::{marker::PhantomData, ptr::NonNull};

use crate::{
  align::checked_align_to,
  block::{Block, HEADER_SIZE, PAYLOAD_ALIGN},
  config::{self, ReleasePolicy},
  error::{HeapError, HeapResult},
  grower::HeapGrower,
};

/// A block handed out by [`Heap::allocate_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Grant {
  /// First payload byte.
  pub address: NonNull<u8>,
  /// Usable bytes behind `address`. Larger than requested when a bigger free
  /// block was reused.
  pub size: usize,
  /// `false` if the heap had to grow to satisfy the request.
  pub reused: bool,
}

/// What [`Heap::release_with`] did with a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseOutcome {
  /// Null address, or the policy keeps blocks used.
  Ignored,
  /// The block is free again.
  Reclaimed,
  /// The block was already free.
  AlreadyFree,
}

/// Snapshot of one block, as seen by a chain walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload address.
  pub address: *mut u8,
  /// Usable payload bytes.
  pub size: usize,
  pub used: bool,
}

/// Aggregate view of the chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub blocks: usize,
  pub used_blocks: usize,
  pub free_blocks: usize,
  /// Sum of every block's payload size.
  pub payload_bytes: usize,
  /// Sum of the payload sizes of used blocks.
  pub used_bytes: usize,
  /// Bytes requested from the grower, headers included.
  pub heap_bytes: usize,
}

/// First-fit heap over a single chain of blocks.
///
/// ```text
///   head                                                 tail
///    │                                                     │
///    ▼                                                     ▼
///   ┌────────┬─────────┐   ┌────────┬──────┐   ┌────────┬──────────┐
///   │ header │ payload │──►│ header │ pay. │──►│ header │ payload  │──► None
///   └────────┴─────────┘   └────────┴──────┘   └────────┴──────────┘
///   low address                                          program break
/// ```
///
/// Blocks are only ever created by growing the heap, so chain order is both
/// creation order and address order. Blocks are never split, merged, unlinked
/// or returned to the grower.
///
/// `Heap` does no locking of its own. Wrap it in [`crate::LockedHeap`] to
/// share it between threads.
pub struct Heap<G> {
  head: Option<NonNull<Block>>,
  tail: Option<NonNull<Block>>,
  len: usize,
  heap_bytes: usize,
  grower: G,
  policy: Option<ReleasePolicy>,
  _owns: PhantomData<Block>,
}

// SAFETY: every block reachable from `head` lives in memory owned by `grower`,
// so moving the heap moves ownership of the whole chain with it.
unsafe impl<G: HeapGrower + Send> Send for Heap<G> {}

impl<G: HeapGrower> Heap<G> {
  /// Creates an empty heap whose release policy follows the process-wide
  /// setting (see [`crate::config`]).
  pub const fn new(grower: G) -> Self {
    Self {
      head: None,
      tail: None,
      len: 0,
      heap_bytes: 0,
      grower,
      policy: None,
      _owns: PhantomData,
    }
  }

  /// Creates an empty heap with a fixed release policy.
  pub const fn with_policy(
    grower: G,
    policy: ReleasePolicy,
  ) -> Self {
    Self {
      head: None,
      tail: None,
      len: 0,
      heap_bytes: 0,
      grower,
      policy: Some(policy),
      _owns: PhantomData,
    }
  }

  /// Release policy in effect for this heap.
  pub fn policy(&self) -> ReleasePolicy {
    self.policy.unwrap_or_else(config::release_policy)
  }

  pub fn grower(&self) -> &G {
    &self.grower
  }

  /// Number of blocks in the chain.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_none()
  }

  unsafe fn find_free_block(
    &self,
    size: usize,
  ) -> Option<NonNull<Block>> {
    unsafe {
      let mut current = self.head;

      while let Some(block) = current {
        let header = block.as_ptr();
        if !(*header).used && (*header).size >= size {
          return Some(block);
        }
        current = (*header).next;
      }

      None
    }
  }

  /// Grows the heap by one block of `size` payload bytes and links it after
  /// `tail`. The chain is untouched if growth fails.
  unsafe fn extend(
    &mut self,
    size: usize,
  ) -> HeapResult<NonNull<Block>> {
    let total = checked_align_to(size, PAYLOAD_ALIGN)
      .and_then(|payload| payload.checked_add(HEADER_SIZE))
      .ok_or(HeapError::OutOfMemory { requested: size })?;

    unsafe {
      let block = self
        .grower
        .grow(total)
        .map_err(|_| HeapError::OutOfMemory { requested: size })?
        .cast::<Block>();

      block.write(Block::new(size, true, None));

      match self.tail {
        Some(tail) => (*tail.as_ptr()).next = Some(block),
        None => self.head = Some(block),
      }
      self.tail = Some(block);
      self.len += 1;
      self.heap_bytes += total;

      Ok(block)
    }
  }

  /// First-fit search, falling back to growth. `Ok(None)` for a zero-sized
  /// request.
  pub(crate) unsafe fn allocate_block(
    &mut self,
    size: usize,
  ) -> HeapResult<Option<Grant>> {
    if size == 0 {
      return Ok(None);
    }

    unsafe {
      if let Some(block) = self.find_free_block(size) {
        (*block.as_ptr()).used = true;
        return Ok(Some(Grant {
          address: Block::payload(block),
          size: (*block.as_ptr()).size,
          reused: true,
        }));
      }

      let block = self.extend(size)?;
      Ok(Some(Grant {
        address: Block::payload(block),
        size,
        reused: false,
      }))
    }
  }

  /// Returns at least `size` usable bytes, or `Ok(None)` when `size` is zero.
  ///
  /// The first free block large enough is granted whole. When none exists
  /// the heap grows by `size` plus the header footprint.
  ///
  /// # Safety
  ///
  /// The grower's safety contract applies: nothing else may grow the same
  /// region concurrently.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> HeapResult<Option<NonNull<u8>>> {
    unsafe { Ok(self.allocate_block(size)?.map(|grant| grant.address)) }
  }

  /// Allocates `count * size` bytes, all zeroed.
  ///
  /// # Safety
  ///
  /// Same as [`Heap::allocate`].
  pub unsafe fn zero_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> HeapResult<Option<NonNull<u8>>> {
    let Some(total) = zeroed_size(count, size)? else {
      return Ok(None);
    };

    unsafe {
      let grant = self.allocate_block(total)?;
      Ok(grant.map(|grant| {
        zero_grant(grant);
        grant.address
      }))
    }
  }

  /// Marks the block behind `address` free, if the release policy allows it.
  ///
  /// # Safety
  ///
  /// `address` must be `None` or an address returned by this heap.
  pub unsafe fn release(
    &mut self,
    address: Option<NonNull<u8>>,
  ) {
    let policy = self.policy();
    unsafe {
      self.release_with(address, policy);
    }
  }

  pub(crate) unsafe fn release_with(
    &mut self,
    address: Option<NonNull<u8>>,
    policy: ReleasePolicy,
  ) -> ReleaseOutcome {
    let Some(address) = address else {
      return ReleaseOutcome::Ignored;
    };

    if !policy.reclaims() {
      return ReleaseOutcome::Ignored;
    }

    unsafe {
      let header = Block::from_payload(address).as_ptr();
      if (*header).used {
        (*header).used = false;
        ReleaseOutcome::Reclaimed
      } else {
        ReleaseOutcome::AlreadyFree
      }
    }
  }

  /// Resizes the allocation at `address` to `new_size` bytes.
  ///
  /// - `None` behaves like [`Heap::allocate`].
  /// - `new_size == 0` releases `address` and returns `Ok(None)`.
  /// - If the block already holds `new_size` bytes the same address comes
  ///   back.
  /// - Otherwise the contents move to a fresh block and the old one is
  ///   released. On failure the old block is untouched.
  ///
  /// # Safety
  ///
  /// `address` must be `None` or an address returned by this heap.
  pub unsafe fn resize(
    &mut self,
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

      let old_size = usable_size(old);
      if old_size >= new_size {
        return Ok(Some(old));
      }

      let Some(new) = self.allocate(new_size)? else {
        return Ok(None);
      };
      old.copy_to_nonoverlapping(new, old_size);
      self.release(Some(old));

      Ok(Some(new))
    }
  }

  /// Iterates over the chain from `head` to `tail`.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      current: self.head,
      _heap: PhantomData,
    }
  }

  /// Walks the chain and sums it up.
  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_bytes: self.heap_bytes,
      ..HeapStats::default()
    };

    for block in self.blocks() {
      stats.blocks += 1;
      stats.payload_bytes += block.size;
      if block.used {
        stats.used_blocks += 1;
        stats.used_bytes += block.size;
      } else {
        stats.free_blocks += 1;
      }
    }

    stats
  }
}

/// Usable bytes behind `address`.
///
/// A block's size never changes once it is linked, so this needs no lock.
///
/// # Safety
///
/// `address` must have been returned by a heap and not be dangling.
pub unsafe fn usable_size(address: NonNull<u8>) -> usize {
  unsafe { (*Block::from_payload(address).as_ptr()).size }
}

/// `count * size`, `None` when either factor is zero.
pub(crate) fn zeroed_size(
  count: usize,
  size: usize,
) -> HeapResult<Option<usize>> {
  if count == 0 || size == 0 {
    return Ok(None);
  }

  count
    .checked_mul(size)
    .map(Some)
    .ok_or(HeapError::SizeOverflow { count, size })
}

/// Zeroes the whole granted block. A reused block may be larger than the
/// request and still hold old contents.
///
/// # Safety
///
/// `grant` must describe a block exclusively owned by the caller.
pub(crate) unsafe fn zero_grant(grant: Grant) {
  unsafe { grant.address.write_bytes(0, grant.size) }
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'a> {
  current: Option<NonNull<Block>>,
  _heap: PhantomData<&'a Block>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let block = self.current?;
    // SAFETY: the iterator borrows the heap, so every linked header stays
    // valid and unmodified while it runs.
    unsafe {
      let header = block.as_ptr();
      self.current = (*header).next;
      Some(BlockInfo {
        address: Block::payload(block).as_ptr(),
        size: (*header).size,
        used: (*header).used,
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grower::ArenaGrower;

  fn heap(capacity: usize) -> Heap<ArenaGrower> {
    Heap::with_policy(ArenaGrower::with_capacity(capacity), ReleasePolicy::Reclaim)
  }

  #[test]
  fn test_alloc() {
    let mut heap = heap(4096);

    unsafe {
      let first = heap.allocate(8).unwrap().unwrap().cast::<u64>();
      first.write(3);
      assert_eq!(first.read(), 3);

      let count = 6;
      let second = heap.allocate(count * 2).unwrap().unwrap().cast::<u16>();
      for i in 0..count {
        second.add(i).write((i + 1) as u16);
      }

      assert_eq!(first.read(), 3);
      for i in 0..count {
        assert_eq!((i + 1) as u16, second.add(i).read());
      }

      heap.release(Some(first.cast()));

      let third = heap.allocate(4).unwrap().unwrap();
      assert_eq!(first.cast::<u8>(), third);

      let fourth = heap.allocate(16).unwrap().unwrap().cast::<u128>();
      fourth.write(25);
      assert!(fourth.cast::<u8>() > third);
      assert_eq!(fourth.read(), 25);
    }
  }

  #[test]
  fn zero_size_requests_leave_the_chain_alone() {
    let mut heap = heap(1024);

    unsafe {
      assert_eq!(heap.allocate(0), Ok(None));
      assert_eq!(heap.zero_allocate(0, 16), Ok(None));
      assert_eq!(heap.zero_allocate(16, 0), Ok(None));
    }

    assert!(heap.is_empty());
    assert_eq!(heap.grower().used(), 0);
  }

  #[test]
  fn regions_are_distinct_aligned_and_disjoint() {
    let mut heap = heap(8192);
    let sizes = [1usize, 7, 8, 13, 64, 100, 3, 256];
    let mut regions = Vec::new();

    unsafe {
      for &size in &sizes {
        let address = heap.allocate(size).unwrap().unwrap();
        assert_eq!(address.as_ptr() as usize % PAYLOAD_ALIGN, 0);
        address.write_bytes(0xCD, size);
        regions.push((address.as_ptr() as usize, size));
      }
    }

    for (i, &(a, a_len)) in regions.iter().enumerate() {
      for &(b, b_len) in &regions[i + 1..] {
        assert!(a + a_len <= b || b + b_len <= a);
      }
    }

    assert_eq!(heap.len(), sizes.len());
  }

  #[test]
  fn first_fit_grants_the_whole_block_without_splitting() {
    let mut heap = heap(4096);

    unsafe {
      let big = heap.allocate(200).unwrap().unwrap();
      let small = heap.allocate(16).unwrap().unwrap();
      heap.release(Some(big));
      heap.release(Some(small));

      // Both blocks are free; the first one in chain order wins even though
      // the second one is a tighter fit.
      let reused = heap.allocate(10).unwrap().unwrap();
      assert_eq!(reused, big);
      assert_eq!(usable_size(reused), 200);

      let next = heap.allocate(10).unwrap().unwrap();
      assert_eq!(next, small);
    }

    assert_eq!(heap.len(), 2);
  }

  #[test]
  fn too_small_free_blocks_are_skipped() {
    let mut heap = heap(4096);

    unsafe {
      let small = heap.allocate(8).unwrap().unwrap();
      heap.release(Some(small));

      let bigger = heap.allocate(64).unwrap().unwrap();
      assert_ne!(bigger, small);
      assert_eq!(heap.len(), 2);

      let stats = heap.stats();
      assert_eq!(stats.free_blocks, 1);
      assert_eq!(stats.used_blocks, 1);
    }
  }

  #[test]
  fn failed_growth_does_not_touch_the_chain() {
    let mut heap = heap(128);

    unsafe {
      let first = heap.allocate(32).unwrap().unwrap();
      first.write_bytes(0x5A, 32);
      let before: Vec<_> = heap.blocks().collect();

      assert_eq!(heap.allocate(4096), Err(HeapError::OutOfMemory { requested: 4096 }));

      let after: Vec<_> = heap.blocks().collect();
      assert_eq!(before, after);
      assert_eq!(*first.as_ptr().add(31), 0x5A);
    }
  }

  #[test]
  fn huge_requests_report_out_of_memory() {
    let mut heap = heap(128);

    unsafe {
      assert_eq!(heap.allocate(usize::MAX), Err(HeapError::OutOfMemory { requested: usize::MAX }));
    }
    assert!(heap.is_empty());
  }

  #[test]
  fn zero_allocate_zeroes_reused_blocks() {
    let mut heap = heap(4096);

    unsafe {
      let dirty = heap.allocate(64).unwrap().unwrap();
      dirty.write_bytes(0xFF, 64);
      heap.release(Some(dirty));

      let zeroed = heap.zero_allocate(4, 8).unwrap().unwrap();
      assert_eq!(zeroed, dirty);

      let bytes = std::slice::from_raw_parts(zeroed.as_ptr(), usable_size(zeroed));
      assert!(bytes.iter().all(|&b| b == 0));
    }
  }

  #[test]
  fn zero_allocate_detects_overflow() {
    let mut heap = heap(1024);

    unsafe {
      assert_eq!(
        heap.zero_allocate(usize::MAX, 2),
        Err(HeapError::SizeOverflow { count: usize::MAX, size: 2 })
      );
    }
    assert!(heap.is_empty());
  }

  #[test]
  fn resize_shrinks_in_place() {
    let mut heap = heap(1024);

    unsafe {
      let address = heap.allocate(32).unwrap().unwrap();
      for i in 0..32 {
        address.add(i).write(i as u8);
      }

      let same = heap.resize(Some(address), 16).unwrap().unwrap();
      assert_eq!(same, address);
      assert_eq!(usable_size(same), 32);
      for i in 0..16 {
        assert_eq!(same.add(i).read(), i as u8);
      }

      assert_eq!(heap.resize(Some(address), 32).unwrap(), Some(address));
    }
    assert_eq!(heap.len(), 1);
  }

  #[test]
  fn resize_grows_by_copying() {
    let mut heap = heap(1024);

    unsafe {
      let old = heap.allocate(16).unwrap().unwrap();
      for i in 0..16 {
        old.add(i).write(0x10 + i as u8);
      }

      let new = heap.resize(Some(old), 64).unwrap().unwrap();
      assert_ne!(new, old);
      for i in 0..16 {
        assert_eq!(new.add(i).read(), 0x10 + i as u8);
      }

      // The old block is free again but its bytes are still there.
      let blocks: Vec<_> = heap.blocks().collect();
      assert_eq!(blocks.len(), 2);
      assert!(!blocks[0].used);
      assert!(blocks[1].used);
      assert_eq!(old.add(15).read(), 0x1F);
    }
  }

  #[test]
  fn resize_of_none_allocates() {
    let mut heap = heap(1024);

    unsafe {
      let address = heap.resize(None, 24).unwrap().unwrap();
      assert_eq!(usable_size(address), 24);
      assert_eq!(heap.resize(None, 0), Ok(None));
    }
    assert_eq!(heap.len(), 1);
  }

  #[test]
  fn resize_to_zero_releases() {
    let mut heap = heap(1024);

    unsafe {
      let address = heap.allocate(24).unwrap().unwrap();
      assert_eq!(heap.resize(Some(address), 0), Ok(None));
    }
    assert_eq!(heap.stats().free_blocks, 1);
  }

  #[test]
  fn failed_resize_keeps_the_original() {
    let mut heap = heap(128);

    unsafe {
      let address = heap.allocate(16).unwrap().unwrap();
      address.write_bytes(0x77, 16);

      assert_eq!(heap.resize(Some(address), 4096), Err(HeapError::OutOfMemory { requested: 4096 }));

      let blocks: Vec<_> = heap.blocks().collect();
      assert_eq!(blocks.len(), 1);
      assert!(blocks[0].used);
      assert_eq!(address.add(15).read(), 0x77);
    }
  }

  #[test]
  fn retain_policy_never_reuses() {
    let mut heap = Heap::with_policy(ArenaGrower::with_capacity(1024), ReleasePolicy::Retain);

    unsafe {
      let first = heap.allocate(32).unwrap().unwrap();
      heap.release(Some(first));
      assert_eq!(heap.release_with(Some(first), ReleasePolicy::Retain), ReleaseOutcome::Ignored);

      let second = heap.allocate(32).unwrap().unwrap();
      assert_ne!(first, second);
    }

    let stats = heap.stats();
    assert_eq!(stats.blocks, 2);
    assert_eq!(stats.used_blocks, 2);
  }

  #[test]
  fn release_reports_double_free() {
    let mut heap = heap(1024);

    unsafe {
      let address = heap.allocate(8).unwrap().unwrap();
      assert_eq!(heap.release_with(None, ReleasePolicy::Reclaim), ReleaseOutcome::Ignored);
      assert_eq!(heap.release_with(Some(address), ReleasePolicy::Reclaim), ReleaseOutcome::Reclaimed);
      assert_eq!(heap.release_with(Some(address), ReleasePolicy::Reclaim), ReleaseOutcome::AlreadyFree);
    }
  }

  #[test]
  fn stats_account_for_headers() {
    let mut heap = heap(4096);

    unsafe {
      heap.allocate(10).unwrap();
      heap.allocate(24).unwrap();
    }

    let stats = heap.stats();
    assert_eq!(stats.blocks, 2);
    assert_eq!(stats.payload_bytes, 34);
    assert_eq!(stats.used_bytes, 34);
    assert_eq!(
      stats.heap_bytes,
      checked_align_to(10, PAYLOAD_ALIGN).unwrap() + checked_align_to(24, PAYLOAD_ALIGN).unwrap() + 2 * HEADER_SIZE
    );
    assert_eq!(stats.heap_bytes, heap.grower().used());
  }
}
