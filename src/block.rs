use std::{mem, ptr::NonNull};

/// Header placed in front of every payload handed out by the heap.
///
/// ```text
///   ┌───────────────────────┬────────────────────────────────┐
///   │    Block Header       │         Payload                │
///   │  size | used | next   │       size bytes usable        │
///   └───────────────────────┴────────────────────────────────┘
///                           ▲
///                           └── Address returned to the caller
/// ```
///
/// `size` and the header's address are fixed once the block is linked into the
/// chain. Only `used` and `next` change afterwards.
///
/// The header is aligned to 16 bytes so payloads satisfy every layout the
/// standard collections ask for (hashbrown's control groups need 16).
#[repr(C, align(16))]
pub(crate) struct Block {
  pub size: usize,
  pub used: bool,
  pub next: Option<NonNull<Block>>,
}

/// Bytes of metadata in front of every payload.
pub(crate) const HEADER_SIZE: usize = mem::size_of::<Block>();

/// Alignment guaranteed for every payload address.
pub(crate) const PAYLOAD_ALIGN: usize = mem::align_of::<Block>();

const _: () = assert!(PAYLOAD_ALIGN >= 16 && HEADER_SIZE % PAYLOAD_ALIGN == 0);

impl Block {
  pub fn new(
    size: usize,
    used: bool,
    next: Option<NonNull<Block>>,
  ) -> Self {
    Self { size, used, next }
  }

  /// Returns the first payload byte after `block`.
  ///
  /// # Safety
  ///
  /// `block` must point to a header written by the heap.
  #[inline]
  pub unsafe fn payload(block: NonNull<Block>) -> NonNull<u8> {
    unsafe { block.cast::<u8>().add(HEADER_SIZE) }
  }

  /// Returns the header that precedes `payload`.
  ///
  /// # Safety
  ///
  /// `payload` must be an address previously returned by the heap, so that a
  /// header sits exactly `HEADER_SIZE` bytes before it.
  #[inline]
  pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Block> {
    unsafe { payload.sub(HEADER_SIZE).cast::<Block>() }
  }
}
