/// Rounds `value` up to the machine word size.
///
/// # Examples
///
/// ```rust
/// use brkalloc::align;
///
/// match std::mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, ::core::mem::size_of::<usize>())
  };
}

/// Rounds `value` up to `align`, which must be a power of two.
///
/// ```rust
/// use brkalloc::align_to;
///
/// assert_eq!(align_to!(17, 16), 32);
/// assert_eq!(align_to!(32, 16), 32);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Rounds `value` up to `align` (a power of two), returning `None` instead of
/// wrapping when the rounded value does not fit in a `usize`.
#[inline]
pub fn checked_align_to(
  value: usize,
  align: usize,
) -> Option<usize> {
  let mask = align - 1;
  value.checked_add(mask).map(|v| v & !mask)
}
