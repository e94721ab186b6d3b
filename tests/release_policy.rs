use brkalloc::{
  ArenaGrower, Heap, LockedHeap, ReleasePolicy,
  config::{self, RELEASE_ENV},
};

// One test per binary: the process-wide policy is resolved once and cached.
#[test]
fn policy_comes_from_the_environment_and_can_be_overridden() {
  // SAFETY: this is the only test in the binary, so no other thread reads the
  // environment concurrently.
  unsafe { std::env::set_var(RELEASE_ENV, "Retain") };

  assert_eq!(config::release_policy(), ReleasePolicy::Retain);

  let heap = LockedHeap::new(ArenaGrower::with_capacity(4096));
  assert_eq!(heap.fixed_policy(), None);

  let first = heap.allocate(32).unwrap().unwrap();
  unsafe { heap.release(Some(first)) };
  let second = heap.allocate(32).unwrap().unwrap();
  assert_ne!(first, second);
  assert_eq!(heap.stats().free_blocks, 0);

  config::set_release_policy(ReleasePolicy::Reclaim);
  assert_eq!(config::release_policy(), ReleasePolicy::Reclaim);

  unsafe { heap.release(Some(second)) };
  assert_eq!(heap.allocate(16).unwrap(), Some(second));

  let mut plain = Heap::new(ArenaGrower::with_capacity(1024));
  assert_eq!(plain.policy(), ReleasePolicy::Reclaim);
  unsafe {
    let address = plain.allocate(8).unwrap();
    plain.release(address);
  }
  assert_eq!(plain.stats().free_blocks, 1);
}
