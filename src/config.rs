//! Release policy configuration.
//!
//! The process-wide policy is read from the `BRKALLOC_RELEASE` environment
//! variable the first time it is needed:
//! - `reclaim` (default): `release` marks the block free so first-fit can hand
//!   it out again.
//! - `retain`: `release` does nothing. Every block stays used for the life of
//!   the process and memory is never reused.

use std::sync::atomic::{AtomicU8, Ordering};

/// Environment variable holding the release policy.
pub const RELEASE_ENV: &str = "BRKALLOC_RELEASE";

/// What `release` does with a block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleasePolicy {
  /// Flip the block's `used` flag so it can be reused.
  #[default]
  Reclaim,
  /// Leave the block marked used.
  Retain,
}

impl ReleasePolicy {
  /// Parses a policy name, case-insensitively. Unknown names give the default.
  #[must_use]
  pub fn from_str_loose(s: &str) -> Self {
    match s.trim().to_ascii_lowercase().as_str() {
      "retain" | "keep" | "noop" | "leak" => Self::Retain,
      "reclaim" | "free" | "reuse" => Self::Reclaim,
      _ => Self::default(),
    }
  }

  #[must_use]
  pub const fn reclaims(self) -> bool {
    matches!(self, Self::Reclaim)
  }
}

// 0=unresolved, 1=Reclaim, 2=Retain, 255=resolving.
// Reading the environment allocates, and when this crate backs the global
// allocator that allocation re-enters `release_policy`. While resolving, every
// caller gets `Retain`: keeping a block used is safe under either policy.
static CACHED_POLICY: AtomicU8 = AtomicU8::new(POLICY_UNRESOLVED);

const POLICY_UNRESOLVED: u8 = 0;
const POLICY_RECLAIM: u8 = 1;
const POLICY_RETAIN: u8 = 2;
const POLICY_RESOLVING: u8 = 255;

fn policy_to_u8(policy: ReleasePolicy) -> u8 {
  match policy {
    ReleasePolicy::Reclaim => POLICY_RECLAIM,
    ReleasePolicy::Retain => POLICY_RETAIN,
  }
}

fn u8_to_policy(v: u8) -> ReleasePolicy {
  match v {
    POLICY_RETAIN | POLICY_RESOLVING => ReleasePolicy::Retain,
    _ => ReleasePolicy::Reclaim,
  }
}

fn resolve_from_env() -> ReleasePolicy {
  std::env::var(RELEASE_ENV)
    .map(|raw| ReleasePolicy::from_str_loose(&raw))
    .unwrap_or_default()
}

/// Returns the process-wide release policy, resolving it from the environment
/// on first use.
#[must_use]
pub fn release_policy() -> ReleasePolicy {
  let cached = CACHED_POLICY.load(Ordering::Acquire);

  if cached != POLICY_UNRESOLVED {
    return u8_to_policy(cached);
  }

  if CACHED_POLICY
    .compare_exchange(
      POLICY_UNRESOLVED,
      POLICY_RESOLVING,
      Ordering::AcqRel,
      Ordering::Acquire,
    )
    .is_err()
  {
    // Another thread is resolving or has already resolved.
    return u8_to_policy(CACHED_POLICY.load(Ordering::Acquire));
  }

  let policy = resolve_from_env();
  // A concurrent `set_release_policy` wins over the environment.
  let _ = CACHED_POLICY.compare_exchange(
    POLICY_RESOLVING,
    policy_to_u8(policy),
    Ordering::AcqRel,
    Ordering::Acquire,
  );
  u8_to_policy(CACHED_POLICY.load(Ordering::Acquire))
}

/// Overrides the process-wide release policy.
pub fn set_release_policy(policy: ReleasePolicy) {
  CACHED_POLICY.store(policy_to_u8(policy), Ordering::Release);
}
