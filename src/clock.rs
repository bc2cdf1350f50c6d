//! Monotonic timestamp source.
//!
//! Producers stamp records with the raw CPU counter (`read_tsc`); the backend
//! converts counter values to wall-clock nanoseconds through an affine map
//! `wall = base_ns + (tsc - base_tsc) * ns_per_tsc` computed once at startup
//! and recalibrated periodically. The map parameters sit behind a sequence
//! lock so the backend can republish them while `to_epoch_nanos` runs.

use std::sync::atomic::{fence, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Once;
use std::time::SystemTime;

pub const NS_PER_SEC: i64 = 1_000_000_000;

/// Sampling window used by [`init`] to seed the tick rate.
const INIT_CALIBRATE_NANOS: i64 = 10_000_000;

// Affine map parameters, guarded by PARAM_SEQ (odd while a write is in
// flight). The f64 rate travels through its bit pattern.
static PARAM_SEQ: AtomicUsize = AtomicUsize::new(0);
static BASE_TSC: AtomicI64 = AtomicI64::new(0);
static BASE_NS: AtomicI64 = AtomicI64::new(0);
static NS_PER_TSC_BITS: AtomicU64 = AtomicU64::new(0);

// First sample pair, kept as the long baseline so every recalibration
// averages over the whole process lifetime instead of the last interval.
static INIT_TSC: AtomicI64 = AtomicI64::new(0);
static INIT_NS: AtomicI64 = AtomicI64::new(0);

static INIT: Once = Once::new();

/// Seed the counter-to-wall-clock map. Blocks for roughly
/// `INIT_CALIBRATE_NANOS` the first time; later calls are no-ops.
pub fn init() {
  INIT.call_once(|| {
    let (base_tsc, base_ns) = sync_time();
    let expire = base_ns + INIT_CALIBRATE_NANOS;
    while read_sys_nanos() < expire {
      std::thread::yield_now();
    }
    let (later_tsc, later_ns) = sync_time();
    let ns_per_tsc = if later_tsc > base_tsc {
      (later_ns - base_ns) as f64 / (later_tsc - base_tsc) as f64
    } else {
      1.0
    };
    INIT_TSC.store(base_tsc, Ordering::Relaxed);
    INIT_NS.store(base_ns, Ordering::Relaxed);
    save_params(base_tsc, base_ns, ns_per_tsc);
  });
}

/// Resample the tick rate against the system clock. Called by the backend on
/// its `rdtsc_resync_interval` cadence; cheap enough to call unconditionally.
pub fn calibrate() {
  let (tsc, ns) = sync_time();
  let init_tsc = INIT_TSC.load(Ordering::Relaxed);
  let init_ns = INIT_NS.load(Ordering::Relaxed);
  if tsc <= init_tsc {
    return;
  }
  let ns_per_tsc = (ns - init_ns) as f64 / (tsc - init_tsc) as f64;
  save_params(tsc, ns, ns_per_tsc);
}

/// Convert a raw counter value to nanoseconds since the Unix epoch.
#[inline]
pub fn to_epoch_nanos(tsc: i64) -> i64 {
  loop {
    let before = PARAM_SEQ.load(Ordering::Acquire) & !1;
    fence(Ordering::Acquire);
    let base_tsc = BASE_TSC.load(Ordering::Relaxed);
    let base_ns = BASE_NS.load(Ordering::Relaxed);
    let ns_per_tsc = f64::from_bits(NS_PER_TSC_BITS.load(Ordering::Relaxed));
    fence(Ordering::Acquire);
    let after = PARAM_SEQ.load(Ordering::Acquire);
    if before == after {
      let diff_ns = ((tsc - base_tsc) as f64 * ns_per_tsc) as i64;
      return base_ns + diff_ns;
    }
  }
}

fn save_params(base_tsc: i64, base_ns: i64, ns_per_tsc: f64) {
  let seq = PARAM_SEQ.load(Ordering::Relaxed);
  PARAM_SEQ.store(seq + 1, Ordering::Release);
  fence(Ordering::Release);
  BASE_TSC.store(base_tsc, Ordering::Relaxed);
  BASE_NS.store(base_ns, Ordering::Relaxed);
  NS_PER_TSC_BITS.store(ns_per_tsc.to_bits(), Ordering::Relaxed);
  fence(Ordering::Release);
  PARAM_SEQ.store(seq + 2, Ordering::Release);
}

/// Take a tightly paired (counter, wall-clock) sample. Several readings are
/// taken and the pair with the smallest counter spread wins.
fn sync_time() -> (i64, i64) {
  const N: usize = 3;
  let mut tsc = [0i64; N + 1];
  let mut ns = [0i64; N + 1];
  tsc[0] = read_tsc();
  for i in 1..=N {
    ns[i] = read_sys_nanos();
    tsc[i] = read_tsc();
  }
  let mut best = 1;
  for i in 2..=N {
    if tsc[i] - tsc[i - 1] < tsc[best] - tsc[best - 1] {
      best = i;
    }
  }
  ((tsc[best] + tsc[best - 1]) >> 1, ns[best])
}

fn read_sys_nanos() -> i64 {
  SystemTime::now()
    .duration_since(SystemTime::UNIX_EPOCH)
    .map(|d| d.as_nanos() as i64)
    .unwrap_or(0)
}

/// Read the raw monotonic counter.
#[inline(always)]
pub fn read_tsc() -> i64 {
  #[cfg(target_arch = "x86_64")]
  unsafe {
    std::arch::x86_64::_rdtsc() as i64
  }

  #[cfg(target_arch = "aarch64")]
  {
    let tsc: i64;
    unsafe {
      std::arch::asm!("mrs {}, cntvct_el0", out(reg) tsc);
    }
    tsc
  }

  #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
  read_sys_nanos()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counter_is_monotonic() {
    let a = read_tsc();
    let b = read_tsc();
    assert!(b >= a);
  }

  #[test]
  fn epoch_mapping_tracks_wall_clock() {
    init();
    let mapped = to_epoch_nanos(read_tsc());
    let wall = read_sys_nanos();
    // Within 50ms of the system clock right after init.
    assert!((mapped - wall).abs() < 50_000_000, "mapped={mapped} wall={wall}");
  }

  #[test]
  fn calibrate_keeps_mapping_sane() {
    init();
    calibrate();
    let mapped = to_epoch_nanos(read_tsc());
    let wall = read_sys_nanos();
    assert!((mapped - wall).abs() < 50_000_000);
  }
}
