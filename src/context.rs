//! Per-thread producer state.
//!
//! Each application thread lazily owns up to one queue per overflow policy
//! (loggers with different policies on the same thread get different
//! queues, keeping every queue single-producer). Queues register with the
//! backend through the registry's intake channel and are torn down only
//! after the backend has drained them: thread exit just marks them retired.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::SizeCache;
use crate::registry;
use crate::spsc::{self, OverflowPolicy, Producer};

/// Handed to the backend when a producer queue comes up.
pub(crate) struct QueueReg {
  pub cons: spsc::Consumer,
  pub thread_id: u32,
  pub thread_name: Arc<str>,
  pub dropped: Arc<AtomicU64>,
  pub retired: Arc<AtomicBool>,
}

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

struct Slot {
  prod: Producer,
  dropped: Arc<AtomicU64>,
}

struct ThreadContext {
  thread_id: u32,
  thread_name: Arc<str>,
  scratch: SizeCache,
  slots: [Option<Slot>; 3],
  retired: Arc<AtomicBool>,
}

impl ThreadContext {
  fn new() -> ThreadContext {
    let name: Arc<str> = std::thread::current().name().unwrap_or("").into();
    ThreadContext {
      thread_id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
      thread_name: name,
      scratch: SizeCache::default(),
      slots: [None, None, None],
      retired: Arc::new(AtomicBool::new(false)),
    }
  }
}

impl Drop for ThreadContext {
  fn drop(&mut self) {
    self.retired.store(true, Ordering::Release);
  }
}

#[inline(always)]
fn policy_index(policy: OverflowPolicy) -> usize {
  match policy {
    OverflowPolicy::Block => 0,
    OverflowPolicy::Drop => 1,
    OverflowPolicy::Unbounded => 2,
  }
}

/// Create and register the queue for `policy` on first use.
fn ensure_slot<'a>(
  slots: &'a mut [Option<Slot>; 3],
  policy: OverflowPolicy,
  thread_id: u32,
  thread_name: &Arc<str>,
  retired: &Arc<AtomicBool>,
) -> Option<&'a mut Slot> {
  let idx = policy_index(policy);
  if slots[idx].is_none() {
    let (prod, cons) = spsc::byte_queue(registry::queue_capacity(), policy);
    let dropped = Arc::new(AtomicU64::new(0));
    let ok = registry::register_queue(QueueReg {
      cons,
      thread_id,
      thread_name: thread_name.clone(),
      dropped: dropped.clone(),
      retired: retired.clone(),
    });
    if !ok {
      return None;
    }
    slots[idx] = Some(Slot { prod, dropped });
  }
  slots[idx].as_mut()
}

thread_local! {
  static CTX: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
}

/// Run `f` with this thread's producer for `policy`. Returns `None` when
/// the backend is not accepting registrations.
#[inline]
pub(crate) fn with_producer<R>(
  policy: OverflowPolicy,
  f: impl FnOnce(&mut Producer, &mut SizeCache, &AtomicU64) -> R,
) -> Option<R> {
  CTX.with(|cell| {
    let mut borrow = cell.borrow_mut();
    let ctx = borrow.get_or_insert_with(ThreadContext::new);
    let ThreadContext { thread_id, thread_name, scratch, slots, retired } = ctx;
    let slot = ensure_slot(slots, policy, *thread_id, thread_name, retired)?;
    Some(f(&mut slot.prod, scratch, &slot.dropped))
  })
}

/// Count a drop against this thread's queue for `policy`, if one exists.
/// Used when producers observe the stop flag.
pub(crate) fn count_drop(policy: OverflowPolicy) {
  CTX.with(|cell| {
    if let Some(ctx) = cell.borrow_mut().as_mut() {
      if let Some(slot) = ctx.slots[policy_index(policy)].as_mut() {
        slot.dropped.fetch_add(1, Ordering::Relaxed);
      }
    }
  });
}
