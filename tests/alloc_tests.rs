//! The hot path must not allocate after warmup: encoding goes into
//! pre-allocated ring space and the size scratch list is reused. A
//! thread-local counting allocator isolates the producing thread from the
//! backend's own (expected) allocations.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::time::Duration;

use flashlog::{info, LoggerConfig, NullSink};

struct CountingAllocator;

thread_local! {
  static ALLOCATIONS: Cell<u64> = const { Cell::new(0) };
}

unsafe impl GlobalAlloc for CountingAllocator {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    ALLOCATIONS.with(|c| c.set(c.get() + 1));
    System.alloc(layout)
  }

  unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
    System.dealloc(ptr, layout)
  }

  unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    ALLOCATIONS.with(|c| c.set(c.get() + 1));
    System.realloc(ptr, layout, new_size)
  }
}

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

#[test]
fn hot_path_is_allocation_free_after_warmup() {
  flashlog::start().unwrap();
  let sink = flashlog::create_or_get_sink::<NullSink>("null", ()).unwrap();
  let logger = flashlog::create_or_get_logger("hot", vec![sink], LoggerConfig::default()).unwrap();

  // Warmup creates the thread queue, registers it and sizes the scratch
  // list.
  let payload = "warm";
  for i in 0..1000 {
    info!(logger, "warmup {} {} {}", i, payload, 3.5);
  }
  assert!(flashlog::flush_sync(logger, Duration::from_secs(5)));

  let before = ALLOCATIONS.with(|c| c.get());
  for i in 0..10_000 {
    info!(logger, "steady {} {} {}", i, payload, 3.5);
  }
  let after = ALLOCATIONS.with(|c| c.get());
  assert_eq!(after, before, "producer allocated on the hot path");

  flashlog::stop().unwrap();
}
