//! Lock-free single-producer/single-consumer byte queue.
//!
//! A power-of-two ring of bytes. The producer owns a local write cursor and
//! publishes it with release ordering after the record bytes are in place;
//! the consumer acquires it, so a record is never partially visible. Both
//! cursors are monotonically increasing logical offsets; the physical index
//! is `cursor & mask`.
//!
//! Records are framed by their leading `u32` total size and never straddle
//! the ring end: when the run to the end is too short, a 4-byte wrap marker
//! (`u32::MAX`) is written and both sides skip to the ring start. All frames
//! are rounded up to 8 bytes so headers stay aligned.
//!
//! Each side keeps a cached copy of the other's cursor and refreshes it from
//! the atomic only when the cache says the ring is full. Cursors live on
//! separate cache lines.
//!
//! Under the `Unbounded` policy a full ring is sealed and replaced by a
//! larger one; the consumer finishes the sealed ring, then picks the new one
//! up from a channel and the old allocation is freed when its `Arc` drops.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use crossbeam_utils::CachePadded;

/// Frame marker meaning "skip to the start of the ring".
const WRAP_MARKER: u32 = u32::MAX;

const RING_ALIGN: usize = 64;

/// What a producer does when its queue cannot take the next record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
  /// Spin until the consumer frees enough space.
  Block,
  /// Count the record as dropped and return immediately.
  Drop,
  /// Seal the current ring and continue in a larger one.
  Unbounded,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReserveError {
  /// No space under the current policy (after the deadline, for `Block`).
  Full,
  /// The record can never fit a ring of this capacity.
  Overflow,
}

#[inline(always)]
const fn align8(n: usize) -> usize {
  (n + 7) & !7
}

struct Ring {
  buf: *mut u8,
  cap: usize,
  written: CachePadded<AtomicU64>,
  read: CachePadded<AtomicU64>,
  sealed: AtomicBool,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
  fn alloc(cap: usize) -> Arc<Ring> {
    assert!(cap.is_power_of_two(), "queue capacity must be a power of two");
    assert!(cap >= 64, "queue capacity must be at least 64 bytes");
    let layout = Layout::from_size_align(cap, RING_ALIGN).unwrap();
    let buf = unsafe { alloc_zeroed(layout) };
    assert!(!buf.is_null(), "ring allocation failed");
    Arc::new(Ring {
      buf,
      cap,
      written: CachePadded::new(AtomicU64::new(0)),
      read: CachePadded::new(AtomicU64::new(0)),
      sealed: AtomicBool::new(false),
    })
  }

  #[inline(always)]
  fn mask(&self) -> u64 {
    (self.cap - 1) as u64
  }

  #[inline(always)]
  unsafe fn at(&self, idx: u64) -> *mut u8 {
    self.buf.add((idx & self.mask()) as usize)
  }
}

impl Drop for Ring {
  fn drop(&mut self) {
    let layout = Layout::from_size_align(self.cap, RING_ALIGN).unwrap();
    unsafe { dealloc(self.buf, layout) };
  }
}

/// Producer half. Owned by exactly one thread.
pub struct Producer {
  ring: Arc<Ring>,
  head: u64,
  read_cache: u64,
  policy: OverflowPolicy,
  next_tx: Sender<Arc<Ring>>,
}

/// Consumer half. Owned by the backend thread.
pub struct Consumer {
  ring: Arc<Ring>,
  tail: u64,
  next_rx: Receiver<Arc<Ring>>,
}

/// Create a queue with the given ring capacity (bytes, power of two).
pub fn byte_queue(capacity: usize, policy: OverflowPolicy) -> (Producer, Consumer) {
  let ring = Ring::alloc(capacity);
  let (next_tx, next_rx) = crossbeam_channel::unbounded();
  (
    Producer { ring: ring.clone(), head: 0, read_cache: 0, policy, next_tx },
    Consumer { ring, tail: 0, next_rx },
  )
}

impl Producer {
  /// Reserve a contiguous writable frame of exactly `size` bytes. The frame
  /// is not visible to the consumer until [`commit`](Self::commit).
  ///
  /// `deadline` bounds the spin under the `Block` policy; `None` spins
  /// forever.
  pub fn reserve(&mut self, size: usize, deadline: Option<Instant>) -> Result<&mut [u8], ReserveError> {
    debug_assert!(size >= 4);
    let need = align8(size);
    loop {
      // Frames above half the ring cannot be guaranteed to ever fit once
      // the wrap padding is accounted for.
      if need > self.ring.cap / 2 {
        match self.policy {
          OverflowPolicy::Unbounded => {
            self.grow(need);
            continue;
          }
          _ => return Err(ReserveError::Overflow),
        }
      }
      if let Some(idx) = self.try_reserve(need) {
        let frame = unsafe { std::slice::from_raw_parts_mut(self.ring.at(idx), size) };
        return Ok(frame);
      }
      match self.policy {
        OverflowPolicy::Drop => return Err(ReserveError::Full),
        OverflowPolicy::Unbounded => self.grow(need),
        OverflowPolicy::Block => {
          if let Some(d) = deadline {
            if Instant::now() >= d {
              return Err(ReserveError::Full);
            }
          }
          std::hint::spin_loop();
        }
      }
    }
  }

  /// Like [`reserve`](Self::reserve) but spins until the deadline even
  /// under the `Drop` policy. Used for sentinel records that must not be
  /// silently discarded.
  pub fn reserve_blocking(&mut self, size: usize, deadline: Instant) -> Result<&mut [u8], ReserveError> {
    let need = align8(size);
    loop {
      if need > self.ring.cap / 2 {
        match self.policy {
          OverflowPolicy::Unbounded => {
            self.grow(need);
            continue;
          }
          _ => return Err(ReserveError::Overflow),
        }
      }
      if let Some(idx) = self.try_reserve(need) {
        let frame = unsafe { std::slice::from_raw_parts_mut(self.ring.at(idx), size) };
        return Ok(frame);
      }
      if self.policy == OverflowPolicy::Unbounded {
        self.grow(need);
        continue;
      }
      if Instant::now() >= deadline {
        return Err(ReserveError::Full);
      }
      std::hint::spin_loop();
    }
  }

  /// Publish everything reserved since the last commit.
  #[inline(always)]
  pub fn commit(&mut self) {
    self.ring.written.store(self.head, Ordering::Release);
  }

  #[inline(always)]
  pub fn policy(&self) -> OverflowPolicy {
    self.policy
  }

  /// Advance `head` past a wrap marker if needed and claim `need` bytes.
  /// Returns the logical offset of the claimed frame.
  #[inline]
  fn try_reserve(&mut self, need: usize) -> Option<u64> {
    let cap = self.ring.cap as u64;
    let pad = cap - (self.head & self.ring.mask());
    let wrap = (need as u64) > pad;
    let total = need as u64 + if wrap { pad } else { 0 };

    if self.free() < total {
      self.read_cache = self.ring.read.load(Ordering::Acquire);
      if self.free() < total {
        return None;
      }
    }

    if wrap {
      unsafe {
        (self.ring.at(self.head) as *mut u32).write(WRAP_MARKER);
      }
      self.head += pad;
    }
    let idx = self.head;
    self.head += need as u64;
    Some(idx)
  }

  #[inline(always)]
  fn free(&self) -> u64 {
    self.ring.cap as u64 - (self.head - self.read_cache)
  }

  /// Retire the current ring and continue in a larger one.
  fn grow(&mut self, need: usize) {
    let new_cap = (self.ring.cap * 2).max((need * 2).next_power_of_two());
    let fresh = Ring::alloc(new_cap);
    // The consumer switches only after draining the sealed ring, so the
    // new ring must be in the channel before the seal is visible.
    let _ = self.next_tx.send(fresh.clone());
    self.ring.sealed.store(true, Ordering::Release);
    self.ring = fresh;
    self.head = 0;
    self.read_cache = 0;
  }
}

impl Consumer {
  /// Borrow the next committed frame without consuming it. Skips wrap
  /// markers and switches to the successor ring once a sealed ring is
  /// drained.
  pub fn front(&mut self) -> Option<&[u8]> {
    loop {
      let written = self.ring.written.load(Ordering::Acquire);
      while self.tail != written {
        let size = unsafe { (self.ring.at(self.tail) as *const u32).read() };
        if size == WRAP_MARKER {
          let pad = self.ring.cap as u64 - (self.tail & self.ring.mask());
          self.tail += pad;
          self.ring.read.store(self.tail, Ordering::Release);
          continue;
        }
        let frame = unsafe { std::slice::from_raw_parts(self.ring.at(self.tail), size as usize) };
        return Some(frame);
      }
      // Drained; hop to the successor if the producer moved on. Seeing the
      // seal makes the producer's final commit visible, so re-check the
      // write cursor before abandoning this ring.
      if self.ring.sealed.load(Ordering::Acquire) {
        if self.ring.written.load(Ordering::Acquire) != self.tail {
          continue;
        }
        match self.next_rx.try_recv() {
          Ok(next) => {
            self.ring = next;
            self.tail = 0;
            continue;
          }
          Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
        }
      }
      return None;
    }
  }

  /// Release the frame returned by the last [`front`](Self::front).
  pub fn consume(&mut self) {
    let size = unsafe { (self.ring.at(self.tail) as *const u32).read() };
    debug_assert!(size != WRAP_MARKER && size != 0);
    self.tail += align8(size as usize) as u64;
    self.ring.read.store(self.tail, Ordering::Release);
  }
}

unsafe impl Send for Producer {}
unsafe impl Send for Consumer {}
