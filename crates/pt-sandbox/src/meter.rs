// meter.rs - Heap metering for plugin handler threads.
//
// Every handler runs on its own OS thread. While a `MeterScope` is active
// on that thread, the global allocator charges each allocation and
// deallocation made on it to the execution's `MemoryMeter`. The sandbox
// watches the meter from the caller's side and ends the execution once the
// net heap growth passes `max_memory_mb`, so a handler cannot dodge the
// ceiling by allocating without asking.
//
// Allocations made on other threads (blocking pools, child processes) are
// not charged here; child processes are bounded by RLIMIT_AS instead.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// `System` plus per-thread charging to the active `MemoryMeter`.
pub struct MeteredAllocator;

#[global_allocator]
static GLOBAL: MeteredAllocator = MeteredAllocator;

thread_local! {
    static ACTIVE: Cell<*const MemoryMeter> = const { Cell::new(std::ptr::null()) };
}

// SAFETY: every call is forwarded unchanged to `System`; charging only
// touches atomics and a const-initialized thread local, so it never
// allocates or unwinds.
unsafe impl GlobalAlloc for MeteredAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            charge(layout.size() as i64);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            charge(layout.size() as i64);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        charge(-(layout.size() as i64));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            charge(new_size as i64 - layout.size() as i64);
        }
        new_ptr
    }
}

fn charge(delta: i64) {
    let _ = ACTIVE.try_with(|slot| {
        let meter = slot.get();
        if !meter.is_null() {
            // SAFETY: the pointer is only set by `MeterScope`, which holds an
            // Arc to the meter and clears the slot before releasing it.
            unsafe { &*meter }.charge(delta);
        }
    });
}

/// Net heap growth of one execution's handler thread.
#[derive(Debug)]
pub struct MemoryMeter {
    limit: i64,
    current: AtomicI64,
    peak: AtomicI64,
    exceeded: AtomicBool,
}

impl MemoryMeter {
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            limit: i64::try_from(limit_bytes).unwrap_or(i64::MAX),
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            exceeded: AtomicBool::new(false),
        }
    }

    fn charge(&self, delta: i64) {
        let now = self.current.fetch_add(delta, Ordering::Relaxed) + delta;
        if delta > 0 {
            self.peak.fetch_max(now, Ordering::Relaxed);
            if now > self.limit {
                self.exceeded.store(true, Ordering::Release);
            }
        }
    }

    /// True once the net growth has passed the limit at any point.
    pub fn exceeded(&self) -> bool {
        self.exceeded.load(Ordering::Acquire)
    }

    /// Highest net growth seen so far, in bytes.
    pub fn peak_bytes(&self) -> u64 {
        self.peak.load(Ordering::Relaxed).max(0) as u64
    }

    /// Charge allocations made on the current thread to this meter until
    /// the returned scope is dropped.
    pub fn enter(self: &Arc<Self>) -> MeterScope {
        let meter = Arc::clone(self);
        ACTIVE.with(|slot| slot.set(Arc::as_ptr(&meter)));
        MeterScope { meter }
    }
}

/// Keeps a meter active on the thread that created it.
pub struct MeterScope {
    meter: Arc<MemoryMeter>,
}

impl MeterScope {
    pub fn meter(&self) -> &MemoryMeter {
        &self.meter
    }
}

impl Drop for MeterScope {
    fn drop(&mut self) {
        let _ = ACTIVE.try_with(|slot| slot.set(std::ptr::null()));
    }
}
