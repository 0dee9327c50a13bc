//! Shared barrier state: the epoch counter and the arrival countdown.

use core::{
    num::NonZeroU32,
    sync::atomic::{
        AtomicU32,
        Ordering::{AcqRel, Acquire, Relaxed, Release},
    },
};
use crossbeam_utils::CachePadded;

/// The first epoch. Descriptors start working toward it.
pub const FIRST_EPOCH: u32 = 1;

/// Result of arriving at a barrier instance.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Arrival {
    /// This thread arrived last and advanced the epoch to the contained value.
    Last(u32),
    /// Other threads have yet to arrive.
    Waiting,
}

/// Epoch counter plus arrival countdown for one group of threads.
///
/// `epoch` only ever grows. `remaining` stays within `[0, thread_count]`; the thread that takes it to
/// zero alone resets it and then advances `epoch`.
#[derive(Debug)]
pub struct GlobalBarrierState {
    epoch:        CachePadded<AtomicU32>,
    remaining:    CachePadded<AtomicU32>,
    thread_count: NonZeroU32,
}

impl GlobalBarrierState {
    #[inline]
    pub fn new(thread_count: NonZeroU32) -> Self {
        GlobalBarrierState {
            epoch: CachePadded::new(AtomicU32::new(FIRST_EPOCH)),
            remaining: CachePadded::new(AtomicU32::new(thread_count.get())),
            thread_count,
        }
    }

    #[inline]
    pub fn thread_count(&self) -> u32 {
        self.thread_count.get()
    }

    /// The current epoch.
    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch.load(Acquire)
    }

    /// Threads that have not arrived at the current barrier instance yet.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Relaxed)
    }

    /// Returns true once the epoch has reached `order`.
    #[inline]
    pub fn reached(&self, order: u32) -> bool {
        // Wrapping comparison: epochs are only ever compared within a few generations of each
        // other.
        (self.epoch().wrapping_sub(order) as i32) >= 0
    }

    /// Registers the calling thread's arrival at the current barrier instance.
    #[inline]
    pub fn arrive(&self) -> Arrival {
        let prev = self.remaining.fetch_sub(1, AcqRel);
        debug_assert!(
            prev != 0,
            "more threads arrived at the barrier than the group was created with"
        );
        if prev == 1 {
            self.remaining.store(self.thread_count.get(), Relaxed);
            let epoch = self.epoch.fetch_add(1, Release).wrapping_add(1);
            Arrival::Last(epoch)
        } else {
            Arrival::Waiting
        }
    }

    /// Spins until the epoch reaches `order`.
    #[inline]
    pub fn wait_for(&self, order: u32) {
        while !self.reached(order) {
            core::hint::spin_loop()
        }
    }
}
