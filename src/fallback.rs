//! The FIFO ticket lock serializing the non-transactional fallback path.
//!
//! Transactions never take this lock. Instead they read it ([`TicketLock::is_held`]) right after
//! starting, which puts the lock's cache line in their read set: a later [`acquire`] by a thread
//! entering the fallback path is then a genuine conflict that aborts every such transaction.
//!
//! [`acquire`]: TicketLock::acquire

use core::{
    hint,
    sync::atomic::{
        AtomicU32,
        Ordering::{Acquire, Relaxed, Release},
    },
};
use crossbeam_utils::CachePadded;
use lock_api::{GuardNoSend, RawMutex, RawMutexFair};

/// A mutex built on a `TicketLock`, for data that is only ever touched on the fallback path.
pub type FallbackMutex<T> = lock_api::Mutex<TicketLock, T>;

/// RAII guard of a `FallbackMutex`.
pub type FallbackMutexGuard<'a, T> = lock_api::MutexGuard<'a, TicketLock, T>;

// `ticket` and `turn` share a cache line, so subscribing to the lock costs one line of read set.
#[derive(Debug)]
struct Counters {
    ticket: AtomicU32,
    turn:   AtomicU32,
}

/// A strictly FIFO spin lock.
///
/// Tickets are handed out with add-and-fetch, so the first ticket is 1 and the lock starts with
/// `turn == 1`. The lock is held exactly when some ticket has been issued whose matching
/// [`release`](TicketLock::release) has not happened yet.
#[derive(Debug)]
pub struct TicketLock {
    counters: CachePadded<Counters>,
}

impl Default for TicketLock {
    #[inline]
    fn default() -> Self {
        TicketLock::new()
    }
}

impl TicketLock {
    #[inline]
    pub const fn new() -> Self {
        TicketLock {
            counters: CachePadded::new(Counters {
                ticket: AtomicU32::new(0),
                turn:   AtomicU32::new(1),
            }),
        }
    }

    /// Takes a ticket and spins until it is served. Returns the ticket.
    #[inline]
    pub fn acquire(&self) -> u32 {
        let ticket = self.counters.ticket.fetch_add(1, Relaxed).wrapping_add(1);
        if unlikely!(self.counters.turn.load(Acquire) != ticket) {
            self.wait_for_turn(ticket)
        }
        ticket
    }

    #[cold]
    #[inline(never)]
    fn wait_for_turn(&self, ticket: u32) {
        while self.counters.turn.load(Acquire) != ticket {
            hint::spin_loop()
        }
    }

    /// Takes the lock only if nobody holds or waits for it.
    #[inline]
    pub fn try_acquire(&self) -> Option<u32> {
        let turn = self.counters.turn.load(Acquire);
        self.counters
            .ticket
            .compare_exchange(turn.wrapping_sub(1), turn, Acquire, Relaxed)
            .ok()
            .map(|_| turn)
    }

    /// Returns true if the lock is held or has waiters.
    ///
    /// Plain loads only, so this may be called inside a transaction to subscribe to the lock.
    #[inline]
    pub fn is_held(&self) -> bool {
        let turn = self.counters.turn.load(Acquire);
        let ticket = self.counters.ticket.load(Acquire);
        (ticket.wrapping_sub(turn) as i32) >= 0
    }

    /// Serves the next ticket.
    #[inline]
    pub fn release(&self) {
        debug_assert!(self.is_held(), "attempt to release an unlocked `TicketLock`");
        let _prev = self.counters.turn.fetch_add(1, Release);
    }

    /// The most recently issued ticket.
    #[inline]
    pub fn ticket(&self) -> u32 {
        self.counters.ticket.load(Relaxed)
    }

    /// The ticket currently being served.
    #[inline]
    pub fn turn(&self) -> u32 {
        self.counters.turn.load(Relaxed)
    }
}

unsafe impl RawMutex for TicketLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: TicketLock = TicketLock::new();
    type GuardMarker = GuardNoSend;

    #[inline]
    fn lock(&self) {
        let _ticket = self.acquire();
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.try_acquire().is_some()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.release()
    }
}

unsafe impl RawMutexFair for TicketLock {
    #[inline]
    unsafe fn unlock_fair(&self) {
        // Ticket locks are always fair.
        self.release()
    }
}
