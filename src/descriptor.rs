//! Per-thread transaction descriptor.

use crate::{barrier::FIRST_EPOCH, stats::XactId};
use core::time::Duration;
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// Where a thread is in the protocol.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum TxState {
    /// No transaction is open and the fallback lock is not held.
    Idle,
    /// A guarded section is running inside a hardware transaction.
    InTransaction,
    /// A barrier was crossed speculatively; its hardware transaction is still open.
    Speculative,
    /// A guarded section is running non-transactionally under the fallback lock.
    InFallback,
}

impl TxState {
    #[inline]
    pub fn is_speculative(self) -> bool {
        self == TxState::Speculative
    }
}

/// The state a thread carries through the protocol. Owned by one thread, never shared; aligned so
/// that descriptors of neighbouring threads never share a cache line.
#[repr(align(64))]
#[derive(Debug)]
pub struct TransactionDescriptor {
    thread:                 usize,
    pub(crate) local_order: u32,
    pub(crate) retries:     u32,
    pub(crate) state:       TxState,
    speculation_budget:     u32,
    max_speculation:        u32,
    pub(crate) xact:        XactId,
    rng:                    SmallRng,
}

impl TransactionDescriptor {
    pub fn new(thread: usize, max_speculation: u32) -> Self {
        debug_assert!(max_speculation > 0, "speculation budget of 0");
        TransactionDescriptor {
            thread,
            local_order: FIRST_EPOCH,
            retries: 0,
            state: TxState::Idle,
            speculation_budget: max_speculation,
            max_speculation,
            xact: XactId(0),
            rng: SmallRng::seed_from_u64(thread as u64),
        }
    }

    #[inline]
    pub fn thread(&self) -> usize {
        self.thread
    }

    /// The epoch this thread is working toward.
    #[inline]
    pub fn local_order(&self) -> u32 {
        self.local_order
    }

    /// Failed hardware attempts since the last commit or fallback.
    #[inline]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[inline]
    pub fn state(&self) -> TxState {
        self.state
    }

    /// The guarded section most recently begun.
    #[inline]
    pub fn xact(&self) -> XactId {
        self.xact
    }

    /// Crossings left that may defer the speculative wait.
    #[inline]
    pub fn speculation_budget(&self) -> u32 {
        self.speculation_budget
    }

    #[inline]
    pub(crate) fn refill_budget(&mut self) {
        self.speculation_budget = self.max_speculation
    }

    /// Consumes one unit of the budget. Returns true once it is exhausted.
    #[inline]
    pub(crate) fn spend_budget(&mut self) -> bool {
        self.speculation_budget = self.speculation_budget.saturating_sub(1);
        self.speculation_budget == 0
    }

    #[inline]
    pub(crate) fn failed_attempt(&mut self) -> u32 {
        self.retries = self.retries.saturating_add(1);
        self.retries
    }

    /// A uniformly random delay in `0..=max`, microsecond granularity.
    #[inline]
    pub(crate) fn backoff_delay(&mut self, max: Duration) -> Duration {
        let max = max.as_micros().min(u128::from(u64::MAX)) as u64;
        Duration::from_micros(self.rng.gen_range(0..=max))
    }
}
