//! Transaction statistics.
//!
//! The protocol reports every commit, fallback and observed abort to a [`StatsSink`]. `()` discards
//! everything; [`Stats`] keeps per thread, per guarded section counters.

use crate::htm::{AbortCause, AbortKind, LOCK_TAKEN, VALIDATION_ERROR};
use crossbeam_utils::CachePadded;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::fmt::{self, Debug, Formatter};

/// Identifies a guarded section in statistics.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash, Debug)]
pub struct XactId(pub u32);

/// Statistics id of the transactions opened by speculative barrier crossings.
pub const SPEC_XACT: XactId = XactId(u32::MAX);

impl XactId {
    #[inline]
    pub fn is_speculative(self) -> bool {
        self == SPEC_XACT
    }
}

impl fmt::Display for XactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_speculative() {
            f.write_str("spec")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Receiver of protocol events.
///
/// Called synchronously from the participating threads, never from inside an open transaction.
/// Implementations must not block for long: every call sits on the barrier's critical path.
pub trait StatsSink: Sync {
    /// A guarded section or speculative transaction committed in hardware after `retries` failed
    /// attempts.
    fn on_commit(&self, thread: usize, xact: XactId, retries: u32);

    /// A guarded section completed on the fallback lock after `retries` failed attempts.
    fn on_fallback(&self, thread: usize, xact: XactId, retries: u32);

    /// An attempt failed with `cause`.
    fn on_abort(&self, thread: usize, xact: XactId, cause: AbortCause);
}

impl StatsSink for () {
    #[inline(always)]
    fn on_commit(&self, _: usize, _: XactId, _: u32) {}

    #[inline(always)]
    fn on_fallback(&self, _: usize, _: XactId, _: u32) {}

    #[inline(always)]
    fn on_abort(&self, _: usize, _: XactId, _: AbortCause) {}
}

impl<'a, T: StatsSink + ?Sized> StatsSink for &'a T {
    #[inline]
    fn on_commit(&self, thread: usize, xact: XactId, retries: u32) {
        (**self).on_commit(thread, xact, retries)
    }

    #[inline]
    fn on_fallback(&self, thread: usize, xact: XactId, retries: u32) {
        (**self).on_fallback(thread, xact, retries)
    }

    #[inline]
    fn on_abort(&self, thread: usize, xact: XactId, cause: AbortCause) {
        (**self).on_abort(thread, xact, cause)
    }
}

#[derive(Copy, Clone, Default, Debug)]
struct MinMaxTotal {
    min:   u64,
    max:   u64,
    total: u64,
}

/// Distribution of a recorded quantity.
#[derive(Clone, Default)]
pub struct Size {
    min_max_total: Option<MinMaxTotal>,
    count:         u64,
}

impl Debug for Size {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Size")
            .field("count", &self.count)
            .field("min", &self.min())
            .field("max", &self.max())
            .field("total", &self.total())
            .field("avg", &self.mean())
            .finish()
    }
}

impl Size {
    fn record(&mut self, size: u64) {
        self.count += 1;
        if let Some(ref mut min_max_total) = &mut self.min_max_total {
            min_max_total.min = min_max_total.min.min(size);
            min_max_total.max = min_max_total.max.max(size);
            min_max_total.total += size;
        } else {
            self.min_max_total = Some(MinMaxTotal {
                min:   size,
                max:   size,
                total: size,
            });
        }
    }

    fn merge(&mut self, rhs: &Self) {
        self.count += rhs.count;
        self.min_max_total = match (self.min_max_total, rhs.min_max_total) {
            (Some(a), Some(b)) => Some(MinMaxTotal {
                min:   a.min.min(b.min),
                max:   a.max.max(b.max),
                total: a.total + b.total,
            }),
            (a, b) => a.or(b),
        };
    }

    /// Number of recorded values.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn min(&self) -> Option<u64> {
        self.min_max_total.map(|x| x.min)
    }

    #[inline]
    pub fn max(&self) -> Option<u64> {
        self.min_max_total.map(|x| x.max)
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.min_max_total.unwrap_or_default().total
    }

    #[inline]
    pub fn mean(&self) -> Option<f64> {
        self.min_max_total
            .map(|x| x.total as f64 / self.count as f64)
    }
}

/// Number of occurrences.
#[derive(Clone, Default, Debug)]
pub struct Event {
    count: u64,
}

impl Event {
    fn happened(&mut self) {
        self.count += 1
    }

    fn merge(&mut self, rhs: &Self) {
        self.count += rhs.count
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }
}

macro_rules! stats {
    ($($(#[$attr:meta])* $names:ident: $kinds:tt),* $(,)*) => {
        /// Counters of one guarded section on one thread, or a merge of several.
        #[derive(Clone, Default, Debug)]
        pub struct XactStats {
            $($(#[$attr])* pub $names: $kinds),*
        }

        impl XactStats {
            pub fn merge(&mut self, rhs: &Self) {
                $(self.$names.merge(&rhs.$names);)*
            }
        }
    };
}

stats! {
    /// Every observed abort.
    aborts:                   Event,

    /// Aborts requested by an explicit abort, whatever the code.
    explicit:                 Event,

    /// Explicit aborts caused by finding the fallback lock held right after starting.
    lock_taken:               Event,

    /// Explicit aborts with the validation error code.
    validation:               Event,

    /// Aborts the hardware flagged as unlikely to succeed on retry.
    persistent:               Event,

    conflict:                 Event,
    capacity:                 Event,
    nesting:                  Event,
    self_induced:             Event,
    non_transactional:        Event,
    instruction_fetch:        Event,
    translation_invalidation: Event,
    disallowed:               Event,
    debug:                    Event,
    implementation_specific:  Event,

    /// Aborts whose status named no reason.
    unknown:                  Event,

    /// Failed attempts per hardware commit. The count is the number of commits.
    commit_retries:           Size,

    /// Failed attempts per fallback. The count is the number of fallbacks.
    fallback_retries:         Size,
}

impl XactStats {
    #[inline]
    pub fn commits(&self) -> u64 {
        self.commit_retries.count()
    }

    #[inline]
    pub fn fallbacks(&self) -> u64 {
        self.fallback_retries.count()
    }

    fn record_abort(&mut self, cause: AbortCause) {
        self.aborts.happened();
        if cause.persistent {
            self.persistent.happened();
        }
        match cause.kind {
            AbortKind::Explicit(code) => {
                self.explicit.happened();
                match code {
                    LOCK_TAKEN => self.lock_taken.happened(),
                    VALIDATION_ERROR => self.validation.happened(),
                    _ => {}
                }
            }
            AbortKind::Conflict => self.conflict.happened(),
            AbortKind::CapacityOverflow => self.capacity.happened(),
            AbortKind::NestingOverflow => self.nesting.happened(),
            AbortKind::SelfInducedConflict => self.self_induced.happened(),
            AbortKind::NonTransactionalConflict => self.non_transactional.happened(),
            AbortKind::InstructionFetchConflict => self.instruction_fetch.happened(),
            AbortKind::TranslationInvalidation => self.translation_invalidation.happened(),
            AbortKind::Disallowed => self.disallowed.happened(),
            AbortKind::Debug => self.debug.happened(),
            AbortKind::ImplementationSpecific => self.implementation_specific.happened(),
            AbortKind::Unknown => self.unknown.happened(),
        }
    }
}

type ThreadSlot = CachePadded<Mutex<FxHashMap<XactId, XactStats>>>;

/// A `StatsSink` keeping [`XactStats`] per thread and guarded section.
///
/// Each thread only ever locks its own slot, so the locks are uncontended unless the counters are
/// read while the group is running.
pub struct Stats {
    threads: Box<[ThreadSlot]>,
}

impl Debug for Stats {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Stats")
            .field("thread_count", &self.threads.len())
            .finish()
    }
}

impl Stats {
    pub fn new(thread_count: usize) -> Self {
        Stats {
            threads: (0..thread_count)
                .map(|_| CachePadded::new(Mutex::new(FxHashMap::default())))
                .collect(),
        }
    }

    #[inline]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    #[inline]
    fn with_xact<F: FnOnce(&mut XactStats)>(&self, thread: usize, xact: XactId, f: F) {
        match self.threads.get(thread) {
            Some(slot) => f(slot.lock().entry(xact).or_default()),
            None => debug_assert!(false, "thread {} has no stats slot", thread),
        }
    }

    /// Counters of `xact` on `thread`.
    pub fn xact(&self, thread: usize, xact: XactId) -> XactStats {
        self.threads
            .get(thread)
            .and_then(|slot| slot.lock().get(&xact).cloned())
            .unwrap_or_default()
    }

    /// Counters of every section on `thread`, merged.
    pub fn thread(&self, thread: usize) -> XactStats {
        let mut merged = XactStats::default();
        if let Some(slot) = self.threads.get(thread) {
            for stats in slot.lock().values() {
                merged.merge(stats)
            }
        }
        merged
    }

    /// Counters of `xact` across all threads.
    pub fn xact_total(&self, xact: XactId) -> XactStats {
        let mut merged = XactStats::default();
        for slot in self.threads.iter() {
            if let Some(stats) = slot.lock().get(&xact) {
                merged.merge(stats)
            }
        }
        merged
    }

    /// Every counter, merged.
    pub fn total(&self) -> XactStats {
        let mut merged = XactStats::default();
        for thread in 0..self.threads.len() {
            merged.merge(&self.thread(thread))
        }
        merged
    }

    /// Sorted ids of every section that reported at least one event.
    pub fn xacts(&self) -> Vec<XactId> {
        let mut xacts: Vec<XactId> = self
            .threads
            .iter()
            .flat_map(|slot| slot.lock().keys().copied().collect::<Vec<_>>())
            .collect();
        xacts.sort_unstable();
        xacts.dedup();
        xacts
    }

    /// Prints a per section summary followed by the totals.
    pub fn print_summary(&self) {
        fn line(name: &str, stats: &XactStats) {
            println!(
                "{:>6}: {:>10} {:>9}: {:>10} {:>9}: {:>10} {:>10}: {:.4} {:>11}: {:>8} {:>9}: {:>8} {:>10}: {:>8}",
                name,
                stats.commits(),
                "fallbacks",
                stats.fallbacks(),
                "aborts",
                stats.aborts.count(),
                "retry avg",
                stats.commit_retries.mean().unwrap_or_default(),
                "lock taken",
                stats.lock_taken.count(),
                "conflict",
                stats.conflict.count(),
                "capacity",
                stats.capacity.count(),
            );
        }

        for xact in self.xacts() {
            line(&xact.to_string(), &self.xact_total(xact));
        }
        let total = self.total();
        line("total", &total);
        println!("{:#?}", total);
    }
}

impl StatsSink for Stats {
    #[inline]
    fn on_commit(&self, thread: usize, xact: XactId, retries: u32) {
        self.with_xact(thread, xact, |stats| {
            stats.commit_retries.record(u64::from(retries))
        })
    }

    #[inline]
    fn on_fallback(&self, thread: usize, xact: XactId, retries: u32) {
        self.with_xact(thread, xact, |stats| {
            stats.fallback_retries.record(u64::from(retries))
        })
    }

    #[inline]
    fn on_abort(&self, thread: usize, xact: XactId, cause: AbortCause) {
        self.with_xact(thread, xact, |stats| stats.record_abort(cause))
    }
}
