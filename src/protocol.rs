//! The speculative barrier protocol.
//!
//! A [`Participant`] drives one thread's [`TransactionDescriptor`] through four operations:
//!
//! * [`begin_guarded`]/[`commit_guarded`] bracket a section that must run atomically with respect
//!   to the other threads' sections. The section runs in a hardware transaction; after more than
//!   `max_retries` failed attempts it runs non-transactionally under the group's FIFO fallback lock.
//!   Transactions read the lock right after starting, so a thread taking it aborts them all.
//! * [`speculative_barrier`] arrives at the barrier and, instead of waiting for the other threads,
//!   opens a hardware transaction and carries on. The transaction is committed once the epoch
//!   catches up, at the next barrier, at a [`checkpoint`], or at a `commit_guarded` once the
//!   speculation budget runs out.
//! * [`final_barrier`] is a plain blocking barrier that leaves nothing open.
//!
//! Shared counters are only ever polled from inside a transaction through an escape section, so
//! waiting on them never puts them in the transaction's read set.
//!
//! [`begin_guarded`]: Participant::begin_guarded
//! [`commit_guarded`]: Participant::commit_guarded
//! [`speculative_barrier`]: Participant::speculative_barrier
//! [`checkpoint`]: Participant::checkpoint
//! [`final_barrier`]: Participant::final_barrier

use crate::{
    abort::{self, TxEvent},
    barrier::Arrival,
    descriptor::{TransactionDescriptor, TxState},
    group::BarrierGroup,
    htm::{Begin, HardwareTransaction, LOCK_TAKEN},
    stats::{StatsSink, XactId, SPEC_XACT},
};
use core::{
    cell::Cell,
    fmt::{self, Debug, Formatter},
    hint,
    marker::PhantomData,
};
use std::{thread, time::Instant};

/// One thread's handle on a [`BarrierGroup`].
///
/// Owns the thread's descriptor and hardware back-end. Not `Sync`: every operation acts on the
/// calling thread's transactional state.
pub struct Participant<'a, H: HardwareTransaction, S: StatsSink + ?Sized = ()> {
    group:     &'a BarrierGroup,
    sink:      &'a S,
    htm:       H,
    desc:      TransactionDescriptor,
    _not_sync: PhantomData<Cell<()>>,
}

impl<'a, H: HardwareTransaction, S: StatsSink + ?Sized> Debug for Participant<'a, H, S> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Participant")
            .field("desc", &self.desc)
            .finish()
    }
}

impl<'a, H: HardwareTransaction, S: StatsSink + ?Sized> Participant<'a, H, S> {
    pub(crate) fn new(group: &'a BarrierGroup, thread_id: usize, htm: H, sink: &'a S) -> Self {
        Participant {
            group,
            sink,
            htm,
            desc: TransactionDescriptor::new(thread_id, group.config().speculation_budget),
            _not_sync: PhantomData,
        }
    }

    #[inline]
    pub fn thread_id(&self) -> usize {
        self.desc.thread()
    }

    #[inline]
    pub fn group(&self) -> &'a BarrierGroup {
        self.group
    }

    #[inline]
    pub fn htm(&self) -> &H {
        &self.htm
    }

    #[inline]
    pub fn descriptor(&self) -> &TransactionDescriptor {
        &self.desc
    }

    /// The epoch this thread is working toward.
    #[inline]
    pub fn local_order(&self) -> u32 {
        self.desc.local_order()
    }

    /// Failed hardware attempts since the last commit or fallback.
    #[inline]
    pub fn retries(&self) -> u32 {
        self.desc.retries()
    }

    #[inline]
    pub fn state(&self) -> TxState {
        self.desc.state()
    }

    #[inline]
    fn record(&self, xact: XactId, event: TxEvent) {
        abort::record(self.sink, self.desc.thread(), xact, event)
    }

    /// Starts the guarded section `xact`.
    ///
    /// Inside a speculative crossing the section joins the open transaction.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if a guarded section is already running.
    #[inline(always)]
    pub fn begin_guarded(&mut self, xact: XactId) {
        match self.desc.state {
            // Flattened into the speculative transaction, which never subscribes to the fallback
            // lock.
            TxState::Speculative => return,
            TxState::Idle => {}
            state => {
                debug_assert!(false, "`begin_guarded` called in state {:?}", state);
                return;
            }
        }
        self.desc.xact = xact;
        if !H::SUPPORTED {
            let _ticket = self.group.fallback_lock().acquire();
            self.desc.state = TxState::InFallback;
            return;
        }
        self.start_guarded(xact)
    }

    #[inline(always)]
    fn start_guarded(&mut self, xact: XactId) {
        loop {
            self.wait_while_fallback_held();
            let status = match unsafe { self.htm.begin() } {
                Begin::Started => {
                    // Subscribe to the fallback lock. A thread taking it from now on aborts us.
                    if likely!(!self.group.fallback_lock().is_held()) {
                        self.desc.state = TxState::InTransaction;
                        return;
                    }
                    unsafe { self.htm.abort(LOCK_TAKEN) }
                }
                Begin::Failed(status) => status,
            };
            if self.guarded_attempt_failed(xact, status) {
                return;
            }
        }
    }

    #[inline]
    fn wait_while_fallback_held(&self) {
        let lock = self.group.fallback_lock();
        if unlikely!(lock.is_held()) {
            let _escape = self.htm.escape();
            while lock.is_held() {
                hint::spin_loop()
            }
        }
    }

    /// Handles a failed attempt at a guarded section. Returns true once the section is running
    /// under the fallback lock.
    #[cold]
    fn guarded_attempt_failed(&mut self, xact: XactId, status: H::Status) -> bool {
        let cause = abort::classify::<H>(status);
        self.record(xact, TxEvent::Abort(cause));
        let retries = self.desc.failed_attempt();
        if retries > self.group.config().max_retries {
            let _ticket = self.group.fallback_lock().acquire();
            self.desc.state = TxState::InFallback;
            log::debug!(
                "thread {} xact {}: running on the fallback lock after {} aborts",
                self.desc.thread(),
                xact,
                retries
            );
            true
        } else {
            if cause.needs_backoff() {
                self.backoff()
            }
            false
        }
    }

    fn backoff(&mut self) {
        let delay = self.desc.backoff_delay(self.group.config().backoff_max);
        if delay.as_nanos() == 0 {
            return;
        }
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            hint::spin_loop()
        }
    }

    /// Explicitly aborts the open transaction with `code`, for instance [`VALIDATION_ERROR`] when
    /// the section finds data it cannot work with. The abort is recorded and retried like any
    /// other: the section is begun again, on the fallback lock once the retries are used up.
    ///
    /// On hardware back-ends this never returns; execution resumes inside the `begin_guarded` (or
    /// `speculative_barrier`) that opened the transaction. Software back-ends roll nothing back and
    /// return with the section begun again, so the caller must run the section from its start. A
    /// section running on the fallback lock cannot be aborted, and the call does nothing there.
    ///
    /// [`VALIDATION_ERROR`]: crate::htm::VALIDATION_ERROR
    pub fn abort(&mut self, code: u8) {
        match self.desc.state {
            TxState::InTransaction => {
                let status = unsafe { self.htm.abort(code) };
                self.desc.state = TxState::Idle;
                let xact = self.desc.xact;
                if !self.guarded_attempt_failed(xact, status) {
                    self.start_guarded(xact)
                }
            }
            TxState::Speculative => {
                let status = unsafe { self.htm.abort(code) };
                self.desc.state = TxState::Idle;
                self.speculation_failed(status);
                self.speculate()
            }
            TxState::InFallback | TxState::Idle => {}
        }
    }

    /// Ends the guarded section begun by the matching [`begin_guarded`](Self::begin_guarded).
    ///
    /// Inside a speculative crossing this is a commit point for the speculative transaction: it is
    /// committed if the epoch has caught up. Otherwise one unit of the speculation budget is spent,
    /// and once the budget is gone the thread waits for the epoch and commits.
    #[inline(always)]
    pub fn commit_guarded(&mut self, xact: XactId) {
        match self.desc.state {
            TxState::InTransaction => {
                debug_assert_eq!(xact, self.desc.xact, "mismatched guarded section");
                unsafe { self.htm.end() };
                self.desc.state = TxState::Idle;
                self.record(
                    self.desc.xact,
                    TxEvent::Commit {
                        retries: self.desc.retries,
                    },
                );
                self.desc.retries = 0;
            }
            TxState::InFallback => {
                debug_assert_eq!(xact, self.desc.xact, "mismatched guarded section");
                self.group.fallback_lock().release();
                self.desc.state = TxState::Idle;
                self.record(
                    self.desc.xact,
                    TxEvent::Fallback {
                        retries: self.desc.retries,
                    },
                );
                self.desc.retries = 0;
            }
            TxState::Speculative => {
                if self.epoch_reached() {
                    self.commit_speculative()
                } else if self.desc.spend_budget() {
                    self.wait_for_epoch();
                    self.commit_speculative()
                }
            }
            TxState::Idle => debug_assert!(false, "`commit_guarded` without `begin_guarded`"),
        }
    }

    /// Runs `f` as the guarded section `xact`.
    ///
    /// On hardware back-ends `f` may be rolled back and run again any number of times; it must
    /// not perform I/O or system calls.
    #[inline(always)]
    pub fn guarded<F: FnOnce() -> R, R>(&mut self, xact: XactId, f: F) -> R {
        self.begin_guarded(xact);
        let result = f();
        self.commit_guarded(xact);
        result
    }

    #[inline]
    fn epoch_reached(&self) -> bool {
        let _escape = self.htm.escape();
        self.group.state().reached(self.desc.local_order)
    }

    #[inline]
    fn wait_for_epoch(&self) {
        let _escape = self.htm.escape();
        self.group.state().wait_for(self.desc.local_order)
    }

    #[inline]
    fn commit_speculative(&mut self) {
        debug_assert!(self.desc.state.is_speculative());
        unsafe { self.htm.end() };
        self.desc.state = TxState::Idle;
        self.record(
            SPEC_XACT,
            TxEvent::Commit {
                retries: self.desc.retries,
            },
        );
        self.desc.retries = 0;
        self.desc.refill_budget();
    }

    /// Waits for the previous crossing to complete and commits its speculative transaction.
    #[inline]
    fn close_speculation(&mut self) {
        match self.desc.state {
            TxState::Speculative => {
                self.wait_for_epoch();
                self.commit_speculative()
            }
            TxState::Idle => {}
            state => panic!("barrier reached with a guarded section open ({:?})", state),
        }
    }

    /// Arrives at the barrier and, unless this thread arrived last, continues speculatively.
    ///
    /// A transaction left open by the previous crossing is committed first, after waiting for that
    /// crossing's epoch.
    ///
    /// # Panics
    ///
    /// Panics if a guarded section is still open.
    #[inline(always)]
    pub fn speculative_barrier(&mut self) {
        self.close_speculation();
        self.desc.local_order = self.desc.local_order.wrapping_add(1);
        match self.group.state().arrive() {
            Arrival::Last(_) => {}
            Arrival::Waiting => self.speculate(),
        }
    }

    #[inline(always)]
    fn speculate(&mut self) {
        if !H::SUPPORTED {
            self.group.state().wait_for(self.desc.local_order);
            return;
        }
        loop {
            if self.group.state().reached(self.desc.local_order) {
                self.abandon_speculation();
                return;
            }
            match unsafe { self.htm.begin() } {
                Begin::Started => {
                    self.desc.state = TxState::Speculative;
                    return;
                }
                Begin::Failed(status) => self.speculation_failed(status),
            }
        }
    }

    #[cold]
    fn speculation_failed(&mut self, status: H::Status) {
        let cause = abort::classify::<H>(status);
        self.record(SPEC_XACT, TxEvent::Abort(cause));
        self.desc.failed_attempt();
        if cause.needs_backoff() && !self.group.state().reached(self.desc.local_order) {
            self.backoff()
        }
    }

    #[inline]
    fn abandon_speculation(&mut self) {
        if unlikely!(self.desc.retries > 0) {
            log::debug!(
                "thread {}: epoch {} reached after {} failed speculation attempts",
                self.desc.thread(),
                self.desc.local_order,
                self.desc.retries
            );
        }
        self.desc.state = TxState::Idle;
        self.desc.retries = 0;
    }

    /// Commits the open speculative transaction, waiting for the epoch if it has not caught up.
    /// Does nothing outside of a speculative crossing.
    #[inline]
    pub fn checkpoint(&mut self) {
        if self.desc.state.is_speculative() {
            if !self.epoch_reached() {
                self.wait_for_epoch();
            }
            self.commit_speculative()
        }
    }

    /// A blocking barrier. Commits any open speculative transaction and returns once every thread
    /// has arrived.
    ///
    /// # Panics
    ///
    /// Panics if a guarded section is still open.
    #[inline]
    pub fn final_barrier(&mut self) {
        self.close_speculation();
        self.desc.local_order = self.desc.local_order.wrapping_add(1);
        if let Arrival::Waiting = self.group.state().arrive() {
            self.group.state().wait_for(self.desc.local_order)
        }
    }
}

impl<'a, H: HardwareTransaction, S: StatsSink + ?Sized> Drop for Participant<'a, H, S> {
    fn drop(&mut self) {
        match self.desc.state {
            // Leaving the lock held would wedge every other thread.
            TxState::InFallback => self.group.fallback_lock().release(),
            TxState::InTransaction => {
                if self.htm.in_transaction() {
                    unsafe { self.htm.end() }
                }
            }
            TxState::Speculative => {
                if thread::panicking() {
                    if self.htm.in_transaction() {
                        unsafe { self.htm.end() }
                    }
                } else {
                    self.close_speculation()
                }
            }
            TxState::Idle => {}
        }
        self.desc.state = TxState::Idle;
        self.group.leave(self.desc.thread());
    }
}
