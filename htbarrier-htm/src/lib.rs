//! Hardware transactional memory as a capability.
//!
//! Every back-end exposes the same small surface through [`HardwareTransaction`]: begin, end,
//! explicit abort, a status query, a classifier mapping the raw status to an [`AbortCause`], and an
//! escape mode ([`Escape`]) that suspends conflict tracking so shared counters can be polled from
//! inside a transaction without joining its read set.
//!
//! Back-ends:
//!
//! * [`Unsupported`] never starts a transaction. It is what [`NativeHtm`] resolves to on targets
//!   (or builds) without hardware support, and it makes the protocol run every guarded section
//!   under the fallback lock.
//! * [`Emulated`] always starts and never aborts on its own. It provides no isolation between
//!   threads, so it is only correct for sections that touch disjoint memory. Used in tests.
//! * [`Scripted`] decides the outcome of every begin with a closure. Used to inject aborts.
//! * `x86_64::Rtm` (feature `rtm`), Intel RTM plus TSXLDTRK for escapes.
//! * `powerpc64::PowerHtm` (feature `power`), POWER8+ HTM with suspend/resume escapes.

#![cfg_attr(
    any(
        all(feature = "rtm", target_arch = "x86_64"),
        all(feature = "power", target_arch = "powerpc64")
    ),
    feature(link_llvm_intrinsics)
)]
#![warn(missing_debug_implementations)]
#![deny(rust_2018_idioms)]
#![deny(unused_must_use)]

mod cause;
mod emulated;
mod unsupported;

#[cfg(all(feature = "power", target_arch = "powerpc64"))]
pub mod powerpc64;
#[cfg(all(feature = "rtm", target_arch = "x86_64"))]
pub mod x86_64;

pub use cause::{AbortCause, AbortKind, LOCK_TAKEN, VALIDATION_ERROR};
pub use emulated::{Emulated, Scripted};
pub use unsupported::{Unsupported, UNSUPPORTED};

use core::{cell::Cell, fmt::Debug};

cfg_if::cfg_if! {
    if #[cfg(all(feature = "rtm", target_arch = "x86_64"))] {
        /// The hardware back-end selected for this build.
        pub type NativeHtm = x86_64::Rtm;
    } else if #[cfg(all(feature = "power", target_arch = "powerpc64"))] {
        /// The hardware back-end selected for this build.
        pub type NativeHtm = powerpc64::PowerHtm;
    } else {
        /// The hardware back-end selected for this build.
        pub type NativeHtm = Unsupported;
    }
}

/// Returns true if this build was compiled with a hardware back-end and the running CPU supports
/// it.
#[inline]
pub fn htm_supported() -> bool {
    cfg_if::cfg_if! {
        if #[cfg(all(feature = "rtm", target_arch = "x86_64"))] {
            x86_64::rtm_supported()
        } else if #[cfg(all(feature = "power", target_arch = "powerpc64"))] {
            true
        } else {
            false
        }
    }
}

/// Outcome of [`HardwareTransaction::begin`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum Begin<S> {
    /// A transaction is now open.
    Started,
    /// The transaction failed to start, or was aborted after starting and rolled back to here.
    Failed(S),
}

impl<S> Begin<S> {
    #[inline]
    pub fn is_started(&self) -> bool {
        match self {
            Begin::Started => true,
            Begin::Failed(_) => false,
        }
    }
}

/// A hardware transactional memory back-end.
///
/// # Safety
///
/// On hardware back-ends an abort, whether explicit or detected by the CPU, discards every store
/// made since `begin` and resumes execution as if `begin` had just returned `Begin::Failed`. Code
/// calling `begin` must be written so that such a resumption is sound: the call must be inlined into
/// the retry loop that handles the failure, and nothing performed inside the transaction may have
/// effects outside of memory (syscalls, I/O, allocation that reaches the OS).
///
/// Implementors guarantee that `classify` is pure and that `in_transaction` reflects the state of
/// the calling thread only.
pub unsafe trait HardwareTransaction {
    /// Raw abort status as reported by the back-end.
    type Status: Copy + Debug;

    /// False for back-ends whose `begin` can never start a transaction.
    const SUPPORTED: bool = true;

    /// Attempts to open a transaction.
    unsafe fn begin(&self) -> Begin<Self::Status>;

    /// Commits the open transaction.
    unsafe fn end(&self);

    /// Explicitly aborts the open transaction with `code`.
    ///
    /// Not every back-end can carry an arbitrary code: RTM encodes it as an instruction immediate,
    /// so `x86_64::Rtm` reports only [`LOCK_TAKEN`] and [`VALIDATION_ERROR`] faithfully and every
    /// other code as `AbortKind::Explicit(0)`.
    ///
    /// Hardware back-ends never return from this call; execution resumes at `begin`. Software
    /// back-ends roll nothing back and return the status `begin` would have reported, so the caller
    /// can continue its retry loop as if `begin` had failed.
    unsafe fn abort(&self, code: u8) -> Self::Status;

    /// Status of the most recent failure.
    fn status(&self) -> Self::Status;

    /// Maps a raw status to its canonical cause.
    fn classify(status: Self::Status) -> AbortCause;

    /// Returns true if a transaction is open on this thread.
    fn in_transaction(&self) -> bool;

    /// Suspends conflict tracking for the open transaction. Prefer [`escape`](Self::escape).
    unsafe fn suspend(&self);

    /// Resumes conflict tracking after [`suspend`](Self::suspend).
    unsafe fn resume(&self);

    /// Opens an escape section that lasts until the returned guard is dropped.
    ///
    /// Outside of a transaction this is a no-op.
    #[inline]
    fn escape(&self) -> Escape<'_, Self>
    where
        Self: Sized,
    {
        Escape::new(self)
    }
}

#[cfg(debug_assertions)]
thread_local! {
    static ESCAPED: Cell<bool> = Cell::new(false);
}

/// Scoped escape section. Tracking is restored when the guard is dropped, including on early
/// returns and unwinding.
///
/// Escape sections do not nest.
#[derive(Debug)]
#[must_use = "dropping an `Escape` immediately ends the escape section"]
pub struct Escape<'a, H: HardwareTransaction> {
    htx:    &'a H,
    active: Cell<bool>,
}

impl<'a, H: HardwareTransaction> Escape<'a, H> {
    #[inline]
    fn new(htx: &'a H) -> Self {
        let active = htx.in_transaction();
        if active {
            #[cfg(debug_assertions)]
            ESCAPED.with(|escaped| {
                assert!(!escaped.get(), "nested escape sections are not supported");
                escaped.set(true)
            });
            unsafe { htx.suspend() }
        }
        Escape {
            htx,
            active: Cell::new(active),
        }
    }

    /// Returns true if tracking was actually suspended, i.e. a transaction was open.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}

impl<'a, H: HardwareTransaction> Drop for Escape<'a, H> {
    #[inline]
    fn drop(&mut self) {
        if self.active.get() {
            unsafe { self.htx.resume() }
            #[cfg(debug_assertions)]
            ESCAPED.with(|escaped| escaped.set(false));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn escape_outside_transaction_is_inert() {
        let htx = Emulated::new();
        let escape = htx.escape();
        assert!(!escape.is_active());
    }

    #[test]
    fn escape_restores_on_early_return() {
        fn poll(htx: &Emulated, ready: bool) -> bool {
            let _escape = htx.escape();
            if ready {
                return true;
            }
            false
        }

        let htx = Emulated::new();
        unsafe {
            assert!(htx.begin().is_started());
            assert!(poll(&htx, true));
            assert!(!htx.is_suspended());
            assert!(!poll(&htx, false));
            assert!(!htx.is_suspended());
            htx.end();
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "nested escape sections")]
    fn nested_escape_panics() {
        let htx = Emulated::new();
        unsafe {
            assert!(htx.begin().is_started());
        }
        let _outer = htx.escape();
        let _inner = htx.escape();
    }
}
