//! Software back-ends for tests. Neither provides isolation: "transactional" code simply runs in
//! place and `end` has nothing to publish, so two threads' sections are not atomic with respect to
//! each other. They let tests drive every abort path deterministically.

use crate::{AbortCause, AbortKind, Begin, HardwareTransaction};
use core::{
    cell::{Cell, RefCell},
    fmt::{self, Debug, Formatter},
};

#[derive(Debug)]
struct SoftState {
    open:      Cell<bool>,
    suspended: Cell<bool>,
    last:      Cell<AbortCause>,
}

impl SoftState {
    #[inline]
    const fn new() -> Self {
        SoftState {
            open:      Cell::new(false),
            suspended: Cell::new(false),
            last:      Cell::new(AbortCause::transient(AbortKind::Unknown)),
        }
    }

    #[inline]
    fn fail(&self, cause: AbortCause) -> AbortCause {
        self.open.set(false);
        self.suspended.set(false);
        self.last.set(cause);
        cause
    }

    #[inline]
    fn end(&self) {
        debug_assert!(self.open.get(), "`end` called without an open transaction");
        debug_assert!(!self.suspended.get(), "`end` called inside an escape section");
        self.open.set(false);
    }

    #[inline]
    fn suspend(&self) {
        debug_assert!(self.open.get(), "`suspend` called without an open transaction");
        self.suspended.set(true);
    }

    #[inline]
    fn resume(&self) {
        debug_assert!(self.suspended.get(), "`resume` called while not suspended");
        self.suspended.set(false);
    }
}

/// A back-end whose transactions always start.
#[derive(Debug)]
pub struct Emulated {
    state: SoftState,
}

impl Default for Emulated {
    #[inline]
    fn default() -> Self {
        Emulated::new()
    }
}

impl Emulated {
    #[inline]
    pub const fn new() -> Self {
        Emulated {
            state: SoftState::new(),
        }
    }

    /// Returns true while an escape section is open.
    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.state.suspended.get()
    }
}

unsafe impl HardwareTransaction for Emulated {
    type Status = AbortCause;

    #[inline]
    unsafe fn begin(&self) -> Begin<AbortCause> {
        debug_assert!(!self.state.open.get(), "nested transactions are not supported");
        self.state.open.set(true);
        Begin::Started
    }

    #[inline]
    unsafe fn end(&self) {
        self.state.end()
    }

    #[inline]
    unsafe fn abort(&self, code: u8) -> AbortCause {
        self.state.fail(AbortCause::explicit(code))
    }

    #[inline]
    fn status(&self) -> AbortCause {
        self.state.last.get()
    }

    #[inline]
    fn classify(status: AbortCause) -> AbortCause {
        status
    }

    #[inline]
    fn in_transaction(&self) -> bool {
        self.state.open.get()
    }

    #[inline]
    unsafe fn suspend(&self) {
        self.state.suspend()
    }

    #[inline]
    unsafe fn resume(&self) {
        self.state.resume()
    }
}

/// A back-end whose `begin` outcomes come from a script.
///
/// The script is called with the zero based attempt number (counting every `begin` made through
/// this value) and returns `None` to start the transaction, or the cause to fail with.
pub struct Scripted<F> {
    state:    SoftState,
    attempts: Cell<u32>,
    script:   RefCell<F>,
}

impl<F> Debug for Scripted<F> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Scripted")
            .field("state", &self.state)
            .field("attempts", &self.attempts.get())
            .finish()
    }
}

impl<F: FnMut(u32) -> Option<AbortCause>> Scripted<F> {
    #[inline]
    pub fn new(script: F) -> Self {
        Scripted {
            state:    SoftState::new(),
            attempts: Cell::new(0),
            script:   RefCell::new(script),
        }
    }

    /// Number of times `begin` has been called.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }
}

impl Scripted<fn(u32) -> Option<AbortCause>> {
    /// A script under which every transaction starts.
    #[inline]
    pub fn succeeding() -> Self {
        fn start(_: u32) -> Option<AbortCause> {
            None
        }
        Scripted::new(start as fn(u32) -> Option<AbortCause>)
    }
}

impl Scripted<Box<dyn FnMut(u32) -> Option<AbortCause> + Send>> {
    /// A script under which every attempt fails with `cause`.
    #[inline]
    pub fn always(cause: AbortCause) -> Self {
        let script: Box<dyn FnMut(u32) -> Option<AbortCause> + Send> = Box::new(move |_| Some(cause));
        Scripted::new(script)
    }

    /// A script under which the first `count` attempts fail with `cause`, and later ones start.
    #[inline]
    pub fn failing_first(count: u32, cause: AbortCause) -> Self {
        let script: Box<dyn FnMut(u32) -> Option<AbortCause> + Send> = Box::new(move |attempt| {
            if attempt < count {
                Some(cause)
            } else {
                None
            }
        });
        Scripted::new(script)
    }
}

unsafe impl<F: FnMut(u32) -> Option<AbortCause>> HardwareTransaction for Scripted<F> {
    type Status = AbortCause;

    #[inline]
    unsafe fn begin(&self) -> Begin<AbortCause> {
        debug_assert!(!self.state.open.get(), "nested transactions are not supported");
        let attempt = self.attempts.get();
        self.attempts.set(attempt.wrapping_add(1));
        let outcome = (&mut *self.script.borrow_mut())(attempt);
        match outcome {
            None => {
                self.state.open.set(true);
                Begin::Started
            }
            Some(cause) => Begin::Failed(self.state.fail(cause)),
        }
    }

    #[inline]
    unsafe fn end(&self) {
        self.state.end()
    }

    #[inline]
    unsafe fn abort(&self, code: u8) -> AbortCause {
        self.state.fail(AbortCause::explicit(code))
    }

    #[inline]
    fn status(&self) -> AbortCause {
        self.state.last.get()
    }

    #[inline]
    fn classify(status: AbortCause) -> AbortCause {
        status
    }

    #[inline]
    fn in_transaction(&self) -> bool {
        self.state.open.get()
    }

    #[inline]
    unsafe fn suspend(&self) {
        self.state.suspend()
    }

    #[inline]
    unsafe fn resume(&self) {
        self.state.resume()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::LOCK_TAKEN;

    fn send<T: Send>() {}

    #[test]
    fn is_send() {
        send::<Emulated>();
        send::<Scripted<Box<dyn FnMut(u32) -> Option<AbortCause> + Send>>>();
    }

    #[test]
    fn emulated_lifecycle() {
        let htx = Emulated::new();
        assert!(!htx.in_transaction());
        unsafe {
            assert_eq!(htx.begin(), Begin::Started);
            assert!(htx.in_transaction());
            htx.end();
        }
        assert!(!htx.in_transaction());
    }

    #[test]
    fn emulated_abort_reports_explicit() {
        let htx = Emulated::new();
        let status = unsafe {
            assert!(htx.begin().is_started());
            htx.abort(LOCK_TAKEN)
        };
        assert!(!htx.in_transaction());
        assert!(Emulated::classify(status).is_lock_taken());
        assert_eq!(htx.status(), status);
    }

    #[test]
    fn scripted_failures() {
        let conflict = AbortCause::transient(AbortKind::Conflict);
        let htx = Scripted::failing_first(2, conflict);
        unsafe {
            assert_eq!(htx.begin(), Begin::Failed(conflict));
            assert!(!htx.in_transaction());
            assert_eq!(htx.begin(), Begin::Failed(conflict));
            assert_eq!(htx.begin(), Begin::Started);
            htx.end();
        }
        assert_eq!(htx.attempts(), 3);
        assert_eq!(htx.status(), conflict);
    }

    #[test]
    fn scripted_succeeding() {
        let htx = Scripted::succeeding();
        for _ in 0..10 {
            unsafe {
                assert!(htx.begin().is_started());
                htx.end();
            }
        }
        assert_eq!(htx.attempts(), 10);
    }
}
