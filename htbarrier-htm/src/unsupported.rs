//! Back-end for builds and CPUs without hardware transactional memory. No transaction ever starts,
//! so every guarded section runs under the fallback lock and every barrier blocks.

use crate::{AbortCause, AbortKind, Begin, HardwareTransaction};

/// The cause every [`Unsupported::begin`](HardwareTransaction::begin) fails with.
pub const UNSUPPORTED: AbortCause = AbortCause::new(AbortKind::ImplementationSpecific, true);

#[inline]
fn unsupported() -> ! {
    panic!("no hardware transaction is open on a CPU without transactional memory")
}

/// A back-end whose transactions never start.
#[derive(Default, Copy, Clone, Debug)]
pub struct Unsupported;

impl Unsupported {
    #[inline]
    pub const fn new() -> Self {
        Unsupported
    }
}

unsafe impl HardwareTransaction for Unsupported {
    type Status = AbortCause;

    const SUPPORTED: bool = false;

    #[inline]
    unsafe fn begin(&self) -> Begin<AbortCause> {
        Begin::Failed(UNSUPPORTED)
    }

    #[inline]
    unsafe fn end(&self) {
        unsupported()
    }

    #[inline]
    unsafe fn abort(&self, code: u8) -> AbortCause {
        AbortCause::explicit(code)
    }

    #[inline]
    fn status(&self) -> AbortCause {
        UNSUPPORTED
    }

    #[inline]
    fn classify(status: AbortCause) -> AbortCause {
        status
    }

    #[inline]
    fn in_transaction(&self) -> bool {
        false
    }

    #[inline]
    unsafe fn suspend(&self) {
        unsupported()
    }

    #[inline]
    unsafe fn resume(&self) {
        unsupported()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn never_starts() {
        let htx = Unsupported::new();
        for _ in 0..10 {
            assert_eq!(unsafe { htx.begin() }, Begin::Failed(UNSUPPORTED));
            assert!(!htx.in_transaction());
        }
        assert!(Unsupported::classify(htx.status()).persistent);
        assert!(!Unsupported::SUPPORTED);
    }

    #[test]
    fn escape_is_inert() {
        let htx = Unsupported::new();
        let escape = htx.escape();
        assert!(!escape.is_active());
    }

    #[test]
    #[should_panic(expected = "no hardware transaction is open")]
    fn end_panics() {
        unsafe { Unsupported::new().end() }
    }
}
