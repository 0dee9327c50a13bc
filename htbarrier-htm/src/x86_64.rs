//! Intel RTM back-end. Escape sections use TSXLDTRK (`xsusldtrk`/`xresldtrk`), which suspends load
//! address tracking only: loads inside an escape do not join the read set, stores still join the
//! write set.

use crate::{AbortCause, AbortKind, Begin, HardwareTransaction, LOCK_TAKEN, VALIDATION_ERROR};
use core::{arch::x86_64::__cpuid_count, cell::Cell};

mod ffi {
    extern "C" {
        #[link_name = "llvm.x86.xbegin"]
        pub fn xbegin() -> i32;

        #[link_name = "llvm.x86.xend"]
        pub fn xend() -> ();

        #[link_name = "llvm.x86.xabort"]
        pub fn xabort(_: i8) -> ();

        #[link_name = "llvm.x86.xtest"]
        pub fn xtest() -> i32;

        #[link_name = "llvm.x86.xsusldtrk"]
        pub fn xsusldtrk() -> ();

        #[link_name = "llvm.x86.xresldtrk"]
        pub fn xresldtrk() -> ();
    }
}

#[inline(always)]
pub unsafe fn xbegin() -> u32 {
    ffi::xbegin() as u32
}

#[inline(always)]
pub unsafe fn xend() {
    ffi::xend()
}

/// `xabort` encodes its code as an immediate, so the code must be a constant.
#[inline(always)]
pub unsafe fn xabort<const CODE: u8>() {
    ffi::xabort(CODE as i8)
}

#[inline(always)]
pub unsafe fn xtest() -> bool {
    ffi::xtest() != 0
}

#[inline(always)]
pub unsafe fn xsusldtrk() {
    ffi::xsusldtrk()
}

#[inline(always)]
pub unsafe fn xresldtrk() {
    ffi::xresldtrk()
}

pub const _XBEGIN_STARTED: u32 = !0 as u32;
pub const _XABORT_EXPLICIT: u32 = 1 << 0;
pub const _XABORT_RETRY: u32 = 1 << 1;
pub const _XABORT_CONFLICT: u32 = 1 << 2;
pub const _XABORT_CAPACITY: u32 = 1 << 3;
pub const _XABORT_DEBUG: u32 = 1 << 4;
pub const _XABORT_NESTED: u32 = 1 << 5;

#[allow(non_snake_case)]
#[inline(always)]
pub const fn _XABORT_CODE(x: u32) -> u8 {
    ((x >> 24) & 0xFF) as u8
}

/// Returns true if the CPU advertises RTM (`cpuid` leaf 7, ebx bit 11).
#[inline]
pub fn rtm_supported() -> bool {
    unsafe { __cpuid_count(7, 0).ebx & (1 << 11) != 0 }
}

/// Returns true if the CPU advertises TSXLDTRK (`cpuid` leaf 7, edx bit 16).
#[inline]
pub fn tsxldtrk_supported() -> bool {
    unsafe { __cpuid_count(7, 0).edx & (1 << 16) != 0 }
}

/// Raw `eax` value reported by a failed `xbegin`.
#[repr(transparent)]
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub struct RtmStatus(pub u32);

/// Intel RTM.
#[derive(Debug, Default)]
pub struct Rtm {
    last: Cell<u32>,
}

impl Rtm {
    #[inline]
    pub const fn new() -> Self {
        Rtm { last: Cell::new(0) }
    }
}

/// The code an explicit abort with `code` reports. Only the reserved codes have an `xabort`
/// instantiation; the rest collapse to 0.
#[inline(always)]
fn encodable_code(code: u8) -> u8 {
    match code {
        LOCK_TAKEN | VALIDATION_ERROR => code,
        _ => 0,
    }
}

unsafe impl HardwareTransaction for Rtm {
    type Status = RtmStatus;

    #[inline(always)]
    unsafe fn begin(&self) -> Begin<RtmStatus> {
        let status = xbegin();
        if status == _XBEGIN_STARTED {
            Begin::Started
        } else {
            self.last.set(status);
            Begin::Failed(RtmStatus(status))
        }
    }

    #[inline(always)]
    unsafe fn end(&self) {
        xend()
    }

    #[inline(always)]
    unsafe fn abort(&self, code: u8) -> RtmStatus {
        let code = encodable_code(code);
        match code {
            LOCK_TAKEN => xabort::<LOCK_TAKEN>(),
            VALIDATION_ERROR => xabort::<VALIDATION_ERROR>(),
            _ => xabort::<0>(),
        }
        // Only reachable when called outside of a transaction, where `xabort` is a no-op.
        RtmStatus(_XABORT_EXPLICIT | (u32::from(code) << 24))
    }

    #[inline]
    fn status(&self) -> RtmStatus {
        RtmStatus(self.last.get())
    }

    #[inline]
    fn classify(RtmStatus(status): RtmStatus) -> AbortCause {
        let persistent = status & _XABORT_RETRY == 0;
        let kind = if status & _XABORT_EXPLICIT != 0 {
            AbortKind::Explicit(_XABORT_CODE(status))
        } else if status & _XABORT_CONFLICT != 0 {
            AbortKind::Conflict
        } else if status & _XABORT_CAPACITY != 0 {
            AbortKind::CapacityOverflow
        } else if status & _XABORT_NESTED != 0 {
            AbortKind::NestingOverflow
        } else if status & _XABORT_DEBUG != 0 {
            AbortKind::Debug
        } else {
            // eax == 0: interrupts, `cpuid`, page faults and friends.
            AbortKind::Unknown
        };
        AbortCause::new(kind, persistent)
    }

    #[inline(always)]
    fn in_transaction(&self) -> bool {
        unsafe { xtest() }
    }

    #[inline(always)]
    unsafe fn suspend(&self) {
        xsusldtrk()
    }

    #[inline(always)]
    unsafe fn resume(&self) {
        xresldtrk()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classify_status_bits() {
        let explicit = RtmStatus(_XABORT_EXPLICIT | (u32::from(LOCK_TAKEN) << 24));
        assert!(Rtm::classify(explicit).is_lock_taken());
        assert!(Rtm::classify(explicit).persistent);

        let conflict = Rtm::classify(RtmStatus(_XABORT_CONFLICT | _XABORT_RETRY));
        assert_eq!(conflict.kind, AbortKind::Conflict);
        assert!(!conflict.persistent);

        let capacity = Rtm::classify(RtmStatus(_XABORT_CAPACITY));
        assert_eq!(capacity.kind, AbortKind::CapacityOverflow);
        assert!(capacity.persistent);

        assert_eq!(Rtm::classify(RtmStatus(0)).kind, AbortKind::Unknown);
    }

    #[test]
    fn unreserved_codes_collapse() {
        assert_eq!(encodable_code(LOCK_TAKEN), LOCK_TAKEN);
        assert_eq!(encodable_code(VALIDATION_ERROR), VALIDATION_ERROR);
        assert_eq!(encodable_code(7), 0);

        if !rtm_supported() {
            return;
        }
        // Outside of a transaction `xabort` is a no-op and the status comes back.
        let status = unsafe { Rtm::new().abort(7) };
        assert_eq!(Rtm::classify(status).kind, AbortKind::Explicit(0));
        let status = unsafe { Rtm::new().abort(VALIDATION_ERROR) };
        assert!(Rtm::classify(status).is_validation_error());
    }

    #[test]
    fn begin_end() {
        if !rtm_supported() {
            return;
        }
        let htx = Rtm::new();
        let mut fails = 0;
        for _ in 0..100_000 {
            unsafe {
                match htx.begin() {
                    Begin::Started => htx.end(),
                    Begin::Failed(_) => fails += 1,
                }
            }
        }
        println!("fails {}", fails);
    }
}
