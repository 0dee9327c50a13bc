//! POWER8+ HTM back-end. Escape sections use `tsuspend.`/`tresume.`; while suspended, accesses are
//! fully non-transactional.

use crate::{AbortCause, AbortKind, Begin, HardwareTransaction};
use core::cell::Cell;

mod intrinsics {
    extern "C" {
        #[link_name = "llvm.ppc.tbegin"]
        pub fn tbegin(b: i32) -> i32;

        #[link_name = "llvm.ppc.tend"]
        pub fn tend(e: i32) -> i32;

        #[link_name = "llvm.ppc.ttest"]
        pub fn ttest() -> i64;

        #[link_name = "llvm.ppc.tabort"]
        pub fn tabort(a: i32) -> i32;

        #[link_name = "llvm.ppc.tresume"]
        pub fn tresume() -> i32;

        #[link_name = "llvm.ppc.tsuspend"]
        pub fn tsuspend() -> i32;

        #[link_name = "llvm.ppc.get.texasru"]
        pub fn get_texasru() -> i64;
    }
}

#[inline(always)]
pub unsafe fn tbegin(b: i32) -> i32 {
    intrinsics::tbegin(b)
}

#[inline(always)]
pub unsafe fn tend(e: i32) -> i32 {
    intrinsics::tend(e)
}

#[inline(always)]
pub unsafe fn ttest() -> i64 {
    intrinsics::ttest()
}

#[inline(always)]
pub unsafe fn tabort(a: i32) -> i32 {
    intrinsics::tabort(a)
}

#[inline]
pub unsafe fn tresume() -> i32 {
    intrinsics::tresume()
}

#[inline]
pub unsafe fn tsuspend() -> i32 {
    intrinsics::tsuspend()
}

#[inline]
pub unsafe fn get_texasru() -> i64 {
    intrinsics::get_texasru()
}

#[allow(non_snake_case)]
#[inline(always)]
pub const fn _HTM_STATE(CR0: i64) -> i64 {
    (CR0 >> 1) & 0x3
}

pub const _HTM_NONTRANSACTIONAL: i64 = 0x0;
pub const _HTM_SUSPENDED: i64 = 0x1;
pub const _HTM_TRANSACTIONAL: i64 = 0x2;

/// Extracts `size` bits of TEXASRU ending at big-endian bit `bit`.
#[inline(always)]
const fn texasru_bits(texasru: u32, bit: u32, size: u32) -> u32 {
    (texasru >> (31 - bit)) & ((1 << size) - 1)
}

/// Upper half of TEXASR, read after a failed `tbegin.`.
#[repr(transparent)]
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub struct Texasru(pub u32);

impl Texasru {
    #[inline]
    pub const fn failure_code(self) -> u8 {
        texasru_bits(self.0, 7, 8) as u8
    }

    #[inline]
    pub const fn persistent(self) -> bool {
        texasru_bits(self.0, 7, 1) != 0
    }

    #[inline]
    pub const fn disallowed(self) -> bool {
        texasru_bits(self.0, 8, 1) != 0
    }

    #[inline]
    pub const fn nesting_overflow(self) -> bool {
        texasru_bits(self.0, 9, 1) != 0
    }

    #[inline]
    pub const fn footprint_overflow(self) -> bool {
        texasru_bits(self.0, 10, 1) != 0
    }

    #[inline]
    pub const fn self_induced_conflict(self) -> bool {
        texasru_bits(self.0, 11, 1) != 0
    }

    #[inline]
    pub const fn non_transactional_conflict(self) -> bool {
        texasru_bits(self.0, 12, 1) != 0
    }

    #[inline]
    pub const fn transaction_conflict(self) -> bool {
        texasru_bits(self.0, 13, 1) != 0
    }

    #[inline]
    pub const fn translation_invalidation_conflict(self) -> bool {
        texasru_bits(self.0, 14, 1) != 0
    }

    #[inline]
    pub const fn implementation_specific(self) -> bool {
        texasru_bits(self.0, 15, 1) != 0
    }

    #[inline]
    pub const fn instruction_fetch_conflict(self) -> bool {
        texasru_bits(self.0, 16, 1) != 0
    }

    #[inline]
    pub const fn explicit(self) -> bool {
        texasru_bits(self.0, 31, 1) != 0
    }
}

/// POWER hardware transactional memory.
#[derive(Debug, Default)]
pub struct PowerHtm {
    last: Cell<u32>,
}

impl PowerHtm {
    #[inline]
    pub const fn new() -> Self {
        PowerHtm { last: Cell::new(0) }
    }
}

unsafe impl HardwareTransaction for PowerHtm {
    type Status = Texasru;

    #[inline(always)]
    unsafe fn begin(&self) -> Begin<Texasru> {
        if tbegin(0) != 0 {
            Begin::Started
        } else {
            let texasru = get_texasru() as u32;
            self.last.set(texasru);
            Begin::Failed(Texasru(texasru))
        }
    }

    #[inline(always)]
    unsafe fn end(&self) {
        tend(0);
    }

    #[inline(always)]
    unsafe fn abort(&self, code: u8) -> Texasru {
        tabort(i32::from(code));
        // Only reachable outside of a transaction, where `tabort.` is a no-op.
        Texasru(1 | (u32::from(code) << 24))
    }

    #[inline]
    fn status(&self) -> Texasru {
        Texasru(self.last.get())
    }

    fn classify(status: Texasru) -> AbortCause {
        let persistent = status.persistent();
        let kind = if status.explicit() {
            AbortKind::Explicit(status.failure_code())
        } else if status.disallowed() {
            AbortKind::Disallowed
        } else if status.nesting_overflow() {
            AbortKind::NestingOverflow
        } else if status.footprint_overflow() {
            AbortKind::CapacityOverflow
        } else if status.self_induced_conflict() {
            AbortKind::SelfInducedConflict
        } else if status.non_transactional_conflict() {
            AbortKind::NonTransactionalConflict
        } else if status.transaction_conflict() {
            AbortKind::Conflict
        } else if status.translation_invalidation_conflict() {
            AbortKind::TranslationInvalidation
        } else if status.implementation_specific() {
            AbortKind::ImplementationSpecific
        } else if status.instruction_fetch_conflict() {
            AbortKind::InstructionFetchConflict
        } else {
            AbortKind::Unknown
        };
        AbortCause::new(kind, persistent)
    }

    #[inline(always)]
    fn in_transaction(&self) -> bool {
        _HTM_STATE(unsafe { ttest() }) == _HTM_TRANSACTIONAL
    }

    #[inline(always)]
    unsafe fn suspend(&self) {
        tsuspend();
    }

    #[inline(always)]
    unsafe fn resume(&self) {
        tresume();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::LOCK_TAKEN;

    #[test]
    fn classify_texasru() {
        let lock_taken = Texasru(1 | (u32::from(LOCK_TAKEN) << 24));
        assert!(PowerHtm::classify(lock_taken).is_lock_taken());

        let footprint = Texasru(1 << (31 - 10));
        assert_eq!(
            PowerHtm::classify(footprint).kind,
            AbortKind::CapacityOverflow
        );

        let conflict = Texasru(1 << (31 - 13));
        assert_eq!(PowerHtm::classify(conflict).kind, AbortKind::Conflict);
        assert!(!PowerHtm::classify(conflict).persistent);
    }
}
