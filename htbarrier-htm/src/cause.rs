use core::fmt::{self, Display, Formatter};

/// Explicit abort code used when a transaction finds the fallback lock held right after starting.
pub const LOCK_TAKEN: u8 = 0xFF;

/// Explicit abort code reserved for application level validation failures.
pub const VALIDATION_ERROR: u8 = 0xFE;

/// Back-end independent reason for a transaction abort.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum AbortKind {
    /// Aborted by an explicit `abort` with the given code.
    Explicit(u8),
    /// Memory conflict with another transaction.
    Conflict,
    /// The read or write footprint exceeded what the CPU can track.
    CapacityOverflow,
    /// Transactions nested deeper than supported.
    NestingOverflow,
    /// Conflict caused by the thread's own accesses (e.g. a store during suspended mode).
    SelfInducedConflict,
    /// Conflict with a non-transactional access from another thread.
    NonTransactionalConflict,
    /// Conflict on an instruction fetch.
    InstructionFetchConflict,
    /// A TLB invalidation hit the footprint.
    TranslationInvalidation,
    /// An instruction not allowed in transactional state was executed.
    Disallowed,
    /// Debug trap or breakpoint.
    Debug,
    /// Implementation specific reason.
    ImplementationSpecific,
    /// The status did not identify a reason (e.g. an interrupt or `cpuid`).
    Unknown,
}

impl Display for AbortKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AbortKind::Explicit(LOCK_TAKEN) => f.write_str("explicit (lock taken)"),
            AbortKind::Explicit(VALIDATION_ERROR) => f.write_str("explicit (validation error)"),
            AbortKind::Explicit(code) => write!(f, "explicit ({:#04x})", code),
            AbortKind::Conflict => f.write_str("conflict"),
            AbortKind::CapacityOverflow => f.write_str("capacity overflow"),
            AbortKind::NestingOverflow => f.write_str("nesting overflow"),
            AbortKind::SelfInducedConflict => f.write_str("self induced conflict"),
            AbortKind::NonTransactionalConflict => f.write_str("non-transactional conflict"),
            AbortKind::InstructionFetchConflict => f.write_str("instruction fetch conflict"),
            AbortKind::TranslationInvalidation => f.write_str("translation invalidation"),
            AbortKind::Disallowed => f.write_str("disallowed instruction"),
            AbortKind::Debug => f.write_str("debug"),
            AbortKind::ImplementationSpecific => f.write_str("implementation specific"),
            AbortKind::Unknown => f.write_str("unknown"),
        }
    }
}

/// A classified abort.
///
/// `persistent` is the hardware's hint that retrying immediately is unlikely to succeed. Back-ends
/// without such a hint report `false`.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub struct AbortCause {
    pub kind:       AbortKind,
    pub persistent: bool,
}

impl AbortCause {
    #[inline]
    pub const fn new(kind: AbortKind, persistent: bool) -> Self {
        AbortCause { kind, persistent }
    }

    #[inline]
    pub const fn transient(kind: AbortKind) -> Self {
        AbortCause::new(kind, false)
    }

    #[inline]
    pub const fn explicit(code: u8) -> Self {
        AbortCause::new(AbortKind::Explicit(code), false)
    }

    #[inline]
    pub fn explicit_code(&self) -> Option<u8> {
        match self.kind {
            AbortKind::Explicit(code) => Some(code),
            _ => None,
        }
    }

    #[inline]
    pub fn is_lock_taken(&self) -> bool {
        self.explicit_code() == Some(LOCK_TAKEN)
    }

    #[inline]
    pub fn is_validation_error(&self) -> bool {
        self.explicit_code() == Some(VALIDATION_ERROR)
    }

    /// Aborts caused by contention or footprint, the ones worth a randomized delay before retrying.
    #[inline]
    pub fn needs_backoff(&self) -> bool {
        match self.kind {
            AbortKind::Conflict | AbortKind::CapacityOverflow => true,
            _ => false,
        }
    }
}

impl Display for AbortCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.persistent {
            write!(f, "{} (persistent)", self.kind)
        } else {
            Display::fmt(&self.kind, f)
        }
    }
}
