//! Abort classification and event recording.

use crate::{
    htm::{AbortCause, HardwareTransaction},
    stats::{StatsSink, XactId},
};

/// What happened to a guarded section or speculative transaction.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum TxEvent {
    Commit { retries: u32 },
    Fallback { retries: u32 },
    Abort(AbortCause),
}

/// Maps a raw back-end status to its canonical cause.
#[inline]
pub fn classify<H: HardwareTransaction>(status: H::Status) -> AbortCause {
    H::classify(status)
}

/// Forwards `event` to `sink`.
///
/// Must not be called from inside an open transaction: sinks may lock, and the log may write.
#[inline]
pub fn record<S: StatsSink + ?Sized>(sink: &S, thread: usize, xact: XactId, event: TxEvent) {
    match event {
        TxEvent::Commit { retries } => sink.on_commit(thread, xact, retries),
        TxEvent::Fallback { retries } => sink.on_fallback(thread, xact, retries),
        TxEvent::Abort(cause) => {
            log::trace!("thread {} xact {}: abort, {}", thread, xact, cause);
            sink.on_abort(thread, xact, cause)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        htm::{AbortKind, Emulated, LOCK_TAKEN},
        stats::{Stats, SPEC_XACT},
    };

    #[test]
    fn classify_is_back_end_specific() {
        let conflict = AbortCause::transient(AbortKind::Conflict);
        assert_eq!(classify::<Emulated>(conflict), conflict);
    }

    #[test]
    fn record_routes_events() {
        let stats = Stats::new(2);
        record(&stats, 1, XactId(0), TxEvent::Commit { retries: 3 });
        record(&stats, 1, XactId(0), TxEvent::Fallback { retries: 6 });
        record(
            &stats,
            1,
            SPEC_XACT,
            TxEvent::Abort(AbortCause::explicit(LOCK_TAKEN)),
        );

        let x0 = stats.xact(1, XactId(0));
        assert_eq!(x0.commits(), 1);
        assert_eq!(x0.commit_retries.total(), 3);
        assert_eq!(x0.fallbacks(), 1);
        assert_eq!(stats.xact(1, SPEC_XACT).lock_taken.count(), 1);
        assert_eq!(stats.thread(0).aborts.count(), 0);
    }
}
