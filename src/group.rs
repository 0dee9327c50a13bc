use crate::{
    barrier::GlobalBarrierState,
    config::Config,
    error::{Error, Result},
    fallback::TicketLock,
    htm::HardwareTransaction,
    protocol::Participant,
    stats::StatsSink,
};
use core::{
    num::NonZeroU32,
    sync::atomic::{
        AtomicBool,
        Ordering::{Acquire, Relaxed, Release},
    },
};

/// A fixed team of threads sharing one barrier and one fallback lock.
///
/// Threads take part through a [`Participant`] obtained from [`join`](BarrierGroup::join). Every
/// thread slot can be joined by at most one participant at a time.
///
/// ```
/// use htbarrier::{htm::Emulated, BarrierGroup, Config, XactId};
///
/// let group = BarrierGroup::new(Config::new(1))?;
/// let mut me = group.join(0, Emulated::new(), &())?;
/// let value = me.guarded(XactId(0), || 42);
/// me.final_barrier();
/// assert_eq!(value, 42);
/// assert_eq!(group.epoch(), 2);
/// # Ok::<(), htbarrier::Error>(())
/// ```
#[derive(Debug)]
pub struct BarrierGroup {
    config: Config,
    state:  GlobalBarrierState,
    lock:   TicketLock,
    joined: Box<[AtomicBool]>,
}

impl BarrierGroup {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let thread_count = NonZeroU32::new(config.thread_count).ok_or(Error::ZeroThreads)?;
        log::info!(
            "barrier group: {} threads, {} retries, speculation budget {}, backoff up to {:?}",
            config.thread_count,
            config.max_retries,
            config.speculation_budget,
            config.backoff_max
        );
        Ok(BarrierGroup {
            config,
            state: GlobalBarrierState::new(thread_count),
            lock: TicketLock::new(),
            joined: (0..config.thread_count)
                .map(|_| AtomicBool::new(false))
                .collect(),
        })
    }

    /// Joins the group as thread `thread_id`, transacting through `htm` and reporting to `sink`.
    pub fn join<'a, H, S>(
        &'a self,
        thread_id: usize,
        htm: H,
        sink: &'a S,
    ) -> Result<Participant<'a, H, S>>
    where
        H: HardwareTransaction,
        S: StatsSink + ?Sized,
    {
        let slot = self
            .joined
            .get(thread_id)
            .ok_or(Error::ThreadIdOutOfRange {
                thread_id,
                thread_count: self.config.thread_count,
            })?;
        if slot.compare_exchange(false, true, Acquire, Relaxed).is_err() {
            return Err(Error::AlreadyJoined(thread_id));
        }
        log::trace!("thread {} joined the barrier group", thread_id);
        Ok(Participant::new(self, thread_id, htm, sink))
    }

    pub(crate) fn leave(&self, thread_id: usize) {
        if let Some(slot) = self.joined.get(thread_id) {
            slot.store(false, Release)
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn thread_count(&self) -> u32 {
        self.state.thread_count()
    }

    #[inline]
    pub fn state(&self) -> &GlobalBarrierState {
        &self.state
    }

    /// The lock serializing guarded sections that gave up on hardware transactions.
    #[inline]
    pub fn fallback_lock(&self) -> &TicketLock {
        &self.lock
    }

    /// The current epoch.
    #[inline]
    pub fn epoch(&self) -> u32 {
        self.state.epoch()
    }
}
