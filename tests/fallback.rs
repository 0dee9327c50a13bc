mod fallback {
    use crossbeam_utils::thread;
    use htbarrier::{
        htm::{
            self, AbortCause, AbortKind, Emulated, HardwareTransaction, NativeHtm, Scripted,
            Unsupported,
        },
        BarrierGroup, Config, Participant, Stats, TxState, XactId,
    };
    use std::{
        hint,
        sync::atomic::{AtomicU64, AtomicUsize, Ordering::Relaxed},
        time::Duration,
    };

    const X0: XactId = XactId(0);

    #[test]
    fn forced_conflict_falls_back_once() {
        let config = Config::new(1);
        let group = BarrierGroup::new(config).unwrap();
        let stats = Stats::new(1);
        let conflict = AbortCause::transient(AbortKind::Conflict);
        let mut me = group.join(0, Scripted::always(conflict), &stats).unwrap();

        let turn = group.fallback_lock().turn();
        me.begin_guarded(X0);
        assert_eq!(me.state(), TxState::InFallback);
        me.commit_guarded(X0);
        assert_eq!(me.retries(), 0);
        assert_eq!(group.fallback_lock().turn(), turn + 1);
        assert_eq!(me.htm().attempts(), config.max_retries + 1);

        let x0 = stats.xact(0, X0);
        assert_eq!(x0.fallbacks(), 1);
        assert_eq!(
            x0.fallback_retries.max(),
            Some(u64::from(config.max_retries) + 1)
        );
        assert_eq!(x0.conflict.count(), u64::from(config.max_retries) + 1);
        assert_eq!(x0.commits(), 0);
    }

    #[test]
    fn lock_taken_after_start_aborts() {
        let group = BarrierGroup::new(Config::new(1)).unwrap();
        let stats = Stats::new(1);
        let lock = group.fallback_lock();
        thread::scope(|s| {
            s.spawn(|_| {
                // Another thread enters the fallback path between `begin` and the subscription.
                let htm = Scripted::new(move |attempt| {
                    if attempt == 0 {
                        let _ticket = lock.acquire();
                    }
                    None
                });
                let mut me = group.join(0, htm, &stats).unwrap();
                me.begin_guarded(X0);
                assert_eq!(me.state(), TxState::InTransaction);
                me.commit_guarded(X0);
                assert_eq!(me.retries(), 0);
                assert_eq!(me.htm().attempts(), 2);
            });
            s.spawn(|_| {
                while stats.xact(0, X0).lock_taken.count() == 0 {
                    hint::spin_loop()
                }
                lock.release();
            });
        })
        .unwrap();

        let x0 = stats.xact(0, X0);
        assert_eq!(x0.aborts.count(), 1);
        assert_eq!(x0.lock_taken.count(), 1);
        assert_eq!(x0.commits(), 1);
        assert_eq!(x0.commit_retries.max(), Some(1));
        assert_eq!(x0.fallbacks(), 0);
    }

    fn sections<H: HardwareTransaction>(
        me: &mut Participant<'_, H, Stats>,
        done: &AtomicUsize,
        count: usize,
    ) {
        for _ in 0..count {
            me.guarded(X0, || {
                let _prev = done.fetch_add(1, Relaxed);
            });
            assert_eq!(me.retries(), 0);
            assert_eq!(me.state(), TxState::Idle);
        }
    }

    #[test]
    fn contended_sections_complete() {
        const THREAD_COUNT: usize = 4;
        const ITER_COUNT: usize = 2_000;
        const STARVED: usize = THREAD_COUNT - 1;

        let config = Config::new(THREAD_COUNT as u32)
            .max_retries(2)
            .backoff_max(Duration::from_micros(0));
        let group = BarrierGroup::new(config).unwrap();
        let stats = Stats::new(THREAD_COUNT);
        let done: Vec<AtomicUsize> = (0..THREAD_COUNT).map(|_| AtomicUsize::new(0)).collect();
        let conflict = AbortCause::transient(AbortKind::Conflict);

        thread::scope(|s| {
            for thread_id in 0..THREAD_COUNT {
                let (group, stats, done) = (&group, &stats, &done[thread_id]);
                s.spawn(move |_| {
                    // One thread never gets a transaction started and always falls back.
                    if thread_id == STARVED {
                        let htm = Scripted::always(conflict);
                        let mut me = group.join(thread_id, htm, stats).unwrap();
                        sections(&mut me, done, ITER_COUNT);
                    } else {
                        let mut me = group.join(thread_id, Emulated::new(), stats).unwrap();
                        sections(&mut me, done, ITER_COUNT);
                    }
                });
            }
        })
        .unwrap();

        for count in &done {
            assert_eq!(count.load(Relaxed), ITER_COUNT);
        }
        let starved = stats.xact(STARVED, X0);
        assert_eq!(starved.fallbacks(), ITER_COUNT as u64);
        assert_eq!(starved.commits(), 0);

        let total = stats.xact_total(X0);
        assert_eq!(
            total.commits() + total.fallbacks(),
            (THREAD_COUNT * ITER_COUNT) as u64
        );
        assert_eq!(
            group.fallback_lock().turn(),
            1u32.wrapping_add(total.fallbacks() as u32)
        );
        assert!(!group.fallback_lock().is_held());
    }

    fn increments<H: HardwareTransaction>(
        me: &mut Participant<'_, H, Stats>,
        counter: &AtomicU64,
        count: usize,
    ) {
        for _ in 0..count {
            me.guarded(X0, || {
                let value = counter.load(Relaxed);
                counter.store(value + 1, Relaxed);
            });
        }
    }

    #[test]
    fn shared_counter_is_exact() {
        const THREAD_COUNT: usize = 4;
        const ITER_COUNT: usize = 20_000;

        let group = BarrierGroup::new(Config::new(THREAD_COUNT as u32)).unwrap();
        let stats = Stats::new(THREAD_COUNT);
        let counter = AtomicU64::new(0);

        thread::scope(|s| {
            for thread_id in 0..THREAD_COUNT {
                let (group, stats, counter) = (&group, &stats, &counter);
                s.spawn(move |_| {
                    // Thread 0 always runs on the fallback lock, next to hardware transactions
                    // where the CPU has them.
                    if thread_id == 0 || !htm::htm_supported() {
                        let mut me = group.join(thread_id, Unsupported::new(), stats).unwrap();
                        increments(&mut me, counter, ITER_COUNT);
                    } else {
                        let mut me = group.join(thread_id, NativeHtm::default(), stats).unwrap();
                        increments(&mut me, counter, ITER_COUNT);
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(counter.into_inner(), (THREAD_COUNT * ITER_COUNT) as u64);
        let total = stats.xact_total(X0);
        assert_eq!(
            total.commits() + total.fallbacks(),
            (THREAD_COUNT * ITER_COUNT) as u64
        );
        assert_eq!(stats.xact(0, X0).fallbacks(), ITER_COUNT as u64);
        assert!(!group.fallback_lock().is_held());
    }
}
