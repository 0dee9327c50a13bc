//! A 1D three point stencil relaxed in phases separated by speculative barriers.
//!
//! ```text
//! RUST_LOG=debug cargo run --release --example stencil -- [threads] [phases]
//! ```

use crossbeam_utils::thread;
use htbarrier::{
    htm::{self, NativeHtm},
    BarrierGroup, Config, Stats, XactId,
};
use std::{
    env,
    error::Error,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
    time::Instant,
};

const CELLS: usize = 1 << 14;
const CHUNK: usize = 64;
const UPDATE: XactId = XactId(0);

struct Grid {
    cells: [Vec<AtomicU64>; 2],
}

impl Grid {
    fn new() -> Self {
        fn init() -> Vec<AtomicU64> {
            (0..CELLS)
                .map(|i| AtomicU64::new(((i % 97) as f64).to_bits()))
                .collect()
        }
        Grid {
            cells: [init(), init()],
        }
    }

    fn get(&self, buf: usize, i: usize) -> f64 {
        f64::from_bits(self.cells[buf][i].load(Relaxed))
    }

    fn set(&self, buf: usize, i: usize, value: f64) {
        self.cells[buf][i].store(value.to_bits(), Relaxed)
    }

    fn relax(&self, phase: u32, i: usize) {
        let src = phase as usize % 2;
        let left = self.get(src, i.saturating_sub(1));
        let right = self.get(src, (i + 1).min(CELLS - 1));
        let value = (left + self.get(src, i) + right) / 3.0;
        self.set(1 - src, i, value)
    }
}

fn reference(phases: u32) -> Grid {
    let grid = Grid::new();
    for phase in 0..phases {
        for i in 0..CELLS {
            grid.relax(phase, i)
        }
    }
    grid
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let thread_count: u32 = args.next().map(|arg| arg.parse()).transpose()?.unwrap_or(4);
    let phases: u32 = args.next().map(|arg| arg.parse()).transpose()?.unwrap_or(200);

    let config = Config::from_env(thread_count)?;
    if !htm::htm_supported() {
        log::warn!("no hardware transactional memory: guarded sections run on the fallback lock");
    }

    let group = BarrierGroup::new(config)?;
    let stats = Stats::new(thread_count as usize);
    let grid = Grid::new();
    let per_thread = (CELLS + thread_count as usize - 1) / thread_count as usize;

    let participants = (0..thread_count as usize)
        .map(|thread_id| group.join(thread_id, NativeHtm::default(), &stats))
        .collect::<htbarrier::Result<Vec<_>>>()?;

    let start = Instant::now();
    thread::scope(|s| {
        for mut me in participants {
            let grid = &grid;
            s.spawn(move |_| {
                let lo = (me.thread_id() * per_thread).min(CELLS);
                let hi = (lo + per_thread).min(CELLS);
                for phase in 0..phases {
                    for chunk in (lo..hi).step_by(CHUNK) {
                        me.guarded(UPDATE, || {
                            for i in chunk..(chunk + CHUNK).min(hi) {
                                grid.relax(phase, i)
                            }
                        });
                    }
                    me.speculative_barrier();
                }
                me.final_barrier();
            });
        }
    })
    .map_err(|_| "a worker thread panicked")?;
    let elapsed = start.elapsed();

    let expected = reference(phases);
    let out = phases as usize % 2;
    let max_error = (0..CELLS)
        .map(|i| (grid.get(out, i) - expected.get(out, i)).abs())
        .fold(0.0, f64::max);

    println!(
        "{} threads, {} phases, {} cells: {:?}, max error {:e}",
        thread_count, phases, CELLS, elapsed, max_error
    );
    stats.print_summary();
    Ok(())
}
