//! Speculative barriers for parallel loops, built on hardware transactional memory.
//!
//! A thread arriving at an ordinary barrier stops until every other thread of its team has
//! arrived. With `htbarrier` the thread instead opens a hardware transaction and keeps working on
//! the next phase. The transaction commits only once the barrier's epoch has caught up, so to
//! every other thread the barrier behaves exactly like a blocking one; if the speculation conflicts
//! with a thread still in the previous phase, the hardware rolls it back and the thread tries
//! again.
//!
//! # Examples
//!
//! ```
//! use crossbeam_utils::thread;
//! use htbarrier::{htm::NativeHtm, BarrierGroup, Config, Stats, XactId};
//! use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
//!
//! const THREAD_COUNT: u32 = 4;
//! const PHASES: u32 = 100;
//!
//! let group = BarrierGroup::new(Config::new(THREAD_COUNT))?;
//! let stats = Stats::new(THREAD_COUNT as usize);
//! let sum = AtomicU64::new(0);
//!
//! thread::scope(|s| {
//!     for thread_id in 0..THREAD_COUNT as usize {
//!         let (group, stats, sum) = (&group, &stats, &sum);
//!         s.spawn(move |_| {
//!             let mut me = group.join(thread_id, NativeHtm::default(), stats).unwrap();
//!             for _ in 0..PHASES {
//!                 me.guarded(XactId(0), || {
//!                     sum.fetch_add(1, Relaxed);
//!                 });
//!                 me.speculative_barrier();
//!             }
//!             me.final_barrier();
//!         });
//!     }
//! })
//! .unwrap();
//!
//! assert_eq!(sum.into_inner(), u64::from(THREAD_COUNT * PHASES));
//! assert_eq!(group.epoch(), PHASES + 2);
//! # Ok::<(), htbarrier::Error>(())
//! ```
//!
//! # Features
//!
//! * `rtm`, Intel RTM back-end (nightly, x86_64). Escape sections need TSXLDTRK.
//! * `power`, POWER8+ HTM back-end (nightly, powerpc64).
//!
//! Without either, [`htm::NativeHtm`] is [`htm::Unsupported`]: no transaction ever starts, every
//! guarded section runs under the fallback lock and every barrier blocks. [`htm::Emulated`] runs
//! transactions in place without isolation and is only meant for tests.

#![cfg_attr(feature = "nightly", feature(core_intrinsics))]
#![warn(macro_use_extern_crate)]
#![warn(missing_debug_implementations)]
#![warn(unused_lifetimes)]
#![cfg_attr(not(test), warn(unused_results))]
#![deny(rust_2018_compatibility)]
#![deny(rust_2018_idioms)]
#![deny(unused_must_use)]

#[macro_use]
mod internal;

mod abort;
pub mod barrier;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod fallback;
mod group;
mod protocol;
pub mod stats;

pub use abort::{classify, record, TxEvent};
pub use config::Config;
pub use descriptor::{TransactionDescriptor, TxState};
pub use error::{Error, Result};
pub use group::BarrierGroup;
#[doc(inline)]
pub use htbarrier_htm as htm;
pub use protocol::Participant;
pub use stats::{Stats, StatsSink, XactId, SPEC_XACT};
