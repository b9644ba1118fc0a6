//! Runs interference-sensitive workloads side by side on up to four cores, starts every
//! iteration at the same instant on all cores, and measures each core's iteration with cycle and
//! event counters.
//!
//! The pieces, from the bottom up:
//!
//! * [`CounterPort`] and its implementations ([`Counter`] selects one by name),
//! * [`FlagBoard`] and [`RoundLock`], the shared state of the leader/follower [`Barrier`],
//! * [`MeasurementBracket`], measuring a closure with interrupts masked,
//! * [`CoRunnerDriver`], the per-core loop emitting one [`ResultRecord`] per iteration to a
//!   [`ResultSink`],
//! * [`Experiment`], starting one thread per core from an [`ExperimentConfig`].

#[macro_use]
extern crate log;

mod barrier;
mod bracket;
mod cache;
mod config;
mod countdown;
pub mod counters;
mod driver;
mod experiment;
mod flag_board;
pub mod interrupts;
pub mod malardalen;
mod perf;
mod pmu;
mod record;
mod round_lock;
mod sink;
pub mod synthetic;
pub mod testing_common;
mod workload;

pub use crate::barrier::{Barrier, CoreId, Role};
pub use crate::bracket::{CounterSnapshot, EventReading, EventReadings, MeasurementBracket};
pub use crate::cache::CacheConditioner;
pub use crate::config::{CacheConfig, CacheMode, CoreConfig, ExperimentConfig, StaggerConfig};
pub use crate::countdown::{calibrate_countdown, countdown, CountdownCalibration};
pub use crate::counters::{Counter, CounterPort, EventCode, EventSlot, MAX_EVENT_SLOTS};
pub use crate::driver::{CoRunnerDriver, Housekeeping, StaggerSchedule, YieldNow};
pub use crate::experiment::{Experiment, ExperimentReport};
pub use crate::flag_board::{AtomicFlag, CachePadded, FlagBoard, MAX_CORES};
pub use crate::interrupts::{InterruptMask, InterruptMasking};
pub use crate::record::ResultRecord;
pub use crate::round_lock::RoundLock;
pub use crate::sink::{FanOut, JsonLinesSink, LogSink, MemorySink, ResultSink, RESULTS_TARGET};
pub use crate::workload::{Workload, WorkloadParams, WorkloadRegistry};
