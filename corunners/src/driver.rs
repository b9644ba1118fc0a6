//! The per-core measurement loop.

use crate::barrier::{Barrier, CoreId, Role};
use crate::bracket::MeasurementBracket;
use crate::cache::CacheConditioner;
use crate::config::StaggerConfig;
use crate::counters::CounterPort;
use crate::interrupts::InterruptMask;
use crate::record::ResultRecord;
use crate::sink::ResultSink;
use crate::workload::Workload;
use std::thread;

/// Start-time offset of a core as a function of the (1-based) iteration number.
///
/// The offset is `step` for every `iterations_per_step` iterations completed before the
/// current one: with 5 iterations per step and a step of 100, iterations 1 to 5 have offset 0,
/// 6 to 10 have 100, 11 to 15 have 200.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaggerSchedule {
    config: StaggerConfig,
}

impl StaggerSchedule {
    pub fn new(config: StaggerConfig) -> StaggerSchedule {
        assert!(config.iterations_per_step > 0);
        StaggerSchedule { config }
    }

    /// No offsets at all.
    pub fn none() -> StaggerSchedule {
        StaggerSchedule::new(StaggerConfig {
            offset_step: 0,
            ..StaggerConfig::default()
        })
    }

    #[inline]
    pub fn offset_for(&self, iteration: u64) -> u64 {
        let steps = iteration.saturating_sub(1) / self.config.iterations_per_step;
        steps.saturating_mul(self.config.offset_step)
    }

    /// Countdown steps a follower burns after the rendezvous of `iteration`.
    #[inline]
    pub fn delay_for(&self, iteration: u64) -> u64 {
        self.offset_for(iteration)
            .saturating_mul(self.config.delay_step_countdown)
    }
}

/// Work the leader does once per iteration, after emitting its record.
pub trait Housekeeping: Send {
    fn after_iteration(&mut self, iteration: u64);
}

/// Gives other threads on the leader's CPU a chance to run.
#[derive(Clone, Copy, Debug, Default)]
pub struct YieldNow;

impl Housekeeping for YieldNow {
    fn after_iteration(&mut self, _: u64) {
        thread::yield_now();
    }
}

/// Runs iterations of one core's workload in lockstep with the other cores.
///
/// Every iteration:
///
/// 1. `prepare` the workload (not measured)
/// 2. condition the caches
/// 3. rendezvous with the other cores, as leader or follower, and for followers the stagger
///    delay
/// 4. measure `run_once`
/// 5. emit a [`ResultRecord`]
/// 6. leader only: housekeeping
pub struct CoRunnerDriver<'a, P, M> {
    core: CoreId,
    label: &'a str,
    barrier: &'a Barrier,
    bracket: MeasurementBracket<P, M>,
    workload: Box<dyn Workload>,
    cache: CacheConditioner,
    stagger: StaggerSchedule,
    sink: &'a dyn ResultSink,
    housekeeping: Option<Box<dyn Housekeeping + 'a>>,
    completed: u64,
}

impl<'a, P: CounterPort, M: InterruptMask> CoRunnerDriver<'a, P, M> {
    /// A driver without cache conditioning or stagger; the leader yields after every iteration.
    pub fn new(
        core: CoreId,
        label: &'a str,
        barrier: &'a Barrier,
        bracket: MeasurementBracket<P, M>,
        workload: Box<dyn Workload>,
        sink: &'a dyn ResultSink,
    ) -> Self {
        let housekeeping: Option<Box<dyn Housekeeping + 'a>> = match core.role() {
            Role::Leader => Some(Box::new(YieldNow)),
            Role::Follower => None,
        };

        CoRunnerDriver {
            core,
            label,
            barrier,
            bracket,
            workload,
            cache: CacheConditioner::None,
            stagger: StaggerSchedule::none(),
            sink,
            housekeeping,
            completed: 0,
        }
    }

    pub fn with_cache(mut self, cache: CacheConditioner) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_stagger(mut self, stagger: StaggerSchedule) -> Self {
        self.stagger = stagger;
        self
    }

    /// Replaces the leader's housekeeping. Ignored on followers.
    pub fn with_housekeeping(mut self, housekeeping: Box<dyn Housekeeping + 'a>) -> Self {
        if self.core.role() == Role::Leader {
            self.housekeeping = Some(housekeeping);
        }
        self
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Iterations completed so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Runs one iteration and returns its record.
    pub fn step(&mut self) -> ResultRecord {
        let iteration = self.completed + 1;
        let channel = self.barrier.channel_for(iteration);

        self.workload.prepare();
        self.cache.condition();

        match self.core.role() {
            Role::Leader => self.barrier.lead(channel),
            Role::Follower => {
                self.barrier
                    .follow(self.core, channel, self.stagger.delay_for(iteration))
            }
        }

        let workload = &mut self.workload;
        let snapshot = self.bracket.measure(|| workload.run_once());

        let record = ResultRecord::from_snapshot(
            self.label,
            self.workload.name(),
            self.barrier.cores(),
            self.core.index(),
            iteration,
            self.stagger.offset_for(iteration),
            snapshot,
        );
        self.sink.emit(&record);

        if let Some(housekeeping) = &mut self.housekeeping {
            housekeeping.after_iteration(iteration);
        }

        self.completed = iteration;
        record
    }

    /// Runs until `limit` iterations have completed, forever when there is no limit.
    ///
    /// Returns the number of completed iterations.
    pub fn run(&mut self, limit: Option<u64>) -> u64 {
        info!(
            "{}: running {} as {:?}, limit {:?}",
            self.core,
            self.workload.name(),
            self.core.role(),
            limit
        );

        while limit.map_or(true, |limit| self.completed < limit) {
            self.step();
        }

        self.completed
    }

    pub fn into_bracket(self) -> MeasurementBracket<P, M> {
        self.bracket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::Unmasked;
    use crate::sink::MemorySink;
    use crate::testing_common::{SimClock, SimulatedCounters, SimulatedWorkload};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Seen(Arc<Mutex<Vec<u64>>>);

    impl Housekeeping for Seen {
        fn after_iteration(&mut self, iteration: u64) {
            self.0.lock().push(iteration);
        }
    }

    #[test]
    fn solo_leader_runs_and_emits() {
        let clock = SimClock::new();
        let barrier = Barrier::new(1);
        let sink = MemorySink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bracket =
            MeasurementBracket::new(SimulatedCounters::new(clock.clone()), Unmasked, &[]).unwrap();

        let mut driver = CoRunnerDriver::new(
            CoreId::LEADER,
            "solo",
            &barrier,
            bracket,
            Box::new(SimulatedWorkload::new(clock, 42)),
            &sink,
        )
        .with_stagger(schedule(2, 7))
        .with_housekeeping(Box::new(Seen(Arc::clone(&seen))));

        assert_eq!(driver.run(Some(3)), 3);
        assert_eq!(driver.completed(), 3);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);

        let records = sink.records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.cycles == 42 && r.label == "solo" && r.cores == 1));
        assert_eq!(
            records.iter().map(|r| r.offset).collect::<Vec<_>>(),
            vec![0, 0, 7]
        );
        assert!(barrier.is_quiescent());
    }

    fn schedule(iterations_per_step: u64, offset_step: u64) -> StaggerSchedule {
        StaggerSchedule::new(StaggerConfig {
            iterations_per_step,
            offset_step,
            delay_step_countdown: 10,
        })
    }

    #[test]
    fn stagger_offsets() {
        let stagger = schedule(5, 100);
        let offsets: Vec<u64> = (1..=16).map(|n| stagger.offset_for(n)).collect();
        assert_eq!(&offsets[..5], &[0; 5]);
        assert_eq!(&offsets[5..10], &[100; 5]);
        assert_eq!(&offsets[10..15], &[200; 5]);
        assert_eq!(offsets[15], 300);
        assert_eq!(stagger.delay_for(15), 2_000);
    }

    #[test]
    fn no_stagger() {
        let stagger = StaggerSchedule::none();
        assert_eq!(stagger.offset_for(1_000_000), 0);
        assert_eq!(stagger.delay_for(1_000_000), 0);
    }

    #[test]
    fn one_iteration_per_step() {
        let stagger = schedule(1, 3);
        assert_eq!(stagger.offset_for(1), 0);
        assert_eq!(stagger.offset_for(2), 3);
        assert_eq!(stagger.offset_for(10), 27);
    }
}
