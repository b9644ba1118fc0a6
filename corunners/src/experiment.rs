//! Starting one measuring thread per core.
//!
//! Everything that can fail is done on each core's own thread before the first rendezvous:
//! pinning, counter and interrupt-mask construction, event binding, workload construction. The
//! cores then meet once in a startup rendezvous. If any core failed to set up, every core returns
//! an error from there instead of waiting forever in the first barrier round.

use crate::barrier::{Barrier, CoreId, Role};
use crate::bracket::MeasurementBracket;
use crate::cache::CacheConditioner;
use crate::config::ExperimentConfig;
use crate::countdown::{calibrate_countdown, CountdownCalibration};
use crate::counters::{Counter, CounterPort};
use crate::driver::{CoRunnerDriver, Housekeeping, StaggerSchedule};
use crate::interrupts::InterruptMasking;
use crate::sink::ResultSink;
use crate::workload::WorkloadRegistry;
use std::error::Error;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

type HookResult = Result<(), Box<dyn Error + Send + Sync>>;
type CoreStartHook<'a> = Box<dyn Fn(CoreId) -> HookResult + Sync + 'a>;

/// Outcome of a bounded run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExperimentReport {
    /// Completed iterations, indexed by core.
    pub completed: Vec<u64>,
    /// The leader's countdown calibration, empty unless requested.
    pub calibration: Vec<CountdownCalibration>,
}

pub struct Experiment<'a> {
    config: ExperimentConfig,
    registry: WorkloadRegistry,
    on_core_start: Option<CoreStartHook<'a>>,
    housekeeping: Option<Box<dyn Housekeeping + 'a>>,
}

impl<'a> Experiment<'a> {
    pub fn new(config: ExperimentConfig) -> Result<Self, Box<dyn Error + Send + Sync>> {
        config.validate()?;

        Ok(Experiment {
            config,
            registry: WorkloadRegistry::builtin(),
            on_core_start: None,
            housekeeping: None,
        })
    }

    pub fn with_registry(mut self, registry: WorkloadRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Runs `hook` first thing on every core's thread, e.g. to pin it to a CPU.
    pub fn on_core_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(CoreId) -> HookResult + Sync + 'a,
    {
        self.on_core_start = Some(Box::new(hook));
        self
    }

    /// The leader's per-iteration housekeeping, [`YieldNow`](crate::YieldNow) by default.
    pub fn with_housekeeping(mut self, housekeeping: impl Housekeeping + 'a) -> Self {
        self.housekeeping = Some(Box::new(housekeeping));
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Runs with the configured counter backend on every core.
    pub fn run(
        self,
        sink: &dyn ResultSink,
    ) -> Result<ExperimentReport, Box<dyn Error + Send + Sync>> {
        let counter = self.config.counter.clone();
        self.run_with_ports(sink, move |_| Counter::by_name(&counter))
    }

    /// Runs with counter ports created by `make_port`, called on each core's own thread.
    pub fn run_with_ports<P, F>(
        self,
        sink: &dyn ResultSink,
        make_port: F,
    ) -> Result<ExperimentReport, Box<dyn Error + Send + Sync>>
    where
        P: CounterPort,
        F: Fn(CoreId) -> Result<P, Box<dyn Error + Send + Sync>> + Sync,
    {
        let cores = self.config.cores.len();
        for (core, config) in self.config.cores.iter().enumerate() {
            if !self.registry.contains(&config.workload) {
                return Err(format!(
                    "core {}: unknown workload {:?}, expected one of: {}",
                    core,
                    config.workload,
                    self.registry.names().join(", ")
                )
                .into());
            }
        }

        let Experiment {
            config,
            registry,
            on_core_start,
            mut housekeeping,
        } = self;

        let barrier = Barrier::with_channels(cores, config.channels);
        let startup = Startup::new(cores);
        let context = CoreContext {
            config: &config,
            registry: &registry,
            on_core_start: on_core_start.as_deref(),
            barrier: &barrier,
            startup: &startup,
            sink,
            make_port: &make_port,
        };

        info!(
            "Experiment::run: label {}, {} cores, counter {}, {} channel(s), limit {:?}",
            config.label, cores, config.counter, config.channels, config.iterations
        );

        let mut outcomes: Vec<CoreOutcome> = thread::scope(|s| {
            let handles: Vec<_> = (0..cores)
                .map(|id| {
                    let housekeeping = if id == 0 { housekeeping.take() } else { None };
                    let context = &context;

                    let spawned = thread::Builder::new()
                        .name(format!("corun-core{}", id))
                        .spawn_scoped(s, move || context.run_core(id, housekeeping));
                    if spawned.is_err() {
                        // Nobody else will arrive for this core.
                        startup.arrival(id).arrive(false);
                    }
                    spawned
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(id, handle)| match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or_else(|_| Err(format!("core {} panicked", id).into())),
                    Err(e) => Err(format!("failed to spawn thread for core {}: {}", id, e).into()),
                })
                .collect()
        });

        sink.flush();

        // Report the core that failed to start rather than one that aborted because of it.
        if let Some(failed) = startup.first_failure() {
            if outcomes[failed].is_err() {
                outcomes.swap(0, failed);
            }
        }

        let mut report = ExperimentReport::default();
        for outcome in outcomes {
            let (completed, calibration) = outcome?;
            report.completed.push(completed);
            report.calibration.extend(calibration);
        }

        info!("Experiment::run: completed {:?}", report.completed);
        Ok(report)
    }
}

type CoreOutcome = Result<(u64, Vec<CountdownCalibration>), Box<dyn Error + Send + Sync>>;

/// What every core's thread borrows from the launching thread.
struct CoreContext<'s, F> {
    config: &'s ExperimentConfig,
    registry: &'s WorkloadRegistry,
    on_core_start: Option<&'s (dyn Fn(CoreId) -> HookResult + Sync + 's)>,
    barrier: &'s Barrier,
    startup: &'s Startup,
    sink: &'s dyn ResultSink,
    make_port: &'s F,
}

impl<'s, P, F> CoreContext<'s, F>
where
    P: CounterPort,
    F: Fn(CoreId) -> Result<P, Box<dyn Error + Send + Sync>>,
{
    fn run_core(
        &self,
        id: usize,
        housekeeping: Option<Box<dyn Housekeeping + 's>>,
    ) -> CoreOutcome {
        let config = self.config;
        let mut arrival = self.startup.arrival(id);

        let setup = || -> Result<_, Box<dyn Error + Send + Sync>> {
            let core = CoreId::new(id, self.barrier.cores())?;
            if let Some(hook) = self.on_core_start {
                hook(core)?;
            }

            let port = (self.make_port)(core)?;
            let mask = InterruptMasking::from_flag(config.mask_interrupts)?;
            let bracket = MeasurementBracket::new(port, mask, &config.cores[id].event_codes()?)?;
            let workload = self
                .registry
                .create(&config.cores[id].workload, &config.workload_params(id))?;

            Ok((core, bracket, workload))
        };

        let (core, mut bracket, workload) = match setup() {
            Ok(parts) => {
                arrival.arrive(true);
                parts
            }
            Err(e) => {
                error!("core {}: startup failed: {}", id, e);
                arrival.arrive(false);
                return Err(format!("core {}: {}", id, e).into());
            }
        };

        if !self.startup.wait() {
            return Err(format!("core {}: aborted, another core failed to start", id).into());
        }

        let calibration = if core.role() == Role::Leader && config.calibrate_countdown {
            calibrate_countdown(&mut bracket)
        } else {
            Vec::new()
        };

        let mut driver =
            CoRunnerDriver::new(core, &config.label, self.barrier, bracket, workload, self.sink)
                .with_cache(CacheConditioner::for_role(&config.cache, core.role()))
                .with_stagger(StaggerSchedule::new(config.stagger));
        if let Some(housekeeping) = housekeeping {
            driver = driver.with_housekeeping(housekeeping);
        }

        Ok((driver.run(config.iterations), calibration))
    }
}

/// Startup rendezvous: counts cores that finished setting up and remembers whether any failed.
struct Startup {
    cores: usize,
    arrived: AtomicUsize,
    failed: AtomicBool,
    first_failure: AtomicUsize,
}

impl Startup {
    fn new(cores: usize) -> Startup {
        Startup {
            cores,
            arrived: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            first_failure: AtomicUsize::new(usize::MAX),
        }
    }

    fn arrival(&self, core: usize) -> Arrival<'_> {
        Arrival {
            startup: self,
            core,
            done: false,
        }
    }

    fn first_failure(&self) -> Option<usize> {
        match self.first_failure.load(Ordering::Acquire) {
            usize::MAX => None,
            core => Some(core),
        }
    }

    /// Spins until every core arrived, returns `false` if any of them failed.
    fn wait(&self) -> bool {
        while self.arrived.load(Ordering::Acquire) < self.cores {
            hint::spin_loop();
        }
        !self.failed.load(Ordering::Acquire)
    }
}

/// A core's single arrival at the startup rendezvous. A core that unwinds before arriving
/// counts as failed.
struct Arrival<'s> {
    startup: &'s Startup,
    core: usize,
    done: bool,
}

impl Arrival<'_> {
    fn arrive(&mut self, ok: bool) {
        if !self.done {
            self.done = true;
            if !ok {
                let _ = self.startup.first_failure.compare_exchange(
                    usize::MAX,
                    self.core,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                self.startup.failed.store(true, Ordering::Release);
            }
            self.startup.arrived.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Drop for Arrival<'_> {
    fn drop(&mut self) {
        self.arrive(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::sink::MemorySink;
    use crate::testing_common::{SimClock, SimulatedCounters};

    fn config(workloads: &[&str]) -> ExperimentConfig {
        ExperimentConfig {
            cores: workloads.iter().map(|w| CoreConfig::new(w)).collect(),
            iterations: Some(3),
            ..ExperimentConfig::default()
        }
    }

    #[test]
    fn unknown_workload_fails_before_spawning() {
        let sink = MemorySink::new();
        let err = Experiment::new(config(&["countdown", "disparity"]))
            .unwrap()
            .run(&sink)
            .unwrap_err();
        assert!(err.to_string().contains("disparity"));
        assert!(sink.is_empty());
    }

    #[test]
    fn one_failing_core_aborts_all() {
        let sink = MemorySink::new();
        let clock = SimClock::new();
        let err = Experiment::new(config(&["countdown", "countdown", "countdown"]))
            .unwrap()
            .run_with_ports(&sink, |core| {
                if core.index() == 2 {
                    Err("no counters on this core".into())
                } else {
                    Ok(SimulatedCounters::new(clock.clone()))
                }
            })
            .unwrap_err();

        assert!(err.to_string().contains("no counters"), "{}", err);
        assert!(sink.is_empty());
    }

    #[test]
    fn start_hook_failure_aborts_all() {
        let sink = MemorySink::new();
        let result = Experiment::new(config(&["countdown", "countdown"]))
            .unwrap()
            .on_core_start(|core| {
                if core.index() == 0 {
                    Err("cannot pin".into())
                } else {
                    Ok(())
                }
            })
            .run(&sink);

        assert!(result.is_err());
        assert!(sink.is_empty());
    }

    #[test]
    fn bounded_run_reports_iterations() {
        let sink = MemorySink::new();
        let report = Experiment::new(ExperimentConfig {
            calibrate_countdown: true,
            ..config(&["countdown", "bsort"])
        })
        .unwrap()
        .run_with_ports(&sink, |_| Ok(SimulatedCounters::new(SimClock::new())))
        .unwrap();

        assert_eq!(report.completed, vec![3, 3]);
        assert_eq!(report.calibration.len(), 10);
        assert_eq!(sink.len(), 6);
    }
}
