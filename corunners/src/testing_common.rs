//! Software stand-ins for the hardware, shared by unit and integration tests.
//!
//! [`SimulatedCounters`] is a [`CounterPort`] driven by a [`SimClock`] instead of a cycle
//! counter: time only passes when someone calls [`SimClock::advance`], which makes bracket
//! results exact. [`SimulatedWorkload`] advances the clock by a fixed amount per run.

use crate::config::{CacheConfig, CacheMode, CoreConfig, ExperimentConfig};
use crate::counters::{CounterPort, EventCode, EventSlot, MAX_EVENT_SLOTS};
use crate::experiment::{Experiment, ExperimentReport};
use crate::interrupts::InterruptMask;
use crate::record::ResultRecord;
use crate::sink::MemorySink;
use crate::workload::{Workload, WorkloadParams, WorkloadRegistry};
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

thread_local! {
    static THREAD_TICKS: Cell<u64> = Cell::new(0);
}

/// Simulated time, in cycles.
#[derive(Clone, Debug)]
pub enum SimClock {
    /// One clock for everybody holding a clone.
    Shared(Arc<AtomicU64>),
    /// A separate clock per thread, so that cores do not see each other's work.
    PerThread,
}

impl SimClock {
    pub fn new() -> SimClock {
        SimClock::Shared(Arc::new(AtomicU64::new(0)))
    }

    pub fn per_thread() -> SimClock {
        SimClock::PerThread
    }

    pub fn now(&self) -> u64 {
        match self {
            SimClock::Shared(ticks) => ticks.load(Ordering::SeqCst),
            SimClock::PerThread => THREAD_TICKS.with(|ticks| ticks.get()),
        }
    }

    pub fn advance(&self, cycles: u64) {
        match self {
            SimClock::Shared(ticks) => {
                ticks.fetch_add(cycles, Ordering::SeqCst);
            }
            SimClock::PerThread => THREAD_TICKS.with(|ticks| ticks.set(ticks.get() + cycles)),
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        SimClock::new()
    }
}

/// Every operation performed on a [`SimulatedCounters`] or [`RecordingMask`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortCall {
    EnableGlobal,
    EnableCycles,
    DisableCycles,
    ResetCycles,
    ReadCycles,
    Configure(usize, EventCode),
    EnableEvent(usize),
    DisableEvent(usize),
    ReadEvent(usize),
    ResetEvents,
    Mask,
    Unmask,
}

pub type CallLog = Arc<Mutex<Vec<PortCall>>>;

#[derive(Clone, Copy, Debug, Default)]
struct SimCounter {
    accumulated: u64,
    running_since: Option<u64>,
}

impl SimCounter {
    fn enable(&mut self, now: u64) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    fn disable(&mut self, now: u64) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += now - since;
        }
    }

    fn reset(&mut self, now: u64) {
        self.accumulated = 0;
        if self.running_since.is_some() {
            self.running_since = Some(now);
        }
    }

    fn read(&self, now: u64) -> u64 {
        self.accumulated + self.running_since.map_or(0, |since| now - since)
    }
}

/// A [`CounterPort`] counting [`SimClock`] cycles.
///
/// Every event counter counts one event per cycle while enabled, whatever its code.
pub struct SimulatedCounters {
    clock: SimClock,
    slots: usize,
    global: bool,
    cycles: SimCounter,
    events: [SimCounter; MAX_EVENT_SLOTS],
    codes: [Option<EventCode>; MAX_EVENT_SLOTS],
    log: CallLog,
}

impl SimulatedCounters {
    pub fn new(clock: SimClock) -> SimulatedCounters {
        SimulatedCounters::with_slots(clock, MAX_EVENT_SLOTS)
    }

    pub fn with_slots(clock: SimClock, slots: usize) -> SimulatedCounters {
        SimulatedCounters {
            clock,
            slots: slots.min(MAX_EVENT_SLOTS),
            global: false,
            cycles: SimCounter::default(),
            events: [SimCounter::default(); MAX_EVENT_SLOTS],
            codes: [None; MAX_EVENT_SLOTS],
            log: CallLog::default(),
        }
    }

    /// The log of every call made on this port, shareable with a [`RecordingMask`].
    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    pub fn is_globally_enabled(&self) -> bool {
        self.global
    }

    pub fn event_code(&self, slot: EventSlot) -> Option<EventCode> {
        self.codes[slot.index()]
    }

    fn record(&self, call: PortCall) {
        self.log.lock().push(call);
    }
}

impl CounterPort for SimulatedCounters {
    fn enable_global(&mut self) {
        self.record(PortCall::EnableGlobal);
        self.global = true;
    }

    fn enable_cycle_counter(&mut self) {
        self.record(PortCall::EnableCycles);
        assert!(self.global, "cycle counter enabled before the global enable");
        self.cycles.enable(self.clock.now());
    }

    fn disable_cycle_counter(&mut self) {
        self.record(PortCall::DisableCycles);
        self.cycles.disable(self.clock.now());
    }

    fn reset_cycle_counter(&mut self) {
        self.record(PortCall::ResetCycles);
        self.cycles.reset(self.clock.now());
    }

    fn read_cycle_counter(&self) -> u64 {
        self.record(PortCall::ReadCycles);
        self.cycles.read(self.clock.now())
    }

    fn event_slots(&self) -> usize {
        self.slots
    }

    fn configure_event_counter(&mut self, slot: EventSlot, code: EventCode) {
        self.record(PortCall::Configure(slot.index(), code));
        assert!(slot.index() < self.slots, "slot {} not implemented", slot);
        self.codes[slot.index()] = Some(code);
    }

    fn enable_event_counter(&mut self, slot: EventSlot) {
        self.record(PortCall::EnableEvent(slot.index()));
        self.events[slot.index()].enable(self.clock.now());
    }

    fn disable_event_counter(&mut self, slot: EventSlot) {
        self.record(PortCall::DisableEvent(slot.index()));
        self.events[slot.index()].disable(self.clock.now());
    }

    fn read_event_counter(&self, slot: EventSlot) -> u32 {
        self.record(PortCall::ReadEvent(slot.index()));
        self.events[slot.index()].read(self.clock.now()) as u32
    }

    fn reset_event_counters(&mut self) {
        self.record(PortCall::ResetEvents);
        let now = self.clock.now();
        for event in &mut self.events {
            event.reset(now);
        }
    }
}

/// An [`InterruptMask`] that only logs.
pub struct RecordingMask {
    log: CallLog,
    masked: bool,
}

impl RecordingMask {
    pub fn new(log: CallLog) -> RecordingMask {
        RecordingMask { log, masked: false }
    }
}

impl InterruptMask for RecordingMask {
    fn mask(&mut self) {
        assert!(!self.masked, "masked twice");
        self.masked = true;
        self.log.lock().push(PortCall::Mask);
    }

    fn unmask(&mut self) {
        assert!(self.masked, "unmasked while not masked");
        self.masked = false;
        self.log.lock().push(PortCall::Unmask);
    }
}

/// Advances a [`SimClock`] by `input_size` cycles per run.
pub struct SimulatedWorkload {
    clock: SimClock,
    cycles: u64,
}

impl SimulatedWorkload {
    pub const NAME: &'static str = "simulated";
    pub const DEFAULT_CYCLES: usize = 1_000;

    pub fn new(clock: SimClock, cycles: u64) -> SimulatedWorkload {
        SimulatedWorkload { clock, cycles }
    }

    /// Adds `simulated` to `registry`, each instance advancing `clock`.
    pub fn register(registry: &mut WorkloadRegistry, clock: SimClock) {
        registry.register(SimulatedWorkload::NAME, move |params: &WorkloadParams| {
            let cycles = params.input_size_or(SimulatedWorkload::DEFAULT_CYCLES)?;
            Ok(Box::new(SimulatedWorkload::new(clock.clone(), cycles as u64)))
        });
    }
}

impl Workload for SimulatedWorkload {
    fn name(&self) -> &str {
        SimulatedWorkload::NAME
    }

    fn run_once(&mut self) {
        self.clock.advance(self.cycles);
    }
}

/// A registry with the built-in workloads plus `simulated` on per-thread clocks.
pub fn simulated_registry() -> WorkloadRegistry {
    let mut registry = WorkloadRegistry::builtin();
    SimulatedWorkload::register(&mut registry, SimClock::per_thread());
    registry
}

/// `cores` cores running `simulated` workloads of `cycles[i]` cycles each, without cache
/// conditioning, for `iterations` iterations.
pub fn simulated_config(cycles: &[usize], iterations: u64) -> ExperimentConfig {
    ExperimentConfig {
        label: "simulated".to_owned(),
        cores: cycles
            .iter()
            .map(|&c| CoreConfig {
                input_size: Some(c),
                ..CoreConfig::new(SimulatedWorkload::NAME)
            })
            .collect(),
        cache: CacheConfig {
            mode: CacheMode::None,
            ..CacheConfig::default()
        },
        iterations: Some(iterations),
        ..ExperimentConfig::default()
    }
}

/// Runs `config` with [`SimulatedCounters`] on per-thread clocks and returns the report and
/// the sink holding every emitted record.
pub fn run_simulated_into_sink(config: ExperimentConfig) -> (ExperimentReport, MemorySink) {
    let sink = MemorySink::new();
    let report = Experiment::new(config)
        .unwrap()
        .with_registry(simulated_registry())
        .run_with_ports(&sink, |_| Ok(SimulatedCounters::new(SimClock::per_thread())))
        .unwrap();

    (report, sink)
}

/// Like [`run_simulated_into_sink`], returning the records in emission order.
pub fn run_simulated_experiment(config: ExperimentConfig) -> (ExperimentReport, Vec<ResultRecord>) {
    let (report, sink) = run_simulated_into_sink(config);
    (report, sink.records())
}
