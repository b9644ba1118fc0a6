//! Cycle and event counters, and their implementation.
//!
//! # Available counters
//!
//! Name (for [`Counter::by_name()`]) | Counter                 | OSes  | CPUs
//! --------------------------------- | -------                 | ----  | ----
//! `wall-time`                       | [`WallTime`]            | any   | any
//! `pmu`                             | [`Pmu`]                 | any   | `aarch64` (EL0 access to the PMU enabled)
//! `perf`                            | [`PerfCounters`]        | Linux | any with `perf_event` support
//!
//! Every counter exposes the same register-level interface, [`CounterPort`], which is what the
//! [`MeasurementBracket`](crate::MeasurementBracket) drives. The software-simulated port used
//! by tests lives in [`testing_common`](crate::testing_common).
//!
//! # Limitations and caveats
//!
//! * `pmu` talks to `PMCR_EL0` and friends directly. On Linux these registers are only
//!   accessible from userspace when the kernel has set `PMUSERENR_EL0.EN` (usually via a small
//!   kernel module). Otherwise the first access traps and the process dies; there is no way to
//!   turn that into an error value.
//! * `perf` counts only the calling thread and excludes kernel and hypervisor execution, which
//!   keeps interrupt handlers out of the counts even though userspace cannot mask interrupts.
//!   Each core must therefore create its own `perf` counter, on its own thread.
//! * `wall-time` has no event slots; it exists so that the harness runs anywhere.
//!
//! For ergonomic reasons, the public API doesn't vary based on target. Instead, attempting to
//! create an unsupported counter returns `Err`, just like any issue detected at runtime.
//! Once created, no counter operation returns an error: counter values are always accepted
//! as-is.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::time::Instant;

pub use crate::perf::PerfCounters;
pub use crate::pmu::Pmu;

/// Upper bound on configurable event counters, independent of what the hardware offers.
pub const MAX_EVENT_SLOTS: usize = 4;

/// Index of one of the configurable event counters (`0..MAX_EVENT_SLOTS`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSlot(u8);

impl EventSlot {
    pub fn new(index: usize) -> Option<EventSlot> {
        if index < MAX_EVENT_SLOTS {
            Some(EventSlot(index as u8))
        } else {
            None
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Bit of this slot in `PMCNTENSET_EL0` / `PMCNTENCLR_EL0`.
    #[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
    #[inline]
    pub(crate) fn enable_bit(self) -> u64 {
        1 << self.0
    }
}

impl fmt::Display for EventSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vendor-defined event number, written to the event type register of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventCode(pub u32);

impl EventCode {
    // ARMv8 common architectural events.
    pub const L1I_TLB_REFILL: EventCode = EventCode(0x02);
    pub const L1D_CACHE_REFILL: EventCode = EventCode(0x03);
    pub const L1D_CACHE: EventCode = EventCode(0x04);
    pub const L1D_TLB_REFILL: EventCode = EventCode(0x05);
    pub const MEM_ACCESS: EventCode = EventCode(0x13);
    pub const L1D_CACHE_WB: EventCode = EventCode(0x15);
    pub const L2D_CACHE: EventCode = EventCode(0x16);
    pub const L2D_CACHE_REFILL: EventCode = EventCode(0x17);
    pub const L2D_CACHE_WB: EventCode = EventCode(0x18);
    pub const BUS_ACCESS: EventCode = EventCode(0x19);

    const NAMED: &'static [(&'static str, EventCode)] = &[
        ("l1i_tlb_refill", EventCode::L1I_TLB_REFILL),
        ("l1d_cache_refill", EventCode::L1D_CACHE_REFILL),
        ("l1d_cache", EventCode::L1D_CACHE),
        ("l1d_tlb_refill", EventCode::L1D_TLB_REFILL),
        ("mem_access", EventCode::MEM_ACCESS),
        ("l1d_cache_wb", EventCode::L1D_CACHE_WB),
        ("l2d_cache", EventCode::L2D_CACHE),
        ("l2d_cache_refill", EventCode::L2D_CACHE_REFILL),
        ("l2d_cache_wb", EventCode::L2D_CACHE_WB),
        ("bus_access", EventCode::BUS_ACCESS),
    ];

    /// Parses either one of the named ARMv8 events (e.g. `l2d_cache_refill`) or a raw
    /// number (`0x17`, `23`).
    pub fn parse(s: &str) -> Result<EventCode, Box<dyn Error + Send + Sync>> {
        let lower = s.to_ascii_lowercase();
        if let Some(&(_, code)) = EventCode::NAMED.iter().find(|(name, _)| *name == lower) {
            return Ok(code);
        }

        let parsed = match lower.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => lower.parse::<u32>(),
        };

        parsed
            .map(EventCode)
            .map_err(|_| format!("{:?} is neither a known event name nor a number", s).into())
    }

    pub fn name(self) -> Option<&'static str> {
        EventCode::NAMED
            .iter()
            .find(|&&(_, code)| code == self)
            .map(|&(name, _)| name)
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Register-level access to one core's cycle counter and event counters.
///
/// PMU state is per-core: a port must only be driven from the core (thread) that created it,
/// and [`enable_global`](CounterPort::enable_global) must be called on that core before any
/// other operation.
pub trait CounterPort {
    /// Master enable. Idempotent.
    fn enable_global(&mut self);

    fn enable_cycle_counter(&mut self);

    /// Stops accumulation; the current value is kept.
    fn disable_cycle_counter(&mut self);

    /// Zeroes the cycle counter. Valid while the counter is disabled.
    fn reset_cycle_counter(&mut self);

    fn read_cycle_counter(&self) -> u64;

    /// Number of event slots this port can actually drive (at most [`MAX_EVENT_SLOTS`]).
    fn event_slots(&self) -> usize;

    /// Binds `slot` to the vendor-defined `code`.
    fn configure_event_counter(&mut self, slot: EventSlot, code: EventCode);

    fn enable_event_counter(&mut self, slot: EventSlot);

    fn disable_event_counter(&mut self, slot: EventSlot);

    fn read_event_counter(&self, slot: EventSlot) -> u32;

    /// Zeroes every event counter at once; the hardware has no per-slot reset.
    fn reset_event_counters(&mut self);
}

pub enum Counter {
    WallTime(WallTime),
    Pmu(Pmu),
    Perf(PerfCounters),
}

impl Counter {
    pub fn by_name(name: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(match name {
            WallTime::NAME => Counter::WallTime(WallTime::new()),
            Pmu::NAME => Counter::Pmu(Pmu::new()?),
            PerfCounters::NAME => Counter::Perf(PerfCounters::new()?),
            _ => return Err(format!("{:?} is not a valid counter name", name).into()),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Counter::WallTime(_) => WallTime::NAME,
            Counter::Pmu(_) => Pmu::NAME,
            Counter::Perf(_) => PerfCounters::NAME,
        }
    }

    /// Units of the cycle counter, for humans reading the result stream.
    pub fn cycle_unit(&self) -> &'static str {
        match self {
            Counter::WallTime(_) => "ns",
            Counter::Pmu(_) | Counter::Perf(_) => "cycles",
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $counter:ident => $e:expr) => {
        match $self {
            Counter::WallTime($counter) => $e,
            Counter::Pmu($counter) => $e,
            Counter::Perf($counter) => $e,
        }
    };
}

impl CounterPort for Counter {
    #[inline]
    fn enable_global(&mut self) {
        dispatch!(self, c => c.enable_global())
    }

    #[inline]
    fn enable_cycle_counter(&mut self) {
        dispatch!(self, c => c.enable_cycle_counter())
    }

    #[inline]
    fn disable_cycle_counter(&mut self) {
        dispatch!(self, c => c.disable_cycle_counter())
    }

    #[inline]
    fn reset_cycle_counter(&mut self) {
        dispatch!(self, c => c.reset_cycle_counter())
    }

    #[inline]
    fn read_cycle_counter(&self) -> u64 {
        dispatch!(self, c => c.read_cycle_counter())
    }

    fn event_slots(&self) -> usize {
        dispatch!(self, c => c.event_slots())
    }

    fn configure_event_counter(&mut self, slot: EventSlot, code: EventCode) {
        dispatch!(self, c => c.configure_event_counter(slot, code))
    }

    #[inline]
    fn enable_event_counter(&mut self, slot: EventSlot) {
        dispatch!(self, c => c.enable_event_counter(slot))
    }

    #[inline]
    fn disable_event_counter(&mut self, slot: EventSlot) {
        dispatch!(self, c => c.disable_event_counter(slot))
    }

    #[inline]
    fn read_event_counter(&self, slot: EventSlot) -> u32 {
        dispatch!(self, c => c.read_event_counter(slot))
    }

    #[inline]
    fn reset_event_counters(&mut self) {
        dispatch!(self, c => c.reset_event_counters())
    }
}

/// "Monotonic clock" with nanosecond precision (using [`std::time::Instant`]), standing in for
/// a cycle counter. Has no event slots.
///
/// Can be obtained with `Counter::by_name("wall-time")`.
pub struct WallTime {
    origin: Instant,
    accumulated: u64,
    running_since: Option<u64>,
}

impl WallTime {
    const NAME: &'static str = "wall-time";

    pub fn new() -> Self {
        WallTime {
            origin: Instant::now(),
            accumulated: 0,
            running_since: None,
        }
    }

    #[inline]
    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

impl Default for WallTime {
    fn default() -> Self {
        WallTime::new()
    }
}

impl CounterPort for WallTime {
    fn enable_global(&mut self) {}

    #[inline]
    fn enable_cycle_counter(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(self.now());
        }
    }

    #[inline]
    fn disable_cycle_counter(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated = self.accumulated.wrapping_add(self.now() - since);
        }
    }

    #[inline]
    fn reset_cycle_counter(&mut self) {
        self.accumulated = 0;
        if self.running_since.is_some() {
            self.running_since = Some(self.now());
        }
    }

    #[inline]
    fn read_cycle_counter(&self) -> u64 {
        match self.running_since {
            Some(since) => self.accumulated.wrapping_add(self.now() - since),
            None => self.accumulated,
        }
    }

    fn event_slots(&self) -> usize {
        0
    }

    fn configure_event_counter(&mut self, slot: EventSlot, code: EventCode) {
        debug!(
            "WallTime: ignoring event {} for slot {}, no event counters available",
            code, slot
        );
    }

    fn enable_event_counter(&mut self, _: EventSlot) {}

    fn disable_event_counter(&mut self, _: EventSlot) {}

    fn read_event_counter(&self, _: EventSlot) -> u32 {
        0
    }

    fn reset_event_counters(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_parse_by_name_and_number() {
        assert_eq!(
            EventCode::parse("L2D_CACHE_REFILL").unwrap(),
            EventCode::L2D_CACHE_REFILL
        );
        assert_eq!(EventCode::parse("0x19").unwrap(), EventCode::BUS_ACCESS);
        assert_eq!(EventCode::parse("4").unwrap(), EventCode::L1D_CACHE);
        assert!(EventCode::parse("cache-ish").is_err());
        assert_eq!(EventCode(0x13).name(), Some("mem_access"));
        assert_eq!(EventCode(0x13).to_string(), "0x13");
    }

    #[test]
    fn event_slots_are_bounded() {
        assert_eq!(EventSlot::new(3).map(EventSlot::index), Some(3));
        assert!(EventSlot::new(MAX_EVENT_SLOTS).is_none());
        assert_eq!(EventSlot::new(2).unwrap().enable_bit(), 0b100);
    }

    #[test]
    fn unknown_counter_name_is_rejected() {
        assert!(Counter::by_name("instructions:u").is_err());
        assert_eq!(Counter::by_name("wall-time").unwrap().name(), "wall-time");
    }

    #[test]
    fn wall_time_is_zero_after_reset_while_disabled() {
        let mut counter = WallTime::new();
        counter.enable_cycle_counter();
        std::thread::sleep(std::time::Duration::from_millis(1));
        counter.disable_cycle_counter();
        assert!(counter.read_cycle_counter() > 0);

        counter.reset_cycle_counter();
        assert_eq!(counter.read_cycle_counter(), 0);
        assert_eq!(counter.event_slots(), 0);
    }
}
