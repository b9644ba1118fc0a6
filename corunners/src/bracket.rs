use crate::counters::{CounterPort, EventCode, EventSlot, MAX_EVENT_SLOTS};
use crate::interrupts::InterruptMask;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReading {
    pub slot: EventSlot,
    pub code: EventCode,
    pub count: u32,
}

pub type EventReadings = SmallVec<[EventReading; MAX_EVENT_SLOTS]>;

/// Counter values of one bracketed run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub cycles: u64,
    pub events: EventReadings,
}

/// Measures closures with a [`CounterPort`], interrupts masked by an [`InterruptMask`].
///
/// The sequence is fixed:
///
/// 1. enable the cycle counter and every bound event counter
/// 2. mask interrupts
/// 3. reset the cycle counter and all event counters
/// 4. run the closure
/// 5. disable the counters
/// 6. unmask interrupts
/// 7. read the counters
///
/// Nothing between enabling and the workload is counted. The counters are already stopped when
/// they are read.
pub struct MeasurementBracket<P, M> {
    port: P,
    mask: M,
    bound: SmallVec<[(EventSlot, EventCode); MAX_EVENT_SLOTS]>,
}

impl<P: CounterPort, M: InterruptMask> MeasurementBracket<P, M> {
    /// Enables `port` globally and binds `events` to slots `0..events.len()`.
    ///
    /// Must be called on the core that will do the measuring.
    pub fn new(
        mut port: P,
        mask: M,
        events: &[EventCode],
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        if events.len() > port.event_slots() {
            return Err(format!(
                "{} events requested but the counter only has {} event slots",
                events.len(),
                port.event_slots()
            )
            .into());
        }

        port.enable_global();

        let mut bound = SmallVec::new();
        for (index, &code) in events.iter().enumerate() {
            let slot = EventSlot::new(index)
                .ok_or_else(|| format!("event slot {} out of range", index))?;
            port.configure_event_counter(slot, code);
            bound.push((slot, code));
            debug!("MeasurementBracket::new: slot {} counts event {}", slot, code);
        }

        Ok(MeasurementBracket { port, mask, bound })
    }

    #[inline]
    pub fn measure<R>(&mut self, f: impl FnOnce() -> R) -> CounterSnapshot {
        self.measure_with_result(f).0
    }

    /// Like [`measure`](MeasurementBracket::measure), also handing back what `f` returned.
    #[inline]
    pub fn measure_with_result<R>(&mut self, f: impl FnOnce() -> R) -> (CounterSnapshot, R) {
        let MeasurementBracket { port, mask, bound } = self;

        port.enable_cycle_counter();
        for &(slot, _) in bound.iter() {
            port.enable_event_counter(slot);
        }

        mask.mask();

        port.reset_cycle_counter();
        port.reset_event_counters();

        let result = f();

        port.disable_cycle_counter();
        for &(slot, _) in bound.iter() {
            port.disable_event_counter(slot);
        }

        mask.unmask();

        let snapshot = CounterSnapshot {
            cycles: port.read_cycle_counter(),
            events: bound
                .iter()
                .map(|&(slot, code)| EventReading {
                    slot,
                    code,
                    count: port.read_event_counter(slot),
                })
                .collect(),
        };

        (snapshot, result)
    }

    pub fn events(&self) -> impl Iterator<Item = EventCode> + '_ {
        self.bound.iter().map(|&(_, code)| code)
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn into_parts(self) -> (P, M) {
        (self.port, self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::Unmasked;
    use crate::testing_common::{PortCall, RecordingMask, SimClock, SimulatedCounters};

    #[test]
    fn masking_brackets_the_reset_and_the_workload() {
        let clock = SimClock::new();
        let port = SimulatedCounters::new(clock.clone());
        let log = port.call_log();
        let mask = RecordingMask::new(log.clone());

        let mut bracket =
            MeasurementBracket::new(port, mask, &[EventCode::L1D_CACHE_REFILL]).unwrap();
        log.lock().clear();

        let snapshot = bracket.measure(|| clock.advance(50));

        assert_eq!(
            *log.lock(),
            vec![
                PortCall::EnableCycles,
                PortCall::EnableEvent(0),
                PortCall::Mask,
                PortCall::ResetCycles,
                PortCall::ResetEvents,
                PortCall::DisableCycles,
                PortCall::DisableEvent(0),
                PortCall::Unmask,
                PortCall::ReadCycles,
                PortCall::ReadEvent(0),
            ]
        );
        assert_eq!(snapshot.cycles, 50);
        assert_eq!(snapshot.events.len(), 1);
        assert_eq!(snapshot.events[0].code, EventCode::L1D_CACHE_REFILL);
    }

    #[test]
    fn too_many_events_for_the_port() {
        let port = SimulatedCounters::with_slots(SimClock::new(), 1);
        let events = [EventCode::L1D_CACHE, EventCode::L2D_CACHE];
        assert!(MeasurementBracket::new(port, Unmasked, &events).is_err());
    }

    #[test]
    fn returns_the_workload_result() {
        let port = SimulatedCounters::new(SimClock::new());
        let mut bracket = MeasurementBracket::new(port, Unmasked, &[]).unwrap();
        let (snapshot, sum) = bracket.measure_with_result(|| (1..=10u32).sum::<u32>());
        assert_eq!(sum, 55);
        assert!(snapshot.events.is_empty());
    }
}
