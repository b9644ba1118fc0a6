//! Calibrated busy-waiting.
//!
//! Delays inside the harness are always busy-waits: a sleeping core has no bound on when it
//! wakes up again.

use crate::bracket::MeasurementBracket;
use crate::counters::CounterPort;
use crate::interrupts::InterruptMask;
use serde::{Deserialize, Serialize};
use std::hint::black_box;

/// Spins through `count` loop iterations.
#[inline(never)]
pub fn countdown(count: u64) {
    let mut remaining = black_box(count);
    while remaining > 0 {
        remaining = black_box(remaining - 1);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountdownCalibration {
    pub count: u64,
    pub cycles: u64,
    pub cycles_per_count: f64,
}

/// Measures how many cycles `countdown(n)` takes for n = 1M, 2M, ... 10M.
///
/// The ratio is what converts a stagger offset into a delay in cycles.
pub fn calibrate_countdown<P, M>(
    bracket: &mut MeasurementBracket<P, M>,
) -> Vec<CountdownCalibration>
where
    P: CounterPort,
    M: InterruptMask,
{
    (1..=10u64)
        .map(|i| {
            let count = i * 1_000_000;
            let cycles = bracket.measure(|| countdown(count)).cycles;
            let calibration = CountdownCalibration {
                count,
                cycles,
                cycles_per_count: cycles as f64 / count as f64,
            };

            info!(
                "countdown calibration: count={} cycles={} cycles_per_count={:.9}",
                calibration.count, calibration.cycles, calibration.cycles_per_count
            );

            calibration
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::Unmasked;
    use crate::testing_common::{SimClock, SimulatedCounters};

    #[test]
    fn countdown_terminates() {
        countdown(0);
        countdown(10_000);
    }

    #[test]
    fn calibration_covers_ten_points() {
        let clock = SimClock::new();
        let port = SimulatedCounters::new(clock.clone());
        let mut bracket = MeasurementBracket::new(port, Unmasked, &[]).unwrap();

        let calibration = calibrate_countdown(&mut bracket);

        assert_eq!(calibration.len(), 10);
        assert_eq!(calibration[0].count, 1_000_000);
        assert_eq!(calibration[9].count, 10_000_000);
        // Nothing advances the simulated clock.
        assert!(calibration.iter().all(|c| c.cycles == 0));
    }
}
