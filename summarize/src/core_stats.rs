use corunners::{EventCode, ResultRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Sub;

/// What the records of one row have in common.
///
/// `label` and `cores` are left out when comparing runs, since a solo run and a co-run of the
/// same workload differ in both.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreKey {
    pub label: Option<String>,
    pub workload: String,
    pub cores: Option<usize>,
    pub core: usize,
    pub offset: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grouping {
    /// One row per label, workload, core count, core and offset.
    Run,
    /// One row per workload, core and offset.
    Workload,
}

impl CoreKey {
    pub fn of(record: &ResultRecord, grouping: Grouping) -> CoreKey {
        let (label, cores) = match grouping {
            Grouping::Run => (Some(record.label.clone()), Some(record.cores)),
            Grouping::Workload => (None, None),
        };

        CoreKey {
            label,
            workload: record.workload.clone(),
            cores,
            core: record.core,
            offset: record.offset,
        }
    }
}

impl fmt::Display for CoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "{} ", label)?;
        }
        write!(f, "{} core{}", self.workload, self.core)?;
        if let Some(cores) = self.cores {
            write!(f, "/{}", cores)?;
        }
        write!(f, " offset {}", self.offset)
    }
}

/// Mean count of one event over the iterations of a row.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventStats {
    pub code: EventCode,
    pub mean: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CoreStats {
    pub key: CoreKey,
    pub iterations: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub events: Vec<EventStats>,
}

impl CoreStats {
    /// Statistics over `cycles`, which is sorted in place. `cycles` must not be empty.
    pub fn from_cycles(key: CoreKey, cycles: &mut [u64], events: Vec<EventStats>) -> CoreStats {
        assert!(!cycles.is_empty());
        cycles.sort_unstable();

        let n = cycles.len();
        let mean = cycles.iter().map(|&c| c as f64).sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (cycles[n / 2 - 1] as f64 + cycles[n / 2] as f64) / 2.0
        } else {
            cycles[n / 2] as f64
        };
        let variance = cycles
            .iter()
            .map(|&c| (c as f64 - mean).powi(2))
            .sum::<f64>()
            / n as f64;

        CoreStats {
            key,
            iterations: n as u64,
            min: cycles[0],
            max: cycles[n - 1],
            mean,
            median,
            std_dev: variance.sqrt(),
            events,
        }
    }

    /// The diff of a row that only exists in the base run.
    pub fn invert(&self) -> CoreStatsDiff {
        CoreStatsDiff {
            key: self.key.clone(),
            iterations: -(self.iterations as i64),
            min: -(self.min as i64),
            max: -(self.max as i64),
            mean: -self.mean,
            mean_change: -100.0,
            median: -self.median,
            median_change: -100.0,
        }
    }

    /// The diff of a row that only exists in the changed run.
    pub fn as_core_stats_diff(&self) -> CoreStatsDiff {
        CoreStatsDiff {
            key: self.key.clone(),
            iterations: self.iterations as i64,
            min: self.min as i64,
            max: self.max as i64,
            mean: self.mean,
            mean_change: f64::INFINITY,
            median: self.median,
            median_change: f64::INFINITY,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CoreStatsDiff {
    pub key: CoreKey,
    pub iterations: i64,
    pub min: i64,
    pub max: i64,
    pub mean: f64,
    pub mean_change: f64,
    pub median: f64,
    pub median_change: f64,
}

impl Sub for CoreStats {
    type Output = CoreStatsDiff;

    fn sub(self, rhs: CoreStats) -> CoreStatsDiff {
        #[inline(always)]
        fn i(u: u64) -> i64 {
            u as i64
        }

        CoreStatsDiff {
            key: self.key,
            iterations: i(self.iterations) - i(rhs.iterations),
            min: i(self.min) - i(rhs.min),
            max: i(self.max) - i(rhs.max),
            mean: self.mean - rhs.mean,
            mean_change: percentage_change(rhs.mean, self.mean),
            median: self.median - rhs.median,
            median_change: percentage_change(rhs.median, self.median),
        }
    }
}

fn percentage_change(base: f64, change: f64) -> f64 {
    (change - base) / base * 100.0
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Results {
    pub core_stats: Vec<CoreStats>,
    pub records: usize,
    /// Lines that looked like records but did not parse.
    pub malformed: usize,
}

#[cfg(test)]
impl Results {
    pub fn stats_of(&self, workload: &str, core: usize) -> &CoreStats {
        self.core_stats
            .iter()
            .find(|s| s.key.workload == workload && s.key.core == core)
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(workload: &str) -> CoreKey {
        CoreKey {
            label: None,
            workload: workload.to_owned(),
            cores: None,
            core: 0,
            offset: 0,
        }
    }

    #[test]
    fn stats_of_odd_and_even_counts() {
        let odd = CoreStats::from_cycles(key("a"), &mut [30, 10, 20], vec![]);
        assert_eq!((odd.min, odd.max, odd.median, odd.mean), (10, 30, 20.0, 20.0));

        let even = CoreStats::from_cycles(key("a"), &mut [4, 1, 3, 2], vec![]);
        assert_eq!(even.median, 2.5);
        assert_eq!(even.iterations, 4);
        assert!((even.std_dev - 1.25f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn sub_and_percentages() {
        let solo = CoreStats::from_cycles(key("matmult"), &mut [100, 100], vec![]);
        let corun = CoreStats::from_cycles(key("matmult"), &mut [150, 130], vec![]);

        let diff = corun - solo;
        assert_eq!(diff.mean, 40.0);
        assert_eq!(diff.mean_change, 40.0);
        assert_eq!(diff.max, 50);
        assert_eq!(diff.iterations, 0);
    }

    #[test]
    fn one_sided_diffs() {
        let stats = CoreStats::from_cycles(key("bsort"), &mut [8], vec![]);

        let removed = stats.invert();
        assert_eq!(removed.iterations, -1);
        assert_eq!(removed.mean_change, -100.0);

        let added = stats.as_core_stats_diff();
        assert_eq!(added.median, 8.0);
        assert!(added.median_change.is_infinite());
    }

    #[test]
    fn key_display() {
        let record = ResultRecord {
            label: "corun".to_owned(),
            workload: "matmult".to_owned(),
            cores: 3,
            core: 1,
            iteration: 1,
            offset: 200,
            cycles: 1,
            events: Default::default(),
        };

        assert_eq!(
            CoreKey::of(&record, Grouping::Run).to_string(),
            "corun matmult core1/3 offset 200"
        );
        assert_eq!(
            CoreKey::of(&record, Grouping::Workload).to_string(),
            "matmult core1 offset 200"
        );
    }
}
