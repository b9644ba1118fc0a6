use crate::core_stats::{CoreKey, CoreStats, CoreStatsDiff, Results};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct DiffResults {
    pub core_stats: Vec<CoreStatsDiff>,
    pub records: i64,
}

fn build_key_lookup(core_stats: &[CoreStats]) -> FxHashMap<&CoreKey, usize> {
    let mut lookup = FxHashMap::default();
    for (i, stats) in core_stats.iter().enumerate() {
        lookup.insert(&stats.key, i);
    }

    lookup
}

/// Matches the rows of `base` and `change` by key, e.g. a solo run against a co-run.
pub fn calculate_diff(base: Results, change: Results) -> DiffResults {
    let base_data = build_key_lookup(&base.core_stats);
    let change_data = build_key_lookup(&change.core_stats);

    let mut all_keys = FxHashSet::default();
    for stats in base.core_stats.iter().chain(&change.core_stats) {
        all_keys.insert(&stats.key);
    }

    let mut core_stats: Vec<_> = all_keys
        .iter()
        .map(|k| {
            let b = base_data.get(k).map(|i| &base.core_stats[*i]);
            let c = change_data.get(k).map(|i| &change.core_stats[*i]);

            match (b, c) {
                (Some(b), Some(c)) => c.clone() - b.clone(),
                (Some(b), None) => b.invert(),
                (None, Some(c)) => c.as_core_stats_diff(),
                (None, None) => unreachable!(),
            }
        })
        .collect();

    // Largest slowdown first.
    core_stats.sort_by(|l, r| r.median.total_cmp(&l.median).then_with(|| l.key.cmp(&r.key)));

    DiffResults {
        core_stats,
        records: change.records as i64 - base.records as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{perform_analysis, Records};
    use crate::core_stats::Grouping;
    use corunners::testing_common::{run_simulated_experiment, simulated_config};

    fn analyze(cycles: &[usize], iterations: u64) -> Results {
        let (_, records) = run_simulated_experiment(simulated_config(cycles, iterations));
        perform_analysis(
            Records {
                records,
                malformed: 0,
            },
            Grouping::Workload,
        )
    }

    #[test]
    fn solo_against_co_run() {
        let solo = analyze(&[100], 4);
        let corun = analyze(&[150, 10, 10], 4);

        let diff = calculate_diff(solo, corun);

        assert_eq!(diff.records, 8);
        assert_eq!(diff.core_stats.len(), 3);

        let first = &diff.core_stats[0];
        assert_eq!(first.key.core, 0);
        assert_eq!(first.median, 50.0);
        assert_eq!(first.median_change, 50.0);

        // Cores 1 and 2 only exist in the co-run.
        for stats in &diff.core_stats[1..] {
            assert!(stats.median_change.is_infinite());
            assert_eq!(stats.iterations, 4);
        }
    }

    #[test]
    fn rows_missing_from_the_change() {
        let diff = calculate_diff(analyze(&[10, 20], 2), analyze(&[10], 2));

        assert_eq!(diff.core_stats.len(), 2);
        let removed = diff.core_stats.iter().find(|s| s.key.core == 1).unwrap();
        assert_eq!(removed.iterations, -2);
        assert_eq!(removed.median, -20.0);
        assert_eq!(removed.median_change, -100.0);
    }
}
