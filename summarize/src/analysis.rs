use crate::core_stats::{CoreKey, CoreStats, EventStats, Grouping, Results};
use corunners::{EventCode, ResultRecord};
use rustc_hash::FxHashMap;
use std::io::{self, BufRead};

/// The records of a captured stream.
#[derive(Debug, Default)]
pub struct Records {
    pub records: Vec<ResultRecord>,
    pub malformed: usize,
}

impl Records {
    /// Drops the first `warmup` iterations of every core.
    pub fn skip_warmup(mut self, warmup: u64) -> Records {
        self.records.retain(|r| r.iteration > warmup);
        self
    }
}

/// Reads records from a log capture or a JSON lines file, or a mix of both.
///
/// Lines that are neither a JSON object nor contain a `CYCLECOUNT` record are other log output
/// and skipped. Lines that look like records but fail to parse are counted as malformed.
pub fn read_records<R: BufRead>(reader: R) -> io::Result<Records> {
    let mut records = Records::default();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();

        let parsed = if line.starts_with('{') {
            serde_json::from_str::<ResultRecord>(line).ok()
        } else if ResultRecord::is_record_line(line) {
            line.parse::<ResultRecord>().ok()
        } else {
            continue;
        };

        match parsed {
            Some(record) => records.records.push(record),
            None => records.malformed += 1,
        }
    }

    Ok(records)
}

#[derive(Default)]
struct Accumulator {
    cycles: Vec<u64>,
    events: FxHashMap<EventCode, (u64, u64)>,
}

pub fn perform_analysis(records: Records, grouping: Grouping) -> Results {
    let mut groups = FxHashMap::<CoreKey, Accumulator>::default();

    for record in &records.records {
        let group = groups.entry(CoreKey::of(record, grouping)).or_default();
        group.cycles.push(record.cycles);
        for event in &record.events {
            let (sum, count) = group.events.entry(event.code).or_insert((0, 0));
            *sum += event.count as u64;
            *count += 1;
        }
    }

    let mut core_stats: Vec<CoreStats> = groups
        .into_iter()
        .map(|(key, mut group)| {
            let mut events: Vec<EventStats> = group
                .events
                .into_iter()
                .map(|(code, (sum, count))| EventStats {
                    code,
                    mean: sum as f64 / count as f64,
                })
                .collect();
            events.sort_by_key(|e| e.code);

            CoreStats::from_cycles(key, &mut group.cycles, events)
        })
        .collect();

    core_stats.sort_by(|l, r| l.key.cmp(&r.key));

    Results {
        core_stats,
        records: records.records.len(),
        malformed: records.malformed,
    }
}
