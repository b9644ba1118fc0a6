//! One measured iteration of one core.
//!
//! The text form is a single line,
//!
//! ```text
//! CYCLECOUNT label: <label> benchmark: <workload> cores: <N> core: <id> cycle_count: <cycles> iteration: <n> offset: <offset>[ event<slot>: <code> count: <count>]*
//! ```
//!
//! which is what [`LogSink`](crate::LogSink) writes and what `summarize` reads back. Anything
//! before the `CYCLECOUNT` marker (a log prefix, say) is ignored when parsing.

use crate::bracket::{CounterSnapshot, EventReading, EventReadings};
use crate::counters::{EventCode, EventSlot};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

pub const MARKER: &str = "CYCLECOUNT";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub label: String,
    pub workload: String,
    pub cores: usize,
    pub core: usize,
    pub iteration: u64,
    pub offset: u64,
    pub cycles: u64,
    #[serde(default)]
    pub events: EventReadings,
}

impl ResultRecord {
    pub fn from_snapshot(
        label: &str,
        workload: &str,
        cores: usize,
        core: usize,
        iteration: u64,
        offset: u64,
        snapshot: CounterSnapshot,
    ) -> ResultRecord {
        ResultRecord {
            label: label.to_owned(),
            workload: workload.to_owned(),
            cores,
            core,
            iteration,
            offset,
            cycles: snapshot.cycles,
            events: snapshot.events,
        }
    }

    /// `true` if `line` contains a record, without parsing it.
    pub fn is_record_line(line: &str) -> bool {
        line.contains(MARKER)
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} label: {} benchmark: {} cores: {} core: {} cycle_count: {} iteration: {} offset: {}",
            MARKER,
            self.label,
            self.workload,
            self.cores,
            self.core,
            self.cycles,
            self.iteration,
            self.offset
        )?;

        for event in &self.events {
            write!(
                f,
                " event{}: {} count: {}",
                event.slot, event.code, event.count
            )?;
        }

        Ok(())
    }
}

struct Fields<'a> {
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn value(&mut self, key: &str) -> Result<&'a str, Box<dyn Error + Send + Sync>> {
        match (self.tokens.next(), self.tokens.next()) {
            (Some(k), Some(value)) if k.strip_suffix(':') == Some(key) => Ok(value),
            (Some(k), _) => Err(format!("expected `{}:`, found {:?}", key, k).into()),
            (None, _) => Err(format!("record ends before `{}:`", key).into()),
        }
    }

    fn parse<T>(&mut self, key: &str) -> Result<T, Box<dyn Error + Send + Sync>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let value = self.value(key)?;
        value
            .parse()
            .map_err(|e| format!("bad `{}` value {:?}: {}", key, value, e).into())
    }

    fn event(&mut self) -> Result<Option<EventReading>, Box<dyn Error + Send + Sync>> {
        let key = match self.tokens.next() {
            Some(key) => key,
            None => return Ok(None),
        };

        let slot = key
            .strip_prefix("event")
            .and_then(|k| k.strip_suffix(':'))
            .and_then(|index| index.parse::<usize>().ok())
            .and_then(EventSlot::new)
            .ok_or_else(|| format!("expected `event<slot>:`, found {:?}", key))?;

        let code = match self.tokens.next() {
            Some(code) => EventCode::parse(code)?,
            None => return Err(format!("missing event code for slot {}", slot).into()),
        };

        let count = self.parse("count")?;

        Ok(Some(EventReading { slot, code, count }))
    }
}

impl FromStr for ResultRecord {
    type Err = Box<dyn Error + Send + Sync>;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let start = line
            .find(MARKER)
            .ok_or_else(|| format!("no `{}` marker in {:?}", MARKER, line))?;

        let mut fields = Fields {
            tokens: line[start + MARKER.len()..].split_whitespace(),
        };

        let mut record = ResultRecord {
            label: fields.value("label")?.to_owned(),
            workload: fields.value("benchmark")?.to_owned(),
            cores: fields.parse("cores")?,
            core: fields.parse("core")?,
            cycles: fields.parse("cycle_count")?,
            iteration: fields.parse("iteration")?,
            offset: fields.parse("offset")?,
            events: EventReadings::new(),
        };

        while let Some(event) = fields.event()? {
            if record.events.len() == record.events.inline_size() {
                return Err("more than 4 event readings in one record".into());
            }
            record.events.push(event);
        }

        Ok(record)
    }
}
