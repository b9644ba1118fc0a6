use crate::record::ResultRecord;
use parking_lot::Mutex;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Log target of the result stream.
pub const RESULTS_TARGET: &str = "corunners::results";

/// Where records go once a bracket has completed.
///
/// Shared by all cores; emitting happens outside of the measured interval. Failures are logged
/// and swallowed, the experiment keeps running.
pub trait ResultSink: Sync {
    fn emit(&self, record: &ResultRecord);

    fn flush(&self) {}
}

/// Writes each record as one `info!` line on the [`RESULTS_TARGET`] target.
#[derive(Debug, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn emit(&self, record: &ResultRecord) {
        info!(target: RESULTS_TARGET, "{}", record);
    }
}

/// One JSON object per line.
///
/// Output is buffered; call [`ResultSink::flush`] or [`into_inner`](JsonLinesSink::into_inner)
/// to see write errors at the end of a run.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<BufWriter<W>>,
}

impl JsonLinesSink<fs::File> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(JsonLinesSink::new(fs::File::create(path)?))
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write + Send> ResultSink for JsonLinesSink<W> {
    fn emit(&self, record: &ResultRecord) {
        let mut writer = self.writer.lock();
        let result = serde_json::to_writer(&mut *writer, record)
            .map_err(io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));

        if let Err(e) = result {
            error!("JsonLinesSink: failed to write record: {}", e);
        }
    }

    fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            error!("JsonLinesSink: failed to flush: {}", e);
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ResultRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().clone()
    }

    /// Records of `core`, in emission order.
    pub fn records_of(&self, core: usize) -> Vec<ResultRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.core == core)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn emit(&self, record: &ResultRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Forwards every record to several sinks.
#[derive(Default)]
pub struct FanOut<'a> {
    sinks: Vec<&'a dyn ResultSink>,
}

impl<'a> FanOut<'a> {
    pub fn new() -> Self {
        FanOut { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: &'a dyn ResultSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ResultSink for FanOut<'_> {
    fn emit(&self, record: &ResultRecord) {
        for sink in &self.sinks {
            sink.emit(record);
        }
    }

    fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(core: usize, iteration: u64) -> ResultRecord {
        ResultRecord {
            label: "t".to_owned(),
            workload: "countdown".to_owned(),
            cores: 2,
            core,
            iteration,
            offset: 0,
            cycles: 10 * iteration,
            events: Default::default(),
        }
    }

    #[test]
    fn json_lines() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.emit(&record(0, 1));
        sink.emit(&record(1, 1));

        let bytes = sink.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let records: Vec<ResultRecord> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records, vec![record(0, 1), record(1, 1)]);
    }

    #[test]
    fn fan_out_reaches_every_sink() {
        let first = MemorySink::new();
        let second = MemorySink::new();
        let fan_out = FanOut::new().with(&first).with(&second).with(&LogSink);

        fan_out.emit(&record(1, 1));
        fan_out.emit(&record(0, 1));

        assert_eq!(first.records(), second.records());
        assert_eq!(first.records_of(1), vec![record(1, 1)]);
        assert_eq!(second.len(), 2);
    }
}
