#[macro_use]
extern crate prettytable;

use clap::{Args, Parser, Subcommand};
use prettytable::Table;
use serde::Serialize;
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

mod analysis;
mod core_stats;
mod diff;

use crate::core_stats::{Grouping, Results};

#[derive(Parser, Debug)]
#[command(about = "Statistics over the result lines captured from a co-runner experiment")]
struct Opt {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-core cycle statistics of one capture
    Summarize(SummarizeOpt),
    /// Compares two captures, e.g. a solo run against a co-run
    Diff(DiffOpt),
}

#[derive(Args, Debug)]
struct ReadOpt {
    /// Ignore each core's first iterations
    #[arg(long, default_value_t = 0)]
    warmup: u64,

    /// Write the results as JSON to this file instead of printing a table
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SummarizeOpt {
    /// A log capture or JSON lines file
    file: PathBuf,

    /// One row per workload and core, merging labels and core counts
    #[arg(long)]
    by_workload: bool,

    #[command(flatten)]
    read: ReadOpt,
}

#[derive(Args, Debug)]
struct DiffOpt {
    base: PathBuf,
    change: PathBuf,

    #[command(flatten)]
    read: ReadOpt,
}

type BoxError = Box<dyn Error + Send + Sync>;

fn analyze(path: &Path, grouping: Grouping, warmup: u64) -> Result<Results, BoxError> {
    let file = File::open(path).map_err(|e| format!("opening {}: {}", path.display(), e))?;
    let records = analysis::read_records(BufReader::new(file))?.skip_warmup(warmup);
    if records.records.is_empty() {
        return Err(format!("no result records in {}", path.display()).into());
    }

    Ok(analysis::perform_analysis(records, grouping))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), BoxError> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer(file, value)?;
    Ok(())
}

fn summarize(opt: SummarizeOpt) -> Result<(), BoxError> {
    let grouping = if opt.by_workload {
        Grouping::Workload
    } else {
        Grouping::Run
    };
    let results = analyze(&opt.file, grouping, opt.read.warmup)?;

    if let Some(json) = opt.read.json {
        return write_json(&json, &results);
    }

    let mut table = Table::new();

    table.add_row(row![
        "Label",
        "Workload",
        "Cores",
        "Core",
        "Offset",
        "Iterations",
        "Min",
        "Median",
        "Mean",
        "Max",
        "Std dev",
        "Events (mean)",
    ]);

    let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_owned());

    for stats in &results.core_stats {
        let events: Vec<String> = stats
            .events
            .iter()
            .map(|e| format!("{}: {:.1}", e.code, e.mean))
            .collect();

        table.add_row(row![
            or_dash(stats.key.label.clone()),
            stats.key.workload,
            or_dash(stats.key.cores.map(|c| c.to_string())),
            stats.key.core,
            stats.key.offset,
            stats.iterations,
            stats.min,
            format!("{:.1}", stats.median),
            format!("{:.1}", stats.mean),
            stats.max,
            format!("{:.1}", stats.std_dev),
            events.join(", "),
        ]);
    }

    table.printstd();

    println!("Records: {}", results.records);
    if results.malformed > 0 {
        println!("Malformed lines skipped: {}", results.malformed);
    }

    Ok(())
}

fn diff(opt: DiffOpt) -> Result<(), BoxError> {
    let base = analyze(&opt.base, Grouping::Workload, opt.read.warmup)?;
    let change = analyze(&opt.change, Grouping::Workload, opt.read.warmup)?;

    let results = diff::calculate_diff(base, change);

    if let Some(json) = opt.read.json {
        return write_json(&json, &results);
    }

    let mut table = Table::new();

    table.add_row(row![
        "Workload",
        "Core",
        "Offset",
        "Iterations",
        "Median",
        "Median change (%)",
        "Mean",
        "Mean change (%)",
        "Min",
        "Max",
    ]);

    for stats in &results.core_stats {
        table.add_row(row![
            stats.key.workload,
            stats.key.core,
            stats.key.offset,
            format!("{:+}", stats.iterations),
            format!("{:+.1}", stats.median),
            format!("{:+.2}", stats.median_change),
            format!("{:+.1}", stats.mean),
            format!("{:+.2}", stats.mean_change),
            format!("{:+}", stats.min),
            format!("{:+}", stats.max),
        ]);
    }

    table.printstd();

    println!("Records: {:+}", results.records);

    Ok(())
}

fn main() -> Result<(), BoxError> {
    let opt = Opt::parse();

    match opt.command {
        Command::Summarize(opt) => summarize(opt),
        Command::Diff(opt) => diff(opt),
    }
}
