#[macro_use]
extern crate log;

use clap::Parser;
use corunners::{
    CoreConfig, CoreId, Experiment, ExperimentConfig, FanOut, JsonLinesSink, LogSink,
    WorkloadRegistry,
};
use std::error::Error;
use std::path::{Path, PathBuf};

mod thermal;

use crate::thermal::{ThermalMonitor, THERMAL_ROOT};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(about = "Run workloads side by side on pinned cores and log every iteration's cycles")]
struct Opt {
    /// JSON experiment configuration. Flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    label: Option<String>,

    /// Workloads, one per core, the first one on the leader, e.g. `matmult,bsort`
    #[arg(long, value_delimiter = ',')]
    workloads: Vec<String>,

    /// Counter backend: wall-time, pmu or perf
    #[arg(long)]
    counter: Option<String>,

    /// Stop after this many iterations instead of running forever
    #[arg(long)]
    iterations: Option<u64>,

    /// Number of alternating rendezvous channels (1 or 2)
    #[arg(long)]
    channels: Option<usize>,

    #[arg(long)]
    mask_interrupts: bool,

    /// Measure the stagger countdown on the leader before the first iteration
    #[arg(long)]
    calibrate_countdown: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Also write every record as a JSON line to this file
    #[arg(long)]
    json: Option<PathBuf>,

    /// CPU for each core, comma separated. Defaults to the first CPUs available.
    #[arg(long, value_delimiter = ',')]
    cpus: Vec<usize>,

    /// Leave thread placement to the scheduler
    #[arg(long, conflicts_with = "cpus")]
    no_pin: bool,

    /// Log the thermal zone temperatures every this many iterations (0 disables)
    #[arg(long, default_value_t = 0)]
    thermal_every: u64,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// List the available workloads and exit
    #[arg(long)]
    list_workloads: bool,
}

impl Opt {
    fn experiment_config(&self) -> Result<ExperimentConfig, BoxError> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_path(path)?,
            None => ExperimentConfig::default(),
        };

        if let Some(label) = &self.label {
            config.label = label.clone();
        }
        if !self.workloads.is_empty() {
            config.cores = self.workloads.iter().map(|w| CoreConfig::new(w)).collect();
        }
        if let Some(counter) = &self.counter {
            config.counter = counter.clone();
        }
        if self.iterations.is_some() {
            config.iterations = self.iterations;
        }
        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.mask_interrupts |= self.mask_interrupts;
        config.calibrate_countdown |= self.calibrate_countdown;

        config.validate()?;

        let registry = WorkloadRegistry::builtin();
        for core in &config.cores {
            if !registry.contains(&core.workload) {
                return Err(format!(
                    "unknown workload {:?}, expected one of: {}",
                    core.workload,
                    registry.names().join(", ")
                )
                .into());
            }
        }

        Ok(config)
    }
}

/// The CPU each core is pinned to: `requested` if given, otherwise the first available ones.
fn pick_cpus(requested: &[usize], cores: usize) -> Result<Vec<usize>, BoxError> {
    let available: Vec<usize> = core_affinity::get_core_ids()
        .ok_or("cannot list the CPUs this process may run on")?
        .into_iter()
        .map(|id| id.id)
        .collect();

    if requested.is_empty() {
        if available.len() < cores {
            return Err(format!(
                "{} cores configured but only {} CPUs available",
                cores,
                available.len()
            )
            .into());
        }
        return Ok(available[..cores].to_vec());
    }

    if requested.len() != cores {
        return Err(format!("{} cores configured but {} CPUs given", cores, requested.len()).into());
    }
    for cpu in requested {
        if !available.contains(cpu) {
            return Err(
                format!("CPU {} is not available, expected one of {:?}", cpu, available).into(),
            );
        }
    }
    Ok(requested.to_vec())
}

fn pin(core: CoreId, cpus: &[usize]) -> Result<(), BoxError> {
    let cpu = cpus[core.index()];
    if core_affinity::set_for_current(core_affinity::CoreId { id: cpu }) {
        debug!("{} pinned to CPU {}", core, cpu);
        Ok(())
    } else {
        Err(format!("failed to pin {} to CPU {}", core, cpu).into())
    }
}

fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::parse();

    if opt.list_workloads {
        for name in WorkloadRegistry::builtin().names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = opt.experiment_config()?;
    if opt.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let cores = config.cores.len();
    let mut experiment = Experiment::new(config)?;

    if !opt.no_pin {
        let cpus = pick_cpus(&opt.cpus, cores)?;
        info!("pinning cores to CPUs {:?}", cpus);
        experiment = experiment.on_core_start(move |core| pin(core, &cpus));
    }

    if opt.thermal_every > 0 {
        let monitor = ThermalMonitor::discover(Path::new(THERMAL_ROOT), opt.thermal_every)?;
        experiment = experiment.with_housekeeping(monitor);
    }

    let json = opt.json.as_deref().map(JsonLinesSink::create).transpose()?;
    let log = LogSink;
    let mut sink = FanOut::new().with(&log);
    if let Some(json) = &json {
        sink = sink.with(json);
    }

    let report = experiment.run(&sink)?;

    for (core, completed) in report.completed.iter().enumerate() {
        info!("core{} completed {} iterations", core, completed);
    }
    for point in &report.calibration {
        info!(
            "countdown({}) took {} cycles, {:.3} cycles per count",
            point.count, point.cycles, point.cycles_per_count
        );
    }

    if let Some(json) = json {
        json.into_inner()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opt {
        Opt::try_parse_from(std::iter::once("corun").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_without_flags() {
        let config = parse(&[]).experiment_config().unwrap();
        assert_eq!(config, ExperimentConfig::default());
    }

    #[test]
    fn flags_override_the_configuration() {
        let opt = parse(&[
            "--label",
            "solo",
            "--workloads",
            "matmult,countdown",
            "--iterations",
            "5",
            "--channels",
            "2",
            "--mask-interrupts",
        ]);
        let config = opt.experiment_config().unwrap();

        assert_eq!(config.label, "solo");
        assert_eq!(config.cores, vec![CoreConfig::new("matmult"), CoreConfig::new("countdown")]);
        assert_eq!(config.iterations, Some(5));
        assert_eq!(config.channels, 2);
        assert!(config.mask_interrupts);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        assert!(parse(&["--workloads", "nope"]).experiment_config().is_err());
        assert!(parse(&["--channels", "3"]).experiment_config().is_err());
        assert!(parse(&["--label", "two words"]).experiment_config().is_err());
    }

    #[test]
    fn cpu_count_must_match_cores() {
        assert!(pick_cpus(&[0, 1], 3).is_err());
    }

    #[test]
    fn no_pin_conflicts_with_cpus() {
        let args = ["corun", "--no-pin", "--cpus", "0"];
        assert!(Opt::try_parse_from(args).is_err());
    }
}
