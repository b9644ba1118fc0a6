//! Benchmarks run by the cores, and the registry that resolves them by name.

use crate::countdown::countdown;
use crate::{malardalen, synthetic};
use rustc_hash::FxHashMap;
use std::error::Error;

/// A benchmark as seen by the driver loop.
///
/// A workload is constructed once per core; everything it needs is allocated then.
/// [`prepare`](Workload::prepare) runs before every iteration outside of the measured interval,
/// [`run_once`](Workload::run_once) is the measured part.
pub trait Workload {
    fn name(&self) -> &str;

    /// Untimed per-iteration setup, e.g. fresh random input.
    fn prepare(&mut self) {}

    fn run_once(&mut self);
}

/// Construction parameters, taken from the core's configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkloadParams {
    /// Workload-specific size, `None` selects the workload's default.
    pub input_size: Option<usize>,
    /// Seed for input generation; each core gets a distinct one.
    pub seed: u64,
}

impl WorkloadParams {
    pub fn input_size_or(&self, default: usize) -> Result<usize, Box<dyn Error + Send + Sync>> {
        match self.input_size {
            Some(0) => Err("input size must be at least 1".into()),
            Some(size) => Ok(size),
            None => Ok(default),
        }
    }
}

pub type WorkloadResult = Result<Box<dyn Workload>, Box<dyn Error + Send + Sync>>;

type Factory = Box<dyn Fn(&WorkloadParams) -> WorkloadResult + Send + Sync>;

/// Name to constructor mapping, consulted once at startup.
pub struct WorkloadRegistry {
    factories: FxHashMap<String, Factory>,
}

impl WorkloadRegistry {
    /// An empty registry.
    pub fn new() -> WorkloadRegistry {
        WorkloadRegistry {
            factories: FxHashMap::default(),
        }
    }

    /// The registry with every built-in workload.
    pub fn builtin() -> WorkloadRegistry {
        let mut registry = WorkloadRegistry::new();

        registry.register(synthetic::LINEAR_ARRAY_WRITE, |p| {
            Ok(Box::new(synthetic::ArrayAccess::linear_write(p)?))
        });
        registry.register(synthetic::LINEAR_ARRAY_READ, |p| {
            Ok(Box::new(synthetic::ArrayAccess::linear_read(p)?))
        });
        registry.register(synthetic::RANDOM_ARRAY_READ, |p| {
            Ok(Box::new(synthetic::ArrayAccess::random_read(p)?))
        });
        registry.register(synthetic::RANDOM_ARRAY_WRITE, |p| {
            Ok(Box::new(synthetic::ArrayAccess::random_write(p)?))
        });
        registry.register(malardalen::BSORT, |p| Ok(Box::new(malardalen::BubbleSort::new(p)?)));
        registry.register(malardalen::MATMULT, |p| Ok(Box::new(malardalen::MatMult::new(p)?)));
        registry.register(Countdown::NAME, |p| Ok(Box::new(Countdown::new(p)?)));

        registry
    }

    /// Adds or replaces the workload called `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&WorkloadParams) -> WorkloadResult + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(name.to_owned(), Box::new(factory))
            .is_some()
        {
            debug!("WorkloadRegistry::register: replacing workload {:?}", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str, params: &WorkloadParams) -> WorkloadResult {
        let factory = self.factories.get(name).ok_or_else(|| {
            format!(
                "unknown workload {:?}, expected one of: {}",
                name,
                self.names().join(", ")
            )
        })?;

        factory(params).map_err(|e| format!("failed to create workload {:?}: {}", name, e).into())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for WorkloadRegistry {
    fn default() -> Self {
        WorkloadRegistry::builtin()
    }
}

/// Busy loop of `input_size` countdown steps.
pub struct Countdown {
    count: u64,
}

impl Countdown {
    pub const NAME: &'static str = "countdown";
    const DEFAULT_COUNT: usize = 1_000_000;

    pub fn new(params: &WorkloadParams) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Countdown {
            count: params.input_size_or(Countdown::DEFAULT_COUNT)? as u64,
        })
    }
}

impl Workload for Countdown {
    fn name(&self) -> &str {
        Countdown::NAME
    }

    fn run_once(&mut self) {
        countdown(self.count);
    }
}
