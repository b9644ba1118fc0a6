//! Experiment configuration, resolved once at startup.
//!
//! Configurations are JSON files; every field has a default, so `{}` is a valid configuration
//! (three cores running `matmult`, `bsort` and `linear_array_write`).

use crate::barrier::Barrier;
use crate::counters::{EventCode, MAX_EVENT_SLOTS};
use crate::flag_board::MAX_CORES;
use crate::synthetic;
use crate::workload::WorkloadParams;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::io::BufReader;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Copied into every record; must not contain whitespace.
    pub label: String,
    /// One entry per participating core, core 0 first.
    pub cores: Vec<CoreConfig>,
    /// Counter backend, see [`Counter::by_name`](crate::Counter::by_name).
    pub counter: String,
    pub mask_interrupts: bool,
    /// Barrier channels, 1 or 2.
    pub channels: usize,
    pub stagger: StaggerConfig,
    pub cache: CacheConfig,
    /// Have the leader report countdown cycle costs before the first iteration.
    pub calibrate_countdown: bool,
    /// Stop after this many iterations; run forever when unset.
    pub iterations: Option<u64>,
    /// Base seed for workload inputs, core `i` uses `seed + i`.
    pub seed: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    pub workload: String,
    #[serde(default)]
    pub input_size: Option<usize>,
    /// Event names or raw codes, bound to slots in order.
    #[serde(default)]
    pub events: Vec<String>,
}

impl CoreConfig {
    pub fn new(workload: &str) -> CoreConfig {
        CoreConfig {
            workload: workload.to_owned(),
            input_size: None,
            events: Vec::new(),
        }
    }

    pub fn event_codes(&self) -> Result<Vec<EventCode>, Box<dyn Error + Send + Sync>> {
        self.events.iter().map(|name| EventCode::parse(name)).collect()
    }
}

/// Start-time offsets of the followers.
///
/// A follower delays its start by `offset * delay_step_countdown` countdown steps, where the
/// offset grows by `offset_step` every `iterations_per_step` iterations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaggerConfig {
    pub iterations_per_step: u64,
    pub offset_step: u64,
    pub delay_step_countdown: u64,
}

impl Default for StaggerConfig {
    fn default() -> Self {
        StaggerConfig {
            iterations_per_step: 1000,
            offset_step: 0,
            delay_step_countdown: 1000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    None,
    Evict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub mode: CacheMode,
    /// Eviction buffer of the leader, covering every cache level.
    pub full_bytes: usize,
    /// Eviction buffer of the followers, covering their private levels.
    pub private_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            mode: CacheMode::Evict,
            full_bytes: 2 * 1024 * 1024,
            private_bytes: 64 * 1024,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            label: "DEFAULT".to_owned(),
            cores: vec![
                CoreConfig::new("matmult"),
                CoreConfig::new("bsort"),
                CoreConfig {
                    input_size: Some(2 * synthetic::DEFAULT_RECORDS),
                    ..CoreConfig::new(synthetic::LINEAR_ARRAY_WRITE)
                },
            ],
            counter: "wall-time".to_owned(),
            mask_interrupts: false,
            channels: 1,
            stagger: StaggerConfig::default(),
            cache: CacheConfig::default(),
            calibrate_countdown: false,
            iterations: None,
            seed: 0,
        }
    }
}

impl ExperimentConfig {
    /// Reads and validates a JSON configuration file.
    pub fn from_path(path: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let file = fs::File::open(path)
            .map_err(|e| format!("cannot open configuration {}: {}", path.display(), e))?;
        let config: ExperimentConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| format!("invalid configuration {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.cores.is_empty() || self.cores.len() > MAX_CORES {
            return Err(format!(
                "{} cores configured, expected 1 to {}",
                self.cores.len(),
                MAX_CORES
            )
            .into());
        }

        if self.label.is_empty() || self.label.chars().any(char::is_whitespace) {
            return Err(format!(
                "label {:?} must be non-empty and without whitespace",
                self.label
            )
            .into());
        }

        if self.channels == 0 || self.channels > Barrier::MAX_CHANNELS {
            return Err(format!(
                "{} barrier channels configured, expected 1 or {}",
                self.channels,
                Barrier::MAX_CHANNELS
            )
            .into());
        }

        if self.stagger.iterations_per_step == 0 {
            return Err("stagger.iterations_per_step must be at least 1".into());
        }

        for (core, config) in self.cores.iter().enumerate() {
            if config.workload.is_empty() || config.workload.chars().any(char::is_whitespace) {
                return Err(
                    format!("core {}: invalid workload name {:?}", core, config.workload).into(),
                );
            }

            if config.events.len() > MAX_EVENT_SLOTS {
                return Err(format!(
                    "core {}: {} events configured, at most {} can be counted",
                    core,
                    config.events.len(),
                    MAX_EVENT_SLOTS
                )
                .into());
            }

            config
                .event_codes()
                .map_err(|e| format!("core {}: {}", core, e))?;
        }

        Ok(())
    }

    pub fn workload_params(&self, core: usize) -> WorkloadParams {
        WorkloadParams {
            input_size: self.cores[core].input_size,
            seed: self.seed.wrapping_add(core as u64),
        }
    }
}
