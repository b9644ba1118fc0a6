//! Synthetic memory-stressing workloads.
//!
//! Every workload walks an array of [`BigStruct`] records and touches only the first word of
//! each, so each access lands on a different cache line. With the default of 65 536 records
//! (16 MiB) the array is far larger than any shared cache level.

use crate::workload::{Workload, WorkloadParams};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::error::Error;
use std::hint::black_box;

pub const LINEAR_ARRAY_WRITE: &str = "linear_array_write";
pub const LINEAR_ARRAY_READ: &str = "linear_array_read";
pub const RANDOM_ARRAY_READ: &str = "random_array_read";
pub const RANDOM_ARRAY_WRITE: &str = "random_array_write";

pub const DEFAULT_RECORDS: usize = 65_536;

const WRITTEN: i32 = 0xff;

/// 256-byte record.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct BigStruct {
    pub id: i32,
    pub data: [i32; 63],
}

impl Default for BigStruct {
    fn default() -> Self {
        BigStruct {
            id: 0,
            data: [0; 63],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

enum Order {
    Linear,
    /// Visits records through a permutation that is reshuffled before every iteration.
    Random { indices: Vec<u32>, rng: SmallRng },
}

pub struct ArrayAccess {
    name: &'static str,
    access: Access,
    order: Order,
    records: Vec<BigStruct>,
    last_sum: i64,
}

impl ArrayAccess {
    pub fn linear_write(params: &WorkloadParams) -> Result<Self, Box<dyn Error + Send + Sync>> {
        ArrayAccess::new(LINEAR_ARRAY_WRITE, Access::Write, false, params)
    }

    pub fn linear_read(params: &WorkloadParams) -> Result<Self, Box<dyn Error + Send + Sync>> {
        ArrayAccess::new(LINEAR_ARRAY_READ, Access::Read, false, params)
    }

    pub fn random_read(params: &WorkloadParams) -> Result<Self, Box<dyn Error + Send + Sync>> {
        ArrayAccess::new(RANDOM_ARRAY_READ, Access::Read, true, params)
    }

    pub fn random_write(params: &WorkloadParams) -> Result<Self, Box<dyn Error + Send + Sync>> {
        ArrayAccess::new(RANDOM_ARRAY_WRITE, Access::Write, true, params)
    }

    fn new(
        name: &'static str,
        access: Access,
        random: bool,
        params: &WorkloadParams,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let len = params.input_size_or(DEFAULT_RECORDS)?;
        if len > u32::MAX as usize {
            return Err(format!("{} records do not fit a 32-bit index", len).into());
        }

        let order = if random {
            Order::Random {
                indices: (0..len as u32).collect(),
                rng: SmallRng::seed_from_u64(params.seed),
            }
        } else {
            Order::Linear
        };

        Ok(ArrayAccess {
            name,
            access,
            order,
            records: vec![BigStruct::default(); len],
            last_sum: 0,
        })
    }

    pub fn records(&self) -> &[BigStruct] {
        &self.records
    }

    /// Sum of the ids read by the last read iteration.
    pub fn last_sum(&self) -> i64 {
        self.last_sum
    }

    /// The visiting order of the next iteration, `None` for linear walks.
    pub fn indices(&self) -> Option<&[u32]> {
        match &self.order {
            Order::Linear => None,
            Order::Random { indices, .. } => Some(indices),
        }
    }
}

impl Workload for ArrayAccess {
    fn name(&self) -> &str {
        self.name
    }

    fn prepare(&mut self) {
        if let Order::Random { indices, rng } = &mut self.order {
            indices.shuffle(rng);
        }
    }

    fn run_once(&mut self) {
        let records = black_box(&mut self.records[..]);

        match (&self.order, self.access) {
            (Order::Linear, Access::Read) => {
                let sum: i64 = records.iter().map(|r| i64::from(r.id)).sum();
                self.last_sum = black_box(sum);
            }
            (Order::Linear, Access::Write) => {
                for record in records.iter_mut() {
                    record.id = WRITTEN;
                }
            }
            (Order::Random { indices, .. }, Access::Read) => {
                let sum: i64 = indices
                    .iter()
                    .map(|&i| i64::from(records[i as usize].id))
                    .sum();
                self.last_sum = black_box(sum);
            }
            (Order::Random { indices, .. }, Access::Write) => {
                for &i in indices {
                    records[i as usize].id = WRITTEN;
                }
            }
        }

        black_box(records);
    }
}
