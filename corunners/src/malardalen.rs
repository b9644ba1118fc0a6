//! Ports of two Mälardalen WCET benchmarks: `bsort100` and `matmult`.

use crate::workload::{Workload, WorkloadParams};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::hint::black_box;

pub const BSORT: &str = "bsort";
pub const MATMULT: &str = "matmult";

/// Bubble sort with early exit, refilled with random values before every iteration.
pub struct BubbleSort {
    array: Vec<i32>,
    rng: SmallRng,
}

impl BubbleSort {
    pub const DEFAULT_ELEMENTS: usize = 100;

    pub fn new(params: &WorkloadParams) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let len = params.input_size_or(BubbleSort::DEFAULT_ELEMENTS)?;

        Ok(BubbleSort {
            array: vec![0; len],
            rng: SmallRng::seed_from_u64(params.seed),
        })
    }

    pub fn array(&self) -> &[i32] {
        &self.array
    }

    fn sort(array: &mut [i32]) {
        let len = array.len();
        for pass in 1..len {
            let mut sorted = true;
            for index in 0..len - pass {
                if array[index] > array[index + 1] {
                    array.swap(index, index + 1);
                    sorted = false;
                }
            }

            if sorted {
                break;
            }
        }
    }
}

impl Workload for BubbleSort {
    fn name(&self) -> &str {
        BSORT
    }

    fn prepare(&mut self) {
        let rng = &mut self.rng;
        self.array.iter_mut().for_each(|v| *v = rng.random());
    }

    fn run_once(&mut self) {
        BubbleSort::sort(black_box(&mut self.array[..]));
    }
}

/// Square integer matrix multiplication, inputs from the benchmark's own generator.
pub struct MatMult {
    dim: usize,
    a: Vec<i32>,
    b: Vec<i32>,
    result: Vec<i32>,
}

impl MatMult {
    pub const DEFAULT_DIM: usize = 20;

    pub fn new(params: &WorkloadParams) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let dim = params.input_size_or(MatMult::DEFAULT_DIM)?;
        let cells = dim
            .checked_mul(dim)
            .ok_or_else(|| format!("{}x{} matrix is too large", dim, dim))?;

        let mut seed = 0;
        let a = (0..cells).map(|_| next_random(&mut seed)).collect();
        let b = (0..cells).map(|_| next_random(&mut seed)).collect();

        Ok(MatMult {
            dim,
            a,
            b,
            result: vec![0; cells],
        })
    }

    pub fn result(&self) -> &[i32] {
        &self.result
    }

    fn multiply(dim: usize, a: &[i32], b: &[i32], result: &mut [i32]) {
        for outer in 0..dim {
            for inner in 0..dim {
                let mut sum = 0i32;
                for index in 0..dim {
                    let product = a[outer * dim + index].wrapping_mul(b[index * dim + inner]);
                    sum = sum.wrapping_add(product);
                }
                result[outer * dim + inner] = sum;
            }
        }
    }
}

/// The benchmark's linear congruential generator, values in `0..8095`.
fn next_random(seed: &mut i32) -> i32 {
    *seed = (*seed * 133 + 81) % 8095;
    *seed
}

impl Workload for MatMult {
    fn name(&self) -> &str {
        MATMULT
    }

    fn run_once(&mut self) {
        let MatMult { dim, a, b, result } = self;
        MatMult::multiply(*dim, black_box(a), black_box(b), black_box(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(input_size: Option<usize>) -> WorkloadParams {
        WorkloadParams {
            input_size,
            seed: 3,
        }
    }

    #[test]
    fn bsort_sorts() {
        let mut workload = BubbleSort::new(&params(None)).unwrap();
        assert_eq!(workload.array().len(), 100);

        for _ in 0..3 {
            workload.prepare();
            workload.run_once();
            assert!(workload.array().windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn generator_sequence() {
        let mut seed = 0;
        let values: Vec<i32> = (0..4).map(|_| next_random(&mut seed)).collect();
        assert_eq!(values, vec![81, 2759, 2753, 1955]);
    }

    #[test]
    fn matmult_multiplies() {
        let mut workload = MatMult::new(&params(Some(2))).unwrap();
        // a = [[81, 2759], [2753, 1955]], b = [[1056, 2914], [7178, 7640]]
        workload.run_once();
        assert_eq!(
            workload.result(),
            &[
                81 * 1056 + 2759 * 7178,
                81 * 2914 + 2759 * 7640,
                2753 * 1056 + 1955 * 7178,
                2753 * 2914 + 1955 * 7640,
            ]
        );
    }
}
