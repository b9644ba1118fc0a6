//! Per-core "waiting" flags shared between cores.
//!
//! The flags are the only way cores observe each other's progress through a rendezvous.
//! Each flag lives in its own cache line, so polling one core's flag does not steal the line
//! another core is writing.

use std::hint;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

/// Upper bound on participating cores.
pub const MAX_CORES: usize = 4;

/// Pads and aligns `T` to a 64-byte cache line.
#[derive(Debug, Default)]
#[repr(C, align(64))]
pub struct CachePadded<T>(T);

impl<T> CachePadded<T> {
    pub const fn new(value: T) -> Self {
        CachePadded(value)
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

/// A boolean written with exclusive access and read with acquire semantics.
///
/// Writes go through a weak compare-exchange, the portable equivalent of a
/// load-exclusive/store-exclusive pair: when the exclusive access is lost to another core
/// (or fails spuriously), the write is retried until it lands.
#[derive(Debug, Default)]
pub struct AtomicFlag(AtomicBool);

impl AtomicFlag {
    pub const fn new(value: bool) -> Self {
        AtomicFlag(AtomicBool::new(value))
    }

    #[inline]
    pub fn read(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Stores `value`, returning how many times the exclusive store had to be retried.
    #[inline]
    pub fn write(&self, value: bool) -> u32 {
        let mut retries = 0;
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            match self
                .0
                .compare_exchange_weak(current, value, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => {
                    current = observed;
                    retries += 1;
                    hint::spin_loop();
                }
            }
        }

        if retries > 0 {
            trace!("AtomicFlag::write: store landed after {} retries", retries);
        }

        retries
    }
}

/// One [`AtomicFlag`] per participating core.
#[derive(Debug)]
pub struct FlagBoard {
    flags: Box<[CachePadded<AtomicFlag>]>,
}

impl FlagBoard {
    /// Creates a board for `cores` cores, all flags `false`.
    ///
    /// Panics if `cores` is zero or larger than [`MAX_CORES`].
    pub fn new(cores: usize) -> FlagBoard {
        assert!(
            (1..=MAX_CORES).contains(&cores),
            "a flag board holds 1 to {} cores, not {}",
            MAX_CORES,
            cores
        );

        FlagBoard {
            flags: (0..cores)
                .map(|_| CachePadded::new(AtomicFlag::new(false)))
                .collect(),
        }
    }

    #[inline]
    pub fn cores(&self) -> usize {
        self.flags.len()
    }

    #[inline]
    pub fn read(&self, core: usize) -> bool {
        self.flags[core].read()
    }

    #[inline]
    pub fn write(&self, core: usize, value: bool) {
        self.flags[core].write(value);
    }

    /// `true` if every flag in `range` reads `true`.
    #[inline]
    pub fn all_set(&self, range: std::ops::Range<usize>) -> bool {
        self.flags[range].iter().all(|flag| flag.read())
    }

    /// `true` if no flag is set.
    pub fn all_clear(&self) -> bool {
        self.flags.iter().all(|flag| !flag.read())
    }
}
