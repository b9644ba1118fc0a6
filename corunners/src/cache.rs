//! Putting the caches into a known state before each rendezvous.
//!
//! Userspace cannot invalidate data caches, so conditioning is done by eviction: walking a
//! core-private buffer at cache-line stride displaces whatever the previous iteration left
//! behind. The leader walks a buffer sized for the whole hierarchy, followers one sized for
//! their private levels only, so that followers do not disturb the shared level the leader just
//! flushed.

use crate::barrier::Role;
use crate::config::{CacheConfig, CacheMode};
use std::hint::black_box;

pub const CACHE_LINE: usize = 64;

pub enum CacheConditioner {
    None,
    Evict { buffer: Box<[u8]>, generation: u8 },
}

impl CacheConditioner {
    pub fn for_role(config: &CacheConfig, role: Role) -> CacheConditioner {
        match config.mode {
            CacheMode::None => CacheConditioner::None,
            CacheMode::Evict => {
                let bytes = match role {
                    Role::Leader => config.full_bytes,
                    Role::Follower => config.private_bytes,
                };
                CacheConditioner::evicting(bytes)
            }
        }
    }

    pub fn evicting(bytes: usize) -> CacheConditioner {
        if bytes == 0 {
            return CacheConditioner::None;
        }

        CacheConditioner::Evict {
            buffer: vec![0u8; bytes].into_boxed_slice(),
            generation: 0,
        }
    }

    /// Touches every cache line of the eviction buffer with a store.
    #[inline(never)]
    pub fn condition(&mut self) {
        if let CacheConditioner::Evict { buffer, generation } = self {
            *generation = generation.wrapping_add(1);
            let buffer = black_box(&mut buffer[..]);
            for line in buffer.iter_mut().step_by(CACHE_LINE) {
                *line = *generation;
            }
            black_box(buffer);
        }
    }

    pub fn bytes(&self) -> usize {
        match self {
            CacheConditioner::None => 0,
            CacheConditioner::Evict { buffer, .. } => buffer.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_the_role() {
        let config = CacheConfig {
            mode: CacheMode::Evict,
            full_bytes: 4096,
            private_bytes: 1024,
        };
        assert_eq!(CacheConditioner::for_role(&config, Role::Leader).bytes(), 4096);
        assert_eq!(CacheConditioner::for_role(&config, Role::Follower).bytes(), 1024);

        let config = CacheConfig {
            mode: CacheMode::None,
            ..config
        };
        assert_eq!(CacheConditioner::for_role(&config, Role::Leader).bytes(), 0);
    }

    #[test]
    fn conditioning_touches_every_line() {
        let mut conditioner = CacheConditioner::evicting(10 * CACHE_LINE);
        conditioner.condition();
        conditioner.condition();

        match &conditioner {
            CacheConditioner::Evict { buffer, generation } => {
                assert_eq!(*generation, 2);
                assert!(buffer.iter().step_by(CACHE_LINE).all(|&b| b == 2));
                assert!(buffer.iter().skip(1).step_by(CACHE_LINE).all(|&b| b == 0));
            }
            CacheConditioner::None => panic!("expected an eviction buffer"),
        }
    }
}
