//! Leader/follower rendezvous.
//!
//! Core 0 leads every round:
//!
//! 1. wait until every follower got through the previous round's lock on this channel, then
//!    acquire the round lock,
//! 2. set its own flag ("leader is waiting"),
//! 3. spin until every follower's flag is set,
//! 4. clear the followers' flags, then its own,
//! 5. release the round lock.
//!
//! Every follower:
//!
//! 1. sets its own flag,
//! 2. spins until the leader's flag is set, so it cannot overtake the leader's acquisition of
//!    the round lock, or until its own flag has been cleared, which means the leader already
//!    saw it in this round,
//! 3. acquires and immediately releases the round lock, which blocks until step 5 above, and
//!    counts itself as through,
//! 4. optionally burns a stagger delay before returning.
//!
//! The instant followers get through step 3 is the synchronized start of the round. Because
//! every flag is cleared before the lock is released, the next round can start right away and
//! the protocol repeats indefinitely. There is no timeout: a core that never arrives keeps
//! every other core spinning.

use crate::countdown::countdown;
use crate::flag_board::{FlagBoard, MAX_CORES};
use crate::round_lock::RoundLock;
use std::error::Error;
use std::fmt;
use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};

const LEADER: usize = 0;

/// Identity of a participating core, in `0..cores`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreId(usize);

impl CoreId {
    pub const LEADER: CoreId = CoreId(LEADER);

    /// Fails for ids outside of `0..cores`; there is no way to continue on such a core.
    pub fn new(id: usize, cores: usize) -> Result<CoreId, Box<dyn Error + Send + Sync>> {
        if cores == 0 || cores > MAX_CORES {
            return Err(
                format!("{} participating cores, expected 1 to {}", cores, MAX_CORES).into(),
            );
        }

        if id >= cores {
            return Err(format!("illegal core number {} (only {} cores)", id, cores).into());
        }

        Ok(CoreId(id))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    #[inline]
    pub fn role(self) -> Role {
        if self.0 == LEADER {
            Role::Leader
        } else {
            Role::Follower
        }
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

#[derive(Debug)]
struct Channel {
    flags: FlagBoard,
    lock: RoundLock,
    /// Followers through the round lock since the leader last acquired it.
    passed: AtomicUsize,
}

/// Rendezvous for a fixed set of cores, with one or two independent channels.
///
/// Two channels allow consecutive phases to use separate flags and locks.
#[derive(Debug)]
pub struct Barrier {
    channels: Box<[Channel]>,
}

impl Barrier {
    pub const MAX_CHANNELS: usize = 2;

    pub fn new(cores: usize) -> Barrier {
        Barrier::with_channels(cores, 1)
    }

    /// Panics unless `1 <= cores <= MAX_CORES` and `1 <= channels <= MAX_CHANNELS`.
    pub fn with_channels(cores: usize, channels: usize) -> Barrier {
        assert!(
            (1..=Barrier::MAX_CHANNELS).contains(&channels),
            "a barrier has 1 or 2 channels, not {}",
            channels
        );

        Barrier {
            channels: (0..channels)
                .map(|_| Channel {
                    flags: FlagBoard::new(cores),
                    lock: RoundLock::new(),
                    passed: AtomicUsize::new(cores.saturating_sub(1)),
                })
                .collect(),
        }
    }

    pub fn cores(&self) -> usize {
        self.channels[0].flags.cores()
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    /// Channel used by the 1-based `iteration`.
    #[inline]
    pub fn channel_for(&self, iteration: u64) -> usize {
        ((iteration.saturating_sub(1)) % self.channels.len() as u64) as usize
    }

    /// Leader side of one round on `channel`.
    #[inline]
    pub fn lead(&self, channel: usize) {
        self.lead_with(channel, || {})
    }

    /// Like [`lead`](Barrier::lead), calling `on_all_arrived` once every follower has been
    /// observed waiting and before anyone is released.
    #[inline]
    pub fn lead_with(&self, channel: usize, on_all_arrived: impl FnOnce()) {
        let Channel {
            flags,
            lock,
            passed,
        } = &self.channels[channel];
        let cores = flags.cores();

        // A follower that saw the previous round's flag but has not taken the lock yet would
        // otherwise wait on this round's lock while this round waits on its flag.
        while passed.load(Ordering::Acquire) != cores - 1 {
            hint::spin_loop();
        }
        passed.store(0, Ordering::Relaxed);

        lock.acquire();
        flags.write(LEADER, true);

        // Plain spin: any backoff here shows up directly as start-time skew.
        while !flags.all_set(1..cores) {
            hint::spin_loop();
        }

        on_all_arrived();

        for follower in 1..cores {
            flags.write(follower, false);
        }
        flags.write(LEADER, false);

        lock.release();
    }

    /// Follower side of one round on `channel`, followed by a busy-wait of `stagger` countdown
    /// steps.
    #[inline]
    pub fn follow(&self, core: CoreId, channel: usize, stagger: u64) {
        debug_assert_eq!(core.role(), Role::Follower);
        self.arrive(core, channel);
        self.pass(core, channel, stagger);
    }

    #[inline]
    fn arrive(&self, core: CoreId, channel: usize) {
        self.channels[channel].flags.write(core.index(), true);
    }

    #[inline]
    fn pass(&self, core: CoreId, channel: usize, stagger: u64) {
        let Channel {
            flags,
            lock,
            passed,
        } = &self.channels[channel];

        // The leader's flag is only up for one pass over the followers. A follower that was
        // descheduled meanwhile finds it down again, but its own flag cleared.
        while !flags.read(LEADER) && flags.read(core.index()) {
            hint::spin_loop();
        }

        lock.acquire();
        lock.release();
        passed.fetch_add(1, Ordering::Release);

        if stagger > 0 {
            countdown(stagger);
        }
    }

    /// `true` when no flag is set, no round lock is held and every follower is through its last
    /// round, i.e. between rounds.
    pub fn is_quiescent(&self) -> bool {
        let followers = self.cores() - 1;
        self.channels.iter().all(|channel| {
            channel.flags.all_clear()
                && !channel.lock.is_locked()
                && channel.passed.load(Ordering::Acquire) == followers
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    fn run_rounds(cores: usize, channels: usize, rounds: u64) -> Barrier {
        let barrier = Barrier::with_channels(cores, channels);

        thread::scope(|s| {
            for id in 0..cores {
                let barrier = &barrier;
                s.spawn(move || {
                    let core = CoreId::new(id, cores).unwrap();
                    for iteration in 1..=rounds {
                        let channel = barrier.channel_for(iteration);
                        match core.role() {
                            Role::Leader => barrier.lead(channel),
                            Role::Follower => barrier.follow(core, channel, 0),
                        }
                    }
                });
            }
        });

        barrier
    }

    #[test]
    fn every_round_leaves_the_barrier_quiescent() {
        for cores in 1..=MAX_CORES {
            for rounds in [1, 7] {
                let barrier = run_rounds(cores, 1, rounds);
                assert!(barrier.is_quiescent(), "{} cores, {} rounds", cores, rounds);
            }
        }
    }

    #[test]
    fn two_channels_alternate() {
        let barrier = Barrier::with_channels(2, 2);
        assert_eq!(barrier.channel_for(1), 0);
        assert_eq!(barrier.channel_for(2), 1);
        assert_eq!(barrier.channel_for(3), 0);

        let barrier = run_rounds(3, 2, 9);
        assert!(barrier.is_quiescent());
    }

    #[test]
    fn followers_are_released_only_after_the_leader_saw_everyone() {
        const CORES: usize = 4;
        const ROUNDS: u64 = 200;

        let barrier = Barrier::new(CORES);
        let sequence = AtomicU64::new(0);
        let observed_at: Vec<AtomicU64> = (0..ROUNDS).map(|_| AtomicU64::new(u64::MAX)).collect();

        thread::scope(|s| {
            for id in 0..CORES {
                let (barrier, sequence, observed_at) = (&barrier, &sequence, &observed_at);
                s.spawn(move || {
                    let core = CoreId::new(id, CORES).unwrap();
                    for round in 0..ROUNDS {
                        match core.role() {
                            Role::Leader => barrier.lead_with(0, || {
                                let stamp = sequence.fetch_add(1, Ordering::SeqCst);
                                observed_at[round as usize].store(stamp, Ordering::SeqCst);
                            }),
                            Role::Follower => {
                                barrier.follow(core, 0, 0);
                                // Stand-in for the start of `run_once`.
                                let stamp = sequence.fetch_add(1, Ordering::SeqCst);
                                let leader = observed_at[round as usize].load(Ordering::SeqCst);
                                assert!(
                                    leader < stamp,
                                    "{} started round {} before the leader saw all flags",
                                    core,
                                    round
                                );
                            }
                        }
                    }
                });
            }
        });

        assert!(barrier.is_quiescent());
    }

    #[test]
    fn follower_descheduled_while_the_leader_ran_its_round() {
        let barrier = Barrier::new(2);
        let follower = CoreId::new(1, 2).unwrap();

        // The follower announces itself, then stalls before it looks at the leader's flag.
        barrier.arrive(follower, 0);
        thread::scope(|s| {
            s.spawn(|| barrier.lead(0));
        });
        assert!(!barrier.channels[0].flags.read(LEADER));
        assert!(!barrier.channels[0].flags.read(1));

        barrier.pass(follower, 0, 0);
        assert!(barrier.is_quiescent());

        thread::scope(|s| {
            s.spawn(|| barrier.lead(0));
            barrier.follow(follower, 0, 0);
        });
        assert!(barrier.is_quiescent());
    }

    #[test]
    fn rounds_complete_with_yielding_followers() {
        const CORES: usize = 3;
        const ROUNDS: u64 = 500;

        let barrier = Barrier::new(CORES);
        let completed = AtomicU64::new(0);

        thread::scope(|s| {
            for id in 0..CORES {
                let (barrier, completed) = (&barrier, &completed);
                s.spawn(move || {
                    let core = CoreId::new(id, CORES).unwrap();
                    for round in 0..ROUNDS {
                        match core.role() {
                            Role::Leader => barrier.lead(0),
                            Role::Follower => {
                                barrier.arrive(core, 0);
                                if round % 3 == id as u64 % 3 {
                                    thread::yield_now();
                                }
                                barrier.pass(core, 0, 0);
                            }
                        }
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(completed.into_inner(), CORES as u64 * ROUNDS);
        assert!(barrier.is_quiescent());
    }

    #[test]
    fn core_ids() {
        assert_eq!(CoreId::new(0, 1).unwrap().role(), Role::Leader);
        assert_eq!(CoreId::new(3, 4).unwrap().role(), Role::Follower);
        assert!(CoreId::new(4, 4).is_err());
        assert!(CoreId::new(0, 0).is_err());
        assert!(CoreId::new(0, 5).is_err());
        assert_eq!(CoreId::new(2, 3).unwrap().to_string(), "core2");
    }
}
