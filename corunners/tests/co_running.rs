use corunners::testing_common::{
    run_simulated_experiment, run_simulated_into_sink, simulated_config,
};
use corunners::{
    Barrier, CoreId, Experiment, ExperimentConfig, MemorySink, ResultRecord, Role,
    StaggerConfig, MAX_CORES,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

#[test]
fn test_three_cores_ten_rounds() {
    let (report, sink) = run_simulated_into_sink(simulated_config(&[100, 200, 300], 10));

    assert_eq!(report.completed, vec![10, 10, 10]);
    assert_eq!(sink.len(), 30);

    for core in 0..3 {
        let iterations: Vec<u64> = sink
            .records_of(core)
            .iter()
            .map(|r| r.iteration)
            .collect();
        assert_eq!(iterations, (1..=10).collect::<Vec<u64>>(), "core {}", core);
    }
}

#[test]
fn test_records_carry_exact_cycles() {
    let (_, records) = run_simulated_experiment(simulated_config(&[100, 250], 4));

    for record in &records {
        assert_eq!(record.label, "simulated");
        assert_eq!(record.workload, "simulated");
        assert_eq!(record.cores, 2);
        assert_eq!(record.cycles, [100, 250][record.core]);
        assert_eq!(record.offset, 0);
    }
}

#[test]
fn test_stagger_offset_on_fifteenth_record() {
    let config = ExperimentConfig {
        stagger: StaggerConfig {
            iterations_per_step: 5,
            offset_step: 100,
            delay_step_countdown: 1,
        },
        ..simulated_config(&[10, 10], 15)
    };

    let (_, sink) = run_simulated_into_sink(config);
    let follower = sink.records_of(1);

    assert_eq!(follower.len(), 15);
    assert_eq!(follower[14].iteration, 15);
    assert_eq!(follower[14].offset, 200);
    assert_eq!(follower[4].offset, 0);
    assert_eq!(follower[5].offset, 100);
}

#[test]
fn test_two_channels() {
    let config = ExperimentConfig {
        channels: 2,
        ..simulated_config(&[10, 20, 30, 40], 9)
    };

    let (report, records) = run_simulated_experiment(config);
    assert_eq!(report.completed, vec![9; 4]);
    assert_eq!(records.len(), 36);
}

#[test]
fn test_events_are_reported_per_record() {
    let mut config = simulated_config(&[64, 32], 3);
    config.cores[1].events = vec!["l2d_cache_refill".to_owned(), "0x19".to_owned()];

    let (_, sink) = run_simulated_into_sink(config);

    for record in sink.records_of(0) {
        assert!(record.events.is_empty());
    }
    for record in sink.records_of(1) {
        assert_eq!(record.events.len(), 2);
        // The simulated counters count one event per cycle.
        assert!(record.events.iter().all(|e| e.count == 32));
        assert_eq!(record.events[1].code.0, 0x19);
        assert_eq!(record.to_string().parse::<ResultRecord>().unwrap(), record);
    }
}

#[test]
fn test_wall_time_run() {
    let config = ExperimentConfig {
        cores: vec![corunners::CoreConfig::new("countdown"); 2],
        counter: "wall-time".to_owned(),
        iterations: Some(3),
        ..ExperimentConfig::default()
    };

    let sink = MemorySink::new();
    let report = Experiment::new(config).unwrap().run(&sink).unwrap();

    assert_eq!(report.completed, vec![3, 3]);
    assert_eq!(sink.len(), 6);
    assert!(sink.records().iter().all(|r| r.cycles > 0));
}

#[test]
fn test_barrier_resets_for_every_core_count() {
    for cores in 1..=MAX_CORES {
        let barrier = Barrier::new(cores);
        let rounds = 25;

        thread::scope(|s| {
            for id in 0..cores {
                let barrier = &barrier;
                s.spawn(move || {
                    let core = CoreId::new(id, cores).unwrap();
                    for _ in 0..rounds {
                        match core.role() {
                            Role::Leader => barrier.lead(0),
                            Role::Follower => barrier.follow(core, 0, 0),
                        }
                    }
                });
            }
        });

        assert!(barrier.is_quiescent(), "{} cores", cores);
    }
}

#[test]
fn test_no_follower_starts_before_the_leader_saw_everyone() {
    const CORES: usize = 3;
    const ROUNDS: usize = 100;

    let barrier = Barrier::new(CORES);
    let clock = AtomicU64::new(1);
    let all_arrived_at: Vec<AtomicU64> = (0..ROUNDS).map(|_| AtomicU64::new(0)).collect();
    let started_at: Vec<Vec<AtomicU64>> = (0..CORES)
        .map(|_| (0..ROUNDS).map(|_| AtomicU64::new(0)).collect())
        .collect();

    thread::scope(|s| {
        for id in 0..CORES {
            let (barrier, clock, all_arrived_at, started_at) =
                (&barrier, &clock, &all_arrived_at, &started_at);
            s.spawn(move || {
                let core = CoreId::new(id, CORES).unwrap();
                for round in 0..ROUNDS {
                    match core.role() {
                        Role::Leader => barrier.lead_with(0, || {
                            let now = clock.fetch_add(1, Ordering::SeqCst);
                            all_arrived_at[round].store(now, Ordering::SeqCst);
                        }),
                        Role::Follower => barrier.follow(core, 0, 0),
                    }
                    let now = clock.fetch_add(1, Ordering::SeqCst);
                    started_at[id][round].store(now, Ordering::SeqCst);
                }
            });
        }
    });

    for round in 0..ROUNDS {
        let all_arrived = all_arrived_at[round].load(Ordering::SeqCst);
        assert!(all_arrived > 0);
        for (id, started) in started_at.iter().enumerate().skip(1) {
            let started = started[round].load(Ordering::SeqCst);
            assert!(
                started > all_arrived,
                "core {} started round {} at {} before the leader saw everyone at {}",
                id,
                round,
                started,
                all_arrived
            );
        }
    }
}
