use twinklebrot::generator::{Bulb, BulbFilter, Generator, Mode};
use twinklebrot::pool::{PoolError, PoolManager, TickParams};
use twinklebrot::trajectory::TrajectoryId;

const BUDGET: u128 = 1 << 30;

fn pool(seed: u64) -> PoolManager {
    PoolManager::new(Generator::with_seed(seed), BUDGET)
}

fn ids_in_pool(p: &PoolManager) -> Vec<TrajectoryId> {
    p.trajectories().map(|t| t.id()).collect()
}

#[test]
fn steady_pool_keeps_its_target() {
    let mut p = pool(5);
    let params = TickParams {
        target: 5,
        min_len: 10,
        max_len: 20,
        audio_target: 0,
        audibility: 100.0,
        ..TickParams::default()
    };
    for _ in 0..50 {
        p.tick(&params).unwrap();
        assert_eq!(p.len(), 5);
        assert!(p.trajectories().all(|t| (10..20).contains(&t.len())));
        assert!(p.channels().is_empty());
    }
}

#[test]
fn mode_flip_empties_pool_and_channels() {
    let mut p = pool(8);
    let mut params = TickParams {
        target: 5,
        min_len: 10,
        max_len: 200,
        audio_target: 2,
        audibility: 0.0,
        ..TickParams::default()
    };
    p.tick(&params).unwrap();
    p.tick(&params).unwrap();
    assert_eq!(p.len(), 5);
    assert!(!p.channels().is_empty());

    params.mode = Mode::Inclusion;
    let report = p.tick(&params).unwrap();
    assert!(report.reset);
    assert_eq!(p.len(), 0);
    assert_eq!(p.channels().len(), 0);

    p.tick(&params).unwrap();
    assert_eq!(p.len(), 5);
    assert!(p.trajectories().all(|t| t.len() == 200));
}

#[test]
fn lowering_audio_target_drops_oldest_owners_from_the_pool() {
    let mut p = pool(21);
    let mut params = TickParams {
        target: 10,
        min_len: 200,
        max_len: 900,
        audio_target: 3,
        audibility: 0.0,
        random_start: false,
        ..TickParams::default()
    };
    for _ in 0..4 {
        p.tick(&params).unwrap();
    }
    assert_eq!(p.channels().len(), 3);
    let owners = p.channels().iter().map(|c| c.id).collect::<Vec<_>>();

    params.audio_target = 1;
    let report = p.tick(&params).unwrap();
    assert_eq!(report.audio_evicted, 2);
    assert!(p.channels().len() <= 1);
    let present = ids_in_pool(&p);
    assert!(!present.contains(&owners[0]));
    assert!(!present.contains(&owners[1]));
    assert_eq!(p.len(), 10);
}

#[test]
fn every_channel_owner_is_in_the_pool() {
    let mut p = pool(13);
    let params = TickParams {
        target: 30,
        min_len: 10,
        max_len: 120,
        audio_target: 4,
        audibility: 0.0,
        ..TickParams::default()
    };
    for _ in 0..60 {
        p.tick(&params).unwrap();
        let present = ids_in_pool(&p);
        assert!(p.channels().len() <= 4);
        assert!(p.channels().iter().all(|c| present.contains(&c.id)));
    }
}

#[test]
fn empty_pool_with_audio_target_is_fine() {
    let mut p = pool(2);
    let params = TickParams {
        target: 0,
        audio_target: 3,
        ..TickParams::default()
    };
    let report = p.tick(&params).unwrap();
    assert!(p.is_empty());
    assert!(p.channels().is_empty());
    assert_eq!(report.generated, 0);
}

#[test]
fn unsatisfiable_window_skips_replenish() {
    let mut p = pool(4);
    let params = TickParams {
        target: 5,
        min_len: 40,
        max_len: 40,
        ..TickParams::default()
    };
    let report = p.tick(&params).unwrap();
    assert_eq!(report.generated, 0);
    assert!(p.is_empty());

    let no_bulbs = TickParams {
        target: 5,
        mode: Mode::Inclusion,
        bulbs: BulbFilter::NONE,
        ..TickParams::default()
    };
    p.tick(&no_bulbs).unwrap();
    assert!(p.is_empty());
}

#[test]
fn oversized_pool_reports_resource_exhaustion() {
    let mut p = PoolManager::new(Generator::with_seed(1), 1024 * 1024);
    let params = TickParams {
        target: 10_000,
        max_len: 100_000,
        ..TickParams::default()
    };
    match p.tick(&params) {
        Err(PoolError::ResourceExhausted { requested_bytes, budget_bytes }) => {
            assert!(requested_bytes > budget_bytes);
        }
        other => panic!("expected resource exhaustion, got {other:?}"),
    }
    assert!(p.is_empty());
}

#[test]
fn voices_follow_channel_table() {
    let mut p = pool(17);
    let params = TickParams {
        target: 12,
        min_len: 20,
        max_len: 400,
        audio_target: 2,
        audibility: 0.0,
        ..TickParams::default()
    };
    for _ in 0..3 {
        p.tick(&params).unwrap();
    }
    let voices = p.voices();
    assert_eq!(voices.len(), p.channels().len());
    for v in &voices {
        assert!(p.is_sonified(v.id));
        assert!(!v.points.is_empty());
    }
}

#[test]
fn louder_newcomer_replaces_the_quietest_channel() {
    let mut swaps = 0;
    for seed in 0..8 {
        let mut p = pool(100 + seed);
        let mut params = TickParams {
            target: 1,
            min_len: 200,
            max_len: 900,
            audio_target: 1,
            audibility: f64::INFINITY,
            random_start: false,
            ..TickParams::default()
        };
        let first = p.tick(&params).unwrap();
        assert!(first.promoted);
        assert!(!first.swapped);
        let first_id = p.channels().iter().map(|c| c.id).next().expect("one channel");
        let first_amp = p.channels().amplitude(first_id).expect("amplitude");

        params.target = 40;
        let report = p.tick(&params).unwrap();
        assert!(!report.promoted);
        let loudest = p
            .trajectories()
            .map(|t| t.guess_amplitude())
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(p.channels().len(), 1);
        let now_amp = p.channels().iter().map(|c| c.amplitude).next().expect("one channel");

        if loudest > first_amp {
            assert!(report.swapped);
            assert_eq!(now_amp, loudest);
            // Losing the channel does not evict the trajectory.
            assert!(ids_in_pool(&p).contains(&first_id));
            assert!(!p.is_sonified(first_id));
            swaps += 1;
        } else {
            assert!(!report.swapped);
            assert!(p.is_sonified(first_id));
        }
    }
    assert!(swaps > 0, "no seed produced a louder newcomer");
}

#[test]
fn promotion_with_headroom_never_swaps() {
    let mut p = pool(31);
    let params = TickParams {
        target: 20,
        min_len: 200,
        max_len: 900,
        audio_target: 3,
        audibility: f64::INFINITY,
        random_start: false,
        ..TickParams::default()
    };
    for expected in 1..=3 {
        let report = p.tick(&params).unwrap();
        assert!(report.promoted);
        assert!(!report.swapped);
        assert_eq!(p.channels().len(), expected);
    }
}

#[test]
fn disabling_a_bulb_evicts_its_members_in_inclusion_mode() {
    let mut p = pool(27);
    let mut params = TickParams {
        target: 30,
        min_len: 2,
        max_len: 100,
        mode: Mode::Inclusion,
        audio_target: 0,
        ..TickParams::default()
    };
    p.tick(&params).unwrap();
    assert_eq!(p.len(), 30);
    let cardioid = p
        .trajectories()
        .filter(|t| t.bulb() == Bulb::MainCardioid)
        .map(|t| t.id())
        .collect::<Vec<_>>();
    assert!(!cardioid.is_empty());

    params.bulbs = BulbFilter::ALL.with(Bulb::MainCardioid, false);
    let report = p.tick(&params).unwrap();
    assert_eq!(report.filtered, cardioid.len());
    assert_eq!(report.finished, 0);
    let present = ids_in_pool(&p);
    assert!(cardioid.iter().all(|id| !present.contains(id)));
    assert_eq!(p.len(), 30);
}
