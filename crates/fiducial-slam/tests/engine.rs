use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use fiducial_slam::map::MapFile;
use fiducial_slam::{
    run, FiducialMap, FiducialSlam, ObserverPose, RawSighting, SaveOutcome, SightingBatch,
    SlamConfig,
};

fn sighting(id: u32, translation: [f64; 3], error: f64) -> RawSighting {
    RawSighting {
        fiducial_id: id,
        translation,
        rotation: [0.0, 0.0, 0.0, 1.0],
        object_error: error,
        image_error: 0.0,
        fiducial_area: 0.0,
    }
}

fn batch(stamp: f64, sightings: Vec<RawSighting>) -> SightingBatch {
    SightingBatch {
        stamp,
        frame_id: "camera".into(),
        sightings,
    }
}

fn discard() -> Vec<ObserverPose> {
    Vec::new()
}

fn config_with_map(dir: &tempfile::TempDir) -> SlamConfig {
    SlamConfig {
        map_path: Some(dir.path().join("map.json")),
        ..SlamConfig::default()
    }
}

#[test]
fn first_sighting_then_refinement() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut slam = FiducialSlam::open(config_with_map(&dir)).expect("engine");
    let mut poses: Vec<ObserverPose> = Vec::new();

    let first = batch(1.0, vec![sighting(7, [1.0, 0.0, 0.5], 2e-10)]);
    slam.handle_batch(&first, &mut poses);
    assert!(poses.is_empty());
    let before = slam.map().landmark(7).expect("landmark 7").clone();
    assert_eq!(before.observations, 1);

    let second = batch(2.0, vec![sighting(7, [1.02, 0.01, 0.5], 2e-10)]);
    slam.handle_batch(&second, &mut poses);
    assert_eq!(poses.len(), 1);
    let after = slam.map().landmark(7).expect("landmark 7");
    assert_eq!(after.observations, 2);
    assert!(after.confidence() > before.confidence());

    // observer resolved from 7 alone: landmark pose composed with the inverse sighting
    let observer = &poses[0].pose;
    assert_relative_eq!(observer.translation().x, -0.02, epsilon = 1e-9);
    assert_relative_eq!(observer.translation().y, -0.01, epsilon = 1e-9);
}

#[test]
fn shutdown_saves_and_reload_localizes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_with_map(&dir);
    let mut slam = FiducialSlam::open(config.clone()).expect("engine");
    slam.handle_batch(
        &batch(
            0.0,
            vec![
                sighting(1, [1.0, 0.0, 0.0], 1e-10),
                sighting(2, [0.0, 1.0, 0.0], 1e-10),
            ],
        ),
        &mut discard(),
    );
    let report = slam.shutdown();
    assert!(report.saved());
    assert_eq!(report.landmarks, 2);

    let file = MapFile::load_json(dir.path().join("map.json")).expect("map file");
    assert_eq!(file.landmarks.len(), 2);
    assert_eq!(file.landmarks[0].links, vec![2]);

    let reloaded = FiducialSlam::open(config).expect("engine");
    assert_eq!(reloaded.map().len(), 2);
    let mut poses: Vec<ObserverPose> = Vec::new();
    let mut reloaded = reloaded;
    let seen = batch(5.0, vec![sighting(2, [0.0, 1.0, 0.0], 1e-10)]);
    reloaded.handle_batch(&seen, &mut poses);
    assert_eq!(poses.len(), 1);
    assert_relative_eq!(poses[0].pose.translation().norm(), 0.0, epsilon = 1e-9);
}

#[test]
fn read_only_session_never_overwrites_map() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut writer = FiducialSlam::open(config_with_map(&dir)).expect("engine");
    let first = batch(0.0, vec![sighting(1, [1.0, 0.0, 0.0], 1e-10)]);
    writer.handle_batch(&first, &mut discard());
    assert!(writer.shutdown().saved());
    let path = dir.path().join("map.json");
    let before = std::fs::read(&path).expect("read");

    let config = SlamConfig {
        read_only: true,
        ..config_with_map(&dir)
    };
    let mut reader = FiducialSlam::open(config).expect("engine");
    let mut poses: Vec<ObserverPose> = Vec::new();
    for i in 0..5 {
        let stamp = 1.0 + i as f64;
        let out = reader.handle_batch(
            &batch(
                stamp,
                vec![
                    sighting(1, [0.9, 0.1, 0.0], 1e-10),
                    sighting(10 + i, [2.0, 0.0, 0.0], 1e-10),
                ],
            ),
            &mut poses,
        );
        assert_eq!(out.discarded, 2);
    }
    assert_eq!(poses.len(), 5);
    assert_eq!(reader.map().len(), 1);

    let report = reader.shutdown();
    assert!(matches!(report.save, Ok(SaveOutcome::SkippedReadOnly)));
    assert_eq!(std::fs::read(&path).expect("read"), before);
}

#[test]
fn failed_save_is_reported_not_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SlamConfig {
        map_path: Some(dir.path().join("missing").join("map.json")),
        ..SlamConfig::default()
    };
    let mut slam = FiducialSlam::new(config, FiducialMap::default()).expect("engine");
    let first = batch(0.0, vec![sighting(1, [1.0, 0.0, 0.0], 1e-10)]);
    slam.handle_batch(&first, &mut discard());
    assert!(slam.save().is_err());
    assert_eq!(slam.map().len(), 1);

    let report = slam.shutdown();
    assert!(report.save.is_err());
    assert_eq!(report.landmarks, 1);
}

#[test]
fn run_loop_drains_channel_then_saves() {
    let dir = tempfile::tempdir().expect("tempdir");
    let slam = FiducialSlam::open(config_with_map(&dir)).expect("engine");
    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send(batch(0.0, vec![sighting(3, [1.0, 0.0, 0.0], 1e-10)]))
        .expect("send");
    tx.send(batch(0.1, vec![sighting(3, [1.0, 0.0, 0.0], 1e-10)]))
        .expect("send");
    drop(tx);

    let running = AtomicBool::new(true);
    let mut poses: Vec<ObserverPose> = Vec::new();
    let report = run(slam, rx, &running, &mut poses);

    assert_eq!(report.batches, 2);
    assert!(report.saved());
    assert!(!poses.is_empty());
    assert!(dir.path().join("map.json").exists());
}

#[test]
fn run_loop_stops_on_flag() {
    let slam = FiducialSlam::new(SlamConfig::default(), FiducialMap::default()).expect("engine");
    let (tx, rx) = crossbeam_channel::unbounded::<SightingBatch>();
    let running = AtomicBool::new(true);

    let report = thread::scope(|s| {
        let handle = s.spawn(|| run(slam, rx, &running, &mut discard()));
        thread::sleep(Duration::from_millis(100));
        running.store(false, std::sync::atomic::Ordering::SeqCst);
        handle.join().expect("run loop")
    });
    drop(tx);
    assert_eq!(report.batches, 0);
    assert_eq!(report.landmarks, 0);
}
