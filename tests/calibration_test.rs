// tests/calibration_test.rs

use nalgebra::{Point2, Point3, Rotation3, Vector3};
use radar_align::config::{AppConfig, CalibrationConfig, CameraConfig, OffsetSweep};
use radar_align::data_generator::{synthetic_scene, SceneParams, SyntheticScene};
use radar_align::projector::project_radar;
use radar_align::track::PixelObservation;
use radar_align::{
    calibrate, calibrate_jobs, calibrate_pairs, match_pairs, CalibrationError, CalibrationJob, CalibrationResult,
    CalibrationWarning, CameraIntrinsics, CameraPose, CameraTrack, CoordinateHypothesis, ManualPose, MatchedPair,
    RadarLookup, RadarTrack, TargetCentroid, TemporalMapper, TuningEvent,
};

fn true_pose() -> CameraPose {
    CameraPose::new(
        Rotation3::from_euler_angles(0.1, -0.05, 0.02),
        Vector3::new(0.1, -3.0, 4.0),
    )
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::from_config(&CameraConfig::default())
}

fn scene(params: &SceneParams) -> SyntheticScene {
    let mapper = TemporalMapper::new(30.0, 16.13, 0.0);
    synthetic_scene(&true_pose(), &intrinsics(), CoordinateHypothesis::Identity, &mapper, params)
}

const SQUARE: [(f64, f64); 6] = [(-0.5, 2.5), (0.5, 2.5), (0.5, 3.5), (-0.5, 3.5), (0.1, 3.2), (-0.2, 2.7)];

fn exact_pairs(pose: &CameraPose, k: &CameraIntrinsics, points: &[(f64, f64)]) -> Vec<MatchedPair> {
    points
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| MatchedPair {
            video_frame: i as u64,
            radar_index: i,
            radar: Point2::new(x, y),
            pixel: pose
                .project(k, &CoordinateHypothesis::Identity.apply(x, y))
                .expect("point in front of camera"),
        })
        .collect()
}

#[test]
fn test_planar_square_selects_identity() {
    let k = intrinsics();
    let pairs = exact_pairs(&true_pose(), &k, &SQUARE);

    let report = calibrate_pairs(&pairs, &k, &CalibrationConfig::default(), 0.0).unwrap();
    println!("选中 {}，误差 {:.2e} px", report.result.hypothesis, report.result.reprojection_error_px);
    assert_eq!(report.result.hypothesis, CoordinateHypothesis::Identity);
    assert!(report.result.reprojection_error_px < 1.0);
    assert_eq!(report.attempts.len(), 4);
    assert!(report.result.plausible);
}

#[test]
fn test_round_trip_recovers_pose() {
    let scene = scene(&SceneParams::default());
    let mapper = TemporalMapper::new(30.0, 16.13, 0.0);
    let report = calibrate(
        &scene.radar_track,
        &scene.camera_track,
        &mapper,
        &scene.intrinsics,
        &CalibrationConfig::default(),
    )
    .unwrap();
    let result = &report.result;
    assert_eq!(result.hypothesis, CoordinateHypothesis::Identity);
    assert!(!result.mirror_x);

    let rotation_error = result.rotation().angle_to(&scene.pose.rotation);
    let translation_error = (result.translation() - scene.pose.translation).norm();
    println!("旋转误差 {:.2e} rad，平移误差 {:.2e} m", rotation_error, translation_error);
    assert!(rotation_error < 1e-3);
    assert!(translation_error < 1e-2);
    assert!(report.warnings.is_empty());
}

#[test]
fn test_noisy_labels_still_reproject_well() {
    let scene = scene(&SceneParams {
        pixel_noise: 0.5,
        seed: 3,
        ..SceneParams::default()
    });
    let mapper = TemporalMapper::new(30.0, 16.13, 0.0);
    let report = calibrate(
        &scene.radar_track,
        &scene.camera_track,
        &mapper,
        &scene.intrinsics,
        &CalibrationConfig::default(),
    )
    .unwrap();
    assert!(report.result.reprojection_error_px < 1.0);

    // 无论选中哪种等价的平面约定，投影结果都应与真值一致
    let p = scene.radar_track.get(40).and_then(|c| c.point()).unwrap();
    let expected = scene
        .pose
        .project(&scene.intrinsics, &CoordinateHypothesis::Identity.apply(p.x, p.y))
        .unwrap();
    let (u, v) = project_radar(&report.result, p.x, p.y).in_frame().unwrap();
    assert!((u - expected.x).abs() < 3.0 && (v - expected.y).abs() < 3.0);
}

#[test]
fn test_selection_is_deterministic() {
    let scene = scene(&SceneParams {
        pixel_noise: 1.0,
        outlier_ratio: 0.1,
        seed: 5,
        ..SceneParams::default()
    });
    let mapper = TemporalMapper::new(30.0, 16.13, 0.0);
    let config = CalibrationConfig::default();
    let run = || {
        calibrate(&scene.radar_track, &scene.camera_track, &mapper, &scene.intrinsics, &config)
            .unwrap()
            .result
    };
    let first = run();
    let second = run();
    assert_eq!(first, second);
}

#[test]
fn test_offset_sweep_finds_zero_offset() {
    let scene = scene(&SceneParams::default());
    let mapper = TemporalMapper::new(30.0, 16.13, 0.0);
    let config = CalibrationConfig {
        time_offsets: Some(OffsetSweep {
            start: -0.2,
            stop: 0.2,
            step: 0.1,
        }),
        ..CalibrationConfig::default()
    };
    let report = calibrate(&scene.radar_track, &scene.camera_track, &mapper, &scene.intrinsics, &config).unwrap();
    assert!(report.result.time_offset_s.abs() < 1e-9);
    assert_eq!(report.attempts.len(), 5 * 4);
}

#[test]
fn test_insufficient_pairs_is_reported() {
    let scene = scene(&SceneParams::default());
    let few = CameraTrack::from_observations(scene.camera_track.observations()[..3].to_vec());
    let mapper = TemporalMapper::new(30.0, 16.13, 0.0);
    match calibrate(&scene.radar_track, &few, &mapper, &scene.intrinsics, &CalibrationConfig::default()) {
        Err(CalibrationError::InsufficientPairs { found, required }) => {
            assert_eq!(found, 3);
            assert_eq!(required, 6);
        }
        other => panic!("unexpected {:?}", other.map(|r| r.result)),
    }
}

#[test]
fn test_out_of_range_frames_are_not_clamped() {
    let track_len = 100;
    let late = TemporalMapper::new(30.0, 16.13, -1.0);
    // 负偏移让前 30 帧落在雷达开始之前
    assert_eq!(late.lookup(0, track_len), RadarLookup::BeforeStart);
    assert_eq!(late.lookup(29, track_len), RadarLookup::BeforeStart);
    assert_eq!(late.lookup(30, track_len), RadarLookup::Index(0));

    let mapper = TemporalMapper::new(30.0, 16.13, 0.0);
    let last_video_frame = (0..)
        .take_while(|&f| matches!(mapper.lookup(f, track_len), RadarLookup::Index(_)))
        .last()
        .unwrap();
    assert_eq!(mapper.lookup(last_video_frame, track_len), RadarLookup::Index(track_len - 1));
    for f in last_video_frame + 1..last_video_frame + 100 {
        assert_eq!(mapper.lookup(f, track_len), RadarLookup::PastEnd);
    }
}

#[test]
fn test_mapper_is_monotonic() {
    for offset in [-0.7, 0.0, 0.35] {
        let mapper = TemporalMapper::new(30.0, 16.13, offset);
        let mut previous = f64::NEG_INFINITY;
        for f in 0..2000u64 {
            let position = mapper.radar_position(f);
            assert!(position >= previous);
            previous = position;
        }
    }
}

#[test]
fn test_batch_continues_after_failed_job() {
    let scene = scene(&SceneParams::default());
    let dir = tempfile::tempdir().unwrap();
    let radar_path = dir.path().join("radar.txt");
    let camera_path = dir.path().join("camera.txt");
    scene.radar_track.write(&radar_path).unwrap();
    scene.camera_track.write(&camera_path).unwrap();

    let jobs = vec![
        CalibrationJob {
            name: "missing".into(),
            radar_track: dir.path().join("nope.txt"),
            camera_track: camera_path.clone(),
            output: dir.path().join("missing.json"),
        },
        CalibrationJob {
            name: "scene".into(),
            radar_track: radar_path,
            camera_track: camera_path,
            output: dir.path().join("scene.json"),
        },
    ];
    let outcomes = calibrate_jobs(&jobs, &AppConfig::default());
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0].result, Err(CalibrationError::Align(_))));
    let report = outcomes[1].result.as_ref().unwrap();
    assert!(report.result.reprojection_error_px < 1.0);

    let saved = CalibrationResult::load(&dir.path().join("scene.json")).unwrap();
    assert_eq!(saved.hypothesis, report.result.hypothesis);
    assert!((saved.translation() - report.result.translation()).norm() < 1e-12);
    assert!(!dir.path().join("missing.json").exists());
}

#[test]
fn test_manual_tuning_scores_matched_pairs() {
    let scene = scene(&SceneParams::default());
    let mapper = TemporalMapper::new(30.0, 16.13, 0.0);
    let pairs = match_pairs(&scene.radar_track, &scene.camera_track, &mapper);
    assert!(pairs.len() >= 6);

    let start = ManualPose::default();
    let result = start.to_calibration(&scene.intrinsics, &pairs, 20.0).unwrap();
    assert_eq!(result.hypothesis, CoordinateHypothesis::DepthForward);

    let tweaked = [TuningEvent::PitchUp, TuningEvent::TzPlus, TuningEvent::ToggleMirror]
        .iter()
        .fold(start, |pose, &e| pose.apply(e));
    let result = tweaked.to_calibration(&scene.intrinsics, &pairs, 20.0).unwrap();
    assert_eq!(result.hypothesis, CoordinateHypothesis::MirrorX);
    assert!((result.translation().z - 0.6).abs() < 1e-12);
    assert!(result.mirror_x);
    assert!(result.plausible);
}

#[test]
fn test_collinear_track_is_unsolved() {
    let k = intrinsics();
    // 目标沿雷达视轴直线移动，四种约定下物体点都共线
    let pairs: Vec<MatchedPair> = (0..6)
        .map(|i| MatchedPair {
            video_frame: i as u64,
            radar_index: i,
            radar: Point2::new(0.0, 2.0 + i as f64),
            pixel: Point2::new(1600.0 + 13.0 * i as f64, 900.0 - 7.0 * (i * i) as f64),
        })
        .collect();
    match calibrate_pairs(&pairs, &k, &CalibrationConfig::default(), 0.0) {
        Err(CalibrationError::Unsolved(attempts)) => {
            assert_eq!(attempts.len(), 4);
            assert!(attempts.iter().all(|a| a.outcome.is_err()));
        }
        other => panic!("unexpected {:?}", other.map(|r| r.result)),
    }
}

#[test]
fn test_far_camera_is_flagged_implausible() {
    let k = intrinsics();
    let far = CameraPose::new(
        Rotation3::from_euler_angles(0.1, -0.05, 0.02),
        Vector3::new(0.1, -3.0, 30.0),
    );
    let pairs = exact_pairs(&far, &k, &SQUARE);

    let report = calibrate_pairs(&pairs, &k, &CalibrationConfig::default(), 0.0).unwrap();
    let depth = report.result.pose.translation.z;
    println!("深度 {:.2} m，警告 {:?}", depth, report.warnings);
    assert!((depth - 30.0).abs() < 0.5);
    assert!(report.result.reprojection_error_px < 1.0);
    assert!(!report.result.plausible);
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, CalibrationWarning::ImplausibleTranslation { limit_m, .. } if *limit_m == 20.0)));
}

#[test]
fn test_nearly_stationary_track_warns_low_activity() {
    let pose = true_pose();
    let k = intrinsics();
    // 目标只在 ±8 cm 内晃动
    let points = [
        (-0.08, 3.01),
        (-0.06, 2.93),
        (0.06, 2.93),
        (-0.04, 2.97),
        (0.07, 3.07),
        (0.05, 2.99),
        (-0.06, 3.07),
    ];
    let radar = RadarTrack::from_centroids(
        points
            .iter()
            .map(|&(x, y)| TargetCentroid::Valid(Point3::new(x, y, 0.0)))
            .collect(),
    );
    let camera = CameraTrack::from_observations(
        exact_pairs(&pose, &k, &points)
            .iter()
            .map(|p| PixelObservation {
                frame: p.video_frame,
                u: p.pixel.x,
                v: p.pixel.y,
            })
            .collect(),
    );
    let mapper = TemporalMapper::new(10.0, 10.0, 0.0);

    let report = calibrate(&radar, &camera, &mapper, &k, &CalibrationConfig::default()).unwrap();
    assert_eq!(report.pairs, points.len());
    assert!(report.result.plausible);
    match report.warnings.as_slice() {
        [CalibrationWarning::LowActivity {
            std_x_m,
            std_y_m,
            limit_m,
        }] => {
            assert!(*std_x_m < 0.1 && *std_y_m < 0.1);
            assert_eq!(*limit_m, 0.1);
        }
        other => panic!("expected a single low-activity warning, got {:?}", other),
    }
}
