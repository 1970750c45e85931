// benches/benchmark.rs
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::{Rotation3, Vector3};
use radar_align::config::{CalibrationConfig, CameraConfig, ExtractorConfig, RadarConfig};
use radar_align::data_generator::{synthetic_capture, synthetic_scene, SceneParams, SyntheticTarget};
use radar_align::{calibrate, demodulate, CameraIntrinsics, CameraPose, CoordinateHypothesis, TargetExtractor, TemporalMapper};

/// 测量逐帧目标提取的耗时。
fn bench_extract_track(c: &mut Criterion) {
    let radar = RadarConfig {
        num_adc_samples: 128,
        num_chirps_per_frame: 48,
        ..RadarConfig::default()
    };
    let extractor = ExtractorConfig::default();
    // 20 帧，目标沿弧线移动
    let frames: Vec<Option<SyntheticTarget>> = (0..20)
        .map(|i| {
            Some(SyntheticTarget {
                range: 1.0 + 0.05 * i as f64,
                angle: -0.5 + 0.05 * i as f64,
                amplitude: 300.0,
            })
        })
        .collect();
    let raw = synthetic_capture(&radar, &extractor, &frames, 3.0, 17);
    let cube = demodulate(&raw, &radar).expect("synthetic capture matches config");
    let processor = TargetExtractor::new(radar, extractor).expect("default extractor config is valid");

    c.bench_function("extract_track_20_frames", |b| {
        b.iter(|| {
            let track = processor.extract_track(black_box(&cube));
            black_box(track);
        });
    });
}

/// 测量单一时间偏移下四种坐标约定的完整标定搜索。
fn bench_calibrate(c: &mut Criterion) {
    let intrinsics = CameraIntrinsics::from_config(&CameraConfig::default());
    let pose = CameraPose::new(
        Rotation3::from_euler_angles(0.1, -0.05, 0.02),
        Vector3::new(0.1, -3.0, 4.0),
    );
    let mapper = TemporalMapper::new(30.0, 16.13, 0.0);
    let params = SceneParams {
        label_every: 5,
        pixel_noise: 1.0,
        outlier_ratio: 0.1,
        ..SceneParams::default()
    };
    let scene = synthetic_scene(&pose, &intrinsics, CoordinateHypothesis::Identity, &mapper, &params);
    let config = CalibrationConfig::default();

    c.bench_function("calibrate_single_offset", |b| {
        b.iter(|| {
            let report = calibrate(
                black_box(&scene.radar_track),
                black_box(&scene.camera_track),
                &mapper,
                &intrinsics,
                &config,
            );
            black_box(report.is_ok());
        });
    });
}

criterion_group!(benches, bench_extract_track, bench_calibrate);
criterion_main!(benches);
