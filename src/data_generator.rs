// src/data_generator.rs

//! 合成数据：原始雷达采集与雷达-相机标定场景，供测试与基准使用。

use crate::camera::{CameraIntrinsics, CameraPose};
use crate::capture::RawCapture;
use crate::config::{ExtractorConfig, RadarConfig};
use crate::hypothesis::CoordinateHypothesis;
use crate::target_processor::TargetCentroid;
use crate::timing::{RadarLookup, TemporalMapper};
use crate::track::{CameraTrack, PixelObservation, RadarTrack};
use nalgebra::Point3;
use num_complex::Complex64;
use rand::prelude::*;
use std::f64::consts::PI;

/// 合成采集中的单个点目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticTarget {
    /// 距离 (米)
    pub range: f64,
    /// 方位角 (弧度)，0 为正前方
    pub angle: f64,
    /// 每个复数采样的幅度
    pub amplitude: f64,
}

/// 生成一段模拟的原始 I/Q 采集。
///
/// 目标在快时间上表现为落在 `range / range_resolution` 处的单频信号，
/// 在虚拟阵列（TX 优先排列）上表现为线性相位，斜率使角度 FFT 的峰值
/// 正好映射回 `angle`。
///
/// # 参数
/// * `radar` - 雷达硬件参数，决定帧的形状。
/// * `extractor` - 提供视场，用于把角度换算为阵列相位。
/// * `frames` - 每帧的目标，`None` 表示空场景。
/// * `noise_std` - I/Q 上均匀噪声的幅度，为 0 时输出完全确定。
/// * `seed` - 噪声随机数种子。
///
/// # 返回值
/// 与真实采集文件格式一致的 [`RawCapture`]。
pub fn synthetic_capture(
    radar: &RadarConfig,
    extractor: &ExtractorConfig,
    frames: &[Option<SyntheticTarget>],
    noise_std: f64,
    seed: u64,
) -> RawCapture {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_samples = radar.num_adc_samples;
    let mut samples = Vec::with_capacity(frames.len() * radar.frame_size() * 2);

    for target in frames {
        for chirp in 0..radar.num_chirps_per_frame {
            let tx = chirp % radar.num_tx_antennas;
            for rx in 0..radar.num_rx_antennas {
                let element = (tx * radar.num_rx_antennas + rx) as f64;
                for n in 0..n_samples {
                    let mut value = Complex64::new(0.0, 0.0);
                    if let Some(t) = target {
                        let range_bin = t.range / radar.range_resolution;
                        let spatial = t.angle / extractor.field_of_view;
                        let phase = 2.0 * PI * (range_bin * n as f64 / n_samples as f64 + spatial * element);
                        value += Complex64::from_polar(t.amplitude, phase);
                    }
                    if noise_std > 0.0 {
                        value.re += rng.gen_range(-noise_std..noise_std);
                        value.im += rng.gen_range(-noise_std..noise_std);
                    }
                    samples.push(quantize(value.re));
                    samples.push(quantize(value.im));
                }
            }
        }
    }
    RawCapture::from_samples(samples)
}

fn quantize(v: f64) -> i16 {
    v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// 已知真值的标定场景
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub radar_track: RadarTrack,
    pub camera_track: CameraTrack,
    pub pose: CameraPose,
    pub intrinsics: CameraIntrinsics,
    pub hypothesis: CoordinateHypothesis,
}

/// 标定场景的生成参数
#[derive(Debug, Clone)]
pub struct SceneParams {
    pub num_radar_frames: usize,
    /// 每隔多少个视频帧标注一次
    pub label_every: u64,
    /// 像素坐标上的均匀噪声幅度
    pub pixel_noise: f64,
    /// 被替换成随机像素的标注比例
    pub outlier_ratio: f64,
    /// 在雷达轨迹中混入的无效帧比例
    pub dropout_ratio: f64,
    pub seed: u64,
}

impl Default for SceneParams {
    fn default() -> Self {
        Self {
            num_radar_frames: 160,
            label_every: 15,
            pixel_noise: 0.0,
            outlier_ratio: 0.0,
            dropout_ratio: 0.0,
            seed: 42,
        }
    }
}

/// 生成一个人在雷达前方绕圈行走的场景，并用已知位姿投影出相机标注。
///
/// 雷达轨迹是 `(x, y)` 平面上的椭圆加随机抖动；对每个被标注的视频帧，
/// 用 `mapper` 找到对应雷达帧，经 `hypothesis` 转为物体坐标后按
/// `pose` 和 `intrinsics` 投影。落在画面外或相机后方的点不会被标注。
///
/// # 参数
/// * `pose` - 真值外参。
/// * `intrinsics` - 相机内参。
/// * `hypothesis` - 生成时使用的坐标约定。
/// * `mapper` - 视频帧到雷达帧的映射。
/// * `params` - 噪声、外点与采样间隔。
///
/// # 返回值
/// 包含两条轨迹与真值的 [`SyntheticScene`]。
pub fn synthetic_scene(
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
    hypothesis: CoordinateHypothesis,
    mapper: &TemporalMapper,
    params: &SceneParams,
) -> SyntheticScene {
    let mut rng = StdRng::seed_from_u64(params.seed);

    let centroids: Vec<TargetCentroid> = (0..params.num_radar_frames)
        .map(|i| {
            if params.dropout_ratio > 0.0 && rng.gen_bool(params.dropout_ratio.min(1.0)) {
                return TargetCentroid::Invalid;
            }
            let phase = 2.0 * PI * i as f64 / params.num_radar_frames as f64;
            let x = 1.2 * phase.sin() + rng.gen_range(-0.05..0.05);
            let y = 3.0 + 0.8 * phase.cos() + rng.gen_range(-0.05..0.05);
            TargetCentroid::Valid(Point3::new(x, y, 0.0))
        })
        .collect();
    let radar_track = RadarTrack::from_centroids(centroids);

    let mut observations = Vec::new();
    let mut frame = 0u64;
    loop {
        let index = match mapper.lookup(frame, radar_track.len()) {
            RadarLookup::Index(i) => i,
            RadarLookup::BeforeStart => {
                frame += params.label_every.max(1);
                continue;
            }
            RadarLookup::PastEnd => break,
        };
        if let Some(p) = radar_track.get(index).and_then(|c| c.point()) {
            let object = hypothesis.apply(p.x, p.y);
            if let Some(pixel) = pose.project(intrinsics, &object) {
                if intrinsics.contains(pixel.x, pixel.y) {
                    let (u, v) = if params.outlier_ratio > 0.0 && rng.gen_bool(params.outlier_ratio.min(1.0)) {
                        (
                            rng.gen_range(0.0..intrinsics.width_px as f64),
                            rng.gen_range(0.0..intrinsics.height_px as f64),
                        )
                    } else if params.pixel_noise > 0.0 {
                        (
                            pixel.x + rng.gen_range(-params.pixel_noise..params.pixel_noise),
                            pixel.y + rng.gen_range(-params.pixel_noise..params.pixel_noise),
                        )
                    } else {
                        (pixel.x, pixel.y)
                    };
                    observations.push(PixelObservation { frame, u, v });
                }
            }
        }
        frame += params.label_every.max(1);
    }

    SyntheticScene {
        radar_track,
        camera_track: CameraTrack::from_observations(observations),
        pose: pose.clone(),
        intrinsics: intrinsics.clone(),
        hypothesis,
    }
}
