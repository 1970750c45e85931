// src/target_processor.rs

use crate::capture::FrameCube;
use crate::cluster::{dbscan, largest_cluster};
use crate::config::{ExtractorConfig, RadarConfig};
use crate::error::AlignResult;
use crate::spectrum::{ClutterFilter, RangeAngleMap, SpectrumProcessor};
use crate::track::RadarTrack;
use nalgebra::{Point2, Point3};
use rayon::prelude::*;
use tracing::{debug, info};

// --- 数据结构 ---
/// 单帧提取结果：目标质心，或明确的"无目标"标记
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetCentroid {
    Valid(Point3<f64>),
    Invalid,
}

impl TargetCentroid {
    pub fn point(&self) -> Option<Point3<f64>> {
        match self {
            TargetCentroid::Valid(p) => Some(*p),
            TargetCentroid::Invalid => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, TargetCentroid::Valid(_))
    }

    /// 文本行表示，无效帧三列全为 NaN
    pub fn to_row(&self) -> [f64; 3] {
        match self {
            TargetCentroid::Valid(p) => [p.x, p.y, p.z],
            TargetCentroid::Invalid => [f64::NAN; 3],
        }
    }

    /// 任一分量为 NaN 即视为无效帧
    pub fn from_row(row: [f64; 3]) -> Self {
        if row.iter().any(|v| v.is_nan()) {
            TargetCentroid::Invalid
        } else {
            TargetCentroid::Valid(Point3::new(row[0], row[1], row[2]))
        }
    }
}

/// 线性插值的百分位数（与 numpy 默认行为一致）。
///
/// # 参数
/// * `values` - 样本，不要求有序；NaN 不参与统计。
/// * `p` - 百分位，范围 `[0, 100]`。
///
/// # 返回值
/// 对应的百分位值；没有样本时为 `None`。
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// 角度 bin 线性映射到 `[-fov/2, fov/2)`，中间 bin 为 0 弧度
pub fn angle_of_bin(angle_bin: usize, num_angle_bins: usize, field_of_view: f64) -> f64 {
    let half = (num_angle_bins / 2) as f64;
    (angle_bin as f64 - half) / num_angle_bins as f64 * field_of_view
}

/// 用自适应阈值从角度-距离图中挑出候选点，并转换到雷达笛卡尔坐标。
///
/// 阈值取幅度分布的高百分位（CFAR 的简化替代），严格大于阈值的单元被保留，
/// 然后按 `[min_range, max_range]` 滤除近场耦合与远场噪声。
///
/// # 参数
/// * `map` - 单帧角度-距离图。
/// * `radar` - 提供距离分辨率。
/// * `config` - 百分位、视场与距离门限。
///
/// # 返回值
/// 通过阈值与距离门限的 `(x, y)` 点。
pub fn detect_points(
    map: &RangeAngleMap,
    radar: &RadarConfig,
    config: &ExtractorConfig,
) -> Vec<Point2<f64>> {
    let Some(threshold) = percentile(map.values(), config.percentile) else {
        return Vec::new();
    };
    map.cells()
        .filter(|&(_, _, v)| v > threshold)
        .filter_map(|(r_idx, a_idx, _)| {
            let r = r_idx as f64 * radar.range_resolution;
            if r < config.min_range || r > config.max_range {
                return None;
            }
            let angle = angle_of_bin(a_idx, map.num_angle_bins(), config.field_of_view);
            Some(Point2::new(r * angle.sin(), r * angle.cos()))
        })
        .collect()
}

/// 对候选点聚类，取成员最多的簇的质心（z 固定为 0，平面假设）
pub fn centroid_of_largest_cluster(points: &[Point2<f64>], config: &ExtractorConfig) -> TargetCentroid {
    if points.is_empty() {
        return TargetCentroid::Invalid;
    }
    let labels = dbscan(points, config.cluster_eps, config.cluster_min_samples);
    let Some(dominant) = largest_cluster(&labels) else {
        return TargetCentroid::Invalid;
    };
    let members: Vec<&Point2<f64>> = points
        .iter()
        .zip(&labels)
        .filter(|(_, &l)| l == dominant)
        .map(|(p, _)| p)
        .collect();
    let n = members.len() as f64;
    let sum = members
        .iter()
        .fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords);
    TargetCentroid::Valid(Point3::new(sum.x / n, sum.y / n, 0.0))
}

/// 逐帧目标提取器
#[derive(Debug, Clone)]
pub struct TargetExtractor {
    radar: RadarConfig,
    config: ExtractorConfig,
}

impl TargetExtractor {
    /// 检查雷达维度与提取参数，Angle-FFT 短于虚拟阵列时返回配置错误
    pub fn new(radar: RadarConfig, config: ExtractorConfig) -> AlignResult<Self> {
        radar.validate()?;
        config.validate(&radar)?;
        Ok(Self { radar, config })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// 从单帧角度-距离图中提取目标质心
    pub fn extract_from_map(&self, map: &RangeAngleMap) -> TargetCentroid {
        let points = detect_points(map, &self.radar, &self.config);
        centroid_of_largest_cluster(&points, &self.config)
    }

    /// 处理整个数据立方体，按帧序输出雷达轨迹。
    ///
    /// 各帧之间只通过杂波基线产生联系，基线在逐帧处理之前计算完毕，
    /// 因此帧级别并行不影响结果。
    ///
    /// # 参数
    /// * `cube` - 解调后的数据立方体。
    ///
    /// # 返回值
    /// 每帧一个质心（或无效标记）的 [`RadarTrack`]。
    pub fn extract_track(&self, cube: &FrameCube) -> RadarTrack {
        let mut template = SpectrumProcessor::new(cube, &self.config);
        let clutter = ClutterFilter::new(cube, self.config.clutter, template.range_fft_mut());

        let centroids: Vec<TargetCentroid> = (0..cube.num_frames())
            .into_par_iter()
            .map_init(
                || template.clone(),
                |processor, frame| {
                    let spectra = processor.range_spectra(cube, frame, &clutter);
                    let map = processor.range_angle_map(cube, &spectra);
                    let centroid = self.extract_from_map(&map);
                    if !centroid.is_valid() {
                        debug!(frame, "no target cluster");
                    }
                    centroid
                },
            )
            .collect();

        let track = RadarTrack::from_centroids(centroids);
        info!(
            frames = track.len(),
            valid = track.valid_count(),
            "radar track extracted"
        );
        track
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::SpectrumProcessor;
    use crate::capture::{demodulate, RawCapture};
    use crate::data_generator::{synthetic_capture, SyntheticTarget};

    fn radar() -> RadarConfig {
        RadarConfig {
            num_adc_samples: 128,
            num_chirps_per_frame: 24,
            num_rx_antennas: 4,
            num_tx_antennas: 3,
            ..RadarConfig::default()
        }
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 100.0), Some(5.0));
        assert!((percentile(&values, 62.5).unwrap() - 3.5).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_angle_mapping_centre_is_boresight() {
        assert_eq!(angle_of_bin(32, 64, std::f64::consts::PI), 0.0);
        let left = angle_of_bin(0, 64, std::f64::consts::PI);
        assert!((left + std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_row_round_trip_keeps_invalid() {
        assert_eq!(TargetCentroid::from_row(TargetCentroid::Invalid.to_row()), TargetCentroid::Invalid);
        let valid = TargetCentroid::Valid(Point3::new(0.5, 2.0, 0.0));
        assert_eq!(TargetCentroid::from_row(valid.to_row()), valid);
    }

    #[test]
    fn test_single_target_is_located() {
        let radar = radar();
        let config = ExtractorConfig::default();
        let target = SyntheticTarget {
            range: 2.0,
            angle: 0.4,
            amplitude: 300.0,
        };
        let raw = synthetic_capture(&radar, &config, &[Some(target)], 2.0, 11);
        let cube = demodulate(&raw, &radar).unwrap();
        let track = TargetExtractor::new(radar, config).unwrap().extract_track(&cube);
        let p = track.get(0).and_then(|c| c.point()).expect("target should be found");
        let (ex, ey) = (2.0 * 0.4f64.sin(), 2.0 * 0.4f64.cos());
        assert!((p.x - ex).abs() < 0.3, "x = {}", p.x);
        assert!((p.y - ey).abs() < 0.3, "y = {}", p.y);
        assert_eq!(p.z, 0.0);
    }

    #[test]
    fn test_raising_percentile_never_adds_points() {
        let radar = radar();
        let base = ExtractorConfig::default();
        let target = SyntheticTarget {
            range: 1.5,
            angle: -0.3,
            amplitude: 200.0,
        };
        let raw = synthetic_capture(&radar, &base, &[Some(target)], 5.0, 21);
        let cube = demodulate(&raw, &radar).unwrap();
        let mut processor = SpectrumProcessor::new(&cube, &base);
        let clutter = ClutterFilter::new(&cube, base.clutter, processor.range_fft_mut());
        let spectra = processor.range_spectra(&cube, 0, &clutter);
        let map = processor.range_angle_map(&cube, &spectra);

        let mut previous = usize::MAX;
        for p in [90.0, 95.0, 98.0, 99.0, 99.5, 99.9, 100.0] {
            let config = ExtractorConfig {
                percentile: p,
                ..base.clone()
            };
            let count = detect_points(&map, &radar, &config).len();
            assert!(count <= previous, "percentile {} produced {} > {}", p, count, previous);
            previous = count;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_short_angle_fft_is_rejected() {
        let config = ExtractorConfig {
            angle_fft_size: 8,
            ..ExtractorConfig::default()
        };
        // 3 TX × 4 RX = 12 个虚拟通道
        assert!(matches!(
            TargetExtractor::new(radar(), config),
            Err(crate::error::AlignError::Config(_))
        ));
        let exact = ExtractorConfig {
            angle_fft_size: 12,
            ..ExtractorConfig::default()
        };
        assert!(TargetExtractor::new(radar(), exact).is_ok());
    }

    #[test]
    fn test_empty_scene_is_invalid() {
        let radar = radar();
        let raw = RawCapture::from_samples(vec![0; radar.frame_size() * 2 * 2]);
        let cube = demodulate(&raw, &radar).unwrap();
        let track = TargetExtractor::new(radar, ExtractorConfig::default()).unwrap().extract_track(&cube);
        assert_eq!(track.len(), 2);
        assert_eq!(track.valid_count(), 0);
    }
}
