// src/config.rs

//! 显式、不可变的配置值。
//!
//! 每个组件在构造时接收自己的配置段，不存在进程级的全局配置。
//! 所有字段都有默认值，对应参考采集环境（IWR6843 + DCA1000，3TX/4RX，
//! 海康 3200×1800 相机）。

use crate::error::{AlignError, AlignResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 雷达硬件参数，必须与采集设置完全一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    pub num_adc_samples: usize,
    /// 每帧 chirp 总数（loops × TX）
    pub num_chirps_per_frame: usize,
    pub num_rx_antennas: usize,
    pub num_tx_antennas: usize,
    /// 雷达帧率 (Hz)
    pub fps: f64,
    /// 距离分辨率 (米/bin)
    pub range_resolution: f64,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            num_adc_samples: 256,
            num_chirps_per_frame: 384,
            num_rx_antennas: 4,
            num_tx_antennas: 3,
            fps: 16.13,
            range_resolution: 0.044,
        }
    }
}

impl RadarConfig {
    /// 单帧复数采样点数：samples × chirps × rx
    pub fn frame_size(&self) -> usize {
        self.num_adc_samples * self.num_chirps_per_frame * self.num_rx_antennas
    }

    pub fn num_virtual_antennas(&self) -> usize {
        self.num_tx_antennas * self.num_rx_antennas
    }

    // chirp 维能否整齐拆分为 (loop, tx) 由解调器检查，这里只检查数值本身
    pub(crate) fn validate(&self) -> AlignResult<()> {
        if self.num_adc_samples == 0
            || self.num_chirps_per_frame == 0
            || self.num_rx_antennas == 0
            || self.num_tx_antennas == 0
        {
            return Err(AlignError::Config(
                "radar dimensions must all be non-zero".into(),
            ));
        }
        if !(self.fps > 0.0) {
            return Err(AlignError::Config(format!(
                "radar fps must be positive, got {}",
                self.fps
            )));
        }
        if !(self.range_resolution > 0.0) {
            return Err(AlignError::Config(format!(
                "range resolution must be positive, got {}",
                self.range_resolution
            )));
        }
        Ok(())
    }
}

/// 静态杂波去除方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClutterRemoval {
    /// 不去除
    Disabled,
    /// 减去全部帧的均值（非因果）
    GlobalMean,
    /// 减去截至当前帧的最近 `window` 帧均值（因果）
    Rolling { window: usize },
}

impl Default for ClutterRemoval {
    fn default() -> Self {
        ClutterRemoval::Disabled
    }
}

/// 目标提取参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// 自适应阈值的百分位数
    pub percentile: f64,
    /// 角度 FFT 补零长度
    pub angle_fft_size: usize,
    /// 角度 bin 线性映射覆盖的视场 (弧度)
    pub field_of_view: f64,
    pub min_range: f64,
    pub max_range: f64,
    /// DBSCAN 邻域半径 (米)
    pub cluster_eps: f64,
    /// DBSCAN 核心点最少邻居数（包含自身）
    pub cluster_min_samples: usize,
    pub clutter: ClutterRemoval,
    /// dB 换算时加在幅度上的下限
    pub db_floor: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            percentile: 99.5,
            angle_fft_size: 64,
            field_of_view: std::f64::consts::PI,
            min_range: 0.5,
            max_range: 5.0,
            cluster_eps: 0.5,
            cluster_min_samples: 3,
            clutter: ClutterRemoval::Disabled,
            db_floor: 1e-9,
        }
    }
}

impl ExtractorConfig {
    pub(crate) fn validate(&self, radar: &RadarConfig) -> AlignResult<()> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(AlignError::Config(format!(
                "percentile must lie in [0, 100], got {}",
                self.percentile
            )));
        }
        if self.angle_fft_size < radar.num_virtual_antennas() {
            return Err(AlignError::Config(format!(
                "angle FFT size {} is smaller than the virtual array ({} antennas)",
                self.angle_fft_size,
                radar.num_virtual_antennas()
            )));
        }
        if !(self.min_range < self.max_range) {
            return Err(AlignError::Config(format!(
                "range gate [{}, {}] is empty",
                self.min_range, self.max_range
            )));
        }
        if !(self.cluster_eps > 0.0) || self.cluster_min_samples == 0 {
            return Err(AlignError::Config(
                "cluster eps and min_samples must be positive".into(),
            ));
        }
        if let ClutterRemoval::Rolling { window: 0 } = self.clutter {
            return Err(AlignError::Config("rolling clutter window must be > 0".into()));
        }
        Ok(())
    }
}

/// 静态杂波中心剔除参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    pub histogram_bins: usize,
    /// 距离静止中心小于该半径的点被视为墙体反射 (米)
    pub radius: f64,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            histogram_bins: 50,
            radius: 0.3,
        }
    }
}

/// 相机传感器参数，用于推导内参
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width_px: u32,
    pub height_px: u32,
    pub focal_length_mm: f64,
    pub sensor_width_mm: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width_px: 3200,
            height_px: 1800,
            focal_length_mm: 4.0,
            sensor_width_mm: 5.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub video_fps: f64,
    /// 雷达时间相对视频时间的偏移 (秒)，可为负
    pub time_offset_s: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            video_fps: 30.0,
            time_offset_s: 0.0,
        }
    }
}

/// 时间偏移扫描区间 `[start, stop]`，步长 `step`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetSweep {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl OffsetSweep {
    pub fn single(offset: f64) -> Self {
        Self {
            start: offset,
            stop: offset,
            step: 1.0,
        }
    }

    /// 按升序展开的全部偏移量
    pub fn offsets(&self) -> Vec<f64> {
        if !(self.step > 0.0) || self.stop < self.start {
            return vec![self.start];
        }
        let count = ((self.stop - self.start) / self.step + 1e-9).floor() as usize + 1;
        (0..count)
            .map(|i| self.start + i as f64 * self.step)
            .collect()
    }
}

/// 标定搜索参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// 位姿求解所需的最少匹配点数
    pub min_pairs: usize,
    pub ransac_iterations: usize,
    /// RANSAC 内点重投影阈值 (像素)
    pub reprojection_threshold_px: f64,
    pub min_inliers: usize,
    pub seed: u64,
    /// LM 精化的最大迭代次数
    pub refine_iterations: usize,
    /// 误差差值不超过该值时视为并列，先列出的假设胜出
    pub tie_tolerance_px: f64,
    /// 平移深度分量的合理上限 (米)
    pub max_depth_m: f64,
    /// 雷达轨迹活跃度下限（各轴标准差，米）
    pub min_activity_m: f64,
    /// `None` 时只使用 [`TimingConfig::time_offset_s`]
    pub time_offsets: Option<OffsetSweep>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_pairs: 6,
            ransac_iterations: 200,
            reprojection_threshold_px: 15.0,
            min_inliers: 4,
            seed: 1_234_567,
            refine_iterations: 50,
            tie_tolerance_px: 1e-6,
            max_depth_m: 20.0,
            min_activity_m: 0.1,
            time_offsets: None,
        }
    }
}

impl CalibrationConfig {
    fn validate(&self) -> AlignResult<()> {
        if self.min_pairs < 6 {
            return Err(AlignError::Config(format!(
                "at least 6 matched pairs are needed for a stable pose, got min_pairs = {}",
                self.min_pairs
            )));
        }
        if self.ransac_iterations == 0 || !(self.reprojection_threshold_px > 0.0) {
            return Err(AlignError::Config(
                "ransac iterations and threshold must be positive".into(),
            ));
        }
        if let Some(sweep) = &self.time_offsets {
            if !(sweep.step > 0.0) || sweep.stop < sweep.start {
                return Err(AlignError::Config(format!(
                    "invalid time offset sweep {:?}",
                    sweep
                )));
            }
        }
        Ok(())
    }
}

/// 完整配置文档
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub radar: RadarConfig,
    pub extractor: ExtractorConfig,
    pub clean: CleanConfig,
    pub camera: CameraConfig,
    pub timing: TimingConfig,
    pub calibration: CalibrationConfig,
}

impl AppConfig {
    /// 从 JSON 文件读取并校验配置。
    ///
    /// # 参数
    /// * `path` - JSON 配置文件路径，缺失的字段取默认值。
    ///
    /// # 返回值
    /// 校验通过的 `AppConfig`，或描述第一个非法字段的 `AlignError`。
    pub fn load(path: &Path) -> AlignResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| AlignError::io(path, e))?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AlignResult<()> {
        self.radar.validate()?;
        self.extractor.validate(&self.radar)?;
        if self.camera.width_px == 0
            || self.camera.height_px == 0
            || !(self.camera.focal_length_mm > 0.0)
            || !(self.camera.sensor_width_mm > 0.0)
        {
            return Err(AlignError::Config(
                "camera dimensions must be positive".into(),
            ));
        }
        if !(self.timing.video_fps > 0.0) {
            return Err(AlignError::Config(format!(
                "video fps must be positive, got {}",
                self.timing.video_fps
            )));
        }
        self.calibration.validate()
    }
}
