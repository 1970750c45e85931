// src/timing.rs

use crate::config::{RadarConfig, TimingConfig};

/// 浮点表示误差保护：`2.9999999999` 这类值应落在 3 而不是 2
const FLOOR_GUARD: f64 = 1e-9;

/// 视频帧号查询雷达帧的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadarLookup {
    Index(usize),
    /// 对应时刻早于雷达采集开始
    BeforeStart,
    /// 对应时刻晚于雷达轨迹末尾
    PastEnd,
}

/// 视频帧到雷达帧的时间映射，无状态且单调
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalMapper {
    video_fps: f64,
    radar_fps: f64,
    time_offset: f64,
}

impl TemporalMapper {
    pub fn new(video_fps: f64, radar_fps: f64, time_offset: f64) -> Self {
        Self {
            video_fps,
            radar_fps,
            time_offset,
        }
    }

    pub fn from_config(timing: &TimingConfig, radar: &RadarConfig) -> Self {
        Self::new(timing.video_fps, radar.fps, timing.time_offset_s)
    }

    /// 同样的帧率，换一个时间偏移
    pub fn with_offset(&self, time_offset: f64) -> Self {
        Self {
            time_offset,
            ..*self
        }
    }

    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    /// 视频帧对应的雷达时间 (秒)
    pub fn radar_time(&self, video_frame: u64) -> f64 {
        video_frame as f64 / self.video_fps + self.time_offset
    }

    /// 视频帧对应的雷达帧位置（连续值）
    pub fn radar_position(&self, video_frame: u64) -> f64 {
        self.radar_time(video_frame) * self.radar_fps
    }

    /// 把视频帧号映射到雷达轨迹下标。
    ///
    /// 负位置一律为 `BeforeStart`（即使截断后为 0），越过轨迹末尾为 `PastEnd`，
    /// 两者都不会被夹到边界下标上。
    ///
    /// # 参数
    /// * `video_frame` - 视频帧号。
    /// * `track_len` - 雷达轨迹长度。
    ///
    /// # 返回值
    /// 对应的 [`RadarLookup`]。
    pub fn lookup(&self, video_frame: u64, track_len: usize) -> RadarLookup {
        let position = self.radar_position(video_frame);
        if position.is_nan() || position < 0.0 {
            return RadarLookup::BeforeStart;
        }
        let index = (position + FLOOR_GUARD).floor();
        if index >= track_len as f64 {
            RadarLookup::PastEnd
        } else {
            RadarLookup::Index(index as usize)
        }
    }
}
