// src/capture.rs

//! 原始 ADC 数据读取与解调。
//!
//! DCA1000 保存的文件是无文件头的小端 `i16` 序列，I/Q 交替排列。
//! 帧边界完全由硬件参数推出，参数与采集设置不一致时结果没有意义，
//! 因此任何无法整齐切分的情况都会以 [`AlignError::ShapeMismatch`] 报出。

use crate::config::RadarConfig;
use crate::error::{AlignError, AlignResult};
use num_complex::{Complex32, Complex64};
use std::fs;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

/// 一次采集的原始 `i16` 数据，加载后不可变
#[derive(Debug, Clone)]
pub struct RawCapture {
    samples: Vec<i16>,
}

impl RawCapture {
    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// 读取无文件头的小端 `i16` 二进制文件。
    ///
    /// # 参数
    /// * `path` - 采集文件路径。
    ///
    /// # 返回值
    /// 原始采样数据；字节数为奇数时返回 `ShapeMismatch`。
    pub fn from_file(path: &Path) -> AlignResult<Self> {
        let bytes = fs::read(path).map_err(|e| AlignError::io(path, e))?;
        if bytes.len() % 2 != 0 {
            return Err(AlignError::ShapeMismatch(format!(
                "{} holds {} bytes, not a whole number of i16 samples",
                path.display(),
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

/// 按 `[frame, chirp, rx, sample]` 行优先存放的复数数据立方体。
///
/// chirp 维可以再拆成 `(loop, tx)`：`chirp = loop * num_tx + tx`（TDM-MIMO）。
#[derive(Debug, Clone)]
pub struct FrameCube {
    data: Vec<Complex32>,
    num_frames: usize,
    num_chirps: usize,
    num_tx: usize,
    num_rx: usize,
    num_samples: usize,
}

impl FrameCube {
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn num_chirps(&self) -> usize {
        self.num_chirps
    }

    pub fn num_loops(&self) -> usize {
        self.num_chirps / self.num_tx
    }

    pub fn num_tx(&self) -> usize {
        self.num_tx
    }

    pub fn num_rx(&self) -> usize {
        self.num_rx
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// `[frames, chirps, rx, samples]`
    pub fn shape(&self) -> [usize; 4] {
        [self.num_frames, self.num_chirps, self.num_rx, self.num_samples]
    }

    fn frame_len(&self) -> usize {
        self.num_chirps * self.num_rx * self.num_samples
    }

    /// 所有复数采样点（已截断为整帧）
    pub fn as_slice(&self) -> &[Complex32] {
        &self.data
    }

    pub fn frame(&self, frame: usize) -> &[Complex32] {
        let len = self.frame_len();
        &self.data[frame * len..(frame + 1) * len]
    }

    pub fn sample(&self, frame: usize, chirp: usize, rx: usize, n: usize) -> Complex32 {
        let idx = ((frame * self.num_chirps + chirp) * self.num_rx + rx) * self.num_samples + n;
        self.data[idx]
    }

    /// 某一帧中 `(loop, tx, rx)` 对应的快时间序列
    pub fn chirp(&self, frame: usize, loop_idx: usize, tx: usize, rx: usize) -> &[Complex32] {
        let chirp = loop_idx * self.num_tx + tx;
        let start = ((frame * self.num_chirps + chirp) * self.num_rx + rx) * self.num_samples;
        &self.data[start..start + self.num_samples]
    }

    /// 对 `frames` 范围内的帧逐元素求平均，布局与单帧相同
    pub fn mean_frame(&self, frames: Range<usize>) -> Vec<Complex64> {
        let len = self.frame_len();
        let mut acc = vec![Complex64::new(0.0, 0.0); len];
        let count = frames.len();
        if count == 0 {
            return acc;
        }
        for f in frames {
            for (a, s) in acc.iter_mut().zip(self.frame(f)) {
                *a += Complex64::new(s.re as f64, s.im as f64);
            }
        }
        let scale = 1.0 / count as f64;
        for a in acc.iter_mut() {
            *a *= scale;
        }
        acc
    }
}

/// 将原始 I/Q 交替数据解调为 [`FrameCube`]。
///
/// 相邻两个 `i16` 组成一个复数（第一个为实部、第二个为虚部），
/// 按 `samples × chirps × rx` 计算单帧大小，丢弃末尾不完整的帧后重塑。
///
/// # 参数
/// * `raw` - 原始采集数据。
/// * `radar` - 雷达硬件参数。
///
/// # 返回值
/// 解调后的数据立方体。参数无法切分数据时返回 `ShapeMismatch`，
/// 不足一帧时返回 `EmptyCapture`。
pub fn demodulate(raw: &RawCapture, radar: &RadarConfig) -> AlignResult<FrameCube> {
    let dims = [
        radar.num_adc_samples,
        radar.num_chirps_per_frame,
        radar.num_rx_antennas,
        radar.num_tx_antennas,
    ];
    if dims.contains(&0) {
        return Err(AlignError::ShapeMismatch(format!(
            "radar dimensions must be non-zero: samples={}, chirps={}, rx={}, tx={}",
            dims[0], dims[1], dims[2], dims[3]
        )));
    }
    if radar.num_chirps_per_frame % radar.num_tx_antennas != 0 {
        return Err(AlignError::ShapeMismatch(format!(
            "{} chirps per frame cannot be split into loops of {} TX antennas",
            radar.num_chirps_per_frame, radar.num_tx_antennas
        )));
    }
    if raw.len() % 2 != 0 {
        return Err(AlignError::ShapeMismatch(format!(
            "{} i16 values do not form whole I/Q pairs",
            raw.len()
        )));
    }

    let complex_samples = raw.len() / 2;
    let frame_size = radar.frame_size();
    let num_frames = complex_samples / frame_size;
    if num_frames == 0 {
        return Err(AlignError::EmptyCapture {
            complex_samples,
            frame_size,
        });
    }

    let kept = num_frames * frame_size;
    if kept < complex_samples {
        debug!(
            dropped = complex_samples - kept,
            "truncating trailing partial frame"
        );
    }

    let data: Vec<Complex32> = raw.samples()[..kept * 2]
        .chunks_exact(2)
        .map(|iq| Complex32::new(iq[0] as f32, iq[1] as f32))
        .collect();

    info!(
        frames = num_frames,
        seconds = num_frames as f64 / radar.fps,
        "demodulated capture"
    );

    Ok(FrameCube {
        data,
        num_frames,
        num_chirps: radar.num_chirps_per_frame,
        num_tx: radar.num_tx_antennas,
        num_rx: radar.num_rx_antennas,
        num_samples: radar.num_adc_samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_radar() -> RadarConfig {
        RadarConfig {
            num_adc_samples: 4,
            num_chirps_per_frame: 6,
            num_rx_antennas: 2,
            num_tx_antennas: 3,
            ..RadarConfig::default()
        }
    }

    #[test]
    fn shape_invariant_holds_after_truncation() {
        let radar = small_radar();
        let frame_size = radar.frame_size();
        // 3 整帧加 5 个多余的复数点
        let total = (3 * frame_size + 5) * 2;
        let raw = RawCapture::from_samples((0..total).map(|v| (v % 1000) as i16).collect());
        let cube = demodulate(&raw, &radar).unwrap();
        let [f, c, r, s] = cube.shape();
        assert_eq!(f, 3);
        assert_eq!(f * c * r * s, cube.as_slice().len());
        assert_eq!(cube.as_slice().len(), 3 * frame_size);
        assert_eq!(cube.num_loops(), 2);
    }

    #[test]
    fn pairs_become_real_and_imaginary() {
        let radar = small_radar();
        let total = radar.frame_size() * 2;
        let raw = RawCapture::from_samples((0..total).map(|v| v as i16).collect());
        let cube = demodulate(&raw, &radar).unwrap();
        assert_eq!(cube.sample(0, 0, 0, 0), Complex32::new(0.0, 1.0));
        assert_eq!(cube.sample(0, 0, 0, 1), Complex32::new(2.0, 3.0));
        // chirp 4 = loop 1, tx 1
        let expected_start = (4 * 2) * 4;
        let chirp = cube.chirp(0, 1, 1, 0);
        assert_eq!(chirp[0].re, (expected_start * 2) as f32);
    }

    #[test]
    fn untileable_chirps_are_rejected() {
        let mut radar = small_radar();
        radar.num_chirps_per_frame = 7;
        let raw = RawCapture::from_samples(vec![0; radar.frame_size() * 4]);
        assert!(matches!(
            demodulate(&raw, &radar),
            Err(AlignError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn split_iq_pair_is_rejected() {
        let radar = small_radar();
        let raw = RawCapture::from_samples(vec![0; radar.frame_size() * 2 + 1]);
        assert!(matches!(
            demodulate(&raw, &radar),
            Err(AlignError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn less_than_one_frame_is_empty() {
        let radar = small_radar();
        let raw = RawCapture::from_samples(vec![0; 10]);
        assert!(matches!(
            demodulate(&raw, &radar),
            Err(AlignError::EmptyCapture { .. })
        ));
    }

    #[test]
    fn mean_frame_averages_elementwise() {
        let radar = small_radar();
        let fs = radar.frame_size();
        let mut samples = vec![0i16; fs * 2 * 2];
        // 第二帧的第一个点实部为 4
        samples[fs * 2] = 4;
        let cube = demodulate(&RawCapture::from_samples(samples), &radar).unwrap();
        let mean = cube.mean_frame(0..2);
        assert_eq!(mean.len(), fs);
        assert!((mean[0].re - 2.0).abs() < 1e-12);
    }
}
