// src/spectrum.rs

//! Range / Doppler / Angle 变换链。
//!
//! 单帧处理顺序：
//! 1. 沿快时间做 Range-FFT；
//! 2. 可选的静态杂波去除（减去基线谱）；
//! 3. 需要速度维时沿 loop 做 Doppler-FFT 并 fftshift；
//! 4. 把所有 (TX, RX) 组合视作一个虚拟阵列，补零后做 Angle-FFT 并 fftshift。
//!
//! 幅度统一以 `20·log10(|X| + floor)` 输出。

use crate::capture::FrameCube;
use crate::config::{ClutterRemoval, ExtractorConfig};
use crate::error::{AlignError, AlignResult};
use crate::fft::{fft_shift, to_db, FftProcessor};
use num_complex::Complex64;
use tracing::{debug, warn};

/// 单帧的角度-距离幅度图 (dB)，按 `[range_bin, angle_bin]` 行优先存放
#[derive(Debug, Clone, PartialEq)]
pub struct RangeAngleMap {
    num_range_bins: usize,
    num_angle_bins: usize,
    values: Vec<f64>,
}

impl RangeAngleMap {
    pub fn num_range_bins(&self) -> usize {
        self.num_range_bins
    }

    pub fn num_angle_bins(&self) -> usize {
        self.num_angle_bins
    }

    pub fn get(&self, range_bin: usize, angle_bin: usize) -> f64 {
        self.values[range_bin * self.num_angle_bins + angle_bin]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// 按 `(range_bin, angle_bin, value)` 遍历
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let cols = self.num_angle_bins;
        self.values
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i / cols, i % cols, v))
    }
}

/// 静态杂波基线。
///
/// 由于 FFT 是线性的，"各帧 Range-FFT 的均值" 等于 "各帧原始数据均值的 Range-FFT"，
/// 所以基线只需对平均后的原始帧做一次变换。
#[derive(Debug, Clone)]
pub struct ClutterFilter {
    mode: ClutterRemoval,
    global: Option<Vec<Complex64>>,
}

impl ClutterFilter {
    pub fn new(cube: &FrameCube, mode: ClutterRemoval, fft: &mut FftProcessor) -> Self {
        let global = match mode {
            ClutterRemoval::GlobalMean => {
                let mut mean = cube.mean_frame(0..cube.num_frames());
                range_fft_inplace(fft, &mut mean);
                debug!(frames = cube.num_frames(), "global clutter baseline ready");
                Some(mean)
            }
            _ => None,
        };
        Self { mode, global }
    }

    pub fn mode(&self) -> ClutterRemoval {
        self.mode
    }

    /// 从 `frame` 的距离谱中减去对应基线
    pub fn apply(
        &self,
        cube: &FrameCube,
        frame: usize,
        spectra: &mut [Complex64],
        fft: &mut FftProcessor,
    ) {
        match self.mode {
            ClutterRemoval::Disabled => {}
            ClutterRemoval::GlobalMean => {
                if let Some(baseline) = &self.global {
                    subtract(spectra, baseline);
                }
            }
            ClutterRemoval::Rolling { window } => {
                let start = (frame + 1).saturating_sub(window.max(1));
                let mut baseline = cube.mean_frame(start..frame + 1);
                range_fft_inplace(fft, &mut baseline);
                subtract(spectra, &baseline);
            }
        }
    }
}

fn subtract(spectra: &mut [Complex64], baseline: &[Complex64]) {
    for (s, b) in spectra.iter_mut().zip(baseline) {
        *s -= *b;
    }
}

/// 对按 `fft.size()` 分行的数据逐行原地做 FFT
fn range_fft_inplace(fft: &mut FftProcessor, rows: &mut [Complex64]) {
    let n = fft.size();
    for row in rows.chunks_exact_mut(n) {
        fft.fft_inplace(row);
    }
}

/// 单帧变换器，持有各维的 FFT 计划。克隆后可在线程间独立使用。
#[derive(Debug, Clone)]
pub struct SpectrumProcessor {
    range_fft: FftProcessor,
    angle_fft: FftProcessor,
    db_floor: f64,
}

impl SpectrumProcessor {
    /// Angle-FFT 长度至少为虚拟阵列长度，配置更小时放大到阵列长度
    pub fn new(cube: &FrameCube, config: &ExtractorConfig) -> Self {
        let num_virtual = cube.num_tx() * cube.num_rx();
        if config.angle_fft_size < num_virtual {
            warn!(
                configured = config.angle_fft_size,
                num_virtual, "angle FFT shorter than the virtual array, widening it"
            );
        }
        Self {
            range_fft: FftProcessor::new(cube.num_samples()),
            angle_fft: FftProcessor::new(config.angle_fft_size.max(num_virtual)),
            db_floor: config.db_floor,
        }
    }

    pub fn range_fft_mut(&mut self) -> &mut FftProcessor {
        &mut self.range_fft
    }

    /// 单帧 Range-FFT，输出布局 `[chirp, rx, range_bin]`，并按 `clutter` 去除静态杂波
    pub fn range_spectra(
        &mut self,
        cube: &FrameCube,
        frame: usize,
        clutter: &ClutterFilter,
    ) -> Vec<Complex64> {
        let mut spectra: Vec<Complex64> = cube
            .frame(frame)
            .iter()
            .map(|s| Complex64::new(s.re as f64, s.im as f64))
            .collect();
        range_fft_inplace(&mut self.range_fft, &mut spectra);
        clutter.apply(cube, frame, &mut spectra, &mut self.range_fft);
        spectra
    }

    /// 由距离谱合成虚拟阵列并做 Angle-FFT，得到角度-距离图。
    ///
    /// 虚拟通道按 TX 优先排列 `[TX0RX0..TX0RXn, TX1RX0, ...]`，
    /// 每个通道先对所有 loop 取平均（相干积累）。
    ///
    /// # 参数
    /// * `cube` - 提供维度信息的数据立方体。
    /// * `spectra` - [`Self::range_spectra`] 的输出。
    ///
    /// # 返回值
    /// `[range_bin, angle_bin]` 的 dB 幅度图，角度维已 fftshift（中间为 0 度）。
    pub fn range_angle_map(&mut self, cube: &FrameCube, spectra: &[Complex64]) -> RangeAngleMap {
        let bins = cube.num_samples();
        let num_tx = cube.num_tx();
        let num_rx = cube.num_rx();
        let num_loops = cube.num_loops();
        let num_virtual = num_tx * num_rx;

        let mut virtual_array = vec![Complex64::new(0.0, 0.0); num_virtual * bins];
        for lp in 0..num_loops {
            for tx in 0..num_tx {
                for rx in 0..num_rx {
                    let chirp = lp * num_tx + tx;
                    let src = &spectra[(chirp * num_rx + rx) * bins..][..bins];
                    let dst = &mut virtual_array[(tx * num_rx + rx) * bins..][..bins];
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += *s;
                    }
                }
            }
        }
        let scale = 1.0 / num_loops as f64;
        for v in virtual_array.iter_mut() {
            *v *= scale;
        }

        let num_angle_bins = self.angle_fft.size();
        let mut values = Vec::with_capacity(bins * num_angle_bins);
        let mut column = vec![Complex64::new(0.0, 0.0); num_virtual];
        for bin in 0..bins {
            for (ant, c) in column.iter_mut().enumerate() {
                *c = virtual_array[ant * bins + bin];
            }
            let spectrum = fft_shift(&self.angle_fft.fft_padded(&column));
            values.extend(spectrum.iter().map(|c| to_db(c.norm(), self.db_floor)));
        }

        RangeAngleMap {
            num_range_bins: bins,
            num_angle_bins,
            values,
        }
    }

    /// 单个 (TX, RX) 通道的距离-多普勒图 `[range_bin][doppler_bin]` (dB)，零速度位于中间。
    ///
    /// 通道下标超出数据立方体时返回 [`AlignError::ShapeMismatch`]。
    pub fn range_doppler_map(
        &self,
        cube: &FrameCube,
        spectra: &[Complex64],
        tx: usize,
        rx: usize,
    ) -> AlignResult<Vec<Vec<f64>>> {
        if tx >= cube.num_tx() || rx >= cube.num_rx() {
            return Err(AlignError::ShapeMismatch(format!(
                "channel (tx {}, rx {}) outside a {}x{} array",
                tx,
                rx,
                cube.num_tx(),
                cube.num_rx()
            )));
        }
        let bins = cube.num_samples();
        let num_loops = cube.num_loops();
        let mut doppler_fft = FftProcessor::new(num_loops);
        let mut slow_time = vec![Complex64::new(0.0, 0.0); num_loops];
        let map: Vec<Vec<f64>> = (0..bins)
            .map(|bin| {
                for (lp, s) in slow_time.iter_mut().enumerate() {
                    let chirp = lp * cube.num_tx() + tx;
                    *s = spectra[(chirp * cube.num_rx() + rx) * bins + bin];
                }
                let spectrum = fft_shift(&doppler_fft.fft_padded(&slow_time));
                spectrum
                    .iter()
                    .map(|c| to_db(c.norm(), self.db_floor))
                    .collect()
            })
            .collect();
        Ok(map)
    }
}

/// 距离-时间图：每帧对 chirp 与 RX 的 |Range-FFT| 取均值，只保留前一半距离 bin。
///
/// 返回 `[range_bin][frame]` 的 dB 矩阵。
pub fn range_time_map(cube: &FrameCube, db_floor: f64) -> Vec<Vec<f64>> {
    let bins = cube.num_samples();
    let kept = bins / 2;
    let mut fft = FftProcessor::new(bins);
    let rows = cube.num_chirps() * cube.num_rx();
    let mut map = vec![Vec::with_capacity(cube.num_frames()); kept];
    for frame in 0..cube.num_frames() {
        let mut spectra: Vec<Complex64> = cube
            .frame(frame)
            .iter()
            .map(|s| Complex64::new(s.re as f64, s.im as f64))
            .collect();
        range_fft_inplace(&mut fft, &mut spectra);
        for (bin, column) in map.iter_mut().enumerate() {
            let sum: f64 = (0..rows).map(|r| spectra[r * bins + bin].norm()).sum();
            column.push(to_db(sum / rows as f64, db_floor));
        }
    }
    map
}

/// 微多普勒时频图：取 TX0/RX0，去除全局静态杂波后沿 loop 做 Doppler-FFT，
/// 对前一半距离 bin 的幅度求和。
///
/// 返回 `[doppler_bin][frame]` 的 dB 矩阵，零速度位于中间行。
pub fn doppler_time_map(cube: &FrameCube, db_floor: f64) -> Vec<Vec<f64>> {
    let bins = cube.num_samples();
    let kept = bins / 2;
    let num_loops = cube.num_loops();
    let mut range_fft = FftProcessor::new(bins);
    let mut doppler_fft = FftProcessor::new(num_loops);
    let clutter = ClutterFilter::new(cube, ClutterRemoval::GlobalMean, &mut range_fft);

    let mut map = vec![Vec::with_capacity(cube.num_frames()); num_loops];
    let mut slow_time = vec![Complex64::new(0.0, 0.0); num_loops];
    for frame in 0..cube.num_frames() {
        let mut spectra: Vec<Complex64> = cube
            .frame(frame)
            .iter()
            .map(|s| Complex64::new(s.re as f64, s.im as f64))
            .collect();
        range_fft_inplace(&mut range_fft, &mut spectra);
        clutter.apply(cube, frame, &mut spectra, &mut range_fft);

        let mut energy = vec![0.0; num_loops];
        for bin in 0..kept {
            for (lp, s) in slow_time.iter_mut().enumerate() {
                let chirp = lp * cube.num_tx();
                *s = spectra[(chirp * cube.num_rx()) * bins + bin];
            }
            let spectrum = fft_shift(&doppler_fft.fft_padded(&slow_time));
            for (e, c) in energy.iter_mut().zip(&spectrum) {
                *e += c.norm();
            }
        }
        for (row, e) in map.iter_mut().zip(energy) {
            row.push(to_db(e, db_floor));
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{demodulate, RawCapture};
    use crate::config::RadarConfig;
    use crate::data_generator::{synthetic_capture, SyntheticTarget};

    fn radar() -> RadarConfig {
        RadarConfig {
            num_adc_samples: 64,
            num_chirps_per_frame: 16,
            num_rx_antennas: 4,
            num_tx_antennas: 2,
            ..RadarConfig::default()
        }
    }

    #[test]
    fn zero_frame_gives_floor_level_map() {
        let radar = radar();
        let raw = RawCapture::from_samples(vec![0; radar.frame_size() * 2]);
        let cube = demodulate(&raw, &radar).unwrap();
        let config = ExtractorConfig::default();
        let mut processor = SpectrumProcessor::new(&cube, &config);
        let clutter = ClutterFilter::new(&cube, ClutterRemoval::Disabled, processor.range_fft_mut());
        let spectra = processor.range_spectra(&cube, 0, &clutter);
        assert!(spectra.iter().all(|c| c.norm() == 0.0));
        let map = processor.range_angle_map(&cube, &spectra);
        let floor = to_db(0.0, config.db_floor);
        assert_eq!(map.num_range_bins(), 64);
        assert_eq!(map.num_angle_bins(), 64);
        assert!(map.values().iter().all(|&v| v == floor));
    }

    #[test]
    fn global_clutter_removal_cancels_static_scene() {
        let radar = radar();
        let target = SyntheticTarget {
            range: 1.5,
            angle: 0.3,
            amplitude: 200.0,
        };
        // 每帧目标位置都相同，即纯静态场景
        let raw = synthetic_capture(&radar, &ExtractorConfig::default(), &[Some(target); 4], 0.0, 7);
        let cube = demodulate(&raw, &radar).unwrap();
        let config = ExtractorConfig::default();
        let mut processor = SpectrumProcessor::new(&cube, &config);

        let none = ClutterFilter::new(&cube, ClutterRemoval::Disabled, processor.range_fft_mut());
        let raw_peak = processor
            .range_spectra(&cube, 2, &none)
            .iter()
            .map(|c| c.norm())
            .fold(0.0, f64::max);
        assert!(raw_peak > 1000.0);

        let global = ClutterFilter::new(&cube, ClutterRemoval::GlobalMean, processor.range_fft_mut());
        for frame in 0..cube.num_frames() {
            let residual = processor.range_spectra(&cube, frame, &global);
            assert!(residual.iter().all(|c| c.norm() < 1e-6 * raw_peak));
        }
    }

    #[test]
    fn rolling_clutter_is_causal() {
        let radar = radar();
        let target = SyntheticTarget {
            range: 2.0,
            angle: 0.0,
            amplitude: 100.0,
        };
        let frames = [None, None, Some(target), Some(target)];
        let raw = synthetic_capture(&radar, &ExtractorConfig::default(), &frames, 0.0, 1);
        let cube = demodulate(&raw, &radar).unwrap();
        let mut processor = SpectrumProcessor::new(&cube, &ExtractorConfig::default());
        let rolling = ClutterFilter::new(
            &cube,
            ClutterRemoval::Rolling { window: 2 },
            processor.range_fft_mut(),
        );
        // 第 1 帧的基线只含第 0、1 帧（全零），看不到未来的目标
        let early = processor.range_spectra(&cube, 1, &rolling);
        assert!(early.iter().all(|c| c.norm() < 1e-9));
        // 第 3 帧的窗口内目标静止，被完全抵消
        let late = processor.range_spectra(&cube, 3, &rolling);
        assert!(late.iter().all(|c| c.norm() < 1e-6));
        // 第 2 帧目标刚出现，窗口均值只有一半
        let onset = processor.range_spectra(&cube, 2, &rolling);
        assert!(onset.iter().any(|c| c.norm() > 100.0));
    }

    #[test]
    fn doppler_map_centres_static_target() {
        let radar = radar();
        let target = SyntheticTarget {
            range: 1.0,
            angle: 0.0,
            amplitude: 100.0,
        };
        let raw = synthetic_capture(&radar, &ExtractorConfig::default(), &[Some(target)], 0.0, 3);
        let cube = demodulate(&raw, &radar).unwrap();
        let mut processor = SpectrumProcessor::new(&cube, &ExtractorConfig::default());
        let clutter = ClutterFilter::new(&cube, ClutterRemoval::Disabled, processor.range_fft_mut());
        let spectra = processor.range_spectra(&cube, 0, &clutter);
        let map = processor.range_doppler_map(&cube, &spectra, 0, 0).unwrap();
        assert!(matches!(
            processor.range_doppler_map(&cube, &spectra, 2, 0),
            Err(AlignError::ShapeMismatch(_))
        ));
        assert!(processor.range_doppler_map(&cube, &spectra, 1, 4).is_err());
        let range_bin = (1.0 / radar.range_resolution).round() as usize;
        let row = &map[range_bin];
        let peak = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, cube.num_loops() / 2);
    }

    #[test]
    fn short_angle_fft_covers_whole_virtual_array() {
        let radar = radar();
        let raw = RawCapture::from_samples(vec![0; radar.frame_size() * 2]);
        let cube = demodulate(&raw, &radar).unwrap();
        let config = ExtractorConfig {
            angle_fft_size: 4,
            ..ExtractorConfig::default()
        };
        let mut processor = SpectrumProcessor::new(&cube, &config);
        let clutter = ClutterFilter::new(&cube, ClutterRemoval::Disabled, processor.range_fft_mut());
        let spectra = processor.range_spectra(&cube, 0, &clutter);
        let map = processor.range_angle_map(&cube, &spectra);
        assert_eq!(map.num_angle_bins(), 8);
    }

    #[test]
    fn diagnostic_maps_have_expected_shapes() {
        let radar = radar();
        let raw = synthetic_capture(&radar, &ExtractorConfig::default(), &[None, None, None], 1.0, 5);
        let cube = demodulate(&raw, &radar).unwrap();
        let rt = range_time_map(&cube, 1e-9);
        assert_eq!(rt.len(), 32);
        assert!(rt.iter().all(|row| row.len() == 3));
        let dt = doppler_time_map(&cube, 1e-9);
        assert_eq!(dt.len(), cube.num_loops());
        assert!(dt.iter().all(|row| row.len() == 3));
    }
}
