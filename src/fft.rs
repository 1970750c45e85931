// src/fft.rs

//! FFT 辅助工具：计划缓存、补零变换、fftshift 与 dB 换算。

use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

/// 固定长度的前向 FFT
pub struct FftProcessor {
    size: usize,
    fft_forward: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
}

impl fmt::Debug for FftProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftProcessor")
            .field("size", &self.size)
            .finish()
    }
}

impl Clone for FftProcessor {
    fn clone(&self) -> Self {
        Self {
            size: self.size,
            fft_forward: Arc::clone(&self.fft_forward),
            scratch: vec![Complex64::new(0.0, 0.0); self.scratch.len()],
        }
    }
}

impl FftProcessor {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(size);
        let scratch = vec![Complex64::new(0.0, 0.0); fft_forward.get_inplace_scratch_len()];
        Self {
            size,
            fft_forward,
            scratch,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 原地前向 FFT，`buffer` 长度必须等于 FFT 长度
    pub fn fft_inplace(&mut self, buffer: &mut [Complex64]) {
        assert_eq!(buffer.len(), self.size);
        self.fft_forward
            .process_with_scratch(buffer, &mut self.scratch);
    }

    /// 截断或补零到 FFT 长度后做前向 FFT
    pub fn fft_padded(&mut self, input: &[Complex64]) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = input.iter().take(self.size).copied().collect();
        buffer.resize(self.size, Complex64::new(0.0, 0.0));
        self.fft_inplace(&mut buffer);
        buffer
    }
}

/// 把零频移到中间：输出下标 `i` 对应输入 `(i + n - n/2) % n`，与 numpy 的 fftshift 一致
pub fn fft_shift<T: Clone>(spectrum: &[T]) -> Vec<T> {
    let n = spectrum.len();
    let split = n - n / 2;
    let mut shifted = Vec::with_capacity(n);
    shifted.extend_from_slice(&spectrum[split..]);
    shifted.extend_from_slice(&spectrum[..split]);
    shifted
}

/// `20·log10(magnitude + floor)`
pub fn to_db(magnitude: f64, floor: f64) -> f64 {
    20.0 * (magnitude + floor).log10()
}
