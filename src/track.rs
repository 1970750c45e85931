// src/track.rs

//! 雷达轨迹与相机标注轨迹，以及它们的文本文件格式。

use crate::error::{AlignError, AlignResult};
use crate::target_processor::TargetCentroid;
use nalgebra::{Point2, Vector2};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;

/// 按雷达帧序排列的目标质心，每帧一项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadarTrack {
    centroids: Vec<TargetCentroid>,
}

impl RadarTrack {
    /// 按给定顺序拼接，不重排也不过滤
    pub fn from_centroids(centroids: Vec<TargetCentroid>) -> Self {
        Self { centroids }
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TargetCentroid> {
        self.centroids.get(index)
    }

    pub fn centroids(&self) -> &[TargetCentroid] {
        &self.centroids
    }

    pub fn valid_count(&self) -> usize {
        self.centroids.iter().filter(|c| c.is_valid()).count()
    }

    /// 有效点在 x、y 两轴上的总体标准差；没有有效点时为 `None`
    pub fn activity(&self) -> Option<Vector2<f64>> {
        let points: Vec<Vector2<f64>> = self
            .centroids
            .iter()
            .filter_map(|c| c.point())
            .map(|p| Vector2::new(p.x, p.y))
            .collect();
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let mean = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / n;
        let var = points
            .iter()
            .fold(Vector2::zeros(), |acc, p| acc + (p - mean).component_mul(&(p - mean)))
            / n;
        Some(var.map(f64::sqrt))
    }

    /// 把距离 `center` 小于 `radius` 的有效点替换为无效帧。
    ///
    /// # 返回值
    /// 被剔除的帧数。
    pub fn reject_static(&mut self, center: &Point2<f64>, radius: f64) -> usize {
        let mut removed = 0;
        for c in self.centroids.iter_mut() {
            if let Some(p) = c.point() {
                if (Point2::new(p.x, p.y) - center).norm() < radius {
                    *c = TargetCentroid::Invalid;
                    removed += 1;
                }
            }
        }
        removed
    }

    /// 读取三列文本轨迹，`nan` 行为无效帧
    pub fn read(path: &Path) -> AlignResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| AlignError::io(path, e))?;
        let mut centroids = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let values = parse_row(line).map_err(|reason| AlignError::Parse {
                path: path.to_path_buf(),
                line: line_no + 1,
                reason,
            })?;
            let row: [f64; 3] = values.as_slice().try_into().map_err(|_| AlignError::Parse {
                path: path.to_path_buf(),
                line: line_no + 1,
                reason: format!("expected 3 columns, found {}", values.len()),
            })?;
            centroids.push(TargetCentroid::from_row(row));
        }
        Ok(Self { centroids })
    }

    /// 以空格分隔、保留 4 位小数写出，无效帧写为 `nan nan nan`
    pub fn write(&self, path: &Path) -> AlignResult<()> {
        let mut out = String::with_capacity(self.centroids.len() * 24);
        for c in &self.centroids {
            let [x, y, z] = c.to_row();
            let _ = writeln!(out, "{} {} {}", fmt_value(x), fmt_value(y), fmt_value(z));
        }
        fs::write(path, out).map_err(|e| AlignError::io(path, e))
    }
}

fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else {
        format!("{:.4}", v)
    }
}

fn parse_row(line: &str) -> Result<Vec<f64>, String> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|_| format!("'{}' is not a number", s)))
        .collect()
}

/// 静止杂波中心（通常是墙体等强反射体）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticClutter {
    pub center: Point2<f64>,
}

impl StaticClutter {
    /// 用直方图众数估计静止中心。
    ///
    /// 只统计 `|x| > 0.01` 的有效点（原点附近是提取失败的残留）。
    /// 每个轴各自分 `bins` 个等宽区间，众数取最满区间的左边界，并列时取第一个。
    ///
    /// # 参数
    /// * `track` - 待分析的雷达轨迹。
    /// * `bins` - 直方图区间数。
    ///
    /// # 返回值
    /// 静止中心；没有可统计的点时为 `None`。
    pub fn detect(track: &RadarTrack, bins: usize) -> Option<Self> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = track
            .centroids()
            .iter()
            .filter_map(|c| c.point())
            .filter(|p| p.x.abs() > 0.01)
            .map(|p| (p.x, p.y))
            .unzip();
        let x = histogram_mode(&xs, bins)?;
        let y = histogram_mode(&ys, bins)?;
        Some(Self {
            center: Point2::new(x, y),
        })
    }
}

/// 等宽直方图中最满区间的左边界；取值全相同时区间范围扩展为 `±0.5`
fn histogram_mode(values: &[f64], bins: usize) -> Option<f64> {
    if values.is_empty() || bins == 0 {
        return None;
    }
    let mut lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in values {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    Some(lo + best as f64 * width)
}

/// 单条相机标注：视频帧号与像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelObservation {
    pub frame: u64,
    pub u: f64,
    pub v: f64,
}

/// 稀疏的相机标注轨迹，按文件中的顺序保存
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraTrack {
    observations: Vec<PixelObservation>,
}

impl CameraTrack {
    pub fn from_observations(observations: Vec<PixelObservation>) -> Self {
        Self { observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[PixelObservation] {
        &self.observations
    }

    /// 读取 `frame_id u v` 文本，空格或逗号分隔。
    ///
    /// 以 `#` 开头的行以及文件首个非数字行视为表头并跳过。
    pub fn read(path: &Path) -> AlignResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| AlignError::io(path, e))?;
        let mut observations = Vec::new();
        let mut seen_data = false;
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let values = match parse_row(line) {
                Ok(values) => values,
                Err(_) if !seen_data => {
                    seen_data = true;
                    continue;
                }
                Err(reason) => {
                    return Err(AlignError::Parse {
                        path: path.to_path_buf(),
                        line: line_no + 1,
                        reason,
                    })
                }
            };
            seen_data = true;
            if values.len() != 3 {
                return Err(AlignError::Parse {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    reason: format!("expected 3 columns, found {}", values.len()),
                });
            }
            if values[0] < 0.0 || values[0].fract() != 0.0 {
                return Err(AlignError::Parse {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    reason: format!("frame id {} is not a non-negative integer", values[0]),
                });
            }
            observations.push(PixelObservation {
                frame: values[0] as u64,
                u: values[1],
                v: values[2],
            });
        }
        info!(path = %path.display(), points = observations.len(), "camera track loaded");
        Ok(Self { observations })
    }

    pub fn write(&self, path: &Path) -> AlignResult<()> {
        let mut out = String::from("# Frame_ID u_real v_real\n");
        for o in &self.observations {
            let _ = writeln!(out, "{} {:.3} {:.3}", o.frame, o.u, o.v);
        }
        fs::write(path, out).map_err(|e| AlignError::io(path, e))
    }
}
