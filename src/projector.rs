// src/projector.rs

//! 用保存的标定结果把雷达点投影到视频画面，并导出融合数据集。

use crate::calibration::CalibrationResult;
use crate::error::{AlignError, AlignResult};
use crate::timing::{RadarLookup, TemporalMapper};
use crate::track::RadarTrack;
use nalgebra::Point3;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;

/// 单点投影结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    InFrame { u: f64, v: f64 },
    /// 在相机前方，但落在画面之外
    OutOfFrame { u: f64, v: f64 },
    BehindCamera,
}

impl Projection {
    pub fn in_frame(&self) -> Option<(f64, f64)> {
        match *self {
            Projection::InFrame { u, v } => Some((u, v)),
            _ => None,
        }
    }
}

/// 把物体坐标系中的点投影为像素，并检查是否落在画面内
pub fn project(calibration: &CalibrationResult, points: &[Point3<f64>]) -> Vec<Projection> {
    let k = &calibration.intrinsics;
    points
        .iter()
        .map(|p| match calibration.pose.project(k, p) {
            None => Projection::BehindCamera,
            Some(uv) if k.contains(uv.x, uv.y) => Projection::InFrame { u: uv.x, v: uv.y },
            Some(uv) => Projection::OutOfFrame { u: uv.x, v: uv.y },
        })
        .collect()
}

/// 雷达平面坐标 `(x, y)` 先按标定的坐标约定转换，再投影
pub fn project_radar(calibration: &CalibrationResult, x: f64, y: f64) -> Projection {
    let object = calibration.object_point(x, y);
    project(calibration, &[object])[0]
}

/// 融合数据集中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct FusionRow {
    pub video_frame: u64,
    pub radar_time: f64,
    pub pixel_u: i64,
    pub pixel_v: i64,
    /// 雷达坐标（镜像约定下 x 已取反），z 恒为 0
    pub real: Point3<f64>,
}

pub const FUSION_HEADER: &str = "Video_Frame,Radar_Time,Pixel_U,Pixel_V,Real_X,Real_Y,Real_Z";

/// 融合数据导出器。
///
/// 对每个视频帧取映射到的雷达帧及其前后各一帧，跳过无效点与原点附近的点，
/// 投影后只保留落在画面内的点。
pub struct FusionExporter<'a> {
    calibration: &'a CalibrationResult,
    radar: &'a RadarTrack,
    mapper: TemporalMapper,
}

impl<'a> FusionExporter<'a> {
    /// `mapper` 的时间偏移会被标定结果中的偏移替换
    pub fn new(calibration: &'a CalibrationResult, radar: &'a RadarTrack, mapper: &TemporalMapper) -> Self {
        Self {
            calibration,
            radar,
            mapper: mapper.with_offset(calibration.time_offset_s),
        }
    }

    pub fn rows_for_frame(&self, video_frame: u64) -> Vec<FusionRow> {
        let RadarLookup::Index(center) = self.mapper.lookup(video_frame, self.radar.len()) else {
            return Vec::new();
        };
        let radar_time = self.mapper.radar_time(video_frame);
        let first = center.saturating_sub(1);
        let last = (center + 1).min(self.radar.len() - 1);

        (first..=last)
            .filter_map(|i| self.radar.get(i)?.point())
            .filter(|p| p.x.abs() > 0.1 || p.y.abs() > 0.1)
            .filter_map(|p| {
                let (u, v) = project_radar(self.calibration, p.x, p.y).in_frame()?;
                let x = if self.calibration.mirror_x { -p.x } else { p.x };
                Some(FusionRow {
                    video_frame,
                    radar_time,
                    pixel_u: u.floor() as i64,
                    pixel_v: v.floor() as i64,
                    real: Point3::new(x, p.y, 0.0),
                })
            })
            .collect()
    }

    /// 导出 `0..num_video_frames` 的融合数据为 CSV。
    ///
    /// # 返回值
    /// 写出的数据行数（不含表头）。
    pub fn export(&self, num_video_frames: u64, path: &Path) -> AlignResult<usize> {
        let mut out = String::from(FUSION_HEADER);
        out.push('\n');
        let mut count = 0;
        for frame in 0..num_video_frames {
            for row in self.rows_for_frame(frame) {
                let _ = writeln!(
                    out,
                    "{},{:.3},{},{},{:.3},{:.3},{:.3}",
                    row.video_frame,
                    row.radar_time,
                    row.pixel_u,
                    row.pixel_v,
                    row.real.x,
                    row.real.y,
                    row.real.z
                );
                count += 1;
            }
        }
        fs::write(path, out).map_err(|e| AlignError::io(path, e))?;
        info!(rows = count, path = %path.display(), "fusion data exported");
        Ok(count)
    }
}

/// 读取 `FusionExporter::export` 写出的 CSV
pub fn read_fusion_csv(path: &Path) -> AlignResult<Vec<FusionRow>> {
    let text = fs::read_to_string(path).map_err(|e| AlignError::io(path, e))?;
    let parse_error = |line: usize, reason: String| AlignError::Parse {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    match lines.next() {
        Some((_, header)) if header.trim() == FUSION_HEADER => {}
        Some((i, header)) => return Err(parse_error(i + 1, format!("unexpected header `{}`", header.trim()))),
        None => return Err(parse_error(1, "missing header".into())),
    }

    let mut rows = Vec::new();
    for (i, line) in lines {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() != 7 {
            return Err(parse_error(i + 1, format!("expected 7 columns, found {}", fields.len())));
        }
        let bad = |name: &str, value: &str| parse_error(i + 1, format!("invalid {} `{}`", name, value));
        let float = |k: usize, name: &str| fields[k].parse::<f64>().map_err(|_| bad(name, fields[k]));
        let int = |k: usize, name: &str| fields[k].parse::<i64>().map_err(|_| bad(name, fields[k]));
        rows.push(FusionRow {
            video_frame: fields[0].parse().map_err(|_| bad("frame", fields[0]))?,
            radar_time: float(1, "time")?,
            pixel_u: int(2, "pixel u")?,
            pixel_v: int(3, "pixel v")?,
            real: Point3::new(float(4, "x")?, float(5, "y")?, float(6, "z")?),
        });
    }
    Ok(rows)
}

/// 多相机合并表中的一行：主相机的雷达点与各相机在同一视频帧的像素
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub frame: u64,
    pub timestamp: f64,
    pub radar: Point3<f64>,
    /// 按相机顺序排列，缺失为 `None`
    pub pixels: Vec<Option<(i64, i64)>>,
}

/// 写出时保留三位小数，比较雷达坐标时按此容差
const COORD_TOLERANCE: f64 = 5e-4;

/// 以第一个相机为主表，按视频帧号左连接其余相机。
///
/// 主表每一行都保留。其余相机在同一帧若有多行，优先取雷达坐标相同的一行，
/// 否则取该帧的第一行；该帧没有数据时像素为空。结果按帧号稳定排序。
pub fn merge_cameras(cameras: &[Vec<FusionRow>]) -> Vec<MergedRow> {
    let Some((master, others)) = cameras.split_first() else {
        return Vec::new();
    };
    let same_point = |a: &Point3<f64>, b: &Point3<f64>| {
        (a.x - b.x).abs() < COORD_TOLERANCE && (a.y - b.y).abs() < COORD_TOLERANCE
    };

    let mut merged: Vec<MergedRow> = master
        .iter()
        .map(|row| {
            let mut pixels = Vec::with_capacity(cameras.len());
            pixels.push(Some((row.pixel_u, row.pixel_v)));
            for camera in others {
                let mut same_frame = camera.iter().filter(|r| r.video_frame == row.video_frame);
                let pick = same_frame
                    .clone()
                    .find(|r| same_point(&r.real, &row.real))
                    .or_else(|| same_frame.next());
                pixels.push(pick.map(|r| (r.pixel_u, r.pixel_v)));
            }
            MergedRow {
                frame: row.video_frame,
                timestamp: row.radar_time,
                radar: row.real,
                pixels,
            }
        })
        .collect();
    merged.sort_by_key(|r| r.frame);
    merged
}

/// 合并多个相机的融合 CSV，相机依次命名为 `C1`、`C2` ……
///
/// # 参数
/// - `inputs`: 各相机的融合 CSV，第一个为主相机
/// - `output`: 合并后的 CSV 路径
///
/// # 返回值
/// 写出的数据行数（不含表头）。
pub fn merge_fusion_files(inputs: &[&Path], output: &Path) -> AlignResult<usize> {
    if inputs.is_empty() {
        return Err(AlignError::Config("at least one fusion file is required".into()));
    }
    let cameras = inputs
        .iter()
        .map(|p| read_fusion_csv(p))
        .collect::<AlignResult<Vec<_>>>()?;
    let merged = merge_cameras(&cameras);

    let mut out = String::from("Frame_ID,Timestamp,Radar_X,Radar_Y,Radar_Z");
    for k in 1..=inputs.len() {
        let _ = write!(out, ",C{k}_U,C{k}_V");
    }
    out.push('\n');
    for row in &merged {
        let _ = write!(
            out,
            "{},{:.3},{:.3},{:.3},{:.3}",
            row.frame, row.timestamp, row.radar.x, row.radar.y, row.radar.z
        );
        for pixel in &row.pixels {
            match pixel {
                Some((u, v)) => {
                    let _ = write!(out, ",{},{}", u, v);
                }
                None => out.push_str(",,"),
            }
        }
        out.push('\n');
    }
    fs::write(output, out).map_err(|e| AlignError::io(output, e))?;
    info!(cameras = inputs.len(), rows = merged.len(), path = %output.display(), "fusion files merged");
    Ok(merged.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraIntrinsics, CameraPose};
    use crate::hypothesis::CoordinateHypothesis;
    use crate::target_processor::TargetCentroid;
    use nalgebra::{Rotation3, Vector3};

    fn calibration(hypothesis: CoordinateHypothesis) -> CalibrationResult {
        CalibrationResult {
            pose: CameraPose::new(Rotation3::identity(), Vector3::new(0.0, 1.0, 0.0)),
            intrinsics: CameraIntrinsics::from_sensor(3200, 1800, 4.0, 5.9),
            hypothesis,
            reprojection_error_px: 0.0,
            time_offset_s: 0.0,
            mirror_x: hypothesis.mirrors_x(),
            plausible: true,
        }
    }

    #[test]
    fn classifies_projections() {
        let calib = calibration(CoordinateHypothesis::DepthForward);
        let out = project(
            &calib,
            &[
                Point3::new(0.0, -1.0, 3.0),
                Point3::new(50.0, 0.0, 3.0),
                Point3::new(0.0, 0.0, -2.0),
            ],
        );
        assert_eq!(out[0], Projection::InFrame { u: 1600.0, v: 900.0 });
        assert!(matches!(out[1], Projection::OutOfFrame { .. }));
        assert_eq!(out[2], Projection::BehindCamera);
    }

    #[test]
    fn mirror_flips_the_side() {
        let plain = project_radar(&calibration(CoordinateHypothesis::DepthForward), 0.5, 3.0);
        let mirrored = project_radar(&calibration(CoordinateHypothesis::MirrorX), 0.5, 3.0);
        let (u0, _) = plain.in_frame().unwrap();
        let (u1, _) = mirrored.in_frame().unwrap();
        assert!(u0 > 1600.0 && u1 < 1600.0);
        assert!((u0 - 1600.0 + u1 - 1600.0).abs() < 1e-9);
    }

    #[test]
    fn export_uses_neighbouring_radar_frames() {
        let calib = calibration(CoordinateHypothesis::DepthForward);
        let radar = RadarTrack::from_centroids(vec![
            TargetCentroid::Valid(Point3::new(0.2, 3.0, 0.0)),
            TargetCentroid::Valid(Point3::new(0.05, 0.05, 0.0)),
            TargetCentroid::Invalid,
            TargetCentroid::Valid(Point3::new(-0.2, 3.0, 0.0)),
        ]);
        let mapper = TemporalMapper::new(10.0, 10.0, 0.0);
        let exporter = FusionExporter::new(&calib, &radar, &mapper);
        // 帧 1 → 雷达 0..=2：第 1 帧靠近原点、第 2 帧无效
        let rows = exporter.rows_for_frame(1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].real, Point3::new(0.2, 3.0, 0.0));
        // 帧 3 → 雷达 2..=3
        assert_eq!(exporter.rows_for_frame(3).len(), 1);
        assert!(exporter.rows_for_frame(10).is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fusion.csv");
        let count = exporter.export(5, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next(), Some(FUSION_HEADER));
        assert_eq!(text.lines().count(), count + 1);
        assert!(text.contains("1,0.100,"));
    }

    fn fusion_csv(dir: &Path, name: &str, rows: &[&str]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut text = format!("{}\n", FUSION_HEADER);
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn merge_joins_cameras_on_shared_frames() {
        let dir = tempfile::tempdir().unwrap();
        let c1 = fusion_csv(
            dir.path(),
            "c1.csv",
            &[
                "2,0.200,1500,800,0.300,3.000,0.000",
                "0,0.000,1600,900,0.100,2.000,0.000",
                "2,0.200,1550,820,-0.400,3.100,0.000",
            ],
        );
        let c2 = fusion_csv(
            dir.path(),
            "c2.csv",
            &[
                "1,0.100,10,20,0.200,2.500,0.000",
                "2,0.200,30,40,-0.400,3.100,0.000",
                "2,0.200,50,60,0.300,3.000,0.000",
            ],
        );
        let out = dir.path().join("master.csv");
        let rows = merge_fusion_files(&[c1.as_path(), c2.as_path()], &out).unwrap();
        assert_eq!(rows, 3);

        let text = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Frame_ID,Timestamp,Radar_X,Radar_Y,Radar_Z,C1_U,C1_V,C2_U,C2_V");
        // 帧 0 只有主相机；帧 2 按雷达坐标对应到第二个相机的行
        assert_eq!(lines[1], "0,0.000,0.100,2.000,0.000,1600,900,,");
        assert_eq!(lines[2], "2,0.200,0.300,3.000,0.000,1500,800,50,60");
        assert_eq!(lines[3], "2,0.200,-0.400,3.100,0.000,1550,820,30,40");
        // 只出现在第二个相机的帧 1 不进入主表
        assert!(!text.lines().any(|l| l.starts_with("1,")));
    }

    #[test]
    fn merge_rejects_foreign_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.csv");
        fs::write(&path, "a,b,c\n1,2,3\n").unwrap();
        let out = dir.path().join("master.csv");
        assert!(matches!(
            merge_fusion_files(&[path.as_path()], &out),
            Err(AlignError::Parse { line: 1, .. })
        ));
        assert!(matches!(merge_fusion_files(&[], &out), Err(AlignError::Config(_))));
        assert!(!out.exists());
    }
}
