// src/calibration.rs

//! 时空标定搜索。
//!
//! 对每个时间偏移，先把相机标注与雷达轨迹按时间配对，再对每种坐标约定
//! 做一次鲁棒 PnP，按全部配对点上的平均重投影误差挑选最优解。

use crate::camera::{CameraIntrinsics, CameraPose};
use crate::config::{AppConfig, CalibrationConfig, OffsetSweep};
use crate::error::{AlignError, AlignResult};
use crate::hypothesis::CoordinateHypothesis;
use crate::pnp::{solve_pnp_ransac, visible_reprojection_error, PnpError, PnpOptions};
use crate::ransac::RansacOptions;
use crate::timing::{RadarLookup, TemporalMapper};
use crate::track::{CameraTrack, RadarTrack};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// 同一时刻的一对观测：雷达平面坐标与像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchedPair {
    pub video_frame: u64,
    pub radar_index: usize,
    pub radar: Point2<f64>,
    pub pixel: Point2<f64>,
}

/// 按时间把相机标注与雷达轨迹配对。
///
/// 只接受映射到轨迹范围内、且该帧是有效点并且不在原点的标注。
///
/// # 参数
/// * `radar` - 雷达轨迹。
/// * `camera` - 相机标注。
/// * `mapper` - 视频帧到雷达帧的映射。
///
/// # 返回值
/// 按标注顺序排列的配对。
pub fn match_pairs(radar: &RadarTrack, camera: &CameraTrack, mapper: &TemporalMapper) -> Vec<MatchedPair> {
    camera
        .observations()
        .iter()
        .filter_map(|obs| {
            let RadarLookup::Index(index) = mapper.lookup(obs.frame, radar.len()) else {
                return None;
            };
            let p = radar.get(index)?.point()?;
            if p.x == 0.0 && p.y == 0.0 {
                return None;
            }
            Some(MatchedPair {
                video_frame: obs.frame,
                radar_index: index,
                radar: Point2::new(p.x, p.y),
                pixel: Point2::new(obs.u, obs.v),
            })
        })
        .collect()
}

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("only {found} matched pairs, at least {required} are needed")]
    InsufficientPairs { found: usize, required: usize },

    #[error("no coordinate hypothesis produced a pose ({} attempts)", .0.len())]
    Unsolved(Vec<HypothesisAttempt>),

    /// 给定位姿无法为任何配对点打分
    #[error(transparent)]
    Pose(#[from] PnpError),

    #[error(transparent)]
    Align(#[from] AlignError),
}

/// 不阻止输出结果、但需要人工确认的情况
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationWarning {
    /// 平移的深度分量超出合理范围
    ImplausibleTranslation { depth_m: f64, limit_m: f64 },
    /// 雷达轨迹几乎不动，位姿约束很弱
    LowActivity { std_x_m: f64, std_y_m: f64, limit_m: f64 },
}

impl fmt::Display for CalibrationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationWarning::ImplausibleTranslation { depth_m, limit_m } => write!(
                f,
                "translation depth {:.2} m exceeds {:.1} m, calibration is probably wrong",
                depth_m, limit_m
            ),
            CalibrationWarning::LowActivity {
                std_x_m,
                std_y_m,
                limit_m,
            } => write!(
                f,
                "radar track barely moves (std x {:.3} m, y {:.3} m < {:.2} m)",
                std_x_m, std_y_m, limit_m
            ),
        }
    }
}

/// `|t_z|` 超过上限时返回警告
pub(crate) fn check_translation(translation: &Vector3<f64>, max_depth_m: f64) -> Option<CalibrationWarning> {
    (translation.z.abs() > max_depth_m).then(|| CalibrationWarning::ImplausibleTranslation {
        depth_m: translation.z,
        limit_m: max_depth_m,
    })
}

fn check_activity(track: &RadarTrack, limit_m: f64) -> Option<CalibrationWarning> {
    let spread = track.activity()?;
    (spread.x < limit_m && spread.y < limit_m).then(|| CalibrationWarning::LowActivity {
        std_x_m: spread.x,
        std_y_m: spread.y,
        limit_m,
    })
}

/// 标定结果：外参、内参、坐标约定与质量指标
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub pose: CameraPose,
    pub intrinsics: CameraIntrinsics,
    pub hypothesis: CoordinateHypothesis,
    /// 相机前方配对点上的平均重投影误差 (像素)
    pub reprojection_error_px: f64,
    pub time_offset_s: f64,
    pub mirror_x: bool,
    /// 平移是否在合理范围内；不合理的结果照常返回，但会带上该标记
    pub plausible: bool,
}

impl CalibrationResult {
    pub fn rotation(&self) -> &Rotation3<f64> {
        &self.pose.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.pose.translation
    }

    pub fn camera_matrix(&self) -> Matrix3<f64> {
        self.intrinsics.k_matrix()
    }

    /// 按保存的坐标约定把雷达坐标转为物体坐标
    pub fn object_point(&self, x: f64, y: f64) -> Point3<f64> {
        self.hypothesis.apply(x, y)
    }

    /// 写出 JSON 标定文件；含非有限数值的结果会被拒绝，保证写出的文件总能读回
    pub fn save(&self, path: &Path) -> AlignResult<()> {
        let artifact = CalibrationArtifact::from(self);
        artifact.validate()?;
        let text = serde_json::to_string_pretty(&artifact)?;
        fs::write(path, text).map_err(|e| AlignError::io(path, e))
    }

    pub fn load(path: &Path) -> AlignResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| AlignError::io(path, e))?;
        let artifact: CalibrationArtifact = serde_json::from_str(&text)?;
        Self::try_from(artifact)
    }
}

/// 标定文件的磁盘格式，矩阵按行展开
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationArtifact {
    rotation: [[f64; 3]; 3],
    translation: [f64; 3],
    intrinsics: CameraIntrinsics,
    camera_matrix: [[f64; 3]; 3],
    hypothesis: CoordinateHypothesis,
    reprojection_error_px: f64,
    time_offset_s: f64,
    mirror_x: bool,
    plausible: bool,
}

fn rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)];
        }
    }
    out
}

/// 旋转矩阵正交性 `‖RᵀR − I‖` 与行列式的容差
const ROTATION_TOLERANCE: f64 = 1e-6;

impl CalibrationArtifact {
    fn rotation_matrix(&self) -> Matrix3<f64> {
        let r = self.rotation;
        Matrix3::new(
            r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
        )
    }

    fn validate(&self) -> AlignResult<()> {
        if !(self.reprojection_error_px >= 0.0) || !self.reprojection_error_px.is_finite() {
            return Err(AlignError::InvalidCalibration(format!(
                "reprojection error {} is not a finite non-negative number",
                self.reprojection_error_px
            )));
        }
        let finite = self.rotation.iter().flatten().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
            && self.time_offset_s.is_finite();
        if !finite {
            return Err(AlignError::InvalidCalibration(
                "pose or time offset holds a non-finite value".into(),
            ));
        }
        let m = self.rotation_matrix();
        let drift = (m.transpose() * m - Matrix3::identity()).norm();
        if drift > ROTATION_TOLERANCE || (m.determinant() - 1.0).abs() > ROTATION_TOLERANCE {
            return Err(AlignError::InvalidCalibration(format!(
                "rotation is not orthonormal (|RᵀR - I| = {:.2e}, det = {:.6})",
                drift,
                m.determinant()
            )));
        }
        Ok(())
    }
}

impl From<&CalibrationResult> for CalibrationArtifact {
    fn from(result: &CalibrationResult) -> Self {
        let t = result.pose.translation;
        Self {
            rotation: rows(result.pose.rotation.matrix()),
            translation: [t.x, t.y, t.z],
            intrinsics: result.intrinsics.clone(),
            camera_matrix: rows(&result.camera_matrix()),
            hypothesis: result.hypothesis,
            reprojection_error_px: result.reprojection_error_px,
            time_offset_s: result.time_offset_s,
            mirror_x: result.mirror_x,
            plausible: result.plausible,
        }
    }
}

impl TryFrom<CalibrationArtifact> for CalibrationResult {
    type Error = AlignError;

    fn try_from(a: CalibrationArtifact) -> AlignResult<Self> {
        a.validate()?;
        let m = a.rotation_matrix();
        Ok(Self {
            pose: CameraPose::new(
                Rotation3::from_matrix_unchecked(m),
                Vector3::from(a.translation),
            ),
            intrinsics: a.intrinsics,
            hypothesis: a.hypothesis,
            reprojection_error_px: a.reprojection_error_px,
            time_offset_s: a.time_offset_s,
            mirror_x: a.mirror_x,
            plausible: a.plausible,
        })
    }
}

/// 某个 (时间偏移, 坐标约定) 组合的求解记录
#[derive(Debug, Clone)]
pub struct HypothesisAttempt {
    pub hypothesis: CoordinateHypothesis,
    pub time_offset_s: f64,
    pub pairs: usize,
    pub outcome: Result<AttemptScore, PnpError>,
}

#[derive(Debug, Clone)]
pub struct AttemptScore {
    pub pose: CameraPose,
    pub reprojection_error_px: f64,
    pub inliers: usize,
}

/// 标定搜索的完整输出
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub result: CalibrationResult,
    pub attempts: Vec<HypothesisAttempt>,
    pub warnings: Vec<CalibrationWarning>,
    /// 最优结果所用的配对点数
    pub pairs: usize,
}

fn pnp_options(config: &CalibrationConfig) -> PnpOptions {
    PnpOptions {
        ransac: RansacOptions {
            max_iters: config.ransac_iterations,
            thresh: config.reprojection_threshold_px,
            min_inliers: config.min_inliers,
            seed: config.seed,
            refit_on_inliers: true,
        },
        refine_iterations: config.refine_iterations,
    }
}

/// 对一组配对逐一尝试全部坐标约定
fn solve_hypotheses(
    pairs: &[MatchedPair],
    intrinsics: &CameraIntrinsics,
    config: &CalibrationConfig,
    time_offset_s: f64,
) -> Vec<HypothesisAttempt> {
    let opts = pnp_options(config);
    let image: Vec<Point2<f64>> = pairs.iter().map(|p| p.pixel).collect();
    CoordinateHypothesis::ALL
        .iter()
        .map(|&hypothesis| {
            let object: Vec<Point3<f64>> = pairs
                .iter()
                .map(|p| hypothesis.apply(p.radar.x, p.radar.y))
                .collect();
            let outcome = solve_pnp_ransac(&object, &image, intrinsics, &opts).and_then(|solution| {
                let (error, visible) = visible_reprojection_error(&solution.pose, intrinsics, &object, &image)
                    .ok_or(PnpError::BehindCamera)?;
                if visible < object.len() {
                    debug!(
                        hypothesis = %hypothesis,
                        behind = object.len() - visible,
                        "pairs behind the camera left out of the error"
                    );
                }
                Ok(AttemptScore {
                    pose: solution.pose,
                    reprojection_error_px: error,
                    inliers: solution.inliers.len(),
                })
            });
            match &outcome {
                Ok(score) => debug!(
                    hypothesis = %hypothesis,
                    offset = time_offset_s,
                    error_px = score.reprojection_error_px,
                    inliers = score.inliers,
                    "hypothesis solved"
                ),
                Err(e) => debug!(hypothesis = %hypothesis, offset = time_offset_s, "hypothesis failed: {}", e),
            }
            HypothesisAttempt {
                hypothesis,
                time_offset_s,
                pairs: pairs.len(),
                outcome,
            }
        })
        .collect()
}

/// 按顺序挑选误差最小的尝试；后来者必须领先超过 `tie_tolerance` 才能取代当前最优
fn select_best(attempts: &[HypothesisAttempt], tie_tolerance: f64) -> Option<&HypothesisAttempt> {
    let mut best: Option<(&HypothesisAttempt, f64)> = None;
    for attempt in attempts {
        let Ok(score) = &attempt.outcome else {
            continue;
        };
        let error = score.reprojection_error_px;
        match best {
            Some((_, best_error)) if error >= best_error - tie_tolerance => {}
            _ => best = Some((attempt, error)),
        }
    }
    best.map(|(a, _)| a)
}

fn finish(
    attempts: Vec<HypothesisAttempt>,
    intrinsics: &CameraIntrinsics,
    config: &CalibrationConfig,
    mut warnings: Vec<CalibrationWarning>,
) -> Result<CalibrationReport, CalibrationError> {
    let Some(best) = select_best(&attempts, config.tie_tolerance_px) else {
        return Err(CalibrationError::Unsolved(attempts));
    };
    let Ok(score) = &best.outcome else {
        return Err(CalibrationError::Unsolved(attempts));
    };

    let translation_warning = check_translation(&score.pose.translation, config.max_depth_m);
    let result = CalibrationResult {
        pose: score.pose.clone(),
        intrinsics: intrinsics.clone(),
        hypothesis: best.hypothesis,
        reprojection_error_px: score.reprojection_error_px,
        time_offset_s: best.time_offset_s,
        mirror_x: best.hypothesis.mirrors_x(),
        plausible: translation_warning.is_none(),
    };
    let pairs = best.pairs;
    warnings.extend(translation_warning);
    for w in &warnings {
        warn!("{}", w);
    }
    info!(
        hypothesis = %result.hypothesis,
        error_px = result.reprojection_error_px,
        offset = result.time_offset_s,
        pairs,
        "calibration selected"
    );
    Ok(CalibrationReport {
        result,
        attempts,
        warnings,
        pairs,
    })
}

/// 在一组已配对的观测上做标定搜索（单一时间偏移）。
///
/// # 参数
/// * `pairs` - 配对观测，至少 `config.min_pairs` 对。
/// * `intrinsics` - 相机内参。
/// * `config` - 搜索参数。
/// * `time_offset_s` - 配对所用的时间偏移，原样记录到结果中。
///
/// # 返回值
/// 最优结果与全部尝试记录；配对不足返回 `InsufficientPairs`，全部失败返回 `Unsolved`。
pub fn calibrate_pairs(
    pairs: &[MatchedPair],
    intrinsics: &CameraIntrinsics,
    config: &CalibrationConfig,
    time_offset_s: f64,
) -> Result<CalibrationReport, CalibrationError> {
    if pairs.len() < config.min_pairs {
        return Err(CalibrationError::InsufficientPairs {
            found: pairs.len(),
            required: config.min_pairs,
        });
    }
    let attempts = solve_hypotheses(pairs, intrinsics, config, time_offset_s);
    finish(attempts, intrinsics, config, Vec::new())
}

/// 完整的标定搜索：扫描时间偏移 × 坐标约定。
///
/// 偏移按升序尝试；配对不足的偏移被跳过。误差并列时先尝试者胜出，
/// 因此同样的输入总是选出同一个结果。
///
/// # 参数
/// * `radar` - 雷达轨迹。
/// * `camera` - 相机标注。
/// * `mapper` - 提供帧率与默认时间偏移。
/// * `intrinsics` - 相机内参。
/// * `config` - 搜索参数；`time_offsets` 为 `None` 时只用 `mapper` 的偏移。
///
/// # 返回值
/// [`CalibrationReport`]，或 [`CalibrationError`]。
pub fn calibrate(
    radar: &RadarTrack,
    camera: &CameraTrack,
    mapper: &TemporalMapper,
    intrinsics: &CameraIntrinsics,
    config: &CalibrationConfig,
) -> Result<CalibrationReport, CalibrationError> {
    let sweep = config
        .time_offsets
        .clone()
        .unwrap_or_else(|| OffsetSweep::single(mapper.time_offset()));

    let mut attempts = Vec::new();
    let mut most_pairs = 0;
    for offset in sweep.offsets() {
        let pairs = match_pairs(radar, camera, &mapper.with_offset(offset));
        most_pairs = most_pairs.max(pairs.len());
        if pairs.len() < config.min_pairs {
            debug!(offset, pairs = pairs.len(), "skipping offset with too few pairs");
            continue;
        }
        attempts.extend(solve_hypotheses(&pairs, intrinsics, config, offset));
    }
    if attempts.is_empty() {
        return Err(CalibrationError::InsufficientPairs {
            found: most_pairs,
            required: config.min_pairs,
        });
    }

    let warnings = check_activity(radar, config.min_activity_m).into_iter().collect();
    finish(attempts, intrinsics, config, warnings)
}

/// 批处理中的一个标定任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationJob {
    pub name: String,
    pub radar_track: PathBuf,
    pub camera_track: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug)]
pub struct JobOutcome {
    pub name: String,
    pub result: Result<CalibrationReport, CalibrationError>,
}

fn run_job(job: &CalibrationJob, config: &AppConfig) -> Result<CalibrationReport, CalibrationError> {
    let radar = RadarTrack::read(&job.radar_track)?;
    let camera = CameraTrack::read(&job.camera_track)?;
    let mapper = TemporalMapper::from_config(&config.timing, &config.radar);
    let intrinsics = CameraIntrinsics::from_config(&config.camera);
    let report = calibrate(&radar, &camera, &mapper, &intrinsics, &config.calibration)?;
    report.result.save(&job.output)?;
    Ok(report)
}

/// 依次执行多个标定任务，单个任务失败只记录日志，不影响其余任务
pub fn calibrate_jobs(jobs: &[CalibrationJob], config: &AppConfig) -> Vec<JobOutcome> {
    jobs.iter()
        .map(|job| {
            let result = run_job(job, config);
            match &result {
                Ok(report) => info!(
                    job = %job.name,
                    error_px = report.result.reprojection_error_px,
                    output = %job.output.display(),
                    "job finished"
                ),
                Err(CalibrationError::InsufficientPairs { found, required }) => {
                    warn!(job = %job.name, found, required, "job skipped: not enough matched pairs")
                }
                Err(e) => error!(job = %job.name, "job failed: {}", e),
            }
            JobOutcome {
                name: job.name.clone(),
                result,
            }
        })
        .collect()
}
