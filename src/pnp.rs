// src/pnp.rs

//! 透视 n 点位姿求解。
//!
//! - 共面点：在归一化相机坐标下用 Hartley 归一化的 DLT 估计单应，再分解为 `[R | t]`；
//! - 非共面点：三维 DLT；
//! - 两者都包在 RANSAC 里，最后在内点上用 Levenberg-Marquardt 最小化像素重投影误差。

use crate::camera::{CameraIntrinsics, CameraPose};
use crate::ransac::{ransac, Estimator, RansacOptions};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn, Matrix3, Matrix3x4, Matrix4, Point2, Point3, Rotation3, Vector3};
use thiserror::Error;
use tracing::debug;

/// 共面判定：散布矩阵最小特征值与最大特征值之比
const PLANAR_RATIO: f64 = 1e-10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PnpError {
    #[error("need at least {needed} correspondences, got {got}")]
    NotEnoughPoints { needed: usize, got: usize },

    #[error("{object} object points but {image} image points")]
    LengthMismatch { object: usize, image: usize },

    #[error("degenerate point configuration: {0}")]
    Degenerate(&'static str),

    #[error("no consensus: no model reached {required} inliers")]
    NoConsensus { required: usize },

    #[error("solved pose puts matched points behind the camera")]
    BehindCamera,
}

#[derive(Debug, Clone)]
pub struct PnpOptions {
    pub ransac: RansacOptions,
    /// LM 精化的最大迭代次数，0 表示不精化
    pub refine_iterations: usize,
}

impl Default for PnpOptions {
    fn default() -> Self {
        Self {
            ransac: RansacOptions::default(),
            refine_iterations: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PnpSolution {
    pub pose: CameraPose,
    pub inliers: Vec<usize>,
    pub planar: bool,
}

/// 每个点的像素重投影误差，落在相机后方的点误差为无穷大
pub fn reprojection_errors(
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Vec<f64> {
    object
        .iter()
        .zip(image)
        .map(|(p, uv)| match pose.project(intrinsics, p) {
            Some(proj) => (proj - uv).norm(),
            None => f64::INFINITY,
        })
        .collect()
}

/// 平均像素重投影误差
pub fn mean_reprojection_error(
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> f64 {
    let errors = reprojection_errors(pose, intrinsics, object, image);
    if errors.is_empty() {
        return f64::INFINITY;
    }
    errors.iter().sum::<f64>() / errors.len() as f64
}

/// 只在相机前方的点上求平均重投影误差。
///
/// 相机后方的点不参与平均，只计入返回的可见点数；没有可见点时返回 `None`。
///
/// # 返回值
/// `(平均误差, 可见点数)`。
pub fn visible_reprojection_error(
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Option<(f64, usize)> {
    let visible: Vec<f64> = reprojection_errors(pose, intrinsics, object, image)
        .into_iter()
        .filter(|e| e.is_finite())
        .collect();
    if visible.is_empty() {
        return None;
    }
    Some((visible.iter().sum::<f64>() / visible.len() as f64, visible.len()))
}

/// 共面点集的局部坐标系：`p = origin + axes · [a, b, 0]`
#[derive(Debug, Clone)]
struct PlaneFrame {
    origin: Point3<f64>,
    axes: Matrix3<f64>,
}

impl PlaneFrame {
    fn to_plane(&self, p: &Point3<f64>) -> Point2<f64> {
        let local = self.axes.transpose() * (p - self.origin);
        Point2::new(local.x, local.y)
    }

    /// 平面坐标系下的位姿换回物体坐标系
    fn to_world(&self, pose: &CameraPose) -> CameraPose {
        let rotation = pose.rotation.matrix() * self.axes.transpose();
        let translation = pose.translation - rotation * self.origin.coords;
        CameraPose::new(Rotation3::from_matrix_unchecked(rotation), translation)
    }
}

enum Configuration {
    Planar(PlaneFrame),
    General,
}

/// 通过散布矩阵的特征值判断点集是共面、共线还是一般位置
fn classify(points: &[Point3<f64>]) -> Result<Configuration, PnpError> {
    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords)
        / n;
    let mut scatter = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        scatter += d * d.transpose();
    }
    let eigen = scatter.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
    let largest = eigen.eigenvalues[order[0]];
    if largest <= f64::EPSILON {
        return Err(PnpError::Degenerate("all object points coincide"));
    }
    if eigen.eigenvalues[order[1]] <= PLANAR_RATIO * largest {
        return Err(PnpError::Degenerate("object points are collinear"));
    }
    if eigen.eigenvalues[order[2]] > PLANAR_RATIO * largest {
        return Ok(Configuration::General);
    }

    let e1: Vector3<f64> = eigen.eigenvectors.column(order[0]).normalize();
    let e2: Vector3<f64> = eigen.eigenvectors.column(order[1]).normalize();
    let e3 = e1.cross(&e2);
    Ok(Configuration::Planar(PlaneFrame {
        origin: Point3::from(centroid),
        axes: Matrix3::from_columns(&[e1, e2, e3]),
    }))
}

/// Hartley 归一化：平移到质心，缩放到平均距离 √2
fn normalization(points: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn apply_h(m: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
    let v = m * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v.x / v.z, v.y / v.z)
}

/// 取 `A` 最小奇异值对应的右奇异向量。行数不足时补零行，保证得到完整的 `V`
fn null_vector(mut a: DMatrix<f64>) -> Option<DVector<f64>> {
    let cols = a.ncols();
    if a.nrows() < cols {
        a = a.resize_vertically(cols, 0.0);
    }
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let idx = svd.singular_values.imin();
    Some(v_t.row(idx).transpose())
}

/// 归一化 DLT 估计单应 `x' ~ H x`
pub fn dlt_homography(plane: &[Point2<f64>], image: &[Point2<f64>]) -> Result<Matrix3<f64>, PnpError> {
    let n = plane.len();
    if n < 4 {
        return Err(PnpError::NotEnoughPoints { needed: 4, got: n });
    }
    if image.len() != n {
        return Err(PnpError::LengthMismatch {
            object: n,
            image: image.len(),
        });
    }
    let t_plane = normalization(plane).ok_or(PnpError::Degenerate("plane points coincide"))?;
    let t_image = normalization(image).ok_or(PnpError::Degenerate("image points coincide"))?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (pw, pi)) in plane.iter().zip(image).enumerate() {
        let w = apply_h(&t_plane, pw);
        let m = apply_h(&t_image, pi);
        let (x, y, u, v) = (w.x, w.y, m.x, m.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;
        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let h = null_vector(a).ok_or(PnpError::Degenerate("homography SVD failed"))?;
    let h_norm = Matrix3::from_row_slice(h.as_slice());
    let t_image_inv = t_image
        .try_inverse()
        .ok_or(PnpError::Degenerate("image normalization is singular"))?;
    Ok(t_image_inv * h_norm * t_plane)
}

/// 把归一化相机坐标下的平面单应 `H ~ [r1 r2 t]` 分解为位姿。
///
/// 尺度取前两列范数的平均；整体符号选择使 `t_z > 0`（平面原点在相机前方）。
/// 旋转经 SVD 投影回 SO(3)。
pub fn pose_from_homography(h: &Matrix3<f64>) -> Result<CameraPose, PnpError> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();
    let norm = (h1.norm() + h2.norm()) * 0.5;
    if norm <= f64::EPSILON {
        return Err(PnpError::Degenerate("homography has vanishing columns"));
    }
    let mut lambda = 1.0 / norm;
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }
    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let translation = h3 * lambda;

    let rotation = project_to_so3(&Matrix3::from_columns(&[r1, r2, r3]))?;
    Ok(CameraPose::new(rotation, translation))
}

fn project_to_so3(m: &Matrix3<f64>) -> Result<Rotation3<f64>, PnpError> {
    let svd = m.svd(true, true);
    let u = svd.u.ok_or(PnpError::Degenerate("rotation SVD failed"))?;
    let v_t = svd.v_t.ok_or(PnpError::Degenerate("rotation SVD failed"))?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }
    Ok(Rotation3::from_matrix_unchecked(r))
}

/// 非共面点的三维 DLT（至少 6 点），输入为归一化相机坐标
pub fn dlt_pose(object: &[Point3<f64>], normalized: &[Point2<f64>]) -> Result<CameraPose, PnpError> {
    let n = object.len();
    if n < 6 {
        return Err(PnpError::NotEnoughPoints { needed: 6, got: n });
    }
    if normalized.len() != n {
        return Err(PnpError::LengthMismatch {
            object: n,
            image: normalized.len(),
        });
    }

    let centroid = object.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n as f64;
    let mean_dist = object.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / n as f64;
    if mean_dist <= f64::EPSILON {
        return Err(PnpError::Degenerate("all object points coincide"));
    }
    let scale = 3.0_f64.sqrt() / mean_dist;
    let t_world = Matrix4::new(
        scale, 0.0, 0.0, -scale * centroid.x,
        0.0, scale, 0.0, -scale * centroid.y,
        0.0, 0.0, scale, -scale * centroid.z,
        0.0, 0.0, 0.0, 1.0,
    );

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (pw, pi)) in object.iter().zip(normalized).enumerate() {
        let q = (pw.coords - centroid) * scale;
        let (x, y, z) = (q.x, q.y, q.z);
        let (u, v) = (pi.x, pi.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -u * x;
        a[(r0, 9)] = -u * y;
        a[(r0, 10)] = -u * z;
        a[(r0, 11)] = -u;
        a[(r1, 4)] = x;
        a[(r1, 5)] = y;
        a[(r1, 6)] = z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -v * x;
        a[(r1, 9)] = -v * y;
        a[(r1, 10)] = -v * z;
        a[(r1, 11)] = -v;
    }

    let p = null_vector(a).ok_or(PnpError::Degenerate("DLT SVD failed"))?;
    let p_mtx = Matrix3x4::from_row_slice(p.as_slice()) * t_world;

    let mut m = p_mtx.fixed_view::<3, 3>(0, 0).into_owned();
    let mut s = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
    if m.determinant() < 0.0 {
        s = -s;
    }
    if s.abs() <= f64::EPSILON {
        return Err(PnpError::Degenerate("DLT solution has zero scale"));
    }
    m /= s;
    let rotation = project_to_so3(&m)?;
    let translation = p_mtx.column(3).into_owned() / s;
    Ok(CameraPose::new(rotation, translation))
}

fn normalize_pixel(intrinsics: &CameraIntrinsics, uv: &Point2<f64>) -> Point2<f64> {
    Point2::new(
        (uv.x - intrinsics.cx) / intrinsics.fx,
        (uv.y - intrinsics.cy) / intrinsics.fy,
    )
}

fn pixel_residual(pose: &CameraPose, intrinsics: &CameraIntrinsics, p: &Point3<f64>, uv: &Point2<f64>) -> f64 {
    match pose.project(intrinsics, p) {
        Some(proj) => (proj - uv).norm(),
        None => f64::INFINITY,
    }
}

struct Correspondence {
    object: Point3<f64>,
    normalized: Point2<f64>,
    pixel: Point2<f64>,
}

/// 共面点：模型为平面坐标系下的位姿，`object` 字段存 `[a, b, 0]`
struct HomographyEstimator<'a> {
    intrinsics: &'a CameraIntrinsics,
}

impl HomographyEstimator<'_> {
    fn solve(&self, data: &[Correspondence], indices: &[usize]) -> Option<CameraPose> {
        let plane: Vec<Point2<f64>> = indices
            .iter()
            .map(|&i| Point2::new(data[i].object.x, data[i].object.y))
            .collect();
        let image: Vec<Point2<f64>> = indices.iter().map(|&i| data[i].normalized).collect();
        let h = dlt_homography(&plane, &image).ok()?;
        pose_from_homography(&h).ok()
    }
}

impl Estimator for HomographyEstimator<'_> {
    type Datum = Correspondence;
    type Model = CameraPose;
    const MIN_SAMPLES: usize = 4;

    fn fit(&self, data: &[Correspondence], sample: &[usize]) -> Option<CameraPose> {
        self.solve(data, sample)
    }

    fn residual(&self, model: &CameraPose, datum: &Correspondence) -> f64 {
        pixel_residual(model, self.intrinsics, &datum.object, &datum.pixel)
    }

    /// 任意三点共线时单应不可解
    fn is_degenerate(&self, data: &[Correspondence], sample: &[usize]) -> bool {
        let pts: Vec<Point2<f64>> = sample
            .iter()
            .map(|&i| Point2::new(data[i].object.x, data[i].object.y))
            .collect();
        let extent = pts
            .iter()
            .flat_map(|a| pts.iter().map(move |b| (a - b).norm_squared()))
            .fold(0.0, f64::max);
        for i in 0..pts.len() {
            for j in i + 1..pts.len() {
                for k in j + 1..pts.len() {
                    let area = (pts[j] - pts[i]).perp(&(pts[k] - pts[i]));
                    if area.abs() <= 1e-9 * extent {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn refit(&self, data: &[Correspondence], inliers: &[usize]) -> Option<CameraPose> {
        self.solve(data, inliers)
    }
}

struct DltEstimator<'a> {
    intrinsics: &'a CameraIntrinsics,
}

impl DltEstimator<'_> {
    fn solve(&self, data: &[Correspondence], indices: &[usize]) -> Option<CameraPose> {
        let object: Vec<Point3<f64>> = indices.iter().map(|&i| data[i].object).collect();
        let image: Vec<Point2<f64>> = indices.iter().map(|&i| data[i].normalized).collect();
        dlt_pose(&object, &image).ok()
    }
}

impl Estimator for DltEstimator<'_> {
    type Datum = Correspondence;
    type Model = CameraPose;
    const MIN_SAMPLES: usize = 6;

    fn fit(&self, data: &[Correspondence], sample: &[usize]) -> Option<CameraPose> {
        self.solve(data, sample)
    }

    fn residual(&self, model: &CameraPose, datum: &Correspondence) -> f64 {
        pixel_residual(model, self.intrinsics, &datum.object, &datum.pixel)
    }

    fn refit(&self, data: &[Correspondence], inliers: &[usize]) -> Option<CameraPose> {
        self.solve(data, inliers)
    }
}

/// 位姿精化问题：参数为 `[旋转向量; 平移]`，残差为各点像素误差的 u、v 分量
struct PoseRefinement<'a> {
    object: Vec<Point3<f64>>,
    image: Vec<Point2<f64>>,
    intrinsics: &'a CameraIntrinsics,
    params: DVector<f64>,
}

impl PoseRefinement<'_> {
    fn pose_of(params: &DVector<f64>) -> CameraPose {
        CameraPose::from_rotation_vector(
            &Vector3::new(params[0], params[1], params[2]),
            Vector3::new(params[3], params[4], params[5]),
        )
    }

    fn residuals_at(&self, params: &DVector<f64>) -> DVector<f64> {
        let pose = Self::pose_of(params);
        let k = self.intrinsics;
        let mut r = DVector::zeros(2 * self.object.len());
        for (i, (p, uv)) in self.object.iter().zip(&self.image).enumerate() {
            let c = pose.transform(p);
            // 相机后方的点给一个很大的有限残差，让 LM 拒绝这一步
            let z = c.z.max(1e-6);
            r[2 * i] = k.fx * c.x / z + k.cx - uv.x;
            r[2 * i + 1] = k.fy * c.y / z + k.cy - uv.y;
        }
        r
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PoseRefinement<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.params))
    }

    /// 中心差分数值雅可比
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        const STEP: f64 = 1e-7;
        let rows = 2 * self.object.len();
        let mut jac = DMatrix::zeros(rows, 6);
        for j in 0..6 {
            let mut plus = self.params.clone();
            let mut minus = self.params.clone();
            plus[j] += STEP;
            minus[j] -= STEP;
            let diff = (self.residuals_at(&plus) - self.residuals_at(&minus)) / (2.0 * STEP);
            jac.set_column(j, &diff);
        }
        Some(jac)
    }
}

/// 用 LM 在给定点上最小化像素重投影误差；结果不优于初值时返回初值
pub fn refine_pose(
    initial: &CameraPose,
    intrinsics: &CameraIntrinsics,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    max_iterations: usize,
) -> CameraPose {
    if max_iterations == 0 || object.len() < 3 {
        return initial.clone();
    }
    let rvec = initial.rotation_vector();
    let t = initial.translation;
    let problem = PoseRefinement {
        object: object.to_vec(),
        image: image.to_vec(),
        intrinsics,
        params: DVector::from_vec(vec![rvec.x, rvec.y, rvec.z, t.x, t.y, t.z]),
    };
    let (problem, report) = LevenbergMarquardt::new()
        .with_patience(max_iterations)
        .minimize(problem);
    let refined = PoseRefinement::pose_of(&problem.params);

    let before = mean_reprojection_error(initial, intrinsics, object, image);
    let after = mean_reprojection_error(&refined, intrinsics, object, image);
    debug!(
        evaluations = report.number_of_evaluations,
        before, after, "pose refinement"
    );
    if after.is_finite() && after <= before {
        refined
    } else {
        initial.clone()
    }
}

/// 鲁棒 PnP：RANSAC 选内点，内点上重新拟合并做 LM 精化。
///
/// # 参数
/// * `object` - 物体坐标系中的三维点。
/// * `image` - 对应的像素坐标。
/// * `intrinsics` - 相机内参。
/// * `opts` - RANSAC 与精化参数。
///
/// # 返回值
/// 物体到相机的位姿与内点下标；点数不足、退化或无一致集时返回 [`PnpError`]。
pub fn solve_pnp_ransac(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    opts: &PnpOptions,
) -> Result<PnpSolution, PnpError> {
    if object.len() != image.len() {
        return Err(PnpError::LengthMismatch {
            object: object.len(),
            image: image.len(),
        });
    }
    if object.len() < 4 {
        return Err(PnpError::NotEnoughPoints {
            needed: 4,
            got: object.len(),
        });
    }

    let configuration = classify(object)?;
    let planar = matches!(configuration, Configuration::Planar(_));
    let (pose, inliers) = match configuration {
        Configuration::Planar(frame) => {
            let data: Vec<Correspondence> = object
                .iter()
                .zip(image)
                .map(|(p, uv)| {
                    let q = frame.to_plane(p);
                    Correspondence {
                        object: Point3::new(q.x, q.y, 0.0),
                        normalized: normalize_pixel(intrinsics, uv),
                        pixel: *uv,
                    }
                })
                .collect();
            let result = ransac(&HomographyEstimator { intrinsics }, &data, &opts.ransac);
            let model = result.model.ok_or(PnpError::NoConsensus {
                required: opts.ransac.min_inliers,
            })?;
            (frame.to_world(&model), result.inliers)
        }
        Configuration::General => {
            if object.len() < 6 {
                return Err(PnpError::NotEnoughPoints {
                    needed: 6,
                    got: object.len(),
                });
            }
            let data: Vec<Correspondence> = object
                .iter()
                .zip(image)
                .map(|(p, uv)| Correspondence {
                    object: *p,
                    normalized: normalize_pixel(intrinsics, uv),
                    pixel: *uv,
                })
                .collect();
            let result = ransac(&DltEstimator { intrinsics }, &data, &opts.ransac);
            let model = result.model.ok_or(PnpError::NoConsensus {
                required: opts.ransac.min_inliers,
            })?;
            (model, result.inliers)
        }
    };

    let inlier_object: Vec<Point3<f64>> = inliers.iter().map(|&i| object[i]).collect();
    let inlier_image: Vec<Point2<f64>> = inliers.iter().map(|&i| image[i]).collect();
    let pose = refine_pose(&pose, intrinsics, &inlier_object, &inlier_image, opts.refine_iterations);
    if !mean_reprojection_error(&pose, intrinsics, &inlier_object, &inlier_image).is_finite() {
        return Err(PnpError::BehindCamera);
    }
    Ok(PnpSolution {
        pose,
        inliers,
        planar,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::from_sensor(3200, 1800, 4.0, 5.9)
    }

    fn ground_truth() -> CameraPose {
        CameraPose::new(
            Rotation3::from_euler_angles(0.1, -0.05, 0.2),
            Vector3::new(0.1, -0.05, 4.0),
        )
    }

    fn project_all(pose: &CameraPose, points: &[Point3<f64>]) -> Vec<Point2<f64>> {
        points
            .iter()
            .map(|p| pose.project(&intrinsics(), p).unwrap())
            .collect()
    }

    #[test]
    fn homography_recovers_planar_pose() {
        let gt = ground_truth();
        let object: Vec<Point3<f64>> = (0..3)
            .flat_map(|i| (0..3).map(move |j| Point3::new(i as f64 * 0.5 - 0.5, j as f64 * 0.4 - 0.4, 0.0)))
            .collect();
        let image = project_all(&gt, &object);
        let solution = solve_pnp_ransac(&object, &image, &intrinsics(), &PnpOptions::default()).unwrap();
        assert!(solution.planar);
        assert_eq!(solution.inliers.len(), 9);
        assert_relative_eq!(solution.pose.rotation.matrix(), gt.rotation.matrix(), epsilon = 1e-6);
        assert_relative_eq!(solution.pose.translation, gt.translation, epsilon = 1e-6);
    }

    #[test]
    fn depth_forward_plane_is_planar() {
        // 位于 y = 0 平面上的点，相机高于该平面 1 米
        let gt = CameraPose::new(
            Rotation3::from_euler_angles(0.1, 0.05, 0.0),
            Vector3::new(0.0, 1.0, 0.5),
        );
        let object: Vec<Point3<f64>> = [(-1.0, 2.0), (1.0, 2.0), (1.0, 4.0), (-1.0, 4.0), (0.2, 3.1), (-0.4, 2.7)]
            .iter()
            .map(|&(x, y)| Point3::new(x, 0.0, y))
            .collect();
        let image = project_all(&gt, &object);
        let solution = solve_pnp_ransac(&object, &image, &intrinsics(), &PnpOptions::default()).unwrap();
        assert!(solution.planar);
        let err = mean_reprojection_error(&solution.pose, &intrinsics(), &object, &image);
        assert!(err < 1e-6, "error {}", err);
    }

    #[test]
    fn dlt_recovers_general_pose() {
        let gt = ground_truth();
        let mut object = Vec::new();
        for z in 0..2 {
            for y in 0..3 {
                for x in 0..4 {
                    object.push(Point3::new(x as f64 * 0.3 - 0.45, y as f64 * 0.3 - 0.3, z as f64 * 0.4));
                }
            }
        }
        let image = project_all(&gt, &object);
        let solution = solve_pnp_ransac(&object, &image, &intrinsics(), &PnpOptions::default()).unwrap();
        assert!(!solution.planar);
        assert_relative_eq!(solution.pose.translation, gt.translation, epsilon = 1e-6);
    }

    #[test]
    fn outliers_are_rejected() {
        let gt = ground_truth();
        let object: Vec<Point3<f64>> = (0..4)
            .flat_map(|i| (0..3).map(move |j| Point3::new(i as f64 * 0.3, j as f64 * 0.35, 0.0)))
            .collect();
        let mut image = project_all(&gt, &object);
        image[2].x += 300.0;
        image[7].y -= 250.0;
        let solution = solve_pnp_ransac(&object, &image, &intrinsics(), &PnpOptions::default()).unwrap();
        assert_eq!(solution.inliers.len(), 10);
        assert!(!solution.inliers.contains(&2));
        assert!(!solution.inliers.contains(&7));
        assert_relative_eq!(solution.pose.translation, gt.translation, epsilon = 1e-6);
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let object: Vec<Point3<f64>> = (0..6).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let image: Vec<Point2<f64>> = (0..6).map(|i| Point2::new(i as f64 * 10.0, 5.0)).collect();
        assert_eq!(
            solve_pnp_ransac(&object, &image, &intrinsics(), &PnpOptions::default()).unwrap_err(),
            PnpError::Degenerate("object points are collinear")
        );
    }

    #[test]
    fn too_few_points() {
        let object = vec![Point3::new(0.0, 0.0, 0.0); 3];
        let image = vec![Point2::new(0.0, 0.0); 3];
        assert!(matches!(
            solve_pnp_ransac(&object, &image, &intrinsics(), &PnpOptions::default()),
            Err(PnpError::NotEnoughPoints { needed: 4, got: 3 })
        ));
    }
}
