// src/camera.rs

//! 针孔相机模型：由传感器参数推导的内参，以及雷达到相机的外参。

use crate::config::CameraConfig;
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// 无畸变针孔内参，主点位于图像中心
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width_px: u32,
    pub height_px: u32,
}

impl CameraIntrinsics {
    /// 由传感器物理尺寸推导内参：`fx = fy = f · W / Sw`。
    ///
    /// # 参数
    /// * `width_px`, `height_px` - 图像分辨率。
    /// * `focal_mm` - 镜头焦距 (毫米)。
    /// * `sensor_width_mm` - 传感器宽度 (毫米)。
    pub fn from_sensor(width_px: u32, height_px: u32, focal_mm: f64, sensor_width_mm: f64) -> Self {
        let f = focal_mm * width_px as f64 / sensor_width_mm;
        Self {
            fx: f,
            fy: f,
            cx: width_px as f64 / 2.0,
            cy: height_px as f64 / 2.0,
            width_px,
            height_px,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::from_sensor(
            config.width_px,
            config.height_px,
            config.focal_length_mm,
            config.sensor_width_mm,
        )
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// 相机坐标系中的点投影到像素；深度不为正时为 `None`
    pub fn project(&self, p_cam: &Point3<f64>) -> Option<Point2<f64>> {
        if p_cam.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            self.fx * p_cam.x / p_cam.z + self.cx,
            self.fy * p_cam.y / p_cam.z + self.cy,
        ))
    }

    /// 像素是否落在 `[0, width) × [0, height)` 内
    pub fn contains(&self, u: f64, v: f64) -> bool {
        u >= 0.0 && u < self.width_px as f64 && v >= 0.0 && v < self.height_px as f64
    }
}

/// 物体坐标到相机坐标的刚体变换：`p_cam = R · p + t`
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl CameraPose {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn transform(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation * p + self.translation
    }

    pub fn project(&self, intrinsics: &CameraIntrinsics, p: &Point3<f64>) -> Option<Point2<f64>> {
        intrinsics.project(&self.transform(p))
    }

    /// 旋转向量（轴角）表示
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    pub fn from_rotation_vector(rvec: &Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self::new(Rotation3::new(*rvec), translation)
    }
}
