// src/tuning.rs

//! 手动调参模型。
//!
//! 参数状态是一个纯值，外部的显示层（窗口、终端或脚本）把按键翻译成
//! [`TuningEvent`] 交给 [`ManualPose::apply`]，再用 [`crate::projector`] 画出投影。

use crate::calibration::{check_translation, CalibrationError, CalibrationResult, MatchedPair};
use crate::camera::{CameraIntrinsics, CameraPose};
use crate::hypothesis::CoordinateHypothesis;
use crate::pnp::{visible_reprojection_error, PnpError};
use nalgebra::{Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

const STEP_ANGLE_DEG: f64 = 1.0;
const STEP_DIST_M: f64 = 0.1;
const STEP_TIME_S: f64 = 0.1;

/// 手动外参：平移 (米)、欧拉角 (度)、时间偏移 (秒) 与 x 镜像开关。
///
/// 镜像默认关闭，从未镜像的 `DepthForward` 约定开始调整。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualPose {
    pub tx: f64,
    /// 高度
    pub ty: f64,
    /// 深度
    pub tz: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    pub roll_deg: f64,
    pub time_offset: f64,
    pub mirror_x: bool,
}

impl Default for ManualPose {
    fn default() -> Self {
        Self {
            tx: 0.0,
            ty: 1.5,
            tz: 0.5,
            pitch_deg: 25.0,
            yaw_deg: 0.0,
            roll_deg: 0.0,
            time_offset: 0.0,
            mirror_x: false,
        }
    }
}

/// 一次离散的参数调整
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningEvent {
    PitchUp,
    PitchDown,
    YawLeft,
    YawRight,
    RollLeft,
    RollRight,
    TxMinus,
    TxPlus,
    TyMinus,
    TyPlus,
    TzMinus,
    TzPlus,
    TimeEarlier,
    TimeLater,
    ToggleMirror,
}

impl TuningEvent {
    /// 默认键位：W/S 俯仰，A/D 偏航，Q/E 横滚，J/L、I/K、U/O 平移，Z/C 时间，M 镜像
    pub fn from_key(key: char) -> Option<Self> {
        let event = match key.to_ascii_lowercase() {
            'w' => TuningEvent::PitchUp,
            's' => TuningEvent::PitchDown,
            'a' => TuningEvent::YawLeft,
            'd' => TuningEvent::YawRight,
            'q' => TuningEvent::RollLeft,
            'e' => TuningEvent::RollRight,
            'j' => TuningEvent::TxMinus,
            'l' => TuningEvent::TxPlus,
            'i' => TuningEvent::TyMinus,
            'k' => TuningEvent::TyPlus,
            'u' => TuningEvent::TzMinus,
            'o' => TuningEvent::TzPlus,
            'z' => TuningEvent::TimeEarlier,
            'c' => TuningEvent::TimeLater,
            'm' => TuningEvent::ToggleMirror,
            _ => return None,
        };
        Some(event)
    }
}

impl ManualPose {
    /// 应用一个事件，返回新的参数值
    pub fn apply(&self, event: TuningEvent) -> Self {
        let mut next = self.clone();
        match event {
            TuningEvent::PitchUp => next.pitch_deg += STEP_ANGLE_DEG,
            TuningEvent::PitchDown => next.pitch_deg -= STEP_ANGLE_DEG,
            TuningEvent::YawLeft => next.yaw_deg -= STEP_ANGLE_DEG,
            TuningEvent::YawRight => next.yaw_deg += STEP_ANGLE_DEG,
            TuningEvent::RollLeft => next.roll_deg -= STEP_ANGLE_DEG,
            TuningEvent::RollRight => next.roll_deg += STEP_ANGLE_DEG,
            TuningEvent::TxMinus => next.tx -= STEP_DIST_M,
            TuningEvent::TxPlus => next.tx += STEP_DIST_M,
            TuningEvent::TyMinus => next.ty -= STEP_DIST_M,
            TuningEvent::TyPlus => next.ty += STEP_DIST_M,
            TuningEvent::TzMinus => next.tz -= STEP_DIST_M,
            TuningEvent::TzPlus => next.tz += STEP_DIST_M,
            TuningEvent::TimeEarlier => next.time_offset -= STEP_TIME_S,
            TuningEvent::TimeLater => next.time_offset += STEP_TIME_S,
            TuningEvent::ToggleMirror => next.mirror_x = !next.mirror_x,
        }
        next
    }

    /// `Rz(roll) · Ry(yaw) · Rx(pitch)`
    pub fn rotation(&self) -> Rotation3<f64> {
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), self.pitch_deg.to_radians());
        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), self.yaw_deg.to_radians());
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), self.roll_deg.to_radians());
        rz * ry * rx
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.tx, self.ty, self.tz)
    }

    pub fn hypothesis(&self) -> CoordinateHypothesis {
        if self.mirror_x {
            CoordinateHypothesis::MirrorX
        } else {
            CoordinateHypothesis::DepthForward
        }
    }

    pub fn pose(&self) -> CameraPose {
        CameraPose::new(self.rotation(), self.translation())
    }

    /// 把手动参数固化为标定结果，并在给定配对上计算平均重投影误差。
    ///
    /// # 参数
    /// * `intrinsics` - 相机内参。
    /// * `pairs` - 用于评分的配对，不能为空。
    /// * `max_depth_m` - 平移深度的合理上限。
    ///
    /// # 返回值
    /// 坐标约定为 `DepthForward` 或 `MirrorX` 的 [`CalibrationResult`]，误差只统计相机前方的点；
    /// 全部配对点都在相机后方时返回 `PnpError::BehindCamera`。
    pub fn to_calibration(
        &self,
        intrinsics: &CameraIntrinsics,
        pairs: &[MatchedPair],
        max_depth_m: f64,
    ) -> Result<CalibrationResult, CalibrationError> {
        if pairs.is_empty() {
            return Err(CalibrationError::InsufficientPairs {
                found: 0,
                required: 1,
            });
        }
        let hypothesis = self.hypothesis();
        let pose = self.pose();
        let object: Vec<Point3<f64>> = pairs
            .iter()
            .map(|p| hypothesis.apply(p.radar.x, p.radar.y))
            .collect();
        let image: Vec<Point2<f64>> = pairs.iter().map(|p| p.pixel).collect();
        let (error, _) =
            visible_reprojection_error(&pose, intrinsics, &object, &image).ok_or(PnpError::BehindCamera)?;
        let plausible = check_translation(&pose.translation, max_depth_m).is_none();
        Ok(CalibrationResult {
            pose,
            intrinsics: intrinsics.clone(),
            hypothesis,
            reprojection_error_px: error,
            time_offset_s: self.time_offset,
            mirror_x: self.mirror_x,
            plausible,
        })
    }
}
