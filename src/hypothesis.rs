// src/hypothesis.rs

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 雷达平面坐标 `(x, y)` 到物体坐标的候选约定。
///
/// 雷达板的安装方向事先未知，标定时逐一尝试，按重投影误差挑选。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateHypothesis {
    /// `[x, y, 0]`
    Identity,
    /// `[x, 0, y]`，y 作为深度
    DepthForward,
    /// `[-x, 0, y]`
    MirrorX,
    /// `[x, 0, -y]`
    MirrorY,
}

impl CoordinateHypothesis {
    /// 按尝试顺序列出的全部假设，误差并列时靠前者胜出
    pub const ALL: [CoordinateHypothesis; 4] = [
        CoordinateHypothesis::Identity,
        CoordinateHypothesis::DepthForward,
        CoordinateHypothesis::MirrorX,
        CoordinateHypothesis::MirrorY,
    ];

    pub fn apply(&self, x: f64, y: f64) -> Point3<f64> {
        match self {
            CoordinateHypothesis::Identity => Point3::new(x, y, 0.0),
            CoordinateHypothesis::DepthForward => Point3::new(x, 0.0, y),
            CoordinateHypothesis::MirrorX => Point3::new(-x, 0.0, y),
            CoordinateHypothesis::MirrorY => Point3::new(x, 0.0, -y),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CoordinateHypothesis::Identity => "Identity [x, y, 0]",
            CoordinateHypothesis::DepthForward => "DepthForward [x, 0, y]",
            CoordinateHypothesis::MirrorX => "MirrorX [-x, 0, y]",
            CoordinateHypothesis::MirrorY => "MirrorY [x, 0, -y]",
        }
    }

    pub fn mirrors_x(&self) -> bool {
        matches!(self, CoordinateHypothesis::MirrorX)
    }
}

impl fmt::Display for CoordinateHypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
