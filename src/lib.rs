// src/lib.rs

//! 毫米波雷达与单目相机的离线时空对齐。
//!
//! 流程：原始 ADC 采集 → [`capture`] 解调 → [`spectrum`] 距离/角度谱 →
//! [`target_processor`] 每帧一个质心 → [`track`] 轨迹清洗 →
//! [`calibration`] 与相机标注配对并求解外参 → [`projector`] 投影与融合导出。

pub mod calibration;
pub mod camera;
pub mod capture;
pub mod cluster;
pub mod config;
pub mod data_generator;
pub mod error;
pub mod fft;
pub mod hypothesis;
pub mod logging;
pub mod pnp;
pub mod projector;
pub mod ransac;
pub mod spectrum;
pub mod target_processor;
pub mod timing;
pub mod track;
pub mod tuning;

pub use calibration::{
    calibrate, calibrate_jobs, calibrate_pairs, match_pairs, CalibrationError, CalibrationJob,
    CalibrationReport, CalibrationResult, CalibrationWarning, MatchedPair,
};
pub use camera::{CameraIntrinsics, CameraPose};
pub use capture::{demodulate, FrameCube, RawCapture};
pub use config::AppConfig;
pub use error::{AlignError, AlignResult};
pub use hypothesis::CoordinateHypothesis;
pub use projector::{merge_fusion_files, FusionExporter, Projection};
pub use target_processor::{TargetCentroid, TargetExtractor};
pub use timing::{RadarLookup, TemporalMapper};
pub use track::{CameraTrack, RadarTrack, StaticClutter};
pub use tuning::{ManualPose, TuningEvent};
