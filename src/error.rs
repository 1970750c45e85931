// src/error.rs

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 库内通用的结果类型
pub type AlignResult<T> = Result<T, AlignError>;

/// 数据读取、配置与解调阶段的错误
#[derive(Error, Debug)]
pub enum AlignError {
    /// 文件读写失败
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 文本文件中某一行无法解析
    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// 配置参数本身不合法
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 硬件参数无法整齐切分采样数据，通常意味着配置与采集设置不一致
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// 数据量不足一帧
    #[error("capture holds {complex_samples} complex samples, fewer than one frame of {frame_size}")]
    EmptyCapture {
        complex_samples: usize,
        frame_size: usize,
    },

    /// 标定结果中存在非有限数值或非正交旋转，不能写出或读入
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AlignError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AlignError::Io {
            path: path.into(),
            source,
        }
    }
}
