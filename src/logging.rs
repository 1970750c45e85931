// src/logging.rs

use tracing_subscriber::{fmt, EnvFilter};

/// 初始化日志输出。
///
/// 优先使用环境变量 `RUST_LOG`，未设置或无法解析时退回到 `default_level`。
/// 重复调用时后续调用不生效。
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
