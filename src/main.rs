// src/main.rs
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use radar_align::config::{AppConfig, OffsetSweep};
use radar_align::spectrum::{doppler_time_map, range_time_map};
use radar_align::{
    calibrate, calibrate_jobs, demodulate, logging, match_pairs, merge_fusion_files, CalibrationJob, CalibrationResult,
    CameraIntrinsics, CameraTrack, FusionExporter, ManualPose, RadarTrack, RawCapture, StaticClutter,
    TargetExtractor, TemporalMapper, TuningEvent,
};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 毫米波雷达与相机的离线时空对齐工具
#[derive(Debug, Parser)]
#[command(author, version, about = "Offline radar-camera spatio-temporal alignment")]
struct Cli {
    /// JSON 配置文件，缺省时使用内置默认值
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 日志级别，`RUST_LOG` 优先
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 从原始 ADC 采集提取雷达轨迹
    Extract {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// 剔除静止杂波中心附近的点
    Clean {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// 输出距离-时间图与微多普勒时频图
    Spectrogram {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        range_output: PathBuf,
        #[arg(long)]
        doppler_output: PathBuf,
    },
    /// 求解外参与时间偏移
    Calibrate(CalibrateArgs),
    /// 按键序列调整手动外参并保存。
    ///
    /// 初始参数不镜像 (mirror_x=false，DepthForward 约定)，需要镜像时按 `m` 切换。
    Manual {
        #[arg(long)]
        radar: PathBuf,
        #[arg(long)]
        camera: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// 初始参数 (JSON)，缺省为内置初始值，其中镜像关闭
        #[arg(long)]
        start: Option<PathBuf>,
        /// 按键序列，例如 `wwdm`
        #[arg(long, default_value = "")]
        keys: String,
    },
    /// 按标定结果导出融合数据集
    Export {
        #[arg(long)]
        calibration: PathBuf,
        #[arg(long)]
        radar: PathBuf,
        #[arg(long)]
        frames: u64,
        #[arg(long)]
        output: PathBuf,
    },
    /// 按视频帧号合并多个相机的融合数据，第一个文件为主相机
    Merge {
        /// 各相机的融合 CSV，依次记为 C1、C2 ……
        #[arg(long, num_args = 1.., required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Debug, Args)]
struct CalibrateArgs {
    #[arg(long, required_unless_present = "jobs")]
    radar: Option<PathBuf>,
    #[arg(long, required_unless_present = "jobs")]
    camera: Option<PathBuf>,
    #[arg(long, required_unless_present = "jobs")]
    output: Option<PathBuf>,
    /// 批处理任务列表 (JSON 数组)
    #[arg(long, conflicts_with_all = ["radar", "camera", "output"])]
    jobs: Option<PathBuf>,
    /// 时间偏移扫描：起点 终点 步长 (秒)
    #[arg(long, num_args = 3, value_names = ["START", "STOP", "STEP"], allow_negative_numbers = true)]
    sweep: Option<Vec<f64>>,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Extract { input, output } => run_extract(&config, &input, &output),
        Command::Clean { input, output } => run_clean(&config, &input, &output),
        Command::Spectrogram {
            input,
            range_output,
            doppler_output,
        } => run_spectrogram(&config, &input, &range_output, &doppler_output),
        Command::Calibrate(args) => run_calibrate(config, args),
        Command::Manual {
            radar,
            camera,
            output,
            start,
            keys,
        } => run_manual(&config, &radar, &camera, &output, start.as_deref(), &keys),
        Command::Export {
            calibration,
            radar,
            frames,
            output,
        } => run_export(&config, &calibration, &radar, frames, &output),
        Command::Merge { inputs, output } => run_merge(&inputs, &output),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading config {}", path.display())),
        None => {
            let config = AppConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn run_extract(config: &AppConfig, input: &Path, output: &Path) -> Result<()> {
    let raw = RawCapture::from_file(input)?;
    let cube = demodulate(&raw, &config.radar).with_context(|| format!("demodulating {}", input.display()))?;
    let extractor = TargetExtractor::new(config.radar.clone(), config.extractor.clone())?;
    let track = extractor.extract_track(&cube);
    track.write(output)?;
    info!(path = %output.display(), "radar track saved");
    Ok(())
}

fn run_clean(config: &AppConfig, input: &Path, output: &Path) -> Result<()> {
    let mut track = RadarTrack::read(input)?;
    match StaticClutter::detect(&track, config.clean.histogram_bins) {
        Some(clutter) => {
            let removed = track.reject_static(&clutter.center, config.clean.radius);
            info!(
                center_x = clutter.center.x,
                center_y = clutter.center.y,
                removed,
                "static clutter rejected"
            );
        }
        None => warn!("track has no usable points, nothing to clean"),
    }
    track.write(output)?;
    Ok(())
}

fn write_matrix(path: &Path, rows: &[Vec<f64>]) -> Result<()> {
    let mut out = String::new();
    for row in rows {
        let line: Vec<String> = row.iter().map(|v| format!("{:.3}", v)).collect();
        let _ = writeln!(out, "{}", line.join(" "));
    }
    fs::write(path, out).with_context(|| format!("writing {}", path.display()))
}

fn run_spectrogram(config: &AppConfig, input: &Path, range_output: &Path, doppler_output: &Path) -> Result<()> {
    let raw = RawCapture::from_file(input)?;
    let cube = demodulate(&raw, &config.radar)?;
    let floor = config.extractor.db_floor;
    write_matrix(range_output, &range_time_map(&cube, floor))?;
    write_matrix(doppler_output, &doppler_time_map(&cube, floor))?;
    info!(frames = cube.num_frames(), "spectrograms written");
    Ok(())
}

fn run_calibrate(mut config: AppConfig, args: CalibrateArgs) -> Result<()> {
    if let Some(sweep) = args.sweep {
        config.calibration.time_offsets = Some(OffsetSweep {
            start: sweep[0],
            stop: sweep[1],
            step: sweep[2],
        });
        config.validate()?;
    }

    if let Some(jobs_path) = args.jobs {
        let text = fs::read_to_string(&jobs_path).with_context(|| format!("reading {}", jobs_path.display()))?;
        let jobs: Vec<CalibrationJob> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", jobs_path.display()))?;
        let outcomes = calibrate_jobs(&jobs, &config);
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(total = outcomes.len(), failed, "batch finished");
        if failed == outcomes.len() && !outcomes.is_empty() {
            bail!("all {} calibration jobs failed", failed);
        }
        return Ok(());
    }

    let (Some(radar_path), Some(camera_path), Some(output)) = (args.radar, args.camera, args.output) else {
        bail!("--radar, --camera and --output are required without --jobs");
    };
    let radar = RadarTrack::read(&radar_path)?;
    let camera = CameraTrack::read(&camera_path)?;
    let mapper = TemporalMapper::from_config(&config.timing, &config.radar);
    let intrinsics = CameraIntrinsics::from_config(&config.camera);
    let report = calibrate(&radar, &camera, &mapper, &intrinsics, &config.calibration)?;
    report.result.save(&output)?;
    println!(
        "hypothesis={} error_px={:.3} offset_s={:.3} pairs={} plausible={}",
        report.result.hypothesis,
        report.result.reprojection_error_px,
        report.result.time_offset_s,
        report.pairs,
        report.result.plausible
    );
    Ok(())
}

fn run_manual(
    config: &AppConfig,
    radar: &Path,
    camera: &Path,
    output: &Path,
    start: Option<&Path>,
    keys: &str,
) -> Result<()> {
    let mut pose = match start {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<ManualPose>(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => ManualPose::default(),
    };
    for key in keys.chars() {
        match TuningEvent::from_key(key) {
            Some(event) => pose = pose.apply(event),
            None => warn!(key = %key, "ignoring unbound key"),
        }
    }

    let radar = RadarTrack::read(radar)?;
    let camera = CameraTrack::read(camera)?;
    let mapper = TemporalMapper::from_config(&config.timing, &config.radar).with_offset(pose.time_offset);
    let pairs = match_pairs(&radar, &camera, &mapper);
    let intrinsics = CameraIntrinsics::from_config(&config.camera);
    let result = pose.to_calibration(&intrinsics, &pairs, config.calibration.max_depth_m)?;
    if !result.plausible {
        warn!(depth_m = result.pose.translation.z, "manual translation looks implausible");
    }
    result.save(output)?;
    println!(
        "pitch={:.1} yaw={:.1} roll={:.1} t=({:.2}, {:.2}, {:.2}) offset_s={:.1} mirror={} error_px={:.3}",
        pose.pitch_deg,
        pose.yaw_deg,
        pose.roll_deg,
        pose.tx,
        pose.ty,
        pose.tz,
        pose.time_offset,
        pose.mirror_x,
        result.reprojection_error_px
    );
    Ok(())
}

fn run_export(config: &AppConfig, calibration: &Path, radar: &Path, frames: u64, output: &Path) -> Result<()> {
    let calib = CalibrationResult::load(calibration)?;
    let radar = RadarTrack::read(radar)?;
    let mapper = TemporalMapper::from_config(&config.timing, &config.radar);
    let rows = FusionExporter::new(&calib, &radar, &mapper).export(frames, output)?;
    println!("{} rows written to {}", rows, output.display());
    Ok(())
}

fn run_merge(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let inputs: Vec<&Path> = inputs.iter().map(PathBuf::as_path).collect();
    let rows = merge_fusion_files(&inputs, output)?;
    println!("{} cameras merged, {} rows written to {}", inputs.len(), rows, output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn manual_help_states_mirror_default() {
        let mut cli = Cli::command();
        let manual = cli.find_subcommand_mut("manual").unwrap();
        let help = manual.render_long_help().to_string();
        assert!(help.contains("mirror_x=false"));
    }

    #[test]
    fn merge_accepts_several_inputs() {
        let cli = Cli::try_parse_from(["radar_align_main", "merge", "--inputs", "c1.csv", "c2.csv", "--output", "m.csv"])
            .unwrap();
        match cli.command {
            Command::Merge { inputs, output } => {
                assert_eq!(inputs, vec![PathBuf::from("c1.csv"), PathBuf::from("c2.csv")]);
                assert_eq!(output, PathBuf::from("m.csv"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(Cli::try_parse_from(["radar_align_main", "merge", "--output", "m.csv"]).is_err());
    }
}
