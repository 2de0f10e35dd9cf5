/// People Counter - 实时越线计数
///
/// 主程序入口 - 直接运行: cargo run --bin people-counter --release --features onnx,ffmpeg
/// 无摄像头时可用图片目录回放: --source replay:<dir>
///
/// 启动后从标准输入读取控制命令 (start/stop/reset/stats/summary/recent/snapshot/quit).
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use people_counter_rs::detection::ModelLoader;
use people_counter_rs::input::{CaptureDevice, ReplayDevice};
use people_counter_rs::{Args, CounterConfig, CounterSystem, JsonlSink};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ort=warn,ez_ffmpeg=warn"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_names(true),
            )
            .with(env_filter)
            .init();
    }
}

/// 输入源: `replay:<dir>` 或 `camera`
fn build_device(source: &str, config: &CounterConfig) -> Result<Box<dyn CaptureDevice>> {
    if let Some(dir) = source.strip_prefix("replay:") {
        info!(dir, "📼 使用图片回放输入");
        return Ok(Box::new(ReplayDevice::from_dir(dir)));
    }
    if source != "camera" {
        bail!("unknown source `{}` (expected `camera` or `replay:<dir>`)", source);
    }
    camera_device(config)
}

#[cfg(feature = "ffmpeg")]
fn camera_device(config: &CounterConfig) -> Result<Box<dyn CaptureDevice>> {
    use people_counter_rs::input::{list_camera_devices, FfmpegCamera};

    let devices = list_camera_devices();
    for (index, name) in &devices {
        info!(index, name = %name, "📷 可用摄像头");
    }
    let name = devices
        .iter()
        .find(|(index, _)| *index == config.camera_index)
        .map(|(_, name)| name.clone());
    Ok(Box::new(FfmpegCamera::new(name)))
}

#[cfg(not(feature = "ffmpeg"))]
fn camera_device(_config: &CounterConfig) -> Result<Box<dyn CaptureDevice>> {
    bail!("camera input requires the `ffmpeg` feature; use --source replay:<dir>")
}

#[cfg(feature = "onnx")]
fn model_loader(config: &CounterConfig) -> ModelLoader {
    use people_counter_rs::detection::{DetectAndTrack, YoloDetector};

    let path = config.model_path.clone();
    Box::new(move || {
        YoloDetector::load(&path).map(|detector| Box::new(detector) as Box<dyn DetectAndTrack>)
    })
}

#[cfg(not(feature = "onnx"))]
fn model_loader(config: &CounterConfig) -> ModelLoader {
    use people_counter_rs::ModelError;

    let path = config.model_path.clone();
    Box::new(move || Err(ModelError::new(path.clone(), "built without the `onnx` feature")))
}

fn print_help() {
    println!("命令: start | stop | reset | stats | summary | recent [n] | snapshot <path> | quit");
}

/// 控制台命令
#[derive(Debug, PartialEq)]
enum Command {
    Start,
    Stop,
    Reset,
    Stats,
    Summary,
    Recent(usize),
    Snapshot(PathBuf),
    Help,
    Quit,
}

impl Command {
    /// 解析一行输入; 空行返回 None, 输入有误时返回给用户看的提示
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return Ok(None);
        };

        let command = match cmd {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "reset" => Command::Reset,
            "stats" => Command::Stats,
            "summary" => Command::Summary,
            "recent" => match parts.next().map(str::parse::<usize>).transpose() {
                Ok(limit) => Command::Recent(limit.unwrap_or(10)),
                Err(e) => return Err(format!("用法: recent [n] ({})", e)),
            },
            "snapshot" => match parts.next() {
                Some(path) => Command::Snapshot(PathBuf::from(path)),
                None => return Err("用法: snapshot <path>".into()),
            },
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("未知命令: {}", other)),
        };
        Ok(Some(command))
    }
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string(value) {
        Ok(text) => println!("{}", text),
        Err(e) => warn!(error = %e, "⚠️ JSON 序列化失败"),
    }
}

/// 标准输入控制台, 返回时程序退出; 单条命令出错只打印提示
fn console(system: &CounterSystem) -> Result<()> {
    print_help();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(hint) => {
                println!("{}", hint);
                continue;
            }
        };

        match command {
            Command::Start => match system.start() {
                Ok(()) => println!("{}", json!({ "status": "started" })),
                Err(e) => println!("{}", json!({ "status": e.status(), "error": e.to_string() })),
            },
            Command::Stop => {
                system.stop();
                println!("{}", json!({ "status": "stopped" }));
            }
            Command::Reset => match system.reset() {
                Ok(()) => println!("{}", json!({ "status": "reset" })),
                Err(e) => println!("{}", json!({ "status": "reset_pending", "error": e.to_string() })),
            },
            Command::Stats => print_json(&system.get_stats()),
            Command::Summary => match system.summary() {
                Ok(summary) => print_json(&summary),
                Err(e) => warn!(error = %e, "⚠️ 汇总查询失败"),
            },
            Command::Recent(limit) => match system.recent(limit) {
                Ok(events) => print_json(&events),
                Err(e) => warn!(error = %e, "⚠️ 记录查询失败"),
            },
            Command::Snapshot(path) => {
                let timeout = system.config().stream_timeout();
                match system.frame_buffer().consume(timeout) {
                    Some(frame) => match std::fs::write(&path, &frame.jpeg) {
                        Ok(()) => println!(
                            "✅ 已保存 {} ({}x{})",
                            path.display(),
                            frame.width,
                            frame.height
                        ),
                        Err(e) => warn!(path = %path.display(), error = %e, "⚠️ 快照写入失败"),
                    },
                    None => println!("⚠️ {:?} 内没有新画面", timeout),
                }
            }
            Command::Help => print_help(),
            Command::Quit => break,
        }
        io::stdout().flush()?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = CounterConfig::load_or_default(&args.config)?;
    let config = args.apply(config)?;
    config.log_summary();

    let device = build_device(&args.source, &config)?;
    let loader = model_loader(&config);
    let sink = Arc::new(
        JsonlSink::open(&config.event_log_path)
            .with_context(|| format!("open event log {}", config.event_log_path.display()))?,
    );

    let system = CounterSystem::new(config, device, loader, sink)?;
    info!("🚀 People Counter 已就绪");

    if !args.paused {
        if let Err(e) = system.start() {
            error!(status = e.status(), error = %e, "❌ 自动启动失败, 可在控制台重试 start");
        }
    }

    let result = console(&system);
    system.shutdown();
    info!("👋 退出");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(Command::parse("start"), Ok(Some(Command::Start)));
        assert_eq!(Command::parse("  recent  "), Ok(Some(Command::Recent(10))));
        assert_eq!(Command::parse("recent 3"), Ok(Some(Command::Recent(3))));
        assert_eq!(
            Command::parse("snapshot /tmp/frame.jpg"),
            Ok(Some(Command::Snapshot(PathBuf::from("/tmp/frame.jpg"))))
        );
        assert_eq!(Command::parse("exit"), Ok(Some(Command::Quit)));
        assert_eq!(Command::parse(""), Ok(None));
    }

    #[test]
    fn bad_input_is_a_hint_not_an_exit() {
        assert!(Command::parse("recent x").unwrap_err().contains("recent"));
        assert!(Command::parse("recent -1").is_err());
        assert!(Command::parse("snapshot").is_err());
        assert_eq!(Command::parse("stpo"), Err("未知命令: stpo".to_string()));
    }
}
