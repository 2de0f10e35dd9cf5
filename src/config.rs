//! 计数系统配置 - 通过JSON文件 + 命令行参数调整
//!
//! `CounterConfig` 在启动时构建一次, 之后以 `Arc<CounterConfig>` 只读共享;
//! 运行时状态 (计数/FPS/运行标志) 放在 `counting::SharedStats` 中.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

/// 画面显示模式 (仅影响推流画面, 不影响检测)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Normal,
    Grayscale,
    Edges,
}

/// 计数系统参数配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CounterConfig {
    // === 采集参数 ===
    pub camera_index: usize,  // 摄像头索引
    pub capture_width: u32,   // 采集分辨率提示
    pub capture_height: u32,
    pub capture_fps: u32,     // 采集帧率提示

    // === 检测参数 ===
    pub model_path: String,
    pub frame_skip: u64,      // 每N帧检测一次
    pub conf_threshold: f32,  // 检测置信度阈值
    pub scale: f32,           // 检测前缩放比例
    pub target_label: Option<String>, // 只统计该类别 (None = 全部)
    pub detect_timeout_ms: u64,

    // === 轨迹参数 ===
    pub track_ttl_secs: u64,        // 轨迹过期时间 (0 = 不清理)
    pub eviction_interval_secs: u64,

    // === 推流参数 ===
    pub jpeg_quality: u8,
    pub display_mode: DisplayMode,
    pub font_path: Option<PathBuf>, // 轨迹ID标签字体 (ttf/otf)
    pub stream_timeout_ms: u64,

    // === 循环节奏 ===
    pub loop_sleep_ms: u64,
    pub idle_sleep_ms: u64,

    // === 持久化 ===
    pub event_log_path: PathBuf,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            camera_index: 1,
            capture_width: 640,
            capture_height: 480,
            capture_fps: 15,

            model_path: "models/yolov8n.onnx".to_string(),
            frame_skip: 2,
            conf_threshold: 0.5,
            scale: 1.0,
            target_label: Some("person".to_string()),
            detect_timeout_ms: 2000,

            track_ttl_secs: 30,
            eviction_interval_secs: 5,

            jpeg_quality: 80,
            display_mode: DisplayMode::Normal,
            font_path: None,
            stream_timeout_ms: 1000,

            loop_sleep_ms: 10,
            idle_sleep_ms: 20,

            event_log_path: PathBuf::from("data/crossings.jsonl"),
        }
    }
}

impl CounterConfig {
    /// 从JSON文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), "✅ 配置已加载");
        Ok(config)
    }

    /// 加载配置, 文件不存在时写出默认配置
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        info!(path = %path.display(), "📝 配置文件不存在,创建默认配置");
        let config = Self::default();
        if let Err(e) = config.save(path) {
            warn!(error = %e, "⚠️ 默认配置写出失败,继续使用内存中的默认值");
        }
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_skip == 0 {
            return Err(ConfigError::Invalid {
                field: "frame_skip",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.conf_threshold) {
            return Err(ConfigError::Invalid {
                field: "conf_threshold",
                reason: format!("{} is outside [0, 1]", self.conf_threshold),
            });
        }
        if self.scale <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "scale",
                reason: format!("{} must be positive", self.scale),
            });
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(ConfigError::Invalid {
                field: "capture_width/capture_height",
                reason: "capture size must be non-zero".into(),
            });
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid {
                field: "jpeg_quality",
                reason: format!("{} is outside 1..=100", self.jpeg_quality),
            });
        }
        Ok(())
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    /// `None` 表示关闭轨迹过期清理
    pub fn track_ttl(&self) -> Option<Duration> {
        (self.track_ttl_secs > 0).then(|| Duration::from_secs(self.track_ttl_secs))
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }

    pub fn loop_sleep(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!(
            camera = self.camera_index,
            model = %self.model_path,
            frame_skip = self.frame_skip,
            conf = self.conf_threshold,
            ttl_secs = self.track_ttl_secs,
            "🎛️ 当前计数配置"
        );
    }
}

/// 越线计数程序参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "People Counter - 实时越线计数", long_about = None)]
pub struct Args {
    /// 配置文件 (JSON, 不存在时自动创建)
    #[arg(short, long, default_value = "counter.json")]
    pub config: PathBuf,

    /// 输入源: `camera` (需要 ffmpeg 功能) 或 `replay:<图片目录>`
    #[arg(short, long, default_value = "camera")]
    pub source: String,

    /// 摄像头索引 (覆盖配置文件)
    #[arg(long)]
    pub camera: Option<usize>,

    /// 检测模型路径 (覆盖配置文件)
    #[arg(short, long)]
    pub model: Option<String>,

    /// 每N帧检测一次 (覆盖配置文件)
    #[arg(long)]
    pub frame_skip: Option<u64>,

    /// 置信度阈值 (覆盖配置文件)
    #[arg(long)]
    pub conf: Option<f32>,

    /// 显示模式
    #[arg(long, value_enum)]
    pub display: Option<DisplayMode>,

    /// 事件日志文件 (覆盖配置文件)
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// 启动后不自动开始计数
    #[arg(long)]
    pub paused: bool,

    /// JSON 格式日志
    #[arg(long)]
    pub log_json: bool,
}

impl Args {
    /// 命令行参数覆盖文件配置
    pub fn apply(&self, mut config: CounterConfig) -> Result<CounterConfig, ConfigError> {
        if let Some(camera) = self.camera {
            config.camera_index = camera;
        }
        if let Some(model) = &self.model {
            config.model_path = model.clone();
        }
        if let Some(frame_skip) = self.frame_skip {
            config.frame_skip = frame_skip;
        }
        if let Some(conf) = self.conf {
            config.conf_threshold = conf;
        }
        if let Some(display) = self.display {
            config.display_mode = display;
        }
        if let Some(events) = &self.events {
            config.event_log_path = events.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployed_settings() {
        let config = CounterConfig::default();
        assert_eq!(config.camera_index, 1);
        assert_eq!(config.frame_skip, 2);
        assert_eq!(config.conf_threshold, 0.5);
        assert_eq!(config.target_label.as_deref(), Some("person"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_frame_skip() {
        let config = CounterConfig {
            frame_skip: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "frame_skip", .. })
        ));
    }

    #[test]
    fn zero_ttl_disables_eviction() {
        let config = CounterConfig {
            track_ttl_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.track_ttl(), None);
    }

    #[test]
    fn load_or_default_writes_file_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/counter.json");

        let first = CounterConfig::load_or_default(&path).unwrap();
        assert!(path.exists());

        let second = CounterConfig::load(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.json");
        fs::write(&path, r#"{ "frame_skip": 5, "display_mode": "edges" }"#).unwrap();

        let config = CounterConfig::load(&path).unwrap();
        assert_eq!(config.frame_skip, 5);
        assert_eq!(config.display_mode, DisplayMode::Edges);
        assert_eq!(config.jpeg_quality, 80);
    }

    #[test]
    fn args_override_file_values() {
        let args = Args::parse_from(["people-counter", "--frame-skip", "4", "--conf", "0.3"]);
        let config = args.apply(CounterConfig::default()).unwrap();
        assert_eq!(config.frame_skip, 4);
        assert_eq!(config.conf_threshold, 0.3);
    }
}
