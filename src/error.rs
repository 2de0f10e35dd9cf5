//! 错误类型定义
//! Error taxonomy for the counting pipeline
//!
//! - 启动阶段: DeviceError / ModelError (致命, 返回给调用方)
//! - 逐帧热路径: DetectionFailure / EncodingFailure / SinkError (可恢复, 只记录日志)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 视频设备错误
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("camera {device} cannot be opened: {reason}")]
    Open { device: String, reason: String },

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("no frame within {0:?}")]
    Timeout(Duration),

    #[error("capture device disconnected")]
    Disconnected,
}

/// 模型加载错误
#[derive(Error, Debug)]
#[error("model {path} failed to load: {reason}")]
pub struct ModelError {
    pub path: String,
    pub reason: String,
}

impl ModelError {
    pub fn new(path: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// 单帧检测失败 (可恢复)
#[derive(Error, Debug)]
pub enum DetectionFailure {
    #[error("detector error: {0}")]
    Adapter(String),

    #[error("detection exceeded {0:?}")]
    Timeout(Duration),

    #[error("detector still busy with a previous frame")]
    Busy,

    #[error("detector worker is gone")]
    WorkerGone,

    #[error("no detector installed")]
    NotLoaded,
}

/// JPEG 编码失败 (可恢复)
#[derive(Error, Debug)]
pub enum EncodingFailure {
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),

    #[error("frame has zero size")]
    EmptyFrame,
}

/// 事件持久化错误
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("event log io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event log record {line} is malformed: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file {path} unreadable: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is invalid json: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// `start()` 失败原因: 区分摄像头与模型
#[derive(Error, Debug)]
pub enum StartError {
    #[error("camera_failed: {0}")]
    Camera(#[from] DeviceError),

    #[error("model_failed: {0}")]
    Model(#[from] ModelError),

    #[error("inference loop is not running")]
    LoopGone,
}

impl StartError {
    /// 控制面使用的状态字符串
    pub fn status(&self) -> &'static str {
        match self {
            StartError::Camera(_) => "camera_failed",
            StartError::Model(_) => "model_failed",
            StartError::LoopGone => "loop_gone",
        }
    }
}

/// 控制命令未被推理线程确认
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("inference loop is not running")]
    LoopGone,

    #[error("inference loop did not acknowledge within {0:?}")]
    NotAcknowledged(Duration),
}
