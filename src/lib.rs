#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 计数配置参数
pub mod counting; // 越线计数 + 共享统计
pub mod detection; // 检测/跟踪适配层
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod pipeline; // 推理线程 + 推流 + 控制面
pub mod storage; // 计数事件持久化

pub use crate::config::{Args, CounterConfig, DisplayMode};
pub use crate::counting::{CrossingCounter, SharedStats, StatsSnapshot};
pub use crate::detection::{DetectAndTrack, Detection, ModelLoader};
pub use crate::error::{ControlError, DetectionFailure, DeviceError, ModelError, StartError};
pub use crate::pipeline::{CounterSystem, FrameBuffer, MjpegStream};
pub use crate::storage::{CrossingEvent, Direction, EventSink, JsonlSink, MemorySink, Summary};
