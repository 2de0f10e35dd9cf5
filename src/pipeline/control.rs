//! 控制面: start / stop / reset / get_stats / stream
//!
//! 摄像头和推理线程的生命周期都由 `CounterSystem` 管理; 推理线程内部的
//! 轨迹状态只能通过命令改动.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::frame_buffer::FrameBuffer;
use super::inference::{InferenceLoop, LoopCommand, LoopResources};
use super::render::FrameRenderer;
use super::stream::MjpegStream;
use crate::config::CounterConfig;
use crate::counting::{SharedStats, StatsSnapshot};
use crate::detection::adapter::ModelLoader;
use crate::detection::TimedDetector;
use crate::error::{ControlError, EncodingFailure, ModelError, SinkError, StartError};
use crate::input::{CaptureDevice, CaptureSettings, FrameSource};
use crate::storage::{CrossingEvent, EventSink, Summary};

/// reset 等待确认时, 在检测超时之外额外留出的时间
const RESET_ACK_MARGIN: Duration = Duration::from_secs(1);

/// 计数系统 (采集线程 + 推理线程 + 共享状态)
pub struct CounterSystem {
    config: Arc<CounterConfig>,
    source: Arc<FrameSource>,
    stats: Arc<SharedStats>,
    buffer: Arc<FrameBuffer>,
    sink: Arc<dyn EventSink>,
    loader: ModelLoader,
    commands: Sender<LoopCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// 模型是否已安装 (只加载一次); 同时串行化 start() / stop(),
    /// 保证运行标志与最后送达推理线程的 Run / Pause 一致
    control: Mutex<bool>,
}

impl CounterSystem {
    /// 创建系统并启动 (暂停状态的) 推理线程; 摄像头和模型在 start() 时打开
    pub fn new(
        config: CounterConfig,
        device: Box<dyn CaptureDevice>,
        loader: ModelLoader,
        sink: Arc<dyn EventSink>,
    ) -> std::io::Result<Self> {
        let config = Arc::new(config);
        let source = Arc::new(FrameSource::new(
            device,
            CaptureSettings::from_config(&config),
        ));
        let stats = Arc::new(SharedStats::new());
        let buffer = Arc::new(FrameBuffer::default());
        let (tx, rx) = unbounded();

        let inference = InferenceLoop::new(
            Arc::clone(&config),
            LoopResources {
                source: Arc::clone(&source),
                stats: Arc::clone(&stats),
                buffer: Arc::clone(&buffer),
                sink: Arc::clone(&sink),
            },
            FrameRenderer::from_config(&config),
            rx,
        );
        let worker = inference.spawn()?;

        Ok(Self {
            config,
            source,
            stats,
            buffer,
            sink,
            loader,
            commands: tx,
            worker: Mutex::new(Some(worker)),
            control: Mutex::new(false),
        })
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// 打开摄像头 → 加载模型 (仅第一次) → 开始推理
    pub fn start(&self) -> Result<(), StartError> {
        let mut installed = self.control.lock();

        self.source.start().map_err(|e| {
            error!(error = %e, "❌ 启动失败: 摄像头");
            StartError::Camera(e)
        })?;

        if !*installed {
            let adapter = (self.loader)().map_err(|e| {
                error!(error = %e, "❌ 启动失败: 模型");
                StartError::Model(e)
            })?;
            let detector = TimedDetector::spawn(adapter, self.config.detect_timeout()).map_err(
                |e| StartError::Model(ModelError::new(self.config.model_path.clone(), e)),
            )?;
            self.send(LoopCommand::InstallDetector(detector))
                .map_err(|_| StartError::LoopGone)?;
            *installed = true;
        }

        self.send(LoopCommand::Run)
            .map_err(|_| StartError::LoopGone)?;
        self.stats.set_running(true);
        info!("✅ System started");
        Ok(())
    }

    /// 暂停推理; 摄像头保持打开, 再次 start() 立即恢复
    pub fn stop(&self) {
        let _control = self.control.lock();
        if self.send(LoopCommand::Pause).is_err() {
            warn!("⚠️ 推理线程已退出");
        }
        self.stats.set_running(false);
        info!("System stopped");
    }

    /// 计数清零并清空轨迹状态, 等待推理线程在安全点执行完毕
    pub fn reset(&self) -> Result<(), ControlError> {
        let (ack_tx, ack_rx) = bounded(1);
        self.send(LoopCommand::Reset { ack: ack_tx })?;

        let wait = self.config.detect_timeout() + RESET_ACK_MARGIN;
        match ack_rx.recv_timeout(wait) {
            Ok(()) => {
                info!("Counter reset");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                // 命令仍在队列中, 推理线程空闲后会执行
                warn!(wait_ms = wait.as_millis() as u64, "⚠️ 重置尚未确认");
                Err(ControlError::NotAcknowledged(wait))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ControlError::LoopGone),
        }
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.stats.is_running()
    }

    /// 新的推流分段生成器 (多个观看者共享同一个缓冲, 各自取到部分帧)
    pub fn stream(&self) -> Result<MjpegStream, EncodingFailure> {
        MjpegStream::new(Arc::clone(&self.buffer), self.config.stream_timeout())
    }

    pub fn frame_buffer(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn summary(&self) -> Result<Summary, SinkError> {
        self.sink.summary()
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<CrossingEvent>, SinkError> {
        self.sink.recent(limit)
    }

    /// 停止推理线程和摄像头, 可重复调用
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = self.commands.send(LoopCommand::Shutdown);
            if worker.join().is_err() {
                error!("❌ 推理线程异常退出");
            }
            info!("推理线程已停止");
        }
        self.source.stop();
        self.stats.set_running(false);
    }

    fn send(&self, cmd: LoopCommand) -> Result<(), ControlError> {
        self.commands.send(cmd).map_err(|_| ControlError::LoopGone)
    }
}

impl Drop for CounterSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
