/// 推理线程: 读取最新帧 → 每N帧检测+计数 → 更新统计 → 写事件 → 编码推流
/// Inference loop: the single writer of track state, counters and the stream buffer
///
/// 外部控制 (运行/暂停/重置/安装检测器/退出) 都通过命令通道送达,
/// 在每次迭代开头的安全点处理; 暂停时阻塞在命令通道上.
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use image::imageops::{self, FilterType};
use tracing::{debug, error, info, warn};

use super::frame_buffer::FrameBuffer;
use super::render::{FrameRenderer, Overlay};
use crate::config::CounterConfig;
use crate::counting::{CrossingCounter, CrossingTally, FpsMeter, SharedStats};
use crate::detection::{Detection, TimedDetector};
use crate::error::DetectionFailure;
use crate::input::{Frame, FrameSource};
use crate::storage::EventSink;

/// 推理线程命令
pub enum LoopCommand {
    Run,
    Pause,
    /// 清空计数和轨迹状态, 完成后在 ack 上回复
    Reset { ack: Sender<()> },
    InstallDetector(TimedDetector),
    Shutdown,
}

/// 单次迭代的结果
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// 还没有帧, 或最新帧已经处理过
    NoFrame,
    Published {
        frame_id: u64,
        detected: bool,
        tally: CrossingTally,
    },
    /// 编码失败, 本帧未进入推流缓冲
    Dropped {
        frame_id: u64,
        tally: CrossingTally,
    },
}

impl StepOutcome {
    pub fn tally(&self) -> Option<&CrossingTally> {
        match self {
            StepOutcome::NoFrame => None,
            StepOutcome::Published { tally, .. } | StepOutcome::Dropped { tally, .. } => {
                Some(tally)
            }
        }
    }
}

/// 推理线程共享资源
pub struct LoopResources {
    pub source: Arc<FrameSource>,
    pub stats: Arc<SharedStats>,
    pub buffer: Arc<FrameBuffer>,
    pub sink: Arc<dyn EventSink>,
}

/// 推理线程以任何方式结束时清除运行标志
struct RunningGuard(Arc<SharedStats>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.set_running(false);
    }
}

pub struct InferenceLoop {
    config: Arc<CounterConfig>,
    res: LoopResources,
    renderer: FrameRenderer,
    commands: Receiver<LoopCommand>,
    detector: Option<TimedDetector>,
    counter: CrossingCounter,
    fps: FpsMeter,
    running: bool,
    frame_id: u64,
    last_sequence: Option<u64>,
    last_eviction: Instant,

    // 每秒统计 (debug 日志)
    report_at: Instant,
    report_frames: u64,
    report_detections: u64,
    report_failures: u64,
}

impl InferenceLoop {
    pub fn new(
        config: Arc<CounterConfig>,
        res: LoopResources,
        renderer: FrameRenderer,
        commands: Receiver<LoopCommand>,
    ) -> Self {
        let counter = CrossingCounter::new(config.target_label.clone());
        let now = Instant::now();
        Self {
            config,
            res,
            renderer,
            commands,
            detector: None,
            counter,
            fps: FpsMeter::new(),
            running: false,
            frame_id: 0,
            last_sequence: None,
            last_eviction: now,
            report_at: now,
            report_frames: 0,
            report_detections: 0,
            report_failures: 0,
        }
    }

    /// 在独立线程中运行
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("inference".into())
            .spawn(move || self.run())
    }

    pub fn run(mut self) {
        info!("🔍 推理线程启动");
        let _running = RunningGuard(Arc::clone(&self.res.stats));
        loop {
            // 1. 处理积压的命令
            loop {
                match self.commands.try_recv() {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            return self.exit();
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return self.exit(),
                }
            }

            // 2. 暂停时阻塞等待命令
            if !self.running {
                match self.commands.recv() {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            return self.exit();
                        }
                    }
                    Err(_) => return self.exit(),
                }
                continue;
            }

            // 3. 一次迭代; 单帧内的 panic 只丢弃该帧
            let pause = match panic::catch_unwind(AssertUnwindSafe(|| self.step())) {
                Ok(StepOutcome::NoFrame) => self.config.idle_sleep(),
                Ok(_) => self.config.loop_sleep(),
                Err(_) => {
                    error!(frame_id = self.frame_id, "❌ 帧处理 panic, 跳过该帧");
                    self.config.loop_sleep()
                }
            };
            self.report_if_due();
            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }
    }

    fn exit(&mut self) {
        self.res.stats.set_running(false);
        info!(frames = self.frame_id, "🔍 推理线程退出");
    }

    /// 返回 false 表示退出
    pub fn handle_command(&mut self, cmd: LoopCommand) -> bool {
        match cmd {
            LoopCommand::Run => {
                if !self.running {
                    self.running = true;
                    // 暂停期间的时间不计入FPS
                    self.fps.reset();
                    info!("▶️ 推理运行");
                }
            }
            LoopCommand::Pause => {
                if self.running {
                    self.running = false;
                    info!("⏸️ 推理暂停");
                }
            }
            LoopCommand::Reset { ack } => {
                self.reset_state();
                let _ = ack.send(());
            }
            LoopCommand::InstallDetector(detector) => {
                info!(detector = %detector.name(), "🧠 检测器已安装");
                self.detector = Some(detector);
            }
            LoopCommand::Shutdown => return false,
        }
        true
    }

    fn reset_state(&mut self) {
        let tracks = self.counter.track_count();
        self.counter.clear();
        self.res.stats.reset_counts();
        info!(tracks, "🔄 计数已重置");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn counter(&self) -> &CrossingCounter {
        &self.counter
    }

    /// 一次迭代: 读帧 → (检测 → 计数 → 统计 → 事件) → 编码推流
    pub fn step(&mut self) -> StepOutcome {
        let Some(frame) = self.res.source.read() else {
            return StepOutcome::NoFrame;
        };
        // 采集线程还没出新帧
        if self.last_sequence == Some(frame.sequence) {
            return StepOutcome::NoFrame;
        }
        self.last_sequence = Some(frame.sequence);

        let now = Instant::now();
        let fps = self.fps.tick(now);
        self.res.stats.set_fps(fps);
        self.frame_id += 1;
        self.report_frames += 1;
        let frame_id = self.frame_id;

        let mut tally = CrossingTally::default();
        let mut detections: Option<Vec<Detection>> = None;

        if frame_id % self.config.frame_skip.max(1) == 0 {
            self.report_detections += 1;
            match self.detect(&frame) {
                Ok(dets) => {
                    tally = self.counter.update(&dets, frame.width(), now);
                    detections = Some(dets);
                }
                Err(e) => {
                    // 检测失败: 原样推流, 增量为 (0, 0)
                    self.report_failures += 1;
                    warn!(frame_id, error = %e, "⚠️ 检测失败, 原样推流");
                }
            }
        }

        if !tally.is_empty() {
            self.res.stats.apply(tally.in_count, tally.out_count);
            self.emit_events(frame_id, &tally);
        }

        self.evict_if_due(now);

        let overlay = match (&detections, self.counter.line_x()) {
            (Some(dets), Some(line_x)) => Some(Overlay {
                detections: dets,
                line_x,
            }),
            _ => None,
        };
        match self.renderer.render(frame, overlay) {
            Ok(encoded) => {
                self.res.buffer.publish(encoded);
                StepOutcome::Published {
                    frame_id,
                    detected: detections.is_some(),
                    tally,
                }
            }
            Err(e) => {
                warn!(frame_id, error = %e, "⚠️ 帧编码失败, 丢弃");
                StepOutcome::Dropped { frame_id, tally }
            }
        }
    }

    /// 调用检测器; scale != 1 时在缩放后的图像上检测, 再把坐标换算回来
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionFailure> {
        let detector = self.detector.as_mut().ok_or(DetectionFailure::NotLoaded)?;
        let scale = self.config.scale;
        let conf = self.config.conf_threshold;

        if (scale - 1.0).abs() < f32::EPSILON {
            return detector.detect(frame, conf);
        }

        let w = ((frame.width() as f32 * scale).round() as u32).max(1);
        let h = ((frame.height() as f32 * scale).round() as u32).max(1);
        let scaled = Frame {
            image: imageops::resize(&frame.image, w, h, FilterType::Triangle),
            sequence: frame.sequence,
            captured_at: frame.captured_at,
        };
        let dets = detector.detect(&scaled, conf)?;
        Ok(dets.into_iter().map(|d| d.rescaled(1.0 / scale)).collect())
    }

    /// 每个计数单位一条事件; 写入失败只记录日志
    fn emit_events(&self, frame_id: u64, tally: &CrossingTally) {
        let timestamp = chrono::Local::now().naive_local();
        for crossing in &tally.crossings {
            info!(
                frame_id,
                track_id = crossing.track_id,
                direction = %crossing.direction,
                "🚶 越线计数"
            );
            if let Err(e) = self
                .res
                .sink
                .append_event(crossing.direction, crossing.track_id, timestamp)
            {
                error!(
                    frame_id,
                    track_id = crossing.track_id,
                    error = %e,
                    "❌ 事件写入失败"
                );
            }
        }
    }

    fn evict_if_due(&mut self, now: Instant) {
        let Some(ttl) = self.config.track_ttl() else {
            return;
        };
        if now.saturating_duration_since(self.last_eviction) < self.config.eviction_interval() {
            return;
        }
        self.last_eviction = now;
        let evicted = self.counter.evict_stale(now, ttl);
        if evicted > 0 {
            debug!(
                evicted,
                remaining = self.counter.track_count(),
                "清理过期轨迹"
            );
        }
    }

    fn report_if_due(&mut self) {
        let elapsed = self.report_at.elapsed();
        if elapsed < Duration::from_secs(1) {
            return;
        }
        debug!(
            frames = self.report_frames,
            detections = self.report_detections,
            failures = self.report_failures,
            fps = self.fps.value(),
            tracks = self.counter.track_count(),
            buffered = self.res.buffer.len(),
            "📊 推理统计"
        );
        self.report_at = Instant::now();
        self.report_frames = 0;
        self.report_detections = 0;
        self.report_failures = 0;
    }
}
