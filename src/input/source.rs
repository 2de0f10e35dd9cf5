//! 采集线程 + 最新帧缓存
//!
//! 状态机: Stopped → Running (start 成功) → Stopped (stop); 没有暂停状态.
//! 下游消费慢时中间帧被静默覆盖, 实时计数只关心最新一帧.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::device::{CaptureDevice, CaptureSettings};
use super::frame::Frame;
use crate::error::DeviceError;

/// 采集失败后的退避时间
const RETRY_BACKOFF: Duration = Duration::from_millis(50);
/// 成功采集后让出CPU
const CAPTURE_YIELD: Duration = Duration::from_millis(5);

enum SourceState {
    Stopped(Box<dyn CaptureDevice>),
    Running(JoinHandle<Box<dyn CaptureDevice>>),
    /// 采集线程 panic, 设备已丢失
    Lost,
}

/// 单槽帧源 (摄像头采集线程 + 最新帧)
pub struct FrameSource {
    settings: CaptureSettings,
    latest: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
    state: Mutex<SourceState>,
}

impl FrameSource {
    pub fn new(device: Box<dyn CaptureDevice>, settings: CaptureSettings) -> Self {
        Self {
            settings,
            latest: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(SourceState::Stopped(device)),
        }
    }

    /// 打开设备并启动采集线程; 已在运行时直接返回成功
    pub fn start(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();

        let mut device = match std::mem::replace(&mut *state, SourceState::Lost) {
            SourceState::Stopped(device) => device,
            running @ SourceState::Running(_) => {
                *state = running;
                return Ok(());
            }
            SourceState::Lost => return Err(DeviceError::Disconnected),
        };

        if let Err(e) = device.open(&self.settings) {
            error!(device = %device.name(), error = %e, "❌ 摄像头无法打开");
            *state = SourceState::Stopped(device);
            return Err(e);
        }

        *self.latest.lock() = None;
        self.running.store(true, Ordering::Release);

        let name = device.name();
        let latest = Arc::clone(&self.latest);
        let running = Arc::clone(&self.running);
        let spawned = thread::Builder::new()
            .name("frame-source".into())
            .spawn(move || capture_loop(device, latest, running));

        match spawned {
            Ok(handle) => {
                *state = SourceState::Running(handle);
                info!(
                    device = %name,
                    width = self.settings.width,
                    height = self.settings.height,
                    fps = self.settings.fps,
                    "🎥 采集线程已启动"
                );
                Ok(())
            }
            Err(e) => {
                // 设备随闭包一起丢弃
                self.running.store(false, Ordering::Release);
                Err(DeviceError::Open {
                    device: name,
                    reason: format!("capture thread spawn failed: {e}"),
                })
            }
        }
    }

    /// 返回最新帧的副本, 尚无帧时返回 None; 永不阻塞等待新帧
    pub fn read(&self) -> Option<Frame> {
        self.latest.lock().clone()
    }

    /// 停止采集并释放设备, 可重复调用
    pub fn stop(&self) {
        let mut state = self.state.lock();
        self.running.store(false, Ordering::Release);

        match std::mem::replace(&mut *state, SourceState::Lost) {
            SourceState::Running(handle) => {
                match handle.join() {
                    Ok(device) => *state = SourceState::Stopped(device),
                    Err(_) => error!("❌ 采集线程异常退出, 设备丢失"),
                }
                *self.latest.lock() = None;
                info!("CameraStream stopped");
            }
            other => *state = other,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.state.lock(), SourceState::Running(_))
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// 直接写入最新帧 (测试用)
    #[cfg(test)]
    pub(crate) fn store(&self, frame: Frame) {
        *self.latest.lock() = Some(frame);
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 采集循环: 失败时退避重试, 只有 stop() 能结束它
fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    latest: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
) -> Box<dyn CaptureDevice> {
    let mut sequence = 0u64;
    let mut failures = 0u64;

    while running.load(Ordering::Acquire) {
        match device.grab() {
            Ok(image) => {
                if failures > 0 {
                    info!(failures, "✅ 采集恢复");
                    failures = 0;
                }
                sequence += 1;
                *latest.lock() = Some(Frame::new(image, sequence));
                thread::sleep(CAPTURE_YIELD);
            }
            Err(e) => {
                failures += 1;
                // 连续失败时降低日志频率
                if failures == 1 || failures % 100 == 0 {
                    warn!(failures, error = %e, "⚠️ 采集失败, 稍后重试");
                }
                thread::sleep(RETRY_BACKOFF);
            }
        }
    }

    device.release();
    device
}
