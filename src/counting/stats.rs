//! 共享统计 (推理线程写, 控制面读) + FPS 平滑

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// 统计快照 (/stats 的返回内容)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub in_count: u64,
    pub out_count: u64,
    /// 保留一位小数
    pub fps: f64,
    pub running: bool,
}

#[derive(Debug, Default)]
struct StatsInner {
    in_count: u64,
    out_count: u64,
    fps: f64,
    running: bool,
}

/// IN/OUT 计数、平滑FPS、运行标志, 全部在同一把锁下读写
#[derive(Debug, Default)]
pub struct SharedStats {
    inner: Mutex<StatsInner>,
}

impl SharedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 累加计数增量
    pub fn apply(&self, in_inc: u64, out_inc: u64) {
        let mut inner = self.inner.lock();
        inner.in_count += in_inc;
        inner.out_count += out_inc;
    }

    pub fn set_fps(&self, fps: f64) {
        self.inner.lock().fps = fps;
    }

    pub fn set_running(&self, running: bool) {
        self.inner.lock().running = running;
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// 计数清零 (FPS 和运行标志不变)
    pub fn reset_counts(&self) {
        let mut inner = self.inner.lock();
        inner.in_count = 0;
        inner.out_count = 0;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock();
        StatsSnapshot {
            in_count: inner.in_count,
            out_count: inner.out_count,
            fps: (inner.fps * 10.0).round() / 10.0,
            running: inner.running,
        }
    }
}

/// 指数滑动平均 FPS: fps = 0.9 * fps + 0.1 * 瞬时值
///
/// 第一帧只记录时间; 第一个间隔直接作为初值, 不从 0 开始爬升
/// (有意区别于 `fps = 0` 起步的旧实现, 启动后第一秒的读数即可用).
#[derive(Debug, Default)]
pub struct FpsMeter {
    last: Option<Instant>,
    fps: Option<f64>,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            if elapsed > 0.0 {
                let instant = 1.0 / elapsed;
                self.fps = Some(match self.fps {
                    Some(prev) => 0.9 * prev + 0.1 * instant,
                    None => instant,
                });
            }
        }
        self.last = Some(now);
        self.value()
    }

    pub fn value(&self) -> f64 {
        self.fps.unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.fps = None;
    }
}
