//! 检测/跟踪适配器接口 + 超时工作线程
//!
//! 推理循环不能被一次卡死的模型调用拖住: `TimedDetector` 把适配器放到
//! 独立线程里, 每次请求带序号, 超时后丢弃迟到的结果.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use super::types::Detection;
use crate::error::{DetectionFailure, ModelError};
use crate::input::Frame;

/// 检测 + 跟踪能力 (外部模型的适配层)
///
/// 实现者负责在多次调用间保持跟踪ID稳定; 推理循环只会从一个线程调用它.
pub trait DetectAndTrack: Send {
    /// 适配器描述 (用于日志)
    fn name(&self) -> String {
        "detector".to_string()
    }

    /// 对一帧做检测和跟踪, 返回带跟踪ID的检测结果
    fn detect_and_track(
        &mut self,
        frame: &Frame,
        conf_threshold: f32,
    ) -> Result<Vec<Detection>, DetectionFailure>;
}

impl<T: DetectAndTrack + ?Sized> DetectAndTrack for Box<T> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn detect_and_track(
        &mut self,
        frame: &Frame,
        conf_threshold: f32,
    ) -> Result<Vec<Detection>, DetectionFailure> {
        (**self).detect_and_track(frame, conf_threshold)
    }
}

/// 模型加载函数: 每次 start 时在调用线程上执行一次
pub type ModelLoader =
    Box<dyn Fn() -> Result<Box<dyn DetectAndTrack>, ModelError> + Send + Sync>;

struct DetectRequest {
    seq: u64,
    frame: Frame,
    conf_threshold: f32,
}

struct DetectReply {
    seq: u64,
    result: Result<Vec<Detection>, DetectionFailure>,
}

/// 带超时的检测器: 适配器运行在 "detector" 线程
pub struct TimedDetector {
    name: String,
    requests: Option<Sender<DetectRequest>>,
    replies: Receiver<DetectReply>,
    timeout: Duration,
    seq: u64,
    worker: Option<JoinHandle<()>>,
}

impl TimedDetector {
    pub fn spawn(
        adapter: Box<dyn DetectAndTrack>,
        timeout: Duration,
    ) -> Result<Self, DetectionFailure> {
        let name = adapter.name();
        // 容量为 1: 上一个请求还没被取走说明工作线程卡住了
        let (req_tx, req_rx) = bounded::<DetectRequest>(1);
        let (reply_tx, reply_rx) = unbounded::<DetectReply>();

        let worker = thread::Builder::new()
            .name("detector".into())
            .spawn(move || detector_worker(adapter, req_rx, reply_tx))
            .map_err(|e| DetectionFailure::Adapter(format!("worker spawn failed: {e}")))?;

        info!(detector = %name, timeout_ms = timeout.as_millis() as u64, "🧠 检测线程已启动");
        Ok(Self {
            name,
            requests: Some(req_tx),
            replies: reply_rx,
            timeout,
            seq: 0,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 提交一帧并等待结果, 最长等待 `timeout`
    pub fn detect(
        &mut self,
        frame: &Frame,
        conf_threshold: f32,
    ) -> Result<Vec<Detection>, DetectionFailure> {
        let requests = self.requests.as_ref().ok_or(DetectionFailure::WorkerGone)?;

        self.seq += 1;
        let seq = self.seq;
        let request = DetectRequest {
            seq,
            frame: frame.clone(),
            conf_threshold,
        };
        match requests.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(DetectionFailure::Busy),
            Err(TrySendError::Disconnected(_)) => return Err(DetectionFailure::WorkerGone),
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            match self.replies.recv_deadline(deadline) {
                Ok(reply) if reply.seq == seq => return reply.result,
                Ok(stale) => {
                    debug!(seq = stale.seq, current = seq, "丢弃过期的检测结果");
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(DetectionFailure::Timeout(self.timeout))
                }
                Err(RecvTimeoutError::Disconnected) => return Err(DetectionFailure::WorkerGone),
            }
        }
    }
}

impl Drop for TimedDetector {
    fn drop(&mut self) {
        // 关闭请求通道, 工作线程处理完手头的请求后退出
        self.requests = None;
        if let Some(worker) = self.worker.take() {
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                warn!(detector = %self.name, "⚠️ 检测线程仍在运行, 不等待其退出");
            }
        }
    }
}

fn detector_worker(
    mut adapter: Box<dyn DetectAndTrack>,
    requests: Receiver<DetectRequest>,
    replies: Sender<DetectReply>,
) {
    for request in requests {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            adapter.detect_and_track(&request.frame, request.conf_threshold)
        }));
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                error!("❌ 检测适配器 panic");
                Err(DetectionFailure::Adapter("adapter panicked".into()))
            }
        };

        if replies
            .send(DetectReply {
                seq: request.seq,
                result,
            })
            .is_err()
        {
            break;
        }
    }
    debug!("检测线程退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;
    use image::RgbImage;

    struct Scripted {
        delay: Duration,
        calls: u32,
    }

    impl DetectAndTrack for Scripted {
        fn detect_and_track(
            &mut self,
            frame: &Frame,
            _conf: f32,
        ) -> Result<Vec<Detection>, DetectionFailure> {
            self.calls += 1;
            thread::sleep(self.delay);
            if frame.sequence == 99 {
                panic!("boom");
            }
            Ok(vec![Detection::new(
                self.calls,
                "person",
                BBox::new(0.0, 0.0, 10.0, 10.0),
            )])
        }
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(RgbImage::new(8, 8), sequence)
    }

    #[test]
    fn returns_adapter_result() {
        let adapter = Scripted {
            delay: Duration::ZERO,
            calls: 0,
        };
        let mut detector = TimedDetector::spawn(Box::new(adapter), Duration::from_secs(1)).unwrap();
        let dets = detector.detect(&frame(1), 0.5).unwrap();
        assert_eq!(dets[0].track_id, 1);
        let dets = detector.detect(&frame(2), 0.5).unwrap();
        assert_eq!(dets[0].track_id, 2);
    }

    #[test]
    fn slow_adapter_times_out_and_late_reply_is_discarded() {
        let adapter = Scripted {
            delay: Duration::from_millis(150),
            calls: 0,
        };
        let mut detector =
            TimedDetector::spawn(Box::new(adapter), Duration::from_millis(50)).unwrap();

        assert!(matches!(
            detector.detect(&frame(1), 0.5),
            Err(DetectionFailure::Timeout(_))
        ));

        // 等第一帧的迟到结果出来, 它不能被当成第二帧的结果
        thread::sleep(Duration::from_millis(200));
        detector.timeout = Duration::from_secs(1);
        let dets = detector.detect(&frame(2), 0.5).unwrap();
        assert_eq!(dets[0].track_id, 2);
    }

    #[test]
    fn panicking_adapter_reports_failure_and_keeps_serving() {
        let adapter = Scripted {
            delay: Duration::ZERO,
            calls: 0,
        };
        let mut detector = TimedDetector::spawn(Box::new(adapter), Duration::from_secs(1)).unwrap();
        assert!(matches!(
            detector.detect(&frame(99), 0.5),
            Err(DetectionFailure::Adapter(_))
        ));
        assert!(detector.detect(&frame(3), 0.5).is_ok());
    }
}
