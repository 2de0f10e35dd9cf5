//! 推流帧缓冲: 容量固定, 满时丢弃最旧的帧 (新鲜优先)

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

/// 默认容量
pub const STREAM_BUFFER_CAPACITY: usize = 3;

/// 已编码的 JPEG 帧
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
}

/// 有界帧队列, 推理线程 publish, 推流消费者 consume
pub struct FrameBuffer {
    tx: Sender<EncodedFrame>,
    rx: Receiver<EncodedFrame>,
    capacity: usize,
    evicted: AtomicU64,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    /// 非阻塞写入; 满时先丢弃最旧的一帧. 返回是否发生了丢弃
    pub fn publish(&self, frame: EncodedFrame) -> bool {
        let mut frame = frame;
        let mut evicted = false;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    frame = back;
                    // 消费者可能同时取走了一帧, 此时 try_recv 为空, 直接重试
                    if self.rx.try_recv().is_ok() {
                        evicted = true;
                        self.evicted.fetch_add(1, Ordering::Relaxed);
                    }
                }
                // 自己持有接收端, 不会断开
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    /// 最多等待 `timeout`; 超时返回 None, 由调用方决定占位帧
    pub fn consume(&self, timeout: Duration) -> Option<EncodedFrame> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_consume(&self) -> Option<EncodedFrame> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 因溢出被丢弃的帧数
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(STREAM_BUFFER_CAPACITY)
    }
}
