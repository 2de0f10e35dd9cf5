/// 视频帧数据结构
/// Frame passed from the acquisition thread to the inference loop
use std::time::Instant;

use image::RgbImage;

/// 采集帧 (采集线程 → 推理线程)
///
/// 每次迭代内只在各阶段之间转交或复制, 不跨迭代保留
/// (FrameSource 的最新帧槽位除外).
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u64, // 采集序号
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
