//! MJPEG 推流: FrameBuffer → multipart/x-mixed-replace 分段
//!
//! 一秒内没有新帧时输出 10x10 白色占位帧, 保持连接活跃.

use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};

use super::frame_buffer::FrameBuffer;
use super::render::encode_jpeg;
use crate::error::EncodingFailure;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// 10x10 白色 JPEG
pub fn placeholder_jpeg() -> Result<Vec<u8>, EncodingFailure> {
    encode_jpeg(&RgbImage::from_pixel(10, 10, Rgb([255, 255, 255])), 90)
}

/// 一个 multipart 分段
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--");
    part.extend_from_slice(BOUNDARY.as_bytes());
    part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// 无限迭代的推流分段生成器, 交给外部的 HTTP 层写出
pub struct MjpegStream {
    buffer: Arc<FrameBuffer>,
    timeout: Duration,
    placeholder: Vec<u8>,
    frames: u64,
    placeholders: u64,
}

impl MjpegStream {
    pub fn new(buffer: Arc<FrameBuffer>, timeout: Duration) -> Result<Self, EncodingFailure> {
        Ok(Self {
            buffer,
            timeout,
            placeholder: placeholder_jpeg()?,
            frames: 0,
            placeholders: 0,
        })
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    /// 等待下一帧 (最多 timeout), 超时用占位帧代替
    pub fn next_part(&mut self) -> Vec<u8> {
        match self.buffer.consume(self.timeout) {
            Some(frame) => {
                self.frames += 1;
                multipart_part(&frame.jpeg)
            }
            None => {
                self.placeholders += 1;
                multipart_part(&self.placeholder)
            }
        }
    }

    /// (真实帧数, 占位帧数)
    pub fn counts(&self) -> (u64, u64) {
        (self.frames, self.placeholders)
    }
}

impl Iterator for MjpegStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        Some(self.next_part())
    }
}
