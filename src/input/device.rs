//! 采集设备接口
//!
//! `FrameSource` 在独立线程中反复调用 `grab()`; 设备实现只需要关心
//! 打开 / 取一帧 / 释放三件事.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info};

use crate::config::CounterConfig;
use crate::error::DeviceError;

/// 采集参数 (分辨率/帧率为提示值, 设备可以不遵守)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub device_index: usize,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureSettings {
    pub fn from_config(config: &CounterConfig) -> Self {
        Self {
            device_index: config.camera_index,
            width: config.capture_width,
            height: config.capture_height,
            fps: config.capture_fps,
        }
    }

    /// 帧间隔 (fps 为 0 时按 1fps 处理)
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from_config(&CounterConfig::default())
    }
}

/// 视频采集设备
pub trait CaptureDevice: Send + 'static {
    /// 设备描述 (用于日志)
    fn name(&self) -> String;

    /// 打开设备并应用分辨率/帧率提示
    fn open(&mut self, settings: &CaptureSettings) -> Result<(), DeviceError>;

    /// 读取下一帧, 阻塞时间由设备驱动决定 (相对采样间隔应当很短)
    fn grab(&mut self) -> Result<RgbImage, DeviceError>;

    /// 释放设备, 可重复调用
    fn release(&mut self);
}

enum ReplayFrames {
    Directory { dir: PathBuf, files: Vec<PathBuf> },
    Memory(Vec<RgbImage>),
}

/// 图片回放设备: 按采集帧率循环播放一组静态图片
///
/// 无摄像头环境下的调试输入, 也用于测试.
pub struct ReplayDevice {
    frames: ReplayFrames,
    cursor: usize,
    looping: bool,
    interval: Duration,
    next_due: Option<Instant>,
    opened: bool,
}

impl ReplayDevice {
    /// 回放目录中的图片 (按文件名排序)
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_frames(ReplayFrames::Directory {
            dir: dir.into(),
            files: Vec::new(),
        })
    }

    /// 回放内存中的图片
    pub fn from_images(images: Vec<RgbImage>) -> Self {
        Self::with_frames(ReplayFrames::Memory(images))
    }

    fn with_frames(frames: ReplayFrames) -> Self {
        Self {
            frames,
            cursor: 0,
            looping: true,
            interval: Duration::ZERO,
            next_due: None,
            opened: false,
        }
    }

    /// 播放完一轮后停止出帧 (grab 返回错误)
    pub fn once(mut self) -> Self {
        self.looping = false;
        self
    }

    fn len(&self) -> usize {
        match &self.frames {
            ReplayFrames::Directory { files, .. } => files.len(),
            ReplayFrames::Memory(images) => images.len(),
        }
    }

    fn list_images(dir: &Path) -> Result<Vec<PathBuf>, DeviceError> {
        let entries = std::fs::read_dir(dir).map_err(|e| DeviceError::Open {
            device: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| {
                        matches!(
                            ext.to_ascii_lowercase().as_str(),
                            "jpg" | "jpeg" | "png" | "bmp"
                        )
                    })
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// 按帧率节流
    fn pace(&mut self) {
        let now = Instant::now();
        match self.next_due {
            Some(due) if due > now => {
                thread::sleep(due - now);
                self.next_due = Some(due + self.interval);
            }
            _ => self.next_due = Some(now + self.interval),
        }
    }
}

impl CaptureDevice for ReplayDevice {
    fn name(&self) -> String {
        match &self.frames {
            ReplayFrames::Directory { dir, .. } => format!("replay:{}", dir.display()),
            ReplayFrames::Memory(images) => format!("replay:memory[{}]", images.len()),
        }
    }

    fn open(&mut self, settings: &CaptureSettings) -> Result<(), DeviceError> {
        if let ReplayFrames::Directory { dir, files } = &mut self.frames {
            *files = Self::list_images(dir)?;
        }
        if self.len() == 0 {
            return Err(DeviceError::Open {
                device: self.name(),
                reason: "no images to replay".into(),
            });
        }

        self.interval = settings.frame_interval();
        self.cursor = 0;
        self.next_due = None;
        self.opened = true;
        info!(device = %self.name(), frames = self.len(), "📼 回放设备已打开");
        Ok(())
    }

    fn grab(&mut self) -> Result<RgbImage, DeviceError> {
        if !self.opened {
            return Err(DeviceError::Disconnected);
        }
        if self.cursor >= self.len() {
            if !self.looping {
                return Err(DeviceError::Capture("replay finished".into()));
            }
            self.cursor = 0;
        }

        self.pace();
        let index = self.cursor;
        self.cursor += 1;

        match &self.frames {
            ReplayFrames::Memory(images) => Ok(images[index].clone()),
            ReplayFrames::Directory { files, .. } => {
                let path = &files[index];
                debug!(path = %path.display(), "回放帧");
                image::open(path)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| DeviceError::Capture(format!("{}: {}", path.display(), e)))
            }
        }
    }

    fn release(&mut self) {
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            fps: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn empty_replay_fails_to_open() {
        let mut device = ReplayDevice::from_images(Vec::new());
        assert!(matches!(
            device.open(&settings()),
            Err(DeviceError::Open { .. })
        ));
    }

    #[test]
    fn memory_replay_loops() {
        let images = vec![RgbImage::new(4, 2), RgbImage::new(8, 2)];
        let mut device = ReplayDevice::from_images(images);
        device.open(&settings()).unwrap();

        let widths: Vec<u32> = (0..3).map(|_| device.grab().unwrap().width()).collect();
        assert_eq!(widths, vec![4, 8, 4]);
    }

    #[test]
    fn once_replay_stops_after_last_frame() {
        let mut device = ReplayDevice::from_images(vec![RgbImage::new(2, 2)]).once();
        device.open(&settings()).unwrap();
        assert!(device.grab().is_ok());
        assert!(device.grab().is_err());
    }

    #[test]
    fn grab_after_release_is_disconnected() {
        let mut device = ReplayDevice::from_images(vec![RgbImage::new(2, 2)]);
        device.open(&settings()).unwrap();
        device.release();
        assert!(matches!(device.grab(), Err(DeviceError::Disconnected)));
    }

    #[test]
    fn directory_replay_reads_sorted_images() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(3, 3).save(dir.path().join("b.png")).unwrap();
        RgbImage::new(5, 5).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut device = ReplayDevice::from_dir(dir.path());
        device.open(&settings()).unwrap();
        assert_eq!(device.grab().unwrap().width(), 5);
        assert_eq!(device.grab().unwrap().width(), 3);
    }
}
