//! 摄像头输入模块 - FFmpeg 摄像头采集设备
//!
//! 处理本地摄像头输入,支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux).
//! FFmpeg 解码在自己的调度线程中运行, 通过帧过滤器把 RGB24 帧送进一个
//! 容量为 2 的通道, `grab()` 从通道取帧.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame as AvFrame, Input};
use image::RgbImage;
use tracing::{info, warn};

use super::device::{CaptureDevice, CaptureSettings};
use crate::error::DeviceError;

/// 单次 grab 的最长等待
const GRAB_TIMEOUT: Duration = Duration::from_millis(500);
/// 等待 FFmpeg 打开设备的最长时间
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// FFmpeg 帧过滤器: 解码帧 → RgbImage
#[derive(Clone)]
struct CaptureFilter {
    tx: Sender<RgbImage>,
    stop: Arc<AtomicBool>,
    dropped: u64,
}

impl FrameFilter for CaptureFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 摄像头解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        // 停止标志置位后返回错误, 结束 FFmpeg 调度
        if self.stop.load(Ordering::Acquire) {
            return Err("capture stopped".to_string());
        }

        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.dropped += 1;
                return Ok(None);
            }

            let w = (*frame.as_ptr()).width as u32;
            let h = (*frame.as_ptr()).height as u32;
            let plane = (*frame.as_ptr()).data[0];
            let stride = (*frame.as_ptr()).linesize[0] as usize;
            let row_bytes = w as usize * 3;

            if w == 0 || h == 0 || plane.is_null() || stride < row_bytes {
                self.dropped += 1;
                return Ok(None);
            }

            // RGB24 逐行拷贝 (去掉行尾填充)
            let mut pixels = Vec::with_capacity(row_bytes * h as usize);
            for row in 0..h as usize {
                let src = std::slice::from_raw_parts(plane.add(row * stride), row_bytes);
                pixels.extend_from_slice(src);
            }

            if let Some(image) = RgbImage::from_raw(w, h, pixels) {
                match self.tx.try_send(image) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => {
                        return Err("capture receiver dropped".to_string());
                    }
                }
            }
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!(dropped = self.dropped, "✅ 摄像头解码线程退出");
    }
}

/// FFmpeg 摄像头采集设备
pub struct FfmpegCamera {
    device_name: Option<String>,
    rx: Option<Receiver<RgbImage>>,
    stop: Arc<AtomicBool>,
    runner: Option<JoinHandle<()>>,
}

impl FfmpegCamera {
    /// `device_name` 仅 Windows DirectShow 需要 (其他平台按索引打开)
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            rx: None,
            stop: Arc::new(AtomicBool::new(false)),
            runner: None,
        }
    }

    /// 格式化摄像头URL - 根据平台选择
    fn format_camera_url(index: usize, name: Option<&str>) -> String {
        #[cfg(target_os = "windows")]
        {
            let _ = index;
            format!("video={}", name.unwrap_or("Integrated Camera"))
        }
        #[cfg(target_os = "linux")]
        {
            let _ = name;
            format!("/dev/video{}", index)
        }
        #[cfg(not(any(target_os = "windows", target_os = "linux")))]
        {
            let _ = name;
            format!("{}", index)
        }
    }

    fn input_format() -> &'static str {
        #[cfg(target_os = "windows")]
        let format = "dshow"; // DirectShow

        #[cfg(target_os = "macos")]
        let format = "avfoundation"; // AVFoundation

        #[cfg(target_os = "linux")]
        let format = "v4l2"; // Video4Linux2

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        let format = "video4linux2"; // 默认

        format
    }

    fn shutdown_runner(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.rx = None;
        if let Some(runner) = self.runner.take() {
            // 摄像头不再出帧时过滤器不会被调用, 调度线程可能迟迟不退出,
            // 这里不等待它, 交给 FFmpeg 自行收尾.
            if runner.is_finished() {
                let _ = runner.join();
            }
        }
    }
}

impl CaptureDevice for FfmpegCamera {
    fn name(&self) -> String {
        match &self.device_name {
            Some(name) => format!("camera:{}", name),
            None => "camera".to_string(),
        }
    }

    fn open(&mut self, settings: &CaptureSettings) -> Result<(), DeviceError> {
        self.shutdown_runner();

        let url = Self::format_camera_url(settings.device_index, self.device_name.as_deref());
        let format = Self::input_format();
        let video_size = format!("{}x{}", settings.width, settings.height);
        let framerate = settings.fps.to_string();
        let scale = format!(
            "scale={}:{},format=rgb24",
            settings.width, settings.height
        );
        info!(url = %url, format, size = %video_size, fps = %framerate, "📷 打开摄像头");

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded::<RgbImage>(2);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let filter = CaptureFilter {
            tx,
            stop: Arc::clone(&stop),
            dropped: 0,
        };

        let runner = thread::Builder::new()
            .name("ffmpeg-camera".into())
            .spawn(move || {
                let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
                let pipe = pipe.filter("capture", Box::new(filter));
                let out = create_null_output().add_frame_pipeline(pipe);

                let input = Input::new(url).set_format(format).set_input_opts(
                    [
                        ("framerate", framerate.as_str()),
                        ("video_size", video_size.as_str()),
                    ]
                    .into(),
                );

                let ctx = match FfmpegContext::builder()
                    .input(input)
                    .filter_descs([scale.as_str()].into())
                    .output(out)
                    .build()
                {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("构建失败: {}", e)));
                        return;
                    }
                };

                let sch = match ctx.start() {
                    Ok(sch) => sch,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("启动失败: {}", e)));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let _ = sch.wait();
                info!("📹 摄像头解码循环结束");
            })
            .map_err(|e| DeviceError::Open {
                device: self.name(),
                reason: e.to_string(),
            })?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                self.stop = stop;
                self.rx = Some(rx);
                self.runner = Some(runner);
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = runner.join();
                Err(DeviceError::Open {
                    device: self.name(),
                    reason,
                })
            }
            Err(_) => {
                stop.store(true, Ordering::Release);
                Err(DeviceError::Open {
                    device: self.name(),
                    reason: format!("no response within {:?}", OPEN_TIMEOUT),
                })
            }
        }
    }

    fn grab(&mut self) -> Result<RgbImage, DeviceError> {
        let rx = self.rx.as_ref().ok_or(DeviceError::Disconnected)?;
        match rx.recv_timeout(GRAB_TIMEOUT) {
            Ok(image) => Ok(image),
            Err(RecvTimeoutError::Timeout) => Err(DeviceError::Timeout(GRAB_TIMEOUT)),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Disconnected),
        }
    }

    fn release(&mut self) {
        self.shutdown_runner();
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.shutdown_runner();
    }
}

/// 获取可用的摄像头设备列表
pub fn list_camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            warn!(error = %e, "⚠️ 获取摄像头列表失败");
            vec![]
        }
    }
}
