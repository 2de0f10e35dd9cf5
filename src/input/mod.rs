/// 视频输入系统 (Video Input System)
///
/// 独立采集线程,持续拉取最新帧
/// - Frame:         单帧图像 + 序号 + 采集时间
/// - CaptureDevice: 采集设备接口 (图片回放 / FFmpeg 摄像头)
/// - FrameSource:   单槽"最新帧"缓存, 覆盖写入, 读取永不阻塞
pub mod device;
pub mod frame;
pub mod source;

#[cfg(feature = "ffmpeg")]
pub mod camera;

pub use device::{CaptureDevice, CaptureSettings, ReplayDevice};
pub use frame::Frame;
pub use source::FrameSource;

#[cfg(feature = "ffmpeg")]
pub use camera::{list_camera_devices, FfmpegCamera};
