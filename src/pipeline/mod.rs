/// 计数流水线 (Counting Pipeline)
///
/// 两个常驻线程 + 控制面:
/// - FrameSource:   摄像头采集 (input 模块, 独立线程)
/// - InferenceLoop: 检测 / 计数 / 推流 (独立线程, 命令驱动)
/// - CounterSystem: start / stop / reset / stats / stream
pub mod control;
pub mod frame_buffer;
pub mod inference;
pub mod render;
pub mod stream;

pub use control::CounterSystem;
pub use frame_buffer::{EncodedFrame, FrameBuffer, STREAM_BUFFER_CAPACITY};
pub use inference::{InferenceLoop, LoopCommand, LoopResources, StepOutcome};
pub use render::{FrameRenderer, Overlay};
pub use stream::{MjpegStream, CONTENT_TYPE};
