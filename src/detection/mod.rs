/// 检测系统 (Detection System)
///
/// 外部检测/跟踪能力的适配层, 推理循环只依赖 `DetectAndTrack`
/// - types:    检测框 / 带跟踪ID的检测结果
/// - adapter:  检测接口 + 带超时的独立工作线程
/// - tracker:  ByteTrack 风格的轨迹ID分配 (卡尔曼 + IOU)
/// - labels:   COCO 类别名称
/// - yolo:     YOLOv8 ONNX 检测器 (需要 onnx 功能)
pub mod adapter;
pub mod labels;
pub mod tracker;
pub mod types;

#[cfg(feature = "onnx")]
pub mod yolo;

pub use adapter::{DetectAndTrack, ModelLoader, TimedDetector};
pub use labels::{coco_label, COCO_CLASSES};
pub use tracker::ByteTracker;
pub use types::{BBox, Detection, Point, TrackId};

#[cfg(feature = "onnx")]
pub use yolo::YoloDetector;
