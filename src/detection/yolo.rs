// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 ONNX 检测器 + ByteTrack 跟踪
// 包含: 模型加载、预处理、推理、后处理 (NMS)、跟踪ID分配

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Result};
use fast_image_resize as fr;
use ndarray::{s, Array, Axis, Ix4};
use ort::{GraphOptimizationLevel, Session};
use tracing::{debug, info};

use super::adapter::DetectAndTrack;
use super::labels::coco_label;
use super::tracker::ByteTracker;
use super::types::{BBox, Detection};
use crate::error::{DetectionFailure, ModelError};
use crate::input::Frame;

const CXYWH_OFFSET: usize = 4;
/// letterbox 填充色
const PAD_VALUE: f32 = 144.0 / 255.0;

/// YOLOv8 检测 + ByteTrack 跟踪
pub struct YoloDetector {
    session: Session,
    input_name: String,
    output_name: String,
    width: u32,
    height: u32,
    iou: f32,
    tracker: ByteTracker,
    resizer: fr::Resizer,
    model_path: String,
    count: u64,
}

impl YoloDetector {
    /// 加载模型, 输入尺寸从模型元数据读取 (动态尺寸时使用 640)
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = model_path.as_ref();
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ModelError::new(display, "file not found"));
        }

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(4))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| ModelError::new(display.clone(), e))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| ModelError::new(display.clone(), "model has no inputs"))?;
        let output = session
            .outputs
            .first()
            .ok_or_else(|| ModelError::new(display.clone(), "model has no outputs"))?;

        // [batch, 3, height, width], 动态维度为 -1
        let (height, width) = match input.input_type.tensor_dimensions() {
            Some(dims) if dims.len() == 4 && dims[2] > 0 && dims[3] > 0 => {
                (dims[2] as u32, dims[3] as u32)
            }
            _ => (640, 640),
        };

        let input_name = input.name.clone();
        let output_name = output.name.clone();
        info!(model = %display, width, height, "✅ YOLOv8 检测模型加载成功");

        Ok(Self {
            session,
            input_name,
            output_name,
            width,
            height,
            iou: 0.45,
            tracker: ByteTracker::new(),
            resizer: fr::Resizer::new(),
            model_path: display,
            count: 0,
        })
    }

    pub fn with_iou(mut self, iou: f32) -> Self {
        self.iou = iou;
        self
    }

    fn scale_wh(&self, w0: f32, h0: f32) -> (f32, u32, u32) {
        let r = (self.width as f32 / w0).min(self.height as f32 / h0);
        (
            r,
            ((w0 * r).round() as u32).max(1),
            ((h0 * r).round() as u32).max(1),
        )
    }

    /// letterbox (左上对齐) + 归一化 → NCHW
    fn preprocess(&mut self, frame: &Frame) -> Result<(Array<f32, Ix4>, f32)> {
        let (w0, h0) = (frame.width(), frame.height());
        let (ratio, w_new, h_new) = self.scale_wh(w0 as f32, h0 as f32);

        let src = fr::images::Image::from_vec_u8(
            w0,
            h0,
            frame.image.as_raw().clone(),
            fr::PixelType::U8x3,
        )?;
        let mut dst = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x3);
        self.resizer.resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )?;

        let mut xs = Array::from_elem(
            (1, 3, self.height as usize, self.width as usize),
            PAD_VALUE,
        );
        for (i, rgb) in dst.buffer().chunks_exact(3).enumerate() {
            let x = i % w_new as usize;
            let y = i / w_new as usize;
            xs[[0, 0, y, x]] = rgb[0] as f32 / 255.0;
            xs[[0, 1, y, x]] = rgb[1] as f32 / 255.0;
            xs[[0, 2, y, x]] = rgb[2] as f32 / 255.0;
        }
        Ok((xs, ratio))
    }

    /// 输出 [1, 4 + nc, anchors] → 原始分辨率检测框
    fn postprocess(
        &self,
        preds: ndarray::ArrayViewD<'_, f32>,
        ratio: f32,
        frame: &Frame,
        conf_threshold: f32,
    ) -> Result<Vec<BBox>> {
        let (w0, h0) = (frame.width() as f32, frame.height() as f32);
        let anchor = preds
            .axis_iter(Axis(0))
            .next()
            .ok_or_else(|| anyhow!("empty model output"))?;

        let mut boxes = Vec::new();
        for pred in anchor.axis_iter(Axis(1)) {
            if pred.len() <= CXYWH_OFFSET {
                continue;
            }
            let bbox = pred.slice(s![0..CXYWH_OFFSET]);
            let clss = pred.slice(s![CXYWH_OFFSET..]);

            let Some((id, &confidence)) = clss
                .iter()
                .enumerate()
                .reduce(|max, x| if x.1 > max.1 { x } else { max })
            else {
                continue;
            };
            if confidence < conf_threshold {
                continue;
            }

            let cx = bbox[0] / ratio;
            let cy = bbox[1] / ratio;
            let w = bbox[2] / ratio;
            let h = bbox[3] / ratio;
            boxes.push(
                BBox::new(
                    (cx - w / 2.0).clamp(0.0, w0),
                    (cy - h / 2.0).clamp(0.0, h0),
                    (cx + w / 2.0).clamp(0.0, w0),
                    (cy + h / 2.0).clamp(0.0, h0),
                )
                .with_class(id as u32, confidence),
            );
        }

        non_max_suppression(&mut boxes, self.iou);
        Ok(boxes)
    }

    fn run(&mut self, frame: &Frame, conf_threshold: f32) -> Result<Vec<Detection>> {
        let t_pre = Instant::now();
        let (xs, ratio) = self.preprocess(frame)?;
        let pre_ms = t_pre.elapsed().as_secs_f64() * 1000.0;

        let t_run = Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => xs.view()]?)?;
        let preds = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        let run_ms = t_run.elapsed().as_secs_f64() * 1000.0;

        let boxes = self.postprocess(preds, ratio, frame, conf_threshold)?;

        // 跟踪阈值跟随检测阈值, 低分框用于救援丢失的轨迹
        let tracked = self.tracker.update(&boxes);
        self.count += 1;
        if self.count % 60 == 0 {
            debug!(
                frame_id = frame.sequence,
                boxes = boxes.len(),
                tracks = self.tracker.track_count(),
                pre_ms,
                run_ms,
                "🎯 检测+跟踪"
            );
        }

        Ok(tracked
            .into_iter()
            .map(|(track_id, bbox)| Detection::new(track_id, coco_label(bbox.class_id), bbox))
            .collect())
    }
}

impl DetectAndTrack for YoloDetector {
    fn name(&self) -> String {
        format!("yolov8:{}", self.model_path)
    }

    fn detect_and_track(
        &mut self,
        frame: &Frame,
        conf_threshold: f32,
    ) -> Result<Vec<Detection>, DetectionFailure> {
        self.run(frame, conf_threshold)
            .map_err(|e| DetectionFailure::Adapter(format!("{e:#}")))
    }
}

/// 按置信度排序后贪心抑制重叠框 (只在同类别之间抑制)
pub fn non_max_suppression(boxes: &mut Vec<BBox>, iou_threshold: f32) {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..boxes.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if boxes[prev_index].class_id == boxes[index].class_id
                && boxes[prev_index].iou(&boxes[index]) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            boxes.swap(current_index, index);
            current_index += 1;
        }
    }
    boxes.truncate(current_index);
}
