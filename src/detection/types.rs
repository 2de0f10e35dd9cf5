/// 检测系统数据结构定义
/// Data structures shared by the detector adapters and the crossing counter

/// 跟踪ID (由检测/跟踪适配器分配并在多次调用间保持)
pub type TrackId = u32;

/// 检测框 (Detection bounding box, 原始分辨率像素坐标)
#[derive(Clone, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence: 1.0,
            class_id: 0,
        }
    }

    pub fn with_class(mut self, class_id: u32, confidence: f32) -> Self {
        self.class_id = class_id;
        self.confidence = confidence;
        self
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// 整数像素中心点 (先取整坐标再求中点, 向零截断)
    ///
    /// 坐标来自外部适配器: 超出 i32 范围的值被钳位, NaN 视为 0.
    pub fn centroid(&self) -> Point {
        Point {
            x: midpoint(self.x1, self.x2),
            y: midpoint(self.y1, self.y2),
        }
    }

    /// IOU (Intersection over Union)
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

fn midpoint(a: f32, b: f32) -> i32 {
    let px = |v: f32| (v as i64).clamp(i32::MIN as i64, i32::MAX as i64);
    ((px(a) + px(b)) / 2) as i32
}

/// 轨迹位置采样点
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 带跟踪ID的检测结果 (适配器 → 计数器)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub label: String,
    pub track_id: TrackId,
}

impl Detection {
    pub fn new(track_id: TrackId, label: impl Into<String>, bbox: BBox) -> Self {
        Self {
            bbox,
            label: label.into(),
            track_id,
        }
    }

    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }

    pub fn class_id(&self) -> u32 {
        self.bbox.class_id
    }

    pub fn confidence(&self) -> f32 {
        self.bbox.confidence
    }

    /// 坐标整体缩放 (检测输入被缩放过时换算回原始分辨率)
    pub fn rescaled(mut self, factor: f32) -> Self {
        self.bbox.x1 *= factor;
        self.bbox.y1 *= factor;
        self.bbox.x2 *= factor;
        self.bbox.y2 *= factor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_truncates_like_integer_boxes() {
        let bbox = BBox::new(10.9, 20.2, 31.7, 41.0);
        // 取整后 (10,20)-(31,41) → 中心 (20, 30)
        assert_eq!(bbox.centroid(), Point::new(20, 30));
    }

    #[test]
    fn centroid_of_out_of_range_coordinates_is_clamped() {
        let huge = BBox::new(3.0e9, 0.0, 3.0e9, 10.0);
        assert_eq!(huge.centroid(), Point::new(i32::MAX, 5));

        let infinite = BBox::new(f32::INFINITY, f32::NEG_INFINITY, f32::INFINITY, 0.0);
        assert_eq!(infinite.centroid().x, i32::MAX);
        assert_eq!(infinite.centroid().y, i32::MIN / 2);

        let nan = BBox::new(f32::NAN, f32::NAN, 4.0, 8.0);
        assert_eq!(nan.centroid(), Point::new(2, 4));
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }
}
