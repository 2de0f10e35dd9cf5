//! ByteTrack 多目标跟踪 (跟踪ID分配)
//! ByteTrack: Simple and effective multi-object tracking
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IOU)
//! 3. 低分框救援丢失的轨迹
//! 4. 纯运动模型,无需外观特征
//!
//! 计数只需要稳定的ID, 输出框使用本帧的观测框而不是滤波框.

use super::types::{BBox, TrackId};

// ========== 卡尔曼滤波器 ==========

/// 简化卡尔曼滤波器 (用于单个边界框的位置和尺寸平滑)
/// 状态向量: [x_center, y_center, width, height, vx, vy, vw, vh]
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],
    /// 估计误差协方差 (简化为对角阵)
    p: [f32; 8],
    /// 过程噪声
    q: f32,
    /// 观测噪声
    r: f32,
    velocity_decay: f32,
}

impl KalmanBoxFilter {
    /// - `q`: 过程噪声 (0.1-1.0, 越小越平滑)
    /// - `r`: 观测噪声 (1.0-50.0, 越大越平滑)
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let (cx, cy, w, h) = Self::measure(bbox);
        Self {
            state: [cx, cy, w, h, 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q,
            r,
            velocity_decay: 0.95,
        }
    }

    fn measure(bbox: &BBox) -> (f32, f32, f32, f32) {
        (
            (bbox.x1 + bbox.x2) / 2.0,
            (bbox.y1 + bbox.y2) / 2.0,
            bbox.width(),
            bbox.height(),
        )
    }

    /// 预测下一帧状态 (匀速运动模型 + 速度衰减)
    pub fn predict(&mut self) {
        self.state[4] *= self.velocity_decay;
        self.state[5] *= self.velocity_decay;
        self.state[6] *= 0.98; // 尺寸变化更慢
        self.state[7] *= 0.98;

        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }
        for p in &mut self.p {
            *p += self.q;
        }
    }

    /// 融合观测值
    pub fn update(&mut self, bbox: &BBox) {
        let (cx, cy, w, h) = Self::measure(bbox);
        let residual = [
            cx - self.state[0],
            cy - self.state[1],
            w - self.state[2],
            h - self.state[3],
        ];

        // 大幅跳变时更信任预测值
        let jump = (residual[0] * residual[0] + residual[1] * residual[1]).sqrt();
        let r = if jump < 10.0 { self.r } else { self.r * 3.0 };

        for i in 0..4 {
            let k_pos = self.p[i] / (self.p[i] + r);
            let k_vel = self.p[i + 4] / (self.p[i + 4] + r * 10.0);
            self.state[i] += k_pos * residual[i];
            self.state[i + 4] += k_vel * residual[i];
            self.p[i] *= 1.0 - k_pos;
            self.p[i + 4] *= 1.0 - k_vel;
        }
    }

    /// 当前状态的边界框
    pub fn state_bbox(&self) -> BBox {
        let w = self.state[2].max(1.0);
        let h = self.state[3].max(1.0);
        BBox::new(
            self.state[0] - w / 2.0,
            self.state[1] - h / 2.0,
            self.state[0] + w / 2.0,
            self.state[1] + h / 2.0,
        )
    }

    pub fn velocity(&self) -> (f32, f32) {
        (self.state[4], self.state[5])
    }
}

// ========== 轨迹 ==========

#[derive(Clone, Debug)]
struct Track {
    id: TrackId,
    class_id: u32,
    kalman: KalmanBoxFilter,
    /// 本帧匹配到的观测框
    observed: BBox,
    frames_lost: u32,
}

impl Track {
    fn new(id: TrackId, bbox: BBox) -> Self {
        // 低观测噪声: 更信任检测结果, 快速响应移动
        let kalman = KalmanBoxFilter::new(&bbox, 0.1, 0.5);
        Self {
            id,
            class_id: bbox.class_id,
            kalman,
            observed: bbox,
            frames_lost: 0,
        }
    }

    fn update(&mut self, bbox: BBox) {
        self.kalman.update(&bbox);
        self.observed = bbox;
        self.frames_lost = 0;
    }
}

/// ByteTrack 追踪器
#[derive(Debug)]
pub struct ByteTracker {
    tracks: Vec<Track>,
    next_id: TrackId,
    /// 最大允许丢失帧数
    max_lost_frames: u32,
    high_score_threshold: f32,
    /// 低分阈值 (救援用)
    low_score_threshold: f32,
    high_iou_threshold: f32,
    low_iou_threshold: f32,
}

impl ByteTracker {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            max_lost_frames: 30,
            high_score_threshold: 0.5,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.3,
            low_iou_threshold: 0.2,
        }
    }

    /// 高分阈值跟随检测置信度阈值
    pub fn with_high_score(mut self, threshold: f32) -> Self {
        self.high_score_threshold = threshold;
        self.low_score_threshold = self.low_score_threshold.min(threshold);
        self
    }

    pub fn with_max_lost_frames(mut self, frames: u32) -> Self {
        self.max_lost_frames = frames;
        self
    }

    /// 更新跟踪 (ByteTrack 三步匹配)
    ///
    /// 返回本帧被匹配或新建的轨迹: (ID, 观测框)
    pub fn update(&mut self, detections: &[BBox]) -> Vec<(TrackId, BBox)> {
        // 1. 所有轨迹先预测
        for track in &mut self.tracks {
            track.kalman.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets = Vec::new();
        let mut low_dets = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            if det.confidence >= self.high_score_threshold {
                high_dets.push(idx);
            } else if det.confidence >= self.low_score_threshold {
                low_dets.push(idx);
            }
        }

        let mut matched_det = vec![false; detections.len()];
        let mut matched_track = vec![false; self.tracks.len()];

        // 3. 第一轮匹配: 高分检测 + 所有轨迹
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        for (det_idx, track_idx) in
            self.assign(detections, &high_dets, &all_tracks, self.high_iou_threshold)
        {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(detections[det_idx].clone());
        }

        // 4. 第二轮匹配: 低分检测 + 未匹配的轨迹 (救援)
        let unmatched_tracks: Vec<usize> = (0..self.tracks.len())
            .filter(|&idx| !matched_track[idx])
            .collect();
        for (det_idx, track_idx) in
            self.assign(detections, &low_dets, &unmatched_tracks, self.low_iou_threshold)
        {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(detections[det_idx].clone());
        }

        // 5. 未匹配的轨迹 → 标记丢失
        for (track, matched) in self.tracks.iter_mut().zip(&matched_track) {
            if !matched {
                track.frames_lost += 1;
            }
        }

        // 6. 未匹配的高分检测 → 新建轨迹
        for &det_idx in &high_dets {
            if !matched_det[det_idx] {
                self.tracks
                    .push(Track::new(self.next_id, detections[det_idx].clone()));
                self.next_id = self.next_id.wrapping_add(1).max(1);
            }
        }

        // 7. 删除丢失太久的轨迹
        let max_lost = self.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        self.tracks
            .iter()
            .filter(|t| t.frames_lost == 0)
            .map(|t| (t.id, t.observed.clone()))
            .collect()
    }

    /// IOU 贪心匹配, 只在同类别之间进行
    fn assign(
        &self,
        detections: &[BBox],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for &det_idx in det_indices {
            let det = &detections[det_idx];
            for &track_idx in track_indices {
                let track = &self.tracks[track_idx];
                if track.class_id != det.class_id {
                    continue;
                }
                let iou = det.iou(&track.kalman.state_bbox());
                if iou >= iou_threshold {
                    candidates.push((iou, det_idx, track_idx));
                }
            }
        }

        // IOU 从大到小
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; self.tracks.len()];
        let mut assignments = Vec::new();
        for (_, det_idx, track_idx) in candidates {
            if !used_det[det_idx] && !used_track[track_idx] {
                used_det[det_idx] = true;
                used_track[track_idx] = true;
                assignments.push((det_idx, track_idx));
            }
        }
        assignments
    }

    /// 当前保留的轨迹数 (包含暂时丢失的)
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// 清除所有轨迹, ID 计数继续递增
    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new()
    }
}
