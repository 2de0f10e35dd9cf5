//! 越线判定 (Crossing Counter)
//!
//! 每条轨迹保留最近 10 个中心点, 只用最后两个点和竖直计数线比较:
//! - prev.x < line 且 curr.x >= line → IN
//! - prev.x > line 且 curr.x <= line → OUT
//! 每条轨迹一生最多计数一次, 直到 clear().
//!
//! 轨迹状态只归推理线程所有, 外部的 reset 通过命令在安全点执行.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::detection::{Detection, Point, TrackId};
use crate::storage::Direction;

/// 每条轨迹保留的中心点数
pub const HISTORY_LIMIT: usize = 10;

/// 一次越线
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub track_id: TrackId,
    pub direction: Direction,
}

/// 单帧计数增量
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossingTally {
    pub in_count: u64,
    pub out_count: u64,
    /// 按检测顺序排列的越线明细
    pub crossings: Vec<Crossing>,
}

impl CrossingTally {
    pub fn is_empty(&self) -> bool {
        self.crossings.is_empty()
    }

    fn push(&mut self, track_id: TrackId, direction: Direction) {
        match direction {
            Direction::In => self.in_count += 1,
            Direction::Out => self.out_count += 1,
        }
        self.crossings.push(Crossing {
            track_id,
            direction,
        });
    }
}

#[derive(Debug)]
struct TrackState {
    label: String,
    history: VecDeque<Point>,
    counted: bool,
    last_seen: Instant,
}

impl TrackState {
    fn new(label: &str, now: Instant) -> Self {
        Self {
            label: label.to_string(),
            history: VecDeque::with_capacity(HISTORY_LIMIT + 1),
            counted: false,
            last_seen: now,
        }
    }

    fn record(&mut self, point: Point, now: Instant) {
        self.history.push_back(point);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.last_seen = now;
    }

    /// 最后两个点相对计数线的跨越方向
    fn transition(&self, line_x: i32) -> Option<Direction> {
        let n = self.history.len();
        if n < 2 {
            return None;
        }
        let prev = self.history[n - 2].x;
        let curr = self.history[n - 1].x;
        if prev < line_x && curr >= line_x {
            Some(Direction::In)
        } else if prev > line_x && curr <= line_x {
            Some(Direction::Out)
        } else {
            None
        }
    }
}

/// 轨迹表 + 已计数集合
#[derive(Debug)]
pub struct CrossingCounter {
    tracks: HashMap<TrackId, TrackState>,
    line_x: Option<i32>,
    line_width: u32,
    target_label: Option<String>,
}

impl CrossingCounter {
    /// `target_label` 为 None 时统计所有类别
    pub fn new(target_label: Option<String>) -> Self {
        Self {
            tracks: HashMap::new(),
            line_x: None,
            line_width: 0,
            target_label,
        }
    }

    /// 当前计数线 x 坐标 (第一帧之前为 None)
    pub fn line_x(&self) -> Option<i32> {
        self.line_x
    }

    /// 会话第一帧确定计数线 floor(width / 2), 之后保持不变
    pub fn ensure_line(&mut self, frame_width: u32) -> i32 {
        match self.line_x {
            Some(line) => {
                if frame_width != self.line_width {
                    warn!(
                        line_x = line,
                        session_width = self.line_width,
                        frame_width,
                        "⚠️ 帧宽度变化, 计数线保持不变"
                    );
                    self.line_width = frame_width;
                }
                line
            }
            None => {
                let line = (frame_width / 2) as i32;
                self.line_x = Some(line);
                self.line_width = frame_width;
                debug!(line_x = line, frame_width, "计数线已确定");
                line
            }
        }
    }

    /// 处理一帧检测结果, 返回本帧的计数增量
    pub fn update(
        &mut self,
        detections: &[Detection],
        frame_width: u32,
        now: Instant,
    ) -> CrossingTally {
        let line_x = self.ensure_line(frame_width);
        let mut tally = CrossingTally::default();

        for det in detections {
            if let Some(target) = &self.target_label {
                if &det.label != target {
                    continue;
                }
            }

            let track = self
                .tracks
                .entry(det.track_id)
                .or_insert_with(|| TrackState::new(&det.label, now));
            track.record(det.centroid(), now);

            if track.counted {
                continue;
            }
            if let Some(direction) = track.transition(line_x) {
                track.counted = true;
                tally.push(det.track_id, direction);
            }
        }

        tally
    }

    pub fn is_counted(&self, track_id: TrackId) -> bool {
        self.tracks.get(&track_id).map_or(false, |t| t.counted)
    }

    /// 轨迹历史 (旧 → 新)
    pub fn history(&self, track_id: TrackId) -> Option<Vec<Point>> {
        self.tracks
            .get(&track_id)
            .map(|t| t.history.iter().copied().collect())
    }

    pub fn label(&self, track_id: TrackId) -> Option<&str> {
        self.tracks.get(&track_id).map(|t| t.label.as_str())
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn counted_count(&self) -> usize {
        self.tracks.values().filter(|t| t.counted).count()
    }

    /// 清除超过 `ttl` 未出现的轨迹, 返回清除数量
    pub fn evict_stale(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.tracks.len();
        self.tracks
            .retain(|_, t| now.saturating_duration_since(t.last_seen) <= ttl);
        before - self.tracks.len()
    }

    /// 清空轨迹历史和已计数集合, 计数线在下一帧重新确定
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.line_x = None;
        self.line_width = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    const WIDTH: u32 = 640;

    /// 中心点为 (cx, 100) 的检测
    fn det(track_id: TrackId, cx: i32) -> Detection {
        let x = cx as f32;
        Detection::new(
            track_id,
            "person",
            BBox::new(x - 20.0, 50.0, x + 20.0, 150.0),
        )
    }

    fn step(counter: &mut CrossingCounter, dets: &[Detection]) -> CrossingTally {
        counter.update(dets, WIDTH, Instant::now())
    }

    #[test]
    fn line_is_half_the_first_frame_width() {
        let mut counter = CrossingCounter::new(None);
        assert_eq!(counter.line_x(), None);
        step(&mut counter, &[]);
        assert_eq!(counter.line_x(), Some(320));

        // 宽度变化不移动计数线
        counter.update(&[], 1281, Instant::now());
        assert_eq!(counter.line_x(), Some(320));

        counter.clear();
        counter.update(&[], 1281, Instant::now());
        assert_eq!(counter.line_x(), Some(640));
    }

    #[test]
    fn entering_track_counts_once() {
        let mut counter = CrossingCounter::new(Some("person".into()));

        assert!(step(&mut counter, &[det(1, 300)]).is_empty());
        let tally = step(&mut counter, &[det(1, 340)]);
        assert_eq!((tally.in_count, tally.out_count), (1, 0));
        assert_eq!(
            tally.crossings,
            vec![Crossing {
                track_id: 1,
                direction: Direction::In
            }]
        );
        assert!(counter.is_counted(1));

        // 已计数的轨迹往回走也不再计数
        let tally = step(&mut counter, &[det(1, 300)]);
        assert_eq!((tally.in_count, tally.out_count), (0, 0));
        let tally = step(&mut counter, &[det(1, 340)]);
        assert_eq!((tally.in_count, tally.out_count), (0, 0));
    }

    #[test]
    fn leaving_track_counts_out() {
        let mut counter = CrossingCounter::new(None);
        step(&mut counter, &[det(2, 340)]);
        let tally = step(&mut counter, &[det(2, 300)]);
        assert_eq!((tally.in_count, tally.out_count), (0, 1));
        assert!(counter.is_counted(2));
    }

    #[test]
    fn boundary_landing_counts_inclusively() {
        let mut counter = CrossingCounter::new(None);
        step(&mut counter, &[det(1, 319), det(2, 321)]);
        let tally = step(&mut counter, &[det(1, 320), det(2, 320)]);
        assert_eq!((tally.in_count, tally.out_count), (1, 1));
    }

    #[test]
    fn starting_on_the_line_never_counts() {
        // 从线上出发: prev == line, 两个条件都不满足
        let mut counter = CrossingCounter::new(None);
        step(&mut counter, &[det(1, 320)]);
        assert!(step(&mut counter, &[det(1, 400)]).is_empty());
        assert!(step(&mut counter, &[det(1, 500)]).is_empty());
        assert!(!counter.is_counted(1));
    }

    #[test]
    fn oscillation_on_one_side_never_counts() {
        let mut counter = CrossingCounter::new(None);
        for cx in [310, 318, 305, 319, 300] {
            assert!(step(&mut counter, &[det(5, cx)]).is_empty());
        }
    }

    #[test]
    fn single_sample_never_counts() {
        let mut counter = CrossingCounter::new(None);
        assert!(step(&mut counter, &[det(9, 400)]).is_empty());
        assert_eq!(counter.history(9).unwrap().len(), 1);
    }

    #[test]
    fn history_keeps_last_ten_points() {
        let mut counter = CrossingCounter::new(None);
        for i in 0..11 {
            step(&mut counter, &[det(1, 10 + i)]);
        }
        let history = counter.history(1).unwrap();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.first().unwrap().x, 11);
        assert_eq!(history.last().unwrap().x, 20);
    }

    #[test]
    fn several_tracks_sum_in_one_frame() {
        let mut counter = CrossingCounter::new(None);
        step(&mut counter, &[det(1, 300), det(2, 310), det(3, 350)]);
        let tally = step(&mut counter, &[det(1, 330), det(2, 330), det(3, 300)]);
        assert_eq!((tally.in_count, tally.out_count), (2, 1));
    }

    #[test]
    fn other_classes_are_ignored() {
        let mut counter = CrossingCounter::new(Some("person".into()));
        let car = |cx: i32| Detection::new(7, "car", BBox::new(cx as f32 - 5.0, 0.0, cx as f32 + 5.0, 10.0));
        step(&mut counter, &[car(300)]);
        assert!(step(&mut counter, &[car(340)]).is_empty());
        assert_eq!(counter.track_count(), 0);
    }

    #[test]
    fn clear_allows_counting_again() {
        let mut counter = CrossingCounter::new(None);
        step(&mut counter, &[det(1, 300)]);
        step(&mut counter, &[det(1, 340)]);
        assert!(counter.is_counted(1));

        counter.clear();
        assert_eq!(counter.track_count(), 0);
        assert!(!counter.is_counted(1));

        step(&mut counter, &[det(1, 300)]);
        let tally = step(&mut counter, &[det(1, 340)]);
        assert_eq!(tally.in_count, 1);
    }

    #[test]
    fn stale_tracks_are_evicted() {
        let mut counter = CrossingCounter::new(None);
        let t0 = Instant::now();
        counter.update(&[det(1, 100), det(2, 200)], WIDTH, t0);
        counter.update(&[det(2, 210)], WIDTH, t0 + Duration::from_secs(20));

        let evicted = counter.evict_stale(t0 + Duration::from_secs(35), Duration::from_secs(30));
        assert_eq!(evicted, 1);
        assert!(counter.history(1).is_none());
        assert!(counter.history(2).is_some());
    }
}
