/// 越线计数 (Counting)
///
/// - crossing: 轨迹历史 + 已计数集合, 按竖直计数线判定 IN/OUT
/// - stats:    共享计数/FPS/运行标志 + FPS 平滑
pub mod crossing;
pub mod stats;

pub use crossing::{Crossing, CrossingCounter, CrossingTally, HISTORY_LIMIT};
pub use stats::{FpsMeter, SharedStats, StatsSnapshot};
