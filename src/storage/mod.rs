/// 计数事件持久化 (Persistence Sink)
///
/// - memory: 内存事件表 (测试 / 嵌入使用)
/// - jsonl:  追加写的 JSON Lines 文件, 启动时重建索引
pub mod jsonl;
pub mod memory;

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::detection::TrackId;
use crate::error::SinkError;

pub use jsonl::JsonlSink;
pub use memory::MemorySink;

/// 事件时间格式 (本地时间, 秒精度)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 越线方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条越线记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossingEvent {
    /// 自增ID (从1开始)
    pub id: u64,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub direction: Direction,
    pub track_id: TrackId,
}

/// 累计汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(rename = "in")]
    pub in_total: u64,
    #[serde(rename = "out")]
    pub out_total: u64,
}

impl Summary {
    pub(crate) fn record(&mut self, direction: Direction) {
        match direction {
            Direction::In => self.in_total += 1,
            Direction::Out => self.out_total += 1,
        }
    }
}

/// 事件存储: 推理线程写入, 控制面查询
pub trait EventSink: Send + Sync {
    /// 追加一条事件, 返回带ID的记录
    fn append_event(
        &self,
        direction: Direction,
        track_id: TrackId,
        timestamp: NaiveDateTime,
    ) -> Result<CrossingEvent, SinkError>;

    /// IN / OUT 总数
    fn summary(&self) -> Result<Summary, SinkError>;

    /// 最近的事件, 最新的在前
    fn recent(&self, limit: usize) -> Result<Vec<CrossingEvent>, SinkError>;
}

mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}
