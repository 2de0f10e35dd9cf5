//! JSON Lines 事件日志
//!
//! 每条事件一行, 写入后立即 flush. 打开时扫描整个文件重建自增ID和汇总;
//! 只有最后一行允许损坏 (进程在写入途中退出), 其余损坏行视为错误.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{CrossingEvent, Direction, EventSink, Summary};
use crate::detection::TrackId;
use crate::error::SinkError;

/// 内存中保留的最近事件数
const RECENT_CAPACITY: usize = 1000;

struct JsonlState {
    writer: BufWriter<File>,
    next_id: u64,
    summary: Summary,
    recent: VecDeque<CrossingEvent>,
}

pub struct JsonlSink {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

impl JsonlSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let existing = if path.exists() {
            read_events(&path)?
        } else {
            Vec::new()
        };

        let mut summary = Summary::default();
        for event in &existing {
            summary.record(event.direction);
        }
        let next_id = existing.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let skip = existing.len().saturating_sub(RECENT_CAPACITY);
        let recent: VecDeque<CrossingEvent> = existing.into_iter().skip(skip).collect();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(
            path = %path.display(),
            events = next_id - 1,
            in_total = summary.in_total,
            out_total = summary.out_total,
            "🗄️ 事件日志已打开"
        );

        Ok(Self {
            path,
            state: Mutex::new(JsonlState {
                writer: BufWriter::new(file),
                next_id,
                summary,
                recent,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 读取事件日志全部记录
pub fn read_events(path: &Path) -> Result<Vec<CrossingEvent>, SinkError> {
    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
    let last = lines.len().saturating_sub(1);

    let mut events = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CrossingEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) if idx == last => {
                warn!(path = %path.display(), line = idx + 1, error = %e, "⚠️ 忽略损坏的末尾记录");
            }
            Err(source) => {
                return Err(SinkError::Malformed {
                    line: idx + 1,
                    source,
                })
            }
        }
    }
    Ok(events)
}

impl EventSink for JsonlSink {
    fn append_event(
        &self,
        direction: Direction,
        track_id: TrackId,
        timestamp: NaiveDateTime,
    ) -> Result<CrossingEvent, SinkError> {
        let mut state = self.state.lock();
        let event = CrossingEvent {
            id: state.next_id,
            timestamp,
            direction,
            track_id,
        };

        let line = serde_json::to_string(&event)?;
        writeln!(state.writer, "{}", line)?;
        state.writer.flush()?;

        state.next_id += 1;
        state.summary.record(direction);
        if state.recent.len() == RECENT_CAPACITY {
            state.recent.pop_front();
        }
        state.recent.push_back(event.clone());
        Ok(event)
    }

    fn summary(&self) -> Result<Summary, SinkError> {
        Ok(self.state.lock().summary)
    }

    fn recent(&self, limit: usize) -> Result<Vec<CrossingEvent>, SinkError> {
        let state = self.state.lock();
        let total = (state.next_id - 1) as usize;
        if limit <= state.recent.len() || total <= state.recent.len() {
            return Ok(state.recent.iter().rev().take(limit).cloned().collect());
        }
        drop(state);

        // 超出内存窗口时回读文件
        let mut events = read_events(&self.path)?;
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    #[test]
    fn reopen_restores_ids_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("crossings.jsonl");

        {
            let sink = JsonlSink::open(&path).unwrap();
            sink.append_event(Direction::In, 1, now()).unwrap();
            sink.append_event(Direction::Out, 2, now()).unwrap();
            sink.append_event(Direction::In, 3, now()).unwrap();
        }

        let sink = JsonlSink::open(&path).unwrap();
        assert_eq!(
            sink.summary().unwrap(),
            Summary {
                in_total: 2,
                out_total: 1
            }
        );
        let event = sink.append_event(Direction::Out, 4, now()).unwrap();
        assert_eq!(event.id, 4);

        let recent = sink.recent(10).unwrap();
        assert_eq!(
            recent.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![4, 3, 2, 1]
        );
    }

    #[test]
    fn truncated_last_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crossings.jsonl");
        fs::write(
            &path,
            "{\"id\":1,\"timestamp\":\"2024-01-01 00:00:00\",\"direction\":\"IN\",\"track_id\":5}\n{\"id\":2,\"time",
        )
        .unwrap();

        let sink = JsonlSink::open(&path).unwrap();
        assert_eq!(sink.summary().unwrap().in_total, 1);
    }

    #[test]
    fn corrupt_middle_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crossings.jsonl");
        fs::write(
            &path,
            "garbage\n{\"id\":1,\"timestamp\":\"2024-01-01 00:00:00\",\"direction\":\"IN\",\"track_id\":5}\n",
        )
        .unwrap();

        assert!(matches!(
            JsonlSink::open(&path),
            Err(SinkError::Malformed { line: 1, .. })
        ));
    }
}
