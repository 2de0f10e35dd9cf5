//! 内存事件表

use chrono::NaiveDateTime;
use parking_lot::Mutex;

use super::{CrossingEvent, Direction, EventSink, Summary};
use crate::detection::TrackId;
use crate::error::SinkError;

#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<CrossingEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部事件 (按写入顺序)
    pub fn events(&self) -> Vec<CrossingEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn append_event(
        &self,
        direction: Direction,
        track_id: TrackId,
        timestamp: NaiveDateTime,
    ) -> Result<CrossingEvent, SinkError> {
        let mut events = self.events.lock();
        let event = CrossingEvent {
            id: events.len() as u64 + 1,
            timestamp,
            direction,
            track_id,
        };
        events.push(event.clone());
        Ok(event)
    }

    fn summary(&self) -> Result<Summary, SinkError> {
        let mut summary = Summary::default();
        for event in self.events.lock().iter() {
            summary.record(event.direction);
        }
        Ok(summary)
    }

    fn recent(&self, limit: usize) -> Result<Vec<CrossingEvent>, SinkError> {
        Ok(self.events.lock().iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increment_and_recent_is_newest_first() {
        let sink = MemorySink::new();
        let now = chrono::Local::now().naive_local();
        sink.append_event(Direction::In, 1, now).unwrap();
        sink.append_event(Direction::In, 2, now).unwrap();
        let last = sink.append_event(Direction::Out, 3, now).unwrap();
        assert_eq!(last.id, 3);

        let recent = sink.recent(2).unwrap();
        assert_eq!(
            recent.iter().map(|e| e.track_id).collect::<Vec<_>>(),
            vec![3, 2]
        );
        assert_eq!(
            sink.summary().unwrap(),
            Summary {
                in_total: 2,
                out_total: 1
            }
        );
    }
}
