use crate::models::{Cursor, Event, Snapshot};

/// What happened to one delivered record.
#[derive(Debug)]
pub enum Outcome {
    /// The record was consumed; the current snapshot must be published.
    Counted,
    /// Position already consumed in this session (replay after reconnect).
    Duplicate,
    /// Not an event. The cursor moved past it; nothing to publish.
    Malformed(serde_json::Error),
}

/// Per-type counts plus the cursor they are consistent with.
///
/// Owned by exactly one consumption loop. Counts only ever grow.
#[derive(Debug, Clone, Default)]
pub struct StatsCounter {
    snapshot: Snapshot,
    cursor: Cursor,
}

impl StatsCounter {
    pub fn new(start: Cursor) -> Self {
        Self {
            snapshot: Snapshot::new(),
            cursor: start,
        }
    }

    pub fn resume(cursor: Cursor, snapshot: Snapshot) -> Self {
        Self { snapshot, cursor }
    }

    pub fn apply(&mut self, position: Cursor, payload: &[u8]) -> Outcome {
        if position < self.cursor {
            return Outcome::Duplicate;
        }
        if position > self.cursor {
            tracing::warn!(
                expected = %self.cursor,
                got = %position,
                "Gap in source stream, records were skipped by the store"
            );
        }
        self.cursor = position.next();

        match Event::from_json_slice(payload) {
            Ok(event) => {
                if let Some(event_type) = event.event_type() {
                    self.snapshot.increment(event_type);
                }
                Outcome::Counted
            }
            Err(e) => Outcome::Malformed(e),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Position of the next record to consume.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }
}
