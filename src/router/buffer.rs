//! StreamBuffer: the per-(client, stream) backpressure discipline (§4.4.4).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use gateway_protocol::ServerMessage;

enum BufferedEntry {
    Data {
        message: ServerMessage,
        buffered_at: Instant,
    },
    Status {
        message: ServerMessage,
    },
}

pub struct StreamBuffer {
    capacity: usize,
    entries: VecDeque<BufferedEntry>,
    pub events_dropped: u64,
}

impl StreamBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            events_dropped: 0,
        }
    }

    /// Push a DATA event. When `coalescing_enabled` and the tail entry is a
    /// DATA event buffered within `coalescing_window`, it is replaced rather
    /// than appended. On overflow the new event is dropped and counted;
    /// returns `true` iff the event was dropped.
    pub fn push_data(
        &mut self,
        message: ServerMessage,
        coalescing_enabled: bool,
        coalescing_window: Duration,
    ) -> bool {
        if coalescing_enabled {
            if let Some(BufferedEntry::Data { buffered_at, .. }) = self.entries.back() {
                if buffered_at.elapsed() < coalescing_window {
                    *self.entries.back_mut().unwrap() = BufferedEntry::Data {
                        message,
                        buffered_at: Instant::now(),
                    };
                    return false;
                }
            }
        }

        if self.entries.len() >= self.capacity {
            self.events_dropped += 1;
            return true;
        }

        self.entries.push_back(BufferedEntry::Data {
            message,
            buffered_at: Instant::now(),
        });
        false
    }

    /// Buffer (or replace in place) a STATUS event. Operates in keep-latest
    /// mode: on overflow the oldest entry is evicted to make room rather
    /// than dropping the new status. Never increments `events_dropped`.
    pub fn push_status(&mut self, message: ServerMessage) {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| matches!(e, BufferedEntry::Status { .. }))
        {
            self.entries[pos] = BufferedEntry::Status { message };
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BufferedEntry::Status { message });
    }

    pub fn pop_front(&mut self) -> Option<ServerMessage> {
        self.entries.pop_front().map(|entry| match entry {
            BufferedEntry::Data { message, .. } | BufferedEntry::Status { message } => message,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
