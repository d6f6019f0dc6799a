//! Debug trace sink: a bounded, oldest-evicted ring of request/response
//! snapshots. The engine emits into it on every executed step; an external
//! debug API drains it. Emission never blocks and never fails the run.

use crate::reporting::model::{RequestSnapshot, ResponseSnapshot};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub iteration_id: u64,
    pub step_order: u32,
    pub request: Option<RequestSnapshot>,
    pub response: Option<ResponseSnapshot>,
    pub error: Option<String>,
    pub at: String,
}

pub struct TraceBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<TraceEntry>>,
}

impl TraceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an entry, evicting the oldest when full. A poisoned lock is
    /// swallowed: tracing must not take the run down.
    pub fn record(&self, entry: TraceEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    pub fn snapshot(&self) -> Vec<TraceEntry> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step_order: u32) -> TraceEntry {
        TraceEntry {
            iteration_id: 0,
            step_order,
            request: None,
            response: None,
            error: None,
            at: String::new(),
        }
    }

    #[test]
    fn oldest_entries_are_evicted_at_capacity() {
        let buffer = TraceBuffer::new(3);
        for i in 1..=5 {
            buffer.record(entry(i));
        }
        let steps: Vec<u32> = buffer.snapshot().iter().map(|e| e.step_order).collect();
        assert_eq!(steps, vec![3, 4, 5]);
    }
}
