#![allow(dead_code)]
//! Fixed-capacity FIFO log ring for a single station agent (spec §4.3.5).

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;

const CAPACITY: usize = 50;

pub struct LogBuffer {
    entries: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::with_capacity(CAPACITY)) }
    }

    pub fn push(&self, message: impl AsRef<str>) {
        let mut entries = self.entries.lock();
        if entries.len() == CAPACITY {
            entries.pop_front();
        }
        let stamp = Utc::now().format("%H:%M:%S");
        entries.push_back(format!("[{stamp}] {}", message.as_ref()));
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_entry_once_full() {
        let buf = LogBuffer::new();
        for i in 0..60 {
            buf.push(format!("entry {i}"));
        }
        let snapshot = buf.snapshot();
        assert_eq!(snapshot.len(), CAPACITY);
        assert!(snapshot[0].contains("entry 10"));
        assert!(snapshot.last().unwrap().contains("entry 59"));
    }

    #[test]
    fn entries_are_timestamp_prefixed() {
        let buf = LogBuffer::new();
        buf.push("hello");
        let snapshot = buf.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].starts_with('['));
        assert!(snapshot[0].ends_with("hello"));
    }
}
