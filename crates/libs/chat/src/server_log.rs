use chrono::Local;
use log::info;
use std::collections::VecDeque;

/// Bounded, human-readable record of what the server did.
///
/// Purely observational: nothing in the protocol reads it back.
#[derive(Debug)]
pub struct ServerLog {
    entries: VecDeque<String>,
    capacity: usize,
}

impl ServerLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Stamps `message` with the local time, mirrors it to the `log` facade and
    /// appends it, evicting the oldest line once full.
    pub fn push(&mut self, message: &str) {
        let entry = format!(
            "[UDP Server] [{}] {}",
            Local::now().format("%H:%M:%S"),
            message
        );
        info!("{}", entry);
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
