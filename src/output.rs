//! Output sinks and line buffering.
//!
//! Every command writes its output through an [`OutputSink`]: a destination
//! that accepts one complete line at a time and may be called concurrently
//! from any runner task. The boxed presentation additionally keeps a bounded
//! scrollback per command in a [`LineBuffer`].

use std::collections::VecDeque;

use strip_ansi_escapes::strip;

/// Destination for one command's output lines.
///
/// Implementations serialize all terminal access internally; callers may
/// invoke `write_line` from any task without further coordination.
pub trait OutputSink: Send + Sync {
    /// Delivers one complete line of output.
    fn write_line(&self, line: &str);
}

/// A fixed-capacity ring buffer holding the most recent lines written.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    capacity: usize,
    lines: VecDeque<String>,
}

impl LineBuffer {
    /// Creates a new `LineBuffer` with the specified maximum capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Adds a line to the buffer.
    ///
    /// Returns `true` if an old line was dropped to make room.
    pub fn push(&mut self, line: String) -> bool {
        let mut dropped = false;
        self.lines.push_back(line);
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
            dropped = true;
        }
        dropped
    }

    /// Changes the capacity, dropping the oldest lines first when shrinking.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.lines.len() > capacity {
            self.lines.pop_front();
        }
    }

    /// Returns the number of lines currently in the buffer.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` if no lines have been written yet.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns an iterator over the lines, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

/// Sanitizes a line for fixed-width rendering.
///
/// ANSI escape codes would corrupt cursor-addressed regions, so they are
/// stripped. Invalid UTF-8 sequences are replaced.
pub fn sanitize_text(text: &str) -> String {
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}
