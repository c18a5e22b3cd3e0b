//! Response framing
//!
//! The adapter stream arrives in arbitrary fragments: one notification may
//! hold several lines, and one line may be split over two notifications. The
//! framer splits on CR, LF and the `>` prompt, trims each segment, drops empty
//! ones, and holds an unterminated tail until the next fragment completes it.

use std::collections::vec_deque::Drain;
use std::collections::VecDeque;

/// The adapter's ready-for-input marker
pub const PROMPT: char = '>';

/// One framed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A trimmed, non-empty response line
    Line(String),
    /// The adapter printed its prompt; the reply is complete
    Prompt,
}

/// Reassembles raw text fragments into logical lines
#[derive(Debug, Default)]
pub struct ResponseFramer {
    partial: String,
    ready: VecDeque<Frame>,
}

impl ResponseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fragment and drain every frame it completes, in order
    pub fn push(&mut self, fragment: &str) -> Drain<'_, Frame> {
        for c in fragment.chars() {
            match c {
                '\r' | '\n' => self.flush_line(),
                PROMPT => {
                    self.flush_line();
                    self.ready.push_back(Frame::Prompt);
                }
                _ => self.partial.push(c),
            }
        }
        self.ready.drain(..)
    }

    fn flush_line(&mut self) {
        let line = self.partial.trim();
        if !line.is_empty() {
            self.ready.push_back(Frame::Line(line.to_string()));
        }
        self.partial.clear();
    }
}
