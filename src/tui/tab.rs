use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::buffer::{OutputBuffer, OutputLine};

/// Maximum characters for tab name display in the top bar
const MAX_TAB_NAME_LEN: usize = 40;

/// A named output channel: one per host plus the aggregate tab.
///
/// Each tab has its own lock so writers to different hosts never contend.
pub struct Tab {
    name: String,
    content: Mutex<TabContent>,
}

impl Tab {
    /// Create a new tab
    pub fn new(name: String, max_buffer_lines: usize) -> Self {
        Self {
            name,
            content: Mutex::new(TabContent::new(max_buffer_lines)),
        }
    }

    /// Get the tab name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get truncated name for the top bar
    pub fn display_name(&self) -> String {
        if self.name.chars().count() <= MAX_TAB_NAME_LEN {
            self.name.clone()
        } else {
            let head: String = self.name.chars().take(MAX_TAB_NAME_LEN).collect();
            format!("{head}...")
        }
    }

    /// Lock the scrollback and scroll offset
    pub fn lock(&self) -> MutexGuard<'_, TabContent> {
        self.content.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scrollback of one tab and its scroll position.
///
/// The offset counts lines of back-scroll from the newest line: zero follows
/// the live tail, anything else freezes the view on the same history while
/// new lines arrive. Every method keeps the offset within
/// `[0, max(0, len - height)]` for the viewport height it is given.
pub struct TabContent {
    buffer: OutputBuffer,
    scroll_offset: usize,
}

impl TabContent {
    fn new(max_buffer_lines: usize) -> Self {
        Self {
            buffer: OutputBuffer::new(max_buffer_lines),
            scroll_offset: 0,
        }
    }

    /// Append already-wrapped lines
    pub fn push_lines(&mut self, lines: Vec<OutputLine>, height: usize) {
        let count = lines.len();
        for line in lines {
            self.buffer.push(line);
        }
        if self.scroll_offset != 0 {
            self.scroll_offset = (self.scroll_offset + count).min(self.max_scroll_offset(height));
        }
    }

    /// Get reference to output buffer
    pub fn buffer(&self) -> &OutputBuffer {
        &self.buffer
    }

    /// Get current scroll offset
    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// Lines to show in a viewport of `height` rows, oldest first
    pub fn visible(&self, height: usize) -> Vec<OutputLine> {
        self.buffer
            .tail_window(self.scroll_offset, height)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Scroll one line back into history
    pub fn scroll_up(&mut self, height: usize) {
        self.scroll_by(1, height);
    }

    /// Scroll one line towards the live tail
    pub fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(1);
    }

    /// Scroll one page back into history
    pub fn page_up(&mut self, height: usize) {
        self.scroll_by(height, height);
    }

    /// Scroll one page towards the live tail
    pub fn page_down(&mut self, height: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(height);
    }

    /// Jump to the oldest retained line
    pub fn scroll_to_oldest(&mut self, height: usize) {
        self.scroll_offset = self.max_scroll_offset(height);
    }

    /// Follow the live tail again
    pub fn scroll_to_live(&mut self) {
        self.scroll_offset = 0;
    }

    fn scroll_by(&mut self, lines: usize, height: usize) {
        self.scroll_offset = (self.scroll_offset + lines).min(self.max_scroll_offset(height));
    }

    /// Calculate maximum scroll offset
    fn max_scroll_offset(&self, height: usize) -> usize {
        self.buffer.len().saturating_sub(height)
    }
}
