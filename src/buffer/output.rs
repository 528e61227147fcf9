use std::collections::VecDeque;

use ansi_to_tui::IntoText;
use ratatui::text::Span;

/// Output type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
    /// Narration produced by sshq itself (connection state, failures, logs)
    Log,
}

/// One already-wrapped display line
#[derive(Debug, Clone)]
pub struct OutputLine {
    /// Output type
    pub kind: OutputKind,
    /// Pre-parsed spans with styles (for rendering)
    spans: Vec<Span<'static>>,
}

impl OutputLine {
    /// Create a new OutputLine without wrapping
    ///
    /// Parses ANSI escape sequences into styled spans.
    pub fn new(kind: OutputKind, content: String) -> Self {
        Self {
            kind,
            spans: parse_spans(&content),
        }
    }

    /// Parse one logical line and hard-wrap it at `width` visible characters.
    ///
    /// Escape sequences do not count towards the width. An empty line yields
    /// no display lines at all. A `width` of zero disables wrapping.
    pub fn wrap(kind: OutputKind, content: &str, width: usize) -> Vec<Self> {
        let spans = parse_spans(content);
        if spans.iter().all(|s| s.content.is_empty()) {
            return Vec::new();
        }
        if width == 0 {
            return vec![Self { kind, spans }];
        }

        let mut lines = Vec::new();
        let mut current: Vec<Span<'static>> = Vec::new();
        let mut used = 0;
        for span in spans {
            let style = span.style;
            let mut rest: &str = span.content.as_ref();
            while !rest.is_empty() {
                let room = width - used;
                let split = rest
                    .char_indices()
                    .nth(room)
                    .map_or(rest.len(), |(idx, _)| idx);
                let (head, tail) = rest.split_at(split);
                used += head.chars().count();
                current.push(Span::styled(head.to_string(), style));
                rest = tail;
                if used == width {
                    lines.push(Self {
                        kind,
                        spans: std::mem::take(&mut current),
                    });
                    used = 0;
                }
            }
        }
        if !current.is_empty() {
            lines.push(Self {
                kind,
                spans: current,
            });
        }
        lines
    }

    /// Return pre-parsed spans for rendering
    pub fn spans(&self) -> &[Span<'static>] {
        &self.spans
    }

    /// Return plain text without ANSI escape sequences (derived from spans)
    pub fn plain(&self) -> String {
        self.spans.iter().map(|s| s.content.as_ref()).collect()
    }
}

fn parse_spans(content: &str) -> Vec<Span<'static>> {
    // Remote shells emit CRLF and tabs; neither renders sanely in a cell grid
    let content = content.trim_end_matches('\r').replace('\t', "    ");
    match content.as_str().into_text() {
        Ok(text) => text
            .lines
            .into_iter()
            .next()
            .map(|line| line.spans)
            .unwrap_or_default(),
        Err(_) => vec![Span::raw(content)],
    }
}

/// Ring buffer for output lines
///
/// When max lines is exceeded, old lines are automatically discarded.
/// Uses VecDeque internally for O(1) removal from the front.
pub struct OutputBuffer {
    lines: VecDeque<OutputLine>,
    max_lines: usize,
}

impl OutputBuffer {
    /// Create a buffer with specified max lines
    ///
    /// # Arguments
    /// * `max_lines` - Maximum number of lines to keep (0 for unlimited)
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines,
        }
    }

    /// Add an output line
    ///
    /// When max_lines is exceeded, the oldest line is discarded.
    pub fn push(&mut self, line: OutputLine) {
        if self.max_lines > 0 && self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Get lines in specified range
    ///
    /// # Arguments
    /// * `start` - Start index (0-based, oldest first)
    /// * `count` - Number of lines to get
    ///
    /// # Returns
    /// Lines in the specified range. Empty or partial result if out of bounds.
    pub fn get_range(&self, start: usize, count: usize) -> Vec<&OutputLine> {
        self.lines.iter().skip(start).take(count).collect()
    }

    /// Get the `count` lines that end `back` lines before the newest one,
    /// oldest first.
    pub fn tail_window(&self, back: usize, count: usize) -> Vec<&OutputLine> {
        let end = self.lines.len().saturating_sub(back);
        let start = end.saturating_sub(count);
        self.get_range(start, end - start)
    }

    /// Return the number of lines in the buffer
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Return an iterator over all lines
    pub fn iter(&self) -> impl Iterator<Item = &OutputLine> {
        self.lines.iter()
    }
}
