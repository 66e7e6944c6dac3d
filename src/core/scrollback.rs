//! Scrollback buffer for pane output
//!
//! A bounded ring of lines. Bytes arrive in arbitrary chunks from a reader
//! thread, so an unterminated trailing line is held back until its newline.

use std::collections::VecDeque;

/// Default number of retained lines
pub const SCROLLBACK_LIMIT: usize = 2000;

/// Bounded line buffer (oldest lines are dropped first)
#[derive(Debug, Clone)]
pub struct Scrollback {
    lines: VecDeque<String>,
    /// Bytes after the last newline
    partial: String,
    max_lines: usize,
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new(SCROLLBACK_LIMIT)
    }
}

impl Scrollback {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            partial: String::new(),
            max_lines: max_lines.max(1),
        }
    }

    /// Append raw output, splitting it into lines
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let mut rest: &str = &text;

        while let Some(pos) = rest.find('\n') {
            let mut line = std::mem::take(&mut self.partial);
            line.push_str(&rest[..pos]);
            if line.ends_with('\r') {
                line.pop();
            }
            self.push_line(line);
            rest = &rest[pos + 1..];
        }
        self.partial.push_str(rest);
    }

    /// Append a complete line
    pub fn push_line(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// Last `count` lines (all lines if `None`), oldest first.
    ///
    /// A pending partial line is included as the final entry.
    pub fn tail(&self, count: Option<usize>) -> Vec<String> {
        let mut all: Vec<String> = self.lines.iter().cloned().collect();
        if !self.partial.is_empty() {
            all.push(self.partial.clone());
        }
        match count {
            Some(n) if n < all.len() => all.split_off(all.len() - n),
            _ => all,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.partial.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines_across_chunks() {
        let mut sb = Scrollback::new(10);
        sb.push_bytes(b"hel");
        sb.push_bytes(b"lo\r\nwor");
        sb.push_bytes(b"ld\n");
        assert_eq!(sb.tail(None), vec!["hello", "world"]);
        assert_eq!(sb.len(), 2);
    }

    #[test]
    fn test_partial_line_visible_in_tail() {
        let mut sb = Scrollback::new(10);
        sb.push_bytes(b"done\n$ ");
        assert_eq!(sb.tail(None), vec!["done", "$ "]);
        assert_eq!(sb.len(), 1);
    }

    #[test]
    fn test_bounded() {
        let mut sb = Scrollback::new(3);
        for i in 0..10 {
            sb.push_line(format!("line {}", i));
        }
        assert_eq!(sb.tail(None), vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn test_tail_count() {
        let mut sb = Scrollback::new(10);
        sb.push_bytes(b"a\nb\nc\n");
        assert_eq!(sb.tail(Some(2)), vec!["b", "c"]);
        assert_eq!(sb.tail(Some(50)), vec!["a", "b", "c"]);
        assert!(Scrollback::default().is_empty());
    }
}
