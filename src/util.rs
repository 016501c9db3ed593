//! Shared utility functions for the launchpad crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default number of characters retained from a noisy external tool.
pub const DEFAULT_OUTPUT_LIMIT: usize = 500;

/// Bounded tail of a child process's combined output.
///
/// Only the last `limit` characters are kept, so a package manager printing
/// megabytes of progress output cannot grow memory without bound. Clones share
/// the same buffer, which lets reader tasks append while the supervisor reads.
#[derive(Debug, Clone)]
pub struct OutputTail {
    inner: Arc<Mutex<VecDeque<char>>>,
    limit: usize,
}

impl OutputTail {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(limit.min(4096)))),
            limit,
        }
    }

    /// Append one line of output (a newline is added after it).
    /// ANSI escape sequences are stripped before the line is stored.
    pub fn push_line(&self, line: &str) {
        if self.limit == 0 {
            return;
        }
        let clean = console::strip_ansi_codes(line);
        let Ok(mut buf) = self.inner.lock() else {
            return;
        };
        for ch in clean.chars().chain(std::iter::once('\n')) {
            if buf.len() == self.limit {
                buf.pop_front();
            }
            buf.push_back(ch);
        }
    }

    /// Snapshot of the retained tail, trimmed of surrounding whitespace.
    pub fn contents(&self) -> String {
        match self.inner.lock() {
            Ok(buf) => buf.iter().collect::<String>().trim().to_string(),
            Err(_) => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map(|b| b.is_empty()).unwrap_or(true)
    }
}

/// Format a duration as seconds with one decimal, e.g. `"12.3s"`.
pub fn format_secs(duration: std::time::Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_tail_keeps_only_last_chars() {
        let tail = OutputTail::new(10);
        tail.push_line("0123456789");
        tail.push_line("abc");
        // "0123456789\nabc\n" -> last 10 chars
        assert_eq!(tail.contents(), "789\nabc");
    }

    #[test]
    fn test_output_tail_strips_ansi() {
        let tail = OutputTail::new(100);
        tail.push_line("\x1b[32mready\x1b[0m in 300ms");
        assert_eq!(tail.contents(), "ready in 300ms");
    }

    #[test]
    fn test_output_tail_clones_share_buffer() {
        let tail = OutputTail::new(100);
        let writer = tail.clone();
        writer.push_line("from reader task");
        assert!(tail.contents().contains("from reader task"));
        assert!(!tail.is_empty());
    }

    #[test]
    fn test_output_tail_zero_limit_stores_nothing() {
        let tail = OutputTail::new(0);
        tail.push_line("ignored");
        assert!(tail.is_empty());
    }

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(std::time::Duration::from_millis(12_340)), "12.3s");
    }
}
