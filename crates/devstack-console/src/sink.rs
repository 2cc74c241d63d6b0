//! Render sinks: the append-only display the console writes into.

use std::io::Write;

/// Append-only text display. `append` order is display order.
///
/// Search is delegated to the display, which owns scrollback and matching;
/// displays without search report no match.
pub trait RenderSink {
    fn append(&mut self, line: &str);

    fn clear(&mut self);

    fn search(&mut self, _query: &str) -> bool {
        false
    }

    fn find_next(&mut self, _query: &str) -> bool {
        false
    }

    fn find_previous(&mut self, _query: &str) -> bool {
        false
    }
}

impl<S: RenderSink + ?Sized> RenderSink for Box<S> {
    fn append(&mut self, line: &str) {
        (**self).append(line);
    }

    fn clear(&mut self) {
        (**self).clear();
    }

    fn search(&mut self, query: &str) -> bool {
        (**self).search(query)
    }

    fn find_next(&mut self, query: &str) -> bool {
        (**self).find_next(query)
    }

    fn find_previous(&mut self, query: &str) -> bool {
        (**self).find_previous(query)
    }
}

/// In-memory sink keeping every appended line since the last clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySink {
    lines: Vec<String>,
    clears: usize,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of times the display was cleared.
    #[must_use]
    pub const fn clears(&self) -> usize {
        self.clears
    }
}

impl RenderSink for MemorySink {
    fn append(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.clears += 1;
    }

    fn search(&mut self, query: &str) -> bool {
        !query.is_empty() && self.lines.iter().any(|line| line.contains(query))
    }

    fn find_next(&mut self, query: &str) -> bool {
        self.search(query)
    }

    fn find_previous(&mut self, query: &str) -> bool {
        self.search(query)
    }
}

/// Sink streaming lines to a writer (stdout for the headless console).
///
/// Write failures are logged once and further output is discarded.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
    clear_sequence: Option<&'static str>,
    failed: bool,
}

/// ANSI "erase display and home cursor".
pub const ANSI_CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

impl<W: Write> WriterSink<W> {
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self {
            writer,
            clear_sequence: None,
            failed: false,
        }
    }

    /// Emit `sequence` on every clear (e.g. [`ANSI_CLEAR_SCREEN`] on a tty).
    #[must_use]
    pub const fn with_clear_sequence(mut self, sequence: &'static str) -> Self {
        self.clear_sequence = Some(sequence);
        self
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_all(&mut self, bytes: &[u8]) {
        if self.failed {
            return;
        }
        if let Err(err) = self
            .writer
            .write_all(bytes)
            .and_then(|()| self.writer.flush())
        {
            tracing::warn!(error = %err, "render sink write failed, discarding further output");
            self.failed = true;
        }
    }
}

impl<W: Write> RenderSink for WriterSink<W> {
    fn append(&mut self, line: &str) {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.write_all(&buf);
    }

    fn clear(&mut self) {
        if let Some(sequence) = self.clear_sequence {
            self.write_all(sequence.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_lines_and_clears() {
        let mut sink = MemorySink::new();
        sink.append("a");
        sink.append("b");
        sink.clear();
        sink.append("c");
        assert_eq!(sink.lines(), ["c".to_string()]);
        assert_eq!(sink.clears(), 1);
        assert!(sink.search("c"));
        assert!(!sink.search("a"));
        assert!(!sink.search(""));
    }

    #[test]
    fn writer_sink_appends_newline_terminated_lines() {
        let mut sink = WriterSink::new(Vec::new()).with_clear_sequence(ANSI_CLEAR_SCREEN);
        sink.append("one");
        sink.clear();
        sink.append("two");
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, format!("one\n{ANSI_CLEAR_SCREEN}two\n"));
    }

    #[test]
    fn writer_sink_without_clear_sequence_ignores_clear() {
        let mut sink = WriterSink::new(Vec::new());
        sink.append("x");
        sink.clear();
        assert_eq!(sink.into_inner(), b"x\n");
    }

    #[test]
    fn boxed_sinks_forward_calls() {
        let mut sink: Box<dyn RenderSink> = Box::new(MemorySink::new());
        sink.append("line");
        assert!(sink.search("line"));
    }
}
