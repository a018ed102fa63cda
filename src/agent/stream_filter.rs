//! Incremental filter that hides tool-call markers from the user-visible
//! stream while letting prose through.
//!
//! Chunk boundaries can split a marker anywhere, so a partial prefix is
//! buffered until it either completes (and is dropped) or turns out to be
//! plain text (and is emitted).

use super::tool_parser::{scan_next_marker, MarkerScan};

/// Stateful marker filter for one stream.
#[derive(Debug, Default)]
pub struct StreamFilter {
    buffer: String,
}

impl StreamFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the text safe to display now.
    pub fn process_chunk(&mut self, chunk: &str) -> String {
        self.buffer.push_str(chunk);
        self.drain(false)
    }

    /// Flush at stream end.  Complete markers are dropped; an unfinished
    /// marker prefix is suppressed (it was tool intent, not prose).
    pub fn flush(&mut self) -> String {
        self.drain(true)
    }

    fn drain(&mut self, at_end: bool) -> String {
        let mut visible = String::new();
        loop {
            match scan_next_marker(&self.buffer) {
                MarkerScan::None => {
                    visible.push_str(&self.buffer);
                    self.buffer.clear();
                    break;
                }
                MarkerScan::Partial { start } => {
                    visible.push_str(&self.buffer[..start]);
                    if at_end {
                        self.buffer.clear();
                    } else {
                        self.buffer.drain(..start);
                    }
                    break;
                }
                MarkerScan::Complete { start, end, .. } => {
                    visible.push_str(&self.buffer[..start]);
                    self.buffer.drain(..end);
                }
                MarkerScan::NotMarker { resume } => {
                    visible.push_str(&self.buffer[..resume]);
                    self.buffer.drain(..resume);
                }
            }
        }
        visible
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prose_passes_through() {
        let mut f = StreamFilter::new();
        assert_eq!(f.process_chunk("hello "), "hello ");
        assert_eq!(f.process_chunk("world"), "world");
        assert_eq!(f.flush(), "");
    }

    #[test]
    fn complete_marker_hidden() {
        let mut f = StreamFilter::new();
        let out = f.process_chunk(r#"before [TOOL_CALL:x:{"a":1}] after"#);
        assert_eq!(out, "before  after");
    }

    #[test]
    fn marker_split_across_chunks_hidden() {
        let mut f = StreamFilter::new();
        let mut visible = String::new();
        visible.push_str(&f.process_chunk("thinking [TOOL_"));
        visible.push_str(&f.process_chunk("CALL:write_file:{\"path\""));
        visible.push_str(&f.process_chunk(":\"x\"}] done"));
        visible.push_str(&f.flush());
        assert_eq!(visible, "thinking  done");
    }

    #[test]
    fn bracket_lookalike_is_emitted() {
        let mut f = StreamFilter::new();
        let mut visible = String::new();
        visible.push_str(&f.process_chunk("array[0] and [link] text"));
        visible.push_str(&f.flush());
        assert_eq!(visible, "array[0] and [link] text");
    }

    #[test]
    fn unfinished_marker_suppressed_at_flush() {
        let mut f = StreamFilter::new();
        let shown = f.process_chunk("prose [TOOL_CALL:write_file:{\"path\":");
        assert_eq!(shown, "prose ");
        assert_eq!(f.flush(), "");
    }

    #[test]
    fn trailing_open_bracket_held_then_released() {
        let mut f = StreamFilter::new();
        assert_eq!(f.process_chunk("see ["), "see ");
        // Next chunk shows it was not a marker.
        assert_eq!(f.process_chunk("1] ok"), "[1] ok");
    }
}
