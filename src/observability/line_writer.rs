//! Line-oriented log adapter.
//!
//! Libraries that report through an `io::Write` get a [`LineWriter`]; every
//! complete line they write becomes exactly one call to the sink, in order.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

/// Receives one complete line at a time, without the line terminator.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// An `io::Write` that splits its input on `\n`.
///
/// Clones share one buffer, so interleaved writers never tear each other's
/// lines. Each writer's lines reach the sink in the order it wrote them. A trailing `\r` is stripped. Bytes after the last newline are kept
/// until more input completes the line, or emitted when the last clone drops.
#[derive(Clone)]
pub struct LineWriter {
    inner: Arc<Shared>,
}

struct Shared {
    sink: LineSink,
    pending: Mutex<Vec<u8>>,
}

impl LineWriter {
    /// Deliver lines to `sink`.
    pub fn new(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Shared {
                sink: Arc::new(sink),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Lines logged through `tracing` at INFO.
    pub fn info(target: &'static str) -> Self {
        Self::new(move |line| tracing::info!(target: "volgate::lines", source = target, "{line}"))
    }

    /// Lines logged through `tracing` at ERROR.
    pub fn error(target: &'static str) -> Self {
        Self::new(move |line| tracing::error!(target: "volgate::lines", source = target, "{line}"))
    }

    /// Format a record and write it as (at least) one line.
    pub fn write_line(&self, args: fmt::Arguments<'_>) {
        let mut line = args.to_string();
        line.push('\n');
        self.push(line.as_bytes());
    }

    fn push(&self, data: &[u8]) {
        let lines = {
            // A poisoned buffer still holds valid bytes; keep logging.
            let mut pending = match self.inner.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending.extend_from_slice(data);

            let mut lines = Vec::new();
            let mut start = 0;
            while let Some(offset) = pending[start..].iter().position(|&b| b == b'\n') {
                let end = start + offset;
                lines.push(String::from_utf8_lossy(strip_cr(&pending[start..end])).into_owned());
                start = end + 1;
            }
            pending.drain(..start);
            lines
        };

        // The sink runs unlocked so it may write back into this writer.
        for line in lines {
            (self.inner.sink)(&line);
        }
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl io::Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for LineWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineWriter").finish_non_exhaustive()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let pending = match self.pending.get_mut() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !pending.is_empty() {
            (self.sink)(&String::from_utf8_lossy(strip_cr(pending)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn collector() -> (LineWriter, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let writer = LineWriter::new(move |l| sink.lock().unwrap().push(l.to_string()));
        (writer, lines)
    }

    #[test]
    fn one_call_per_line_in_order() {
        let (mut w, lines) = collector();
        w.write_all(b"first\nsecond\r\nthi").unwrap();
        w.write_all(b"rd\n\nfourth").unwrap();

        assert_eq!(*lines.lock().unwrap(), vec!["first", "second", "third", ""]);

        drop(w);
        assert_eq!(lines.lock().unwrap().last().unwrap(), "fourth");
    }

    #[test]
    fn byte_at_a_time() {
        let (mut w, lines) = collector();
        for b in b"a\nbc\n" {
            w.write_all(&[*b]).unwrap();
        }
        assert_eq!(*lines.lock().unwrap(), vec!["a", "bc"]);
    }

    #[test]
    fn sink_may_write_back_into_the_writer() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<LineWriter>>> = Arc::new(Mutex::new(None));
        let (sink_lines, sink_slot) = (lines.clone(), slot.clone());
        let w = LineWriter::new(move |l| {
            sink_lines.lock().unwrap().push(l.to_string());
            if l == "outer" {
                let echo = sink_slot.lock().unwrap().clone();
                if let Some(w) = echo {
                    w.write_line(format_args!("echo"));
                }
            }
        });
        *slot.lock().unwrap() = Some(w.clone());

        w.write_line(format_args!("outer"));
        assert_eq!(*lines.lock().unwrap(), vec!["outer", "echo"]);
        slot.lock().unwrap().take();
    }

    #[test]
    fn concurrent_writers_do_not_drop_or_merge() {
        let (w, lines) = collector();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let w = w.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        w.write_line(format_args!("t{t} line {i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1600);
        assert!(lines.iter().all(|l| l.starts_with('t') && l.contains(" line ")));
        // Per-writer order is preserved.
        let t3: Vec<_> = lines.iter().filter(|l| l.starts_with("t3 ")).collect();
        assert_eq!(t3.first().unwrap().as_str(), "t3 line 0");
        assert_eq!(t3.last().unwrap().as_str(), "t3 line 199");
    }
}
