//! Terminal output plumbing: per-package prefix colors and a line-buffered
//! prefixing writer. Log output is serialized per task through its writer
//! and interleaves across tasks at line granularity; the prefix identifies
//! the source.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

use console::Style;
use parking_lot::Mutex;

/// Hands each package a stable color from a fixed palette.
pub struct ColorSelector {
    assigned: Mutex<HashMap<String, Style>>,
    next: AtomicUsize,
}

impl Default for ColorSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorSelector {
    pub fn new() -> Self {
        Self {
            assigned: Mutex::new(HashMap::new()),
            next: AtomicUsize::new(0),
        }
    }

    fn palette(index: usize) -> Style {
        match index % 5 {
            0 => Style::new().cyan(),
            1 => Style::new().magenta(),
            2 => Style::new().green(),
            3 => Style::new().yellow(),
            _ => Style::new().blue(),
        }
    }

    pub fn style_for(&self, key: &str) -> Style {
        let mut assigned = self.assigned.lock();
        if let Some(style) = assigned.get(key) {
            return style.clone();
        }
        let style = Self::palette(self.next.fetch_add(1, Ordering::Relaxed));
        assigned.insert(key.to_string(), style.clone());
        style
    }
}

/// Prefixes every line it forwards. Partial lines buffer until their
/// newline arrives so concurrent tasks interleave cleanly.
pub struct PrefixedWriter<W: Write> {
    prefix: String,
    inner: W,
    buffer: Vec<u8>,
}

impl<W: Write> PrefixedWriter<W> {
    pub fn new(prefix: String, inner: W) -> Self {
        Self {
            prefix,
            inner,
            buffer: Vec::new(),
        }
    }

    fn flush_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.inner.write_all(self.prefix.as_bytes())?;
        self.inner.write_all(line)?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> Write for PrefixedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.buffer);
                self.flush_line(&line)?;
            } else {
                self.buffer.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.flush_line(&line)?;
        }
        self.inner.flush()
    }
}

/// Fan one write out to every sink.
pub struct MultiWriter {
    sinks: Vec<Box<dyn Write + Send>>,
}

impl MultiWriter {
    pub fn new(sinks: Vec<Box<dyn Write + Send>>) -> Self {
        Self { sinks }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for sink in &mut self.sinks {
            sink.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_each_complete_line() {
        let mut out = Vec::new();
        {
            let mut writer = PrefixedWriter::new("app:build: ".to_string(), &mut out);
            writer.write_all(b"first\nsec").unwrap();
            writer.write_all(b"ond\n").unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "app:build: first\napp:build: second\n"
        );
    }

    #[test]
    fn flush_emits_trailing_partial_line() {
        let mut out = Vec::new();
        {
            let mut writer = PrefixedWriter::new("p: ".to_string(), &mut out);
            writer.write_all(b"no newline").unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(String::from_utf8(out).unwrap(), "p: no newline\n");
    }

    #[test]
    fn colors_are_stable_per_package() {
        let selector = ColorSelector::new();
        let first = selector.style_for("app");
        let again = selector.style_for("app");
        assert_eq!(format!("{:?}", first), format!("{:?}", again));
    }
}
