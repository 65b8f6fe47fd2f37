use std::io::{self, Read};

const DEFAULT_CAPACITY: usize = 8 * 1024;

/// A buffered line reader over any byte stream, terminated by LF or CRLF.
///
/// Unlike [`std::io::BufRead::read_line`], end-of-stream is reported
/// distinctly from a general I/O error (as `Ok(None)`), and a final,
/// unterminated line is silently discarded rather than returned — the
/// reader only remembers that it happened, via [`StrictLineReader::trailing_data_discarded`].
///
/// Supports only charsets where CR (`0x0D`) and LF (`0x0A`) appear solely as
/// themselves (the ASCII family): UTF-8 and plain ASCII both qualify.
pub struct StrictLineReader<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    eof: bool,
    /// Bytes straddling a buffer refill boundary, for lines longer than one buffer.
    spill: Vec<u8>,
    trailing_data_discarded: bool,
}

impl<R: Read> StrictLineReader<R> {
    /// Creates a reader with the default 8 KiB buffer capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, inner)
    }

    /// Creates a reader with a given buffer capacity. Panics if `capacity == 0`.
    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        assert!(capacity >= 1, "line reader capacity must be >= 1");
        StrictLineReader {
            inner,
            buf: vec![0u8; capacity],
            pos: 0,
            filled: 0,
            eof: false,
            spill: Vec::new(),
            trailing_data_discarded: false,
        }
    }

    /// Whether an unterminated final line was ever discarded by this reader.
    pub fn trailing_data_discarded(&self) -> bool {
        self.trailing_data_discarded
    }

    /// Reads the next line, without its terminator. A trailing CR is
    /// stripped when the terminator was CRLF.
    ///
    /// Returns `Ok(None)` at end-of-stream. A final, unterminated line is
    /// discarded rather than returned as a partial line.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if self.pos == self.filled {
                if self.eof {
                    if !self.spill.is_empty() {
                        self.spill.clear();
                        self.trailing_data_discarded = true;
                    }
                    return Ok(None);
                }
                self.filled = self.inner.read(&mut self.buf)?;
                self.pos = 0;
                if self.filled == 0 {
                    self.eof = true;
                    continue;
                }
            }

            let chunk = &self.buf[self.pos..self.filled];
            if let Some(rel) = chunk.iter().position(|&b| b == b'\n') {
                let line_end = self.pos + rel;
                let mut bytes = std::mem::take(&mut self.spill);
                bytes.extend_from_slice(&self.buf[self.pos..line_end]);
                self.pos = line_end + 1;

                if bytes.last() == Some(&b'\r') {
                    bytes.pop();
                }

                let line = String::from_utf8(bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                return Ok(Some(line));
            } else {
                self.spill.extend_from_slice(chunk);
                self.pos = self.filled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lines_of(capacity: usize, data: &[u8]) -> (Vec<String>, bool) {
        let mut reader = StrictLineReader::with_capacity(capacity, Cursor::new(data.to_vec()));
        let mut out = Vec::new();
        while let Some(line) = reader.read_line().unwrap() {
            out.push(line);
        }
        (out, reader.trailing_data_discarded())
    }

    #[test]
    fn splits_on_lf_and_crlf() {
        let (lines, discarded) = lines_of(32, b"one\ntwo\r\nthree\n");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert!(!discarded);
    }

    #[test]
    fn discards_unterminated_trailing_line() {
        let (lines, discarded) = lines_of(32, b"one\ntwo\nthree-no-newline");
        assert_eq!(lines, vec!["one", "two"]);
        assert!(discarded);
    }

    #[test]
    fn empty_stream_yields_no_lines() {
        let (lines, discarded) = lines_of(32, b"");
        assert!(lines.is_empty());
        assert!(!discarded);
    }

    #[test]
    fn exact_capacity_line() {
        let mut line = "x".repeat(32);
        line.push('\n');
        let (lines, discarded) = lines_of(32, line.as_bytes());
        assert_eq!(lines, vec!["x".repeat(32)]);
        assert!(!discarded);
    }

    #[test]
    fn line_spanning_multiple_buffers() {
        let long = "y".repeat(100);
        let mut data = long.clone().into_bytes();
        data.push(b'\n');
        data.extend_from_slice(b"short\n");
        let (lines, discarded) = lines_of(32, &data);
        assert_eq!(lines, vec![long, "short".to_string()]);
        assert!(!discarded);
    }

    #[test]
    fn crlf_straddling_buffer_boundary() {
        // capacity 4: "abcd" fills the buffer exactly with the CR as the
        // last byte, and the LF arrives in the next refill.
        let data = b"abcd\r\nrest\n";
        let (lines, discarded) = lines_of(4, data);
        assert_eq!(lines, vec!["abcd", "rest"]);
        assert!(!discarded);
    }

    #[test]
    fn lone_cr_is_kept_when_not_followed_by_lf_before_next_newline() {
        let (lines, _) = lines_of(32, b"a\rb\n");
        assert_eq!(lines, vec!["a\rb"]);
    }
}
