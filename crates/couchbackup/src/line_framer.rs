//! Splits an async byte stream into UTF-8 lines, one `read_line` call at a
//! time so it can resume cleanly across chunk boundaries (a log file or
//! backup file read in small pieces looks identical to one read whole).

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

pub struct LineFramer<R> {
    reader: BufReader<R>,
    buf: String,
}

impl<R: AsyncBufRead + Unpin> LineFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: String::new(),
        }
    }

    /// Reads the next line, stripping a trailing `\n` and, if present, a
    /// preceding `\r`. Returns `None` at EOF with no trailing partial
    /// line; returns `Some(String::new())` for a genuinely empty line.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        let n = self.reader.read_line(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        while self.buf.ends_with('\n') || self.buf.ends_with('\r') {
            self.buf.pop();
        }
        Ok(Some(std::mem::take(&mut self.buf)))
    }
}

/// Adapter yielding `(line_number, line)` pairs, 1-based, for callers that
/// need to report a precise location on a parse failure (restore-file
/// reading does; log-file reading mostly doesn't).
pub struct NumberedLineFramer<R> {
    inner: LineFramer<R>,
    next_line_no: u64,
}

impl<R: AsyncBufRead + Unpin> NumberedLineFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: LineFramer::new(reader),
            next_line_no: 1,
        }
    }

    pub async fn next_line(&mut self) -> std::io::Result<Option<(u64, String)>> {
        match self.inner.next_line().await? {
            Some(line) => {
                let n = self.next_line_no;
                self.next_line_no += 1;
                Ok(Some((n, line)))
            }
            None => Ok(None),
        }
    }
}
