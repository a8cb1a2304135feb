use tracing::warn;

/// Accumulates bytes read from a stream and splits them into complete lines.
///
/// Lines are terminated by `\n`; a `\r` immediately before the `\n` is treated as part of the
/// terminator. Empty lines are discarded. Bytes after the last terminator stay buffered until
/// a later `extend` completes them, so a partial line is never produced.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    limit: Option<usize>,
    // Inside a line whose start was discarded; skip through its terminator.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    /// Default maximum number of bytes held without seeing a line terminator.
    pub const DEFAULT_LIMIT: usize = 65536;

    pub fn new() -> Self {
        LineBuffer {
            buf: Vec::new(),
            limit: Some(Self::DEFAULT_LIMIT),
            discarding: false,
        }
    }

    /// Set the maximum number of unterminated bytes to hold. When exceeded the pending bytes
    /// are discarded, along with the rest of that line up to its terminator. `None` disables the
    /// limit.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Number of bytes currently waiting for a terminator.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Append `dat` and return every line completed by it, without terminators.
    pub fn extend(&mut self, dat: &[u8]) -> Vec<Vec<u8>> {
        let dat = if self.discarding {
            match dat.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    &dat[pos + 1..]
                }
                None => return Vec::new(),
            }
        } else {
            dat
        };
        self.buf.extend_from_slice(dat);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            let mut line = &self.buf[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if !line.is_empty() {
                lines.push(line.to_vec());
            }
            start = end + 1;
        }
        self.buf.drain(..start);

        if let Some(limit) = self.limit {
            if self.buf.len() > limit {
                warn!(
                    pending = self.buf.len(),
                    limit, "no line terminator within limit, discarding buffered bytes"
                );
                self.buf.clear();
                self.discarding = true;
            }
        }

        lines
    }
}
