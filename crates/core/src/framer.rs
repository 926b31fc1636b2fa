//! Record framing over a chunked TCP byte stream.
//!
//! Panels push XML records back to back with no length prefix. A record ends
//! at (and includes) the first `</EVENT>` marker; whatever follows belongs to
//! the next record. Panels also prefix every record with its own XML
//! declaration, which has to go before records can share one document.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, FrameErrorCode, Result};

/// Terminal marker of one record.
pub const RECORD_MARKER: &[u8] = b"</EVENT>";

const DECLARATION_OPEN: &[u8] = b"<?xml";
const DECLARATION_CLOSE: &[u8] = b"?>";

/// Per-connection splitter from a byte stream to complete records.
///
/// Bytes are pushed as they arrive; `next_record` yields records greedily in
/// arrival order. Incomplete trailing bytes stay buffered until more input
/// completes them.
#[derive(Debug)]
pub struct EventFramer {
    buffer: BytesMut,
    marker: Bytes,
    /// Prefix of `buffer` already searched without finding the marker.
    scanned: usize,
}

impl Default for EventFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFramer {
    pub fn new() -> Self {
        Self::with_marker(RECORD_MARKER)
    }

    /// Creates a framer for a custom terminal marker.
    ///
    /// An empty marker is replaced by the default one.
    pub fn with_marker(marker: &[u8]) -> Self {
        let marker = if marker.is_empty() {
            RECORD_MARKER
        } else {
            marker
        };

        Self {
            buffer: BytesMut::new(),
            marker: Bytes::copy_from_slice(marker),
            scanned: 0,
        }
    }

    /// Appends newly received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extracts the next complete record, if the buffer holds one.
    ///
    /// The returned record includes its marker and has any leading
    /// declaration stripped. A declaration that never closes fails with
    /// `FRAME_002`; the record is consumed either way.
    pub fn next_record(&mut self) -> Result<Option<Bytes>> {
        // A marker may straddle the previously scanned boundary.
        let start = self.scanned.saturating_sub(self.marker.len() - 1);

        match find(&self.buffer[start..], &self.marker) {
            Some(pos) => {
                let end = start + pos + self.marker.len();
                let record = self.buffer.split_to(end).freeze();
                self.scanned = 0;
                strip_declaration(record).map(Some)
            }
            None => {
                self.scanned = self.buffer.len();
                Ok(None)
            }
        }
    }

    /// Drains every complete record currently buffered.
    pub fn drain_records(&mut self) -> Result<Vec<Bytes>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    /// Number of bytes waiting for a marker.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Removes a leading `<?xml ... ?>` declaration and the whitespace after it.
///
/// Records without a declaration are returned untouched.
pub fn strip_declaration(record: Bytes) -> Result<Bytes> {
    let leading = record
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();

    if !record[leading..].starts_with(DECLARATION_OPEN) {
        return Ok(record);
    }

    let Some(close) = find(&record[leading..], DECLARATION_CLOSE) else {
        return Err(Error::frame(
            FrameErrorCode::MalformedDeclaration,
            format!(
                "record of {} bytes opens a declaration that never closes",
                record.len()
            ),
        ));
    };

    let body_start = leading + close + DECLARATION_CLOSE.len();
    let trimmed = record[body_start..]
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();

    Ok(record.slice(body_start + trimmed..))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
