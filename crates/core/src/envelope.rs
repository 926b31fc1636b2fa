//! Batch envelope.
//!
//! The append log holds bare record bodies separated by newlines. At rotation
//! the whole log is wrapped in a declaration and an `<EVENTS>` container so the
//! uploaded object is one well-formed XML document.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{BatchErrorCode, Error, Result};

pub const DECLARATION: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
pub const CONTAINER_OPEN: &[u8] = b"<EVENTS>\n";
pub const CONTAINER_CLOSE: &[u8] = b"\n</EVENTS>";

/// Container element name.
pub const CONTAINER_TAG: &str = "EVENTS";
/// Record element name.
pub const RECORD_TAG: &str = "EVENT";

/// Wraps raw record bytes into a container document.
pub fn wrap(raw: &[u8]) -> Bytes {
    let mut doc = BytesMut::with_capacity(
        DECLARATION.len() + CONTAINER_OPEN.len() + raw.len() + CONTAINER_CLOSE.len(),
    );
    doc.put_slice(DECLARATION);
    doc.put_slice(CONTAINER_OPEN);
    doc.put_slice(raw);
    doc.put_slice(CONTAINER_CLOSE);
    doc.freeze()
}

/// Parses a wrapped document and returns how many records it holds.
///
/// Fails with `BATCH_001` when the bytes are not UTF-8 or not well-formed.
pub fn validate(wrapped: &[u8]) -> Result<usize> {
    let text = as_text(wrapped)?;
    let doc = roxmltree::Document::parse(text).map_err(not_well_formed)?;

    Ok(doc
        .root_element()
        .descendants()
        .filter(|node| node.has_tag_name(RECORD_TAG))
        .count())
}

pub(crate) fn as_text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| {
        Error::batch(
            BatchErrorCode::NotWellFormed,
            format!("batch is not valid UTF-8: {}", e),
        )
    })
}

pub(crate) fn not_well_formed(err: roxmltree::Error) -> Error {
    Error::batch(BatchErrorCode::NotWellFormed, err.to_string())
}
