//! Optional structured output for rotated batches.
//!
//! Each `<EVENT>` becomes a flat JSON object mapping child element names to
//! their trimmed text. Elements without text map to an empty string, and a
//! repeated child name keeps the last value.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::envelope::{as_text, CONTAINER_TAG, RECORD_TAG};
use crate::error::{BatchErrorCode, Error, Result};

/// One converted record.
pub type FlatRecord = Map<String, Value>;

/// Output format for uploaded batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Xml,
    Json,
}

impl OutputFormat {
    /// Parse from a setting value. Anything other than `json` means XML.
    pub fn from_setting(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Xml
        }
    }

    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Json => "json",
        }
    }
}

/// XML batch to JSON converter.
#[derive(Debug, Clone, Copy)]
pub struct Converter {
    pretty: bool,
}

impl Converter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    /// Converts a wrapped batch into a JSON array of flat records.
    pub fn convert(&self, wrapped: &[u8]) -> Result<Bytes> {
        let records = extract_records(wrapped)?;

        let out = if self.pretty {
            serde_json::to_vec_pretty(&records)
        } else {
            serde_json::to_vec(&records)
        }
        .map_err(|e| Error::batch(BatchErrorCode::ConversionFailed, e.to_string()))?;

        Ok(Bytes::from(out))
    }
}

/// Extracts every record element of a document as a flat field map.
///
/// A container root yields its descendant records. A root that is itself a
/// record is treated as a one-record batch; any other root is searched for
/// records at any depth.
pub fn extract_records(doc: &[u8]) -> Result<Vec<FlatRecord>> {
    let text = as_text(doc).map_err(conversion_failed)?;
    let parsed = roxmltree::Document::parse(text)
        .map_err(|e| Error::batch(BatchErrorCode::ConversionFailed, e.to_string()))?;
    let root = parsed.root_element();

    let records: Vec<FlatRecord> = if root.has_tag_name(RECORD_TAG) {
        vec![flatten(root)]
    } else {
        root.descendants()
            .filter(|node| node.id() != root.id() && node.has_tag_name(RECORD_TAG))
            .map(flatten)
            .collect()
    };

    if !root.has_tag_name(CONTAINER_TAG) {
        tracing::warn!(
            root = root.tag_name().name(),
            records = records.len(),
            "Batch root is not the event container"
        );
    }

    Ok(records)
}

fn flatten(record: roxmltree::Node<'_, '_>) -> FlatRecord {
    let mut fields = Map::new();
    for child in record.children().filter(|n| n.is_element()) {
        let text = child.text().map(str::trim).unwrap_or_default();
        fields.insert(
            child.tag_name().name().to_string(),
            Value::String(text.to_string()),
        );
    }
    fields
}

fn conversion_failed(err: Error) -> Error {
    Error::batch(BatchErrorCode::ConversionFailed, err.to_string())
}
