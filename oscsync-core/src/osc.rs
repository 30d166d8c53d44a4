//! OSC datagram preview decoder.
//!
//! Turns a raw UDP payload into a short, human-readable [`OscPreview`] for
//! live observability. The decoder is structural only: it walks the address,
//! the type tag string and the arguments, but never interprets them.
//!
//! Decoding never fails past this module. Anything that cannot be read
//! degrades to an unknown preview whose text carries the reason:
//!
//! ```rust
//! use oscsync_core::osc::{parse_preview, PreviewKind};
//!
//! let preview = parse_preview(b"/a/b\0\0\0\0,i\0\0\0\0\0\x2a");
//! assert_eq!(preview.kind, PreviewKind::Message);
//! assert_eq!(preview.text, "/a/b 42");
//!
//! let broken = parse_preview(b"not osc");
//! assert!(!broken.ok);
//! ```
//!
//! ## Wire layout
//!
//! ```text
//! message: address\0 (pad 4) | ,tags\0 (pad 4) | arg0 | arg1 | ...
//! bundle:  "#bundle\0" | time tag (8) | size (i32 BE) | element | size | element ...
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Marker that opens every OSC bundle.
pub const BUNDLE_MARKER: &[u8; 8] = b"#bundle\0";

/// Marker plus the (uninterpreted) 8-byte time tag.
pub const BUNDLE_HEADER_SIZE: usize = 16;

/// String arguments longer than this are cut and suffixed with `...`.
pub const MAX_STRING_PREVIEW: usize = 48;

/// Number of child addresses listed in a bundle preview.
pub const MAX_BUNDLE_HEADS: usize = 3;

/// Default limit on nested bundle levels.
pub const DEFAULT_MAX_BUNDLE_DEPTH: usize = 16;

/// What kind of datagram a preview describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewKind {
    Message,
    Bundle,
    Unknown,
}

/// Decoded view of one datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OscPreview {
    /// Whether structural decoding succeeded.
    pub ok: bool,
    pub kind: PreviewKind,
    /// One-line summary for display.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_tags: Option<String>,
    /// Rendered arguments for a message, child heads for a bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Element count for a bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<usize>,
}

impl OscPreview {
    /// Create an unknown preview with the given text.
    pub fn unknown(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            kind: PreviewKind::Unknown,
            text: text.into(),
            address: None,
            type_tags: None,
            args: None,
            elements: None,
        }
    }

    fn failed(error: &ParseError) -> Self {
        Self::unknown(format!("raw ({})", error))
    }

    /// Check if this preview could not be decoded.
    pub fn is_unknown(&self) -> bool {
        self.kind == PreviewKind::Unknown
    }

    /// Address for a message, or the text for anything else.
    pub fn head(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.text)
    }
}

/// Decode a datagram with the default bundle depth limit.
pub fn parse_preview(data: &[u8]) -> OscPreview {
    OscDecoder::default().decode(data)
}

// =============================================================================
// OscDecoder
// =============================================================================

/// Preview decoder with a bounded bundle recursion depth.
///
/// A bundle nested deeper than `max_depth` previews as unknown; its parent
/// still counts it as an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OscDecoder {
    max_depth: usize,
}

impl Default for OscDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl OscDecoder {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_BUNDLE_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Decode a datagram into a preview. Never panics.
    pub fn decode(&self, data: &[u8]) -> OscPreview {
        self.decode_at(data, 0)
    }

    fn decode_at(&self, data: &[u8], depth: usize) -> OscPreview {
        if data.is_empty() {
            return OscPreview::unknown("empty packet");
        }

        let result = if data.starts_with(BUNDLE_MARKER) {
            self.decode_bundle(data, depth)
        } else {
            decode_message(data)
        };

        result.unwrap_or_else(|e| OscPreview::failed(&e))
    }

    fn decode_bundle(&self, data: &[u8], depth: usize) -> Result<OscPreview, ParseError> {
        if depth >= self.max_depth {
            return Err(ParseError::TooDeep {
                max: self.max_depth,
            });
        }
        if data.len() < BUNDLE_HEADER_SIZE {
            return Err(ParseError::BundleTooShort {
                expected: BUNDLE_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let mut offset = BUNDLE_HEADER_SIZE;
        let mut elements = 0usize;
        let mut heads = Vec::new();

        // A bad size field ends the walk; elements read so far are kept.
        while let Some(size) = read_be_i32(data, offset) {
            offset += 4;
            if size <= 0 {
                break;
            }
            let end = match offset.checked_add(size as usize) {
                Some(end) if end <= data.len() => end,
                _ => break,
            };

            elements += 1;
            let child = self.decode_at(&data[offset..end], depth + 1);
            if heads.len() < MAX_BUNDLE_HEADS {
                heads.push(child.head().to_string());
            }
            offset = end;
        }

        let text = if heads.is_empty() {
            format!("#bundle elements={}", elements)
        } else {
            format!("#bundle elements={} [{}]", elements, heads.join(", "))
        };

        Ok(OscPreview {
            ok: true,
            kind: PreviewKind::Bundle,
            text,
            address: None,
            type_tags: None,
            args: Some(heads),
            elements: Some(elements),
        })
    }
}

// =============================================================================
// Message decoding
// =============================================================================

fn decode_message(data: &[u8]) -> Result<OscPreview, ParseError> {
    let mut reader = Reader::new(data);

    let address = reader.read_string()?;
    if !address.starts_with('/') {
        return Err(ParseError::InvalidAddress);
    }
    let type_tags = reader.read_string()?;
    if !type_tags.starts_with(',') {
        return Err(ParseError::InvalidTypeTags);
    }

    let mut args = Vec::with_capacity(type_tags.len() - 1);
    for tag in type_tags.chars().skip(1) {
        let arg = match tag {
            'i' => reader.read_i32("int32")?.to_string(),
            'f' => format_float(reader.read_f32()?),
            's' => format!("\"{}\"", truncate_text(&reader.read_string()?)),
            'b' => format!("blob({})", reader.skip_blob()?),
            'T' => "true".to_string(),
            'F' => "false".to_string(),
            'N' => "nil".to_string(),
            'I' => "inf".to_string(),
            other => format!("?({})", other),
        };
        args.push(arg);
    }

    let text = format!("{} {}", address, args.join(" "))
        .trim()
        .to_string();

    Ok(OscPreview {
        ok: true,
        kind: PreviewKind::Message,
        text,
        address: Some(address),
        type_tags: Some(type_tags),
        args: Some(args),
        elements: None,
    })
}

/// Cursor over a message body; every read is bounds checked.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// NUL-terminated string, then advance to the next 4-byte boundary.
    fn read_string(&mut self) -> Result<String, ParseError> {
        let start = self.offset;
        let rest = self.data.get(start..).unwrap_or(&[]);
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ParseError::MissingTerminator { offset: start })?;

        let value = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.offset = pad4(start + len + 1);
        Ok(value)
    }

    fn read_i32(&mut self, field: &'static str) -> Result<i32, ParseError> {
        let value = read_be_i32(self.data, self.offset).ok_or(ParseError::OutOfBounds { field })?;
        self.offset += 4;
        Ok(value)
    }

    fn read_f32(&mut self) -> Result<f32, ParseError> {
        let bits = self.read_i32("float32")? as u32;
        Ok(f32::from_bits(bits))
    }

    /// Length-prefixed blob; returns its length.
    fn skip_blob(&mut self) -> Result<usize, ParseError> {
        let len = self.read_i32("blob length")?;
        let len = usize::try_from(len).map_err(|_| ParseError::OutOfBounds { field: "blob" })?;
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(ParseError::OutOfBounds { field: "blob" })?;
        self.offset = pad4(end);
        Ok(len)
    }
}

fn read_be_i32(data: &[u8], offset: usize) -> Option<i32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

/// Round to 6 decimals and print the shortest form ("0.5", "1", "-2.25").
/// Magnitudes from 1e21 up keep every digit and switch to exponent form.
fn format_float(value: f32) -> String {
    let value = f64::from(value);
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value.abs() >= 1e21 {
        // exponent form, as "3.0000000054977558e+38"
        return format!("{:e}", value).replacen('e', "e+", 1);
    }
    let rounded = (value * 1e6).round() / 1e6;
    if rounded == 0.0 {
        // no "-0"
        return "0".to_string();
    }
    rounded.to_string()
}

fn truncate_text(text: &str) -> String {
    match text.char_indices().nth(MAX_STRING_PREVIEW) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
