//! Part header block encoding and parsing.
//!
//! Every part starts with a block of `Key: Value` lines terminated by an
//! empty line. The declared `Content-Size` is what lets a reader step over
//! the body without looking at it.

use crate::error::WireError;
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Media type used for parts carrying serialized protobuf messages
pub const STRUCTURED_CONTENT_TYPE: &str = "application/protobuf";

/// Disposition header
pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
/// Payload media type header
pub const CONTENT_TYPE: &str = "Content-Type";
/// Payload byte length header
pub const CONTENT_SIZE: &str = "Content-Size";
/// Alternate payload byte length header accepted on read
pub const CONTENT_LENGTH: &str = "Content-Length";
/// Payload digest header
pub const CONTENT_HASH: &str = "Content-Hash";

const RESERVED_HEADERS: [&str; 5] = [
    CONTENT_DISPOSITION,
    CONTENT_TYPE,
    CONTENT_SIZE,
    CONTENT_LENGTH,
    CONTENT_HASH,
];

/// Disposition type written at the start of `Content-Disposition`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispositionType {
    /// Concatenated structured messages
    Structured,
    /// Document payload (file-backed or in-memory)
    File,
    /// Anything else found on read
    Other(String),
}

impl DispositionType {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "structured" | "protobuf" => DispositionType::Structured,
            "file" => DispositionType::File,
            other => DispositionType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DispositionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispositionType::Structured => f.write_str("structured"),
            DispositionType::File => f.write_str("file"),
            DispositionType::Other(s) => f.write_str(s),
        }
    }
}

/// Parsed `Content-Disposition` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    /// Disposition type
    pub typ: DispositionType,
    /// Part name
    pub name: String,
    /// Display filename, when present
    pub filename: Option<String>,
}

impl Disposition {
    /// Render as a header value, quoting parameters
    pub fn render(&self) -> String {
        let mut out = format!("{}; name={}", self.typ, quote(&self.name));
        if let Some(filename) = &self.filename {
            out.push_str("; filename=");
            out.push_str(&quote(filename));
        }
        out
    }

    /// Parse a header value. Returns `None` when the type or `name` is missing.
    pub fn parse(value: &str) -> Option<Self> {
        let mut segments = split_params(value).into_iter();
        let typ = segments.next()?.trim().to_string();
        if typ.is_empty() || typ.contains('=') {
            return None;
        }

        let mut name = None;
        let mut filename = None;
        for segment in segments {
            let (key, raw) = segment.split_once('=')?;
            let val = unquote(raw.trim());
            match key.trim().to_ascii_lowercase().as_str() {
                "name" => name = Some(val),
                "filename" => filename = Some(val),
                _ => {}
            }
        }

        Some(Self {
            typ: DispositionType::parse(&typ),
            name: name?,
            filename,
        })
    }
}

/// Reader-side classification of a part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartKind {
    /// Content type is the structured-message media type
    Structured,
    /// Carries a disposition filename
    File,
    /// Neither of the above
    Unknown,
}

impl PartKind {
    /// Classify a part from its content type and disposition.
    /// Only the media type essence is compared; parameters are ignored.
    pub fn classify(content_type: &str, disposition: &Disposition) -> Self {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case(STRUCTURED_CONTENT_TYPE) {
            PartKind::Structured
        } else if disposition.filename.is_some() {
            PartKind::File
        } else {
            PartKind::Unknown
        }
    }
}

/// Decoded header block of one part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHeader {
    /// Parsed disposition
    pub disposition: Disposition,
    /// Classification
    pub kind: PartKind,
    /// Payload media type
    pub content_type: String,
    /// Declared payload length, absent only in legacy streams
    pub size: Option<u64>,
    /// Declared payload digest
    pub content_hash: Option<ContentHash>,
    /// Caller-supplied headers outside the reserved set
    pub metadata: BTreeMap<String, String>,
    /// Every header line in the order it appeared
    pub headers: Vec<(String, String)>,
}

impl PartHeader {
    /// Build a header for writing
    pub fn new(
        disposition: Disposition,
        content_type: impl Into<String>,
        size: u64,
        content_hash: ContentHash,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let content_type = content_type.into();
        let kind = PartKind::classify(&content_type, &disposition);
        let mut headers = vec![
            (CONTENT_DISPOSITION.to_string(), disposition.render()),
            (CONTENT_TYPE.to_string(), content_type.clone()),
            (CONTENT_SIZE.to_string(), size.to_string()),
            (CONTENT_HASH.to_string(), content_hash.to_string()),
        ];
        headers.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            disposition,
            kind,
            content_type,
            size: Some(size),
            content_hash: Some(content_hash),
            metadata,
            headers,
        }
    }

    /// Part name from the disposition
    pub fn name(&self) -> &str {
        &self.disposition.name
    }

    /// Display filename, if any
    pub fn filename(&self) -> Option<&str> {
        self.disposition.filename.as_deref()
    }

    /// First header value with the given name (case-insensitive)
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Validate and serialize the header block, including the terminating empty line
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        for (key, value) in &self.headers {
            validate_header(self.name(), key, value)?;
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Interpret raw header lines
    pub fn from_lines(headers: Vec<(String, String)>) -> Result<Self, HeaderIssue> {
        let find = |key: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.trim().to_string())
        };

        let size = match find(CONTENT_SIZE).or_else(|| find(CONTENT_LENGTH)) {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| HeaderIssue::BadSize(raw.clone()))?,
            ),
            None => None,
        };

        let disposition = match find(CONTENT_DISPOSITION) {
            Some(raw) => match Disposition::parse(&raw) {
                Some(d) => d,
                None => return Err(HeaderIssue::BadDisposition { size, raw }),
            },
            None => {
                return Err(HeaderIssue::BadDisposition {
                    size,
                    raw: String::new(),
                })
            }
        };

        let content_type = find(CONTENT_TYPE).unwrap_or_default();
        let content_hash = find(CONTENT_HASH).map(ContentHash::from_encoded);
        let metadata = headers
            .iter()
            .filter(|(k, _)| !is_reserved(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let kind = PartKind::classify(&content_type, &disposition);

        Ok(Self {
            disposition,
            kind,
            content_type,
            size,
            content_hash,
            metadata,
            headers,
        })
    }

    /// Headers flattened into a map for diagnostics output
    pub fn header_map(&self) -> BTreeMap<String, serde_json::Value> {
        let mut map: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        for (key, value) in &self.headers {
            let entry = map.remove(key);
            let merged = match entry {
                None => serde_json::Value::String(value.clone()),
                Some(serde_json::Value::Array(mut values)) => {
                    values.push(serde_json::Value::String(value.clone()));
                    serde_json::Value::Array(values)
                }
                Some(previous) => serde_json::Value::Array(vec![
                    previous,
                    serde_json::Value::String(value.clone()),
                ]),
            };
            map.insert(key.clone(), merged);
        }
        map
    }
}

/// Why a header block could not be turned into a [`PartHeader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderIssue {
    /// Disposition missing or lacking a name; the part can still be stepped over
    /// when `size` is known
    BadDisposition {
        /// Declared size, if any
        size: Option<u64>,
        /// Raw disposition value
        raw: String,
    },
    /// Size header is not a number
    BadSize(String),
}

/// Whether `key` is one of the format's own headers
pub fn is_reserved(key: &str) -> bool {
    RESERVED_HEADERS.iter().any(|r| r.eq_ignore_ascii_case(key))
}

/// Check caller metadata before it is turned into header lines
pub fn validate_metadata(part: &str, metadata: &BTreeMap<String, String>) -> Result<(), WireError> {
    for (key, value) in metadata {
        if is_reserved(key) {
            return Err(WireError::Encoding {
                part: part.to_string(),
                reason: format!("metadata key '{}' collides with a reserved header", key),
            });
        }
        validate_header(part, key, value)?;
    }
    Ok(())
}

fn validate_header(part: &str, key: &str, value: &str) -> Result<(), WireError> {
    let bad_key = key.is_empty()
        || key
            .bytes()
            .any(|b| b == b':' || b.is_ascii_whitespace() || b.is_ascii_control());
    if bad_key {
        return Err(WireError::Encoding {
            part: part.to_string(),
            reason: format!("invalid header name {:?}", key),
        });
    }
    if value.contains('\r') || value.contains('\n') {
        return Err(WireError::Encoding {
            part: part.to_string(),
            reason: format!("header '{}' value contains a line break", key),
        });
    }
    Ok(())
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn unquote(s: &str) -> String {
    let inner = match s.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(inner) => inner,
        None => return s.to_string(),
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split on `;` outside quoted strings
fn split_params(value: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in value.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            ';' if !in_quotes => {
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        segments.push(current);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_round_trip_with_quotes() {
        let d = Disposition {
            typ: DispositionType::File,
            name: "report; final".to_string(),
            filename: Some(r#"q"uo\te.csv"#.to_string()),
        };
        let rendered = d.render();
        assert_eq!(rendered, r#"file; name="report; final"; filename="q\"uo\\te.csv""#);
        assert_eq!(Disposition::parse(&rendered), Some(d));
    }

    #[test]
    fn test_disposition_requires_name() {
        assert!(Disposition::parse("file; filename=\"a.txt\"").is_none());
        assert!(Disposition::parse("").is_none());
        let legacy = Disposition::parse("protobuf; name=\"receptor_v1.Finding\"").unwrap();
        assert_eq!(legacy.typ, DispositionType::Structured);
    }

    #[test]
    fn test_classification() {
        let structured = Disposition::parse("structured; name=\"metadata\"").unwrap();
        let file = Disposition::parse("file; name=\"blob\"; filename=\"a.pdf\"").unwrap();
        let bare = Disposition::parse("file; name=\"blob\"").unwrap();

        assert_eq!(
            PartKind::classify("application/protobuf", &structured),
            PartKind::Structured
        );
        assert_eq!(PartKind::classify("application/pdf", &file), PartKind::File);
        assert_eq!(PartKind::classify("application/pdf", &bare), PartKind::Unknown);

        assert_eq!(
            PartKind::classify("Application/Protobuf; proto=receptor_v1.Finding", &structured),
            PartKind::Structured
        );
        assert_eq!(
            PartKind::classify("application/protobuf-archive", &file),
            PartKind::File
        );
        assert_eq!(
            PartKind::classify("text/plain; note=application/protobuf", &file),
            PartKind::File
        );
    }

    #[test]
    fn test_encode_and_parse_header_block() {
        let disposition = Disposition::parse("file; name=\"doc\"; filename=\"doc.txt\"").unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert("Original-Name".to_string(), "source.txt".to_string());
        let header = PartHeader::new(disposition, "text/plain", 3, ContentHash::of(b"abc"), metadata);

        let mut out = Vec::new();
        header.encode(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Content-Disposition: file; name=\"doc\"; filename=\"doc.txt\"\r\n"));
        assert!(text.contains("Content-Size: 3\r\n"));
        assert!(text.ends_with("Original-Name: source.txt\r\n\r\n"));

        let parsed = PartHeader::from_lines(header.headers.clone()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_content_length_accepted() {
        let parsed = PartHeader::from_lines(vec![
            ("content-disposition".to_string(), "file; name=\"x\"; filename=\"x\"".to_string()),
            ("Content-Length".to_string(), "12".to_string()),
        ])
        .unwrap();
        assert_eq!(parsed.size, Some(12));
        assert!(parsed.content_hash.is_none());
    }

    #[test]
    fn test_bad_disposition_keeps_size() {
        let issue = PartHeader::from_lines(vec![
            ("Content-Disposition".to_string(), "file".to_string()),
            ("Content-Size".to_string(), "5".to_string()),
        ])
        .unwrap_err();
        assert_eq!(
            issue,
            HeaderIssue::BadDisposition {
                size: Some(5),
                raw: "file".to_string()
            }
        );
    }

    #[test]
    fn test_metadata_validation() {
        let mut metadata = BTreeMap::new();
        metadata.insert("content-hash".to_string(), "x".to_string());
        assert!(validate_metadata("p", &metadata).is_err());

        let mut metadata = BTreeMap::new();
        metadata.insert("Note".to_string(), "line\r\nbreak".to_string());
        assert!(validate_metadata("p", &metadata).is_err());

        let mut metadata = BTreeMap::new();
        metadata.insert("Original-Name".to_string(), "ok".to_string());
        assert!(validate_metadata("p", &metadata).is_ok());
    }

    #[test]
    fn test_header_map_merges_duplicates() {
        let header = PartHeader::from_lines(vec![
            ("Content-Disposition".to_string(), "file; name=\"x\"; filename=\"x\"".to_string()),
            ("Tag".to_string(), "a".to_string()),
            ("Tag".to_string(), "b".to_string()),
        ])
        .unwrap();
        let map = header.header_map();
        assert_eq!(map["Tag"], serde_json::json!(["a", "b"]));
    }
}
