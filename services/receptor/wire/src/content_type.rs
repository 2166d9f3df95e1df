//! Stream-level content type carried out-of-band ahead of the payload.
//!
//! ```text
//! multipart/tr-mixed; <payload-media-type>; boundary=<token>
//! ```

use crate::error::WireError;
use std::fmt;
use std::str::FromStr;

/// Media type of every evidence bundle stream
pub const BUNDLE_MEDIA_TYPE: &str = "multipart/tr-mixed";

/// Payload media type used when a bundle carries more than one document
pub const ARCHIVE_MEDIA_TYPE: &str = "application/tr-archive";

/// Parsed stream content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamContentType {
    /// Bundle media type, normally [`BUNDLE_MEDIA_TYPE`]
    pub bundle_media_type: String,
    /// Media type of the bundle's document payload
    pub payload_media_type: String,
    /// Multipart boundary token
    pub boundary: String,
}

impl StreamContentType {
    /// Content type for a bundle built with `boundary`
    pub fn new(payload_media_type: impl Into<String>, boundary: impl Into<String>) -> Self {
        Self {
            bundle_media_type: BUNDLE_MEDIA_TYPE.to_string(),
            payload_media_type: payload_media_type.into(),
            boundary: boundary.into(),
        }
    }
}

impl fmt::Display for StreamContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}; {}; boundary={}",
            self.bundle_media_type, self.payload_media_type, self.boundary
        )
    }
}

impl FromStr for StreamContentType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bundle_media_type: Option<String> = None;
        let mut payload_media_type: Option<String> = None;
        let mut boundary = None;

        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            match segment.split_once('=') {
                Some((key, value)) if key.trim().eq_ignore_ascii_case("boundary") => {
                    boundary = Some(value.trim().trim_matches('"').to_string());
                }
                // Other parameters stay with the media type they follow
                Some(_) => {
                    let owner = if payload_media_type.is_some() {
                        &mut payload_media_type
                    } else {
                        &mut bundle_media_type
                    };
                    if let Some(media_type) = owner {
                        media_type.push_str("; ");
                        media_type.push_str(segment);
                    }
                }
                None if bundle_media_type.is_none() => bundle_media_type = Some(segment.to_string()),
                None if payload_media_type.is_none() => payload_media_type = Some(segment.to_string()),
                None => {}
            }
        }

        let boundary = boundary
            .filter(|b| !b.is_empty())
            .ok_or_else(|| WireError::InvalidArgument(format!("no boundary in content type '{}'", s)))?;
        let bundle_media_type = bundle_media_type
            .ok_or_else(|| WireError::InvalidArgument(format!("no media type in content type '{}'", s)))?;

        Ok(Self {
            bundle_media_type,
            payload_media_type: payload_media_type.unwrap_or_default(),
            boundary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse() {
        let ct = StreamContentType::new("application/pdf", "abc123");
        let rendered = ct.to_string();
        assert_eq!(rendered, "multipart/tr-mixed; application/pdf; boundary=abc123");
        assert_eq!(rendered.parse::<StreamContentType>().unwrap(), ct);
    }

    #[test]
    fn test_payload_parameters_kept() {
        let ct = StreamContentType::new("text/csv; charset=utf-8; header=present", "b0");
        let rendered = ct.to_string();
        assert_eq!(
            rendered,
            "multipart/tr-mixed; text/csv; charset=utf-8; header=present; boundary=b0"
        );
        let parsed: StreamContentType = rendered.parse().unwrap();
        assert_eq!(parsed, ct);
        assert_eq!(parsed.to_string(), rendered);
    }

    #[test]
    fn test_parse_without_payload_type() {
        let ct: StreamContentType = "multipart/tr-mixed; boundary=\"xyz\"".parse().unwrap();
        assert_eq!(ct.boundary, "xyz");
        assert_eq!(ct.payload_media_type, "");
    }

    #[test]
    fn test_missing_boundary_rejected() {
        assert!("multipart/tr-mixed; application/pdf".parse::<StreamContentType>().is_err());
        assert!("multipart/tr-mixed; boundary=".parse::<StreamContentType>().is_err());
    }
}
