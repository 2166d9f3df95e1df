//! Multipart stream reader.
//!
//! Parts are yielded one at a time. A [`Part`] borrows the reader, so the
//! previous part's body is unreachable once the next part is requested; any
//! unread remainder is consumed (and hashed) before moving on.

use crate::error::WireError;
use crate::hash::{effective_buffer_size, ContentHash, StreamHasher};
use crate::header::{HeaderIssue, PartHeader, PartKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use tracing::{debug, warn};

/// Longest accepted header line, in bytes
pub const MAX_HEADER_LINE: usize = 8 * 1024;

/// Most header lines accepted per part
pub const MAX_HEADER_LINES: usize = 128;

/// Reader tuning
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    /// Read buffer size; zero selects the default
    pub buffer_size: usize,
    /// Fail on size or digest mismatches instead of logging them
    pub strict: bool,
}

/// One entry of [`MultipartReader::metadata_summary`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartMetadata {
    /// Disposition name
    pub part_name: String,
    /// Classification
    pub part_type: PartKind,
    /// Raw headers, duplicates merged into arrays
    pub headers: BTreeMap<String, serde_json::Value>,
}

enum ReaderState {
    Start,
    Body(BodyState),
    Finished,
}

struct BodyState {
    name: String,
    declared_size: Option<u64>,
    declared_hash: Option<ContentHash>,
    remaining: Option<u64>,
    hasher: StreamHasher,
    checked: bool,
}

impl BodyState {
    fn new(name: String, declared_size: Option<u64>, declared_hash: Option<ContentHash>) -> Self {
        Self {
            name,
            declared_size,
            declared_hash,
            remaining: declared_size,
            hasher: StreamHasher::new(),
            checked: false,
        }
    }
}

/// Reads parts back out of a multipart evidence stream
pub struct MultipartReader<R> {
    inner: BufReader<R>,
    boundary: String,
    strict: bool,
    state: ReaderState,
    scratch: Vec<u8>,
}

impl<R: Read> MultipartReader<R> {
    /// Create a lenient reader
    pub fn new(source: R, boundary: &str, buffer_size: usize) -> Result<Self, WireError> {
        Self::with_options(
            source,
            boundary,
            ReaderOptions {
                buffer_size,
                strict: false,
            },
        )
    }

    /// Create a reader with explicit options
    pub fn with_options(source: R, boundary: &str, options: ReaderOptions) -> Result<Self, WireError> {
        if boundary.is_empty() {
            return Err(WireError::InvalidArgument("boundary must not be empty".to_string()));
        }
        let capacity = effective_buffer_size(options.buffer_size);
        Ok(Self {
            inner: BufReader::with_capacity(capacity, source),
            boundary: boundary.to_string(),
            strict: options.strict,
            state: ReaderState::Start,
            scratch: Vec::new(),
        })
    }

    /// Boundary this reader splits on
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Advance to the next part. Returns `Ok(None)` once the closing
    /// delimiter has been read, and on every call after that.
    pub fn next_part(&mut self) -> Result<Option<Part<'_, R>>, WireError> {
        loop {
            match std::mem::replace(&mut self.state, ReaderState::Finished) {
                ReaderState::Finished => return Ok(None),
                ReaderState::Start => self.skip_preamble()?,
                ReaderState::Body(body) => self.finish_body(body)?,
            }

            // Positioned right after "--<boundary>"
            let mut tail = [0u8; 2];
            self.inner
                .read_exact(&mut tail)
                .map_err(|e| self.malformed_io("delimiter", e))?;
            match &tail {
                b"--" => {
                    debug!(boundary = %self.boundary, "closing delimiter reached");
                    return Ok(None);
                }
                b"\r\n" => {}
                other => {
                    return Err(WireError::Malformed(format!(
                        "unexpected bytes {:?} after boundary",
                        String::from_utf8_lossy(other)
                    )))
                }
            }

            let lines = self.read_header_lines()?;
            match PartHeader::from_lines(lines) {
                Ok(header) => {
                    self.state = ReaderState::Body(BodyState::new(
                        header.name().to_string(),
                        header.size,
                        header.content_hash.clone(),
                    ));
                    return Ok(Some(Part { header, reader: self }));
                }
                Err(HeaderIssue::BadDisposition { size, raw }) => {
                    warn!(disposition = %raw, ?size, "skipping part with unusable disposition");
                    self.state = ReaderState::Body(BodyState::new("<unnamed>".to_string(), size, None));
                }
                Err(HeaderIssue::BadSize(raw)) => {
                    warn!(size = %raw, "unparseable part size, scanning for delimiter");
                    self.state = ReaderState::Body(BodyState::new("<unsized>".to_string(), None, None));
                }
            }
        }
    }

    /// Read every remaining part and write a JSON list of their headers to `sink`
    pub fn metadata_summary<W: Write>(&mut self, sink: W) -> Result<Vec<PartMetadata>, WireError> {
        let mut summary = Vec::new();
        while let Some(part) = self.next_part()? {
            summary.push(PartMetadata {
                part_name: part.header.name().to_string(),
                part_type: part.header.kind,
                headers: part.header.header_map(),
            });
        }
        serde_json::to_writer_pretty(sink, &summary).map_err(|e| {
            WireError::io("<summary>", "write metadata summary", io::Error::new(io::ErrorKind::Other, e))
        })?;
        Ok(summary)
    }

    fn skip_preamble(&mut self) -> Result<(), WireError> {
        let pattern = format!("--{}", self.boundary);
        let found = scan_for(&mut self.inner, pattern.as_bytes())
            .map_err(|e| WireError::io("<stream>", "read preamble", e))?;
        if found {
            Ok(())
        } else {
            Err(WireError::Malformed("no opening boundary found".to_string()))
        }
    }

    fn finish_body(&mut self, mut body: BodyState) -> Result<(), WireError> {
        match body.remaining {
            Some(_) => {
                self.settle(&mut body, self.strict)?;
                let expected = format!("\r\n--{}", self.boundary);
                let mut found = vec![0u8; expected.len()];
                self.inner
                    .read_exact(&mut found)
                    .map_err(|e| self.malformed_io("part body", e))?;
                if found != expected.as_bytes() {
                    return Err(WireError::Malformed(format!(
                        "part '{}' is not followed by a boundary",
                        body.name
                    )));
                }
                Ok(())
            }
            None => {
                let pattern = format!("\r\n--{}", self.boundary);
                let found = scan_for(&mut self.inner, pattern.as_bytes())
                    .map_err(|e| WireError::io(body.name.clone(), "scan for boundary", e))?;
                if found {
                    Ok(())
                } else {
                    Err(WireError::Malformed(format!(
                        "stream ended inside unsized part '{}'",
                        body.name
                    )))
                }
            }
        }
    }

    /// Drain the rest of a sized body through its hasher and compare with the header
    fn settle(&mut self, body: &mut BodyState, strict: bool) -> Result<(), WireError> {
        if body.checked {
            return Ok(());
        }
        if self.scratch.is_empty() {
            self.scratch = vec![0u8; self.inner.capacity().min(64 * 1024)];
        }
        while let Some(remaining) = body.remaining.filter(|r| *r > 0) {
            let want = remaining.min(self.scratch.len() as u64) as usize;
            let n = match self.inner.read(&mut self.scratch[..want]) {
                Ok(0) => {
                    return Err(WireError::Malformed(format!(
                        "stream ended inside part '{}'",
                        body.name
                    )))
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WireError::io(body.name.clone(), "read part body", e)),
            };
            body.hasher.update(&self.scratch[..n]);
            body.remaining = Some(remaining - n as u64);
        }
        body.checked = true;

        let Some(expected_hash) = body.declared_hash.as_ref() else {
            return Ok(());
        };
        let actual_size = body.hasher.len();
        let actual_hash = std::mem::take(&mut body.hasher).finish();
        if &actual_hash == expected_hash {
            return Ok(());
        }
        let err = WireError::Integrity {
            part: body.name.clone(),
            expected_size: body.declared_size.unwrap_or_default(),
            actual_size,
            expected_hash: expected_hash.to_string(),
            actual_hash: actual_hash.to_string(),
        };
        if strict {
            Err(err)
        } else {
            warn!(part = %body.name, error = %err, "content hash mismatch");
            Ok(())
        }
    }

    fn read_header_lines(&mut self) -> Result<Vec<(String, String)>, WireError> {
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = (&mut self.inner)
                .take(MAX_HEADER_LINE as u64 + 1)
                .read_until(b'\n', &mut line)
                .map_err(|e| WireError::io("<stream>", "read part header", e))?;
            if n == 0 || line.last() != Some(&b'\n') {
                return Err(WireError::Malformed(if n > MAX_HEADER_LINE {
                    format!("header line longer than {} bytes", MAX_HEADER_LINE)
                } else {
                    "stream ended inside part header".to_string()
                }));
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                return Ok(headers);
            }

            if text.starts_with([' ', '\t']) {
                match headers.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(text.trim());
                        continue;
                    }
                    None => return Err(WireError::Malformed("header block starts with a continuation".to_string())),
                }
            }

            if headers.len() >= MAX_HEADER_LINES {
                return Err(WireError::Malformed(format!(
                    "more than {} header lines in one part",
                    MAX_HEADER_LINES
                )));
            }
            let (key, value) = text
                .split_once(':')
                .ok_or_else(|| WireError::Malformed(format!("header line without colon: {:?}", text)))?;
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Self { inner, state, .. } = self;
        let ReaderState::Body(body) = state else {
            return Ok(0);
        };
        let remaining = match body.remaining {
            Some(0) => return Ok(0),
            Some(remaining) => remaining,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "part has no declared size",
                ))
            }
        };
        let want = remaining.min(buf.len() as u64) as usize;
        let n = inner.read(&mut buf[..want])?;
        if n == 0 && want > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside part body",
            ));
        }
        body.hasher.update(&buf[..n]);
        body.remaining = Some(remaining - n as u64);
        Ok(n)
    }

    fn verify_current(&mut self) -> Result<(), WireError> {
        let mut state = std::mem::replace(&mut self.state, ReaderState::Finished);
        let result = match &mut state {
            ReaderState::Body(body) if body.remaining.is_some() => self.settle(body, true),
            ReaderState::Body(body) => Err(WireError::InvalidArgument(format!(
                "part '{}' has no declared size to verify",
                body.name
            ))),
            _ => Ok(()),
        };
        self.state = state;
        result
    }

    fn malformed_io(&self, what: &str, e: io::Error) -> WireError {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            WireError::Malformed(format!("stream ended inside {}", what))
        } else {
            WireError::io("<stream>", "read stream", e)
        }
    }
}

/// A part whose body can be read in place
pub struct Part<'r, R> {
    header: PartHeader,
    reader: &'r mut MultipartReader<R>,
}

impl<R: Read> Part<'_, R> {
    /// Decoded header block
    pub fn header(&self) -> &PartHeader {
        &self.header
    }

    /// Disposition name
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// Classification
    pub fn kind(&self) -> PartKind {
        self.header.kind
    }

    /// Read the whole body into memory
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(self.header.size.unwrap_or_default().min(1 << 20) as usize);
        self.read_to_end(&mut out)
            .map_err(|e| WireError::io(self.header.name(), "read part body", e))?;
        Ok(out)
    }

    /// Consume the rest of the body and fail if it disagrees with the
    /// declared digest, regardless of strictness
    pub fn verify(self) -> Result<(), WireError> {
        self.reader.verify_current()
    }
}

impl<R: Read> Read for Part<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_body(buf)
    }
}

/// Consume `inner` up to and including the first occurrence of `pattern`.
/// Returns `false` if the input ends first.
fn scan_for<R: Read>(inner: &mut BufReader<R>, pattern: &[u8]) -> io::Result<bool> {
    let table = prefix_table(pattern);
    let mut matched = 0usize;
    loop {
        let (consumed, found) = {
            let buf = inner.fill_buf()?;
            if buf.is_empty() {
                return Ok(false);
            }
            let mut consumed = 0;
            let mut found = false;
            for &b in buf {
                consumed += 1;
                while matched > 0 && pattern[matched] != b {
                    matched = table[matched - 1];
                }
                if pattern[matched] == b {
                    matched += 1;
                }
                if matched == pattern.len() {
                    found = true;
                    break;
                }
            }
            (consumed, found)
        };
        inner.consume(consumed);
        if found {
            return Ok(true);
        }
    }
}

fn prefix_table(pattern: &[u8]) -> Vec<usize> {
    let mut table = vec![0usize; pattern.len()];
    let mut k = 0;
    for i in 1..pattern.len() {
        while k > 0 && pattern[i] != pattern[k] {
            k = table[k - 1];
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        table[i] = k;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MultipartBuilder, StructuredValue};
    use crate::header::STRUCTURED_CONTENT_TYPE;
    use std::io::Write as _;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Note {
        #[prost(string, tag = "1")]
        text: String,
    }

    fn collect(data: &[u8], boundary: &str) -> Vec<(PartHeader, Vec<u8>)> {
        let mut reader = MultipartReader::new(data, boundary, 0).unwrap();
        let mut out = Vec::new();
        while let Some(mut part) = reader.next_part().unwrap() {
            let body = part.read_to_vec().unwrap();
            out.push((part.header().clone(), body));
        }
        out
    }

    #[test]
    fn test_round_trip_all_part_kinds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"file contents\n").unwrap();
        file.flush().unwrap();

        let note = Note { text: "finding".into() };
        let mut metadata = BTreeMap::new();
        metadata.insert("Original-Name".to_string(), "scan.log".to_string());

        let mut builder = MultipartBuilder::new(Vec::new(), 0);
        builder.add_structured("metadata", &note).unwrap();
        builder.add_bytes("inline", "inline.txt", "text/plain", b"inline bytes", BTreeMap::new()).unwrap();
        builder.add_file("log", "scan.log", file.path(), "text/plain", metadata).unwrap();
        let boundary = builder.boundary().to_string();
        let written = builder.parts().to_vec();
        let stream = builder.finalize().unwrap();

        let parts = collect(&stream, &boundary);
        assert_eq!(parts.len(), 3);
        for ((header, body), original) in parts.iter().zip(&written) {
            assert_eq!(header.name(), original.name());
            assert_eq!(header.kind, original.kind);
            assert_eq!(Some(body.len() as u64), original.size);
            assert_eq!(Some(ContentHash::of(body)), original.content_hash);
        }
        assert_eq!(parts[0].0.kind, PartKind::Structured);
        assert_eq!(parts[0].0.content_type, STRUCTURED_CONTENT_TYPE);
        assert_eq!(parts[0].1, prost::Message::encode_to_vec(&note));
        assert_eq!(parts[1].0.kind, PartKind::File);
        assert_eq!(parts[1].1, b"inline bytes");
        assert_eq!(parts[2].0.filename(), Some("scan.log"));
        assert_eq!(parts[2].0.metadata["Original-Name"], "scan.log");
        assert_eq!(parts[2].1, b"file contents\n");
    }

    #[test]
    fn test_boundary_text_inside_payload() {
        let mut builder = MultipartBuilder::with_boundary(Vec::new(), 0, "frontier").unwrap();
        let tricky = b"before\r\n--frontier\r\nContent-Type: x\r\n\r\n--frontier--\r\nafter";
        builder.add_bytes("tricky", "t.bin", "application/octet-stream", tricky, BTreeMap::new()).unwrap();
        builder.add_bytes("next", "n.bin", "application/octet-stream", b"n", BTreeMap::new()).unwrap();
        let stream = builder.finalize().unwrap();

        let parts = collect(&stream, "frontier");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].1, tricky);
        assert_eq!(parts[1].1, b"n");
    }

    #[test]
    fn test_single_closing_delimiter_no_trailing_bytes() {
        let mut builder = MultipartBuilder::with_boundary(Vec::new(), 0, "B").unwrap();
        builder.add_bytes("a", "a", "text/plain", b"x", BTreeMap::new()).unwrap();
        let stream = builder.finalize().unwrap();

        let text = String::from_utf8(stream.clone()).unwrap();
        assert_eq!(text.matches("--B--").count(), 1);
        assert!(text.ends_with("\r\n--B--\r\n"));

        let mut reader = MultipartReader::new(&stream[..], "B", 0).unwrap();
        assert!(reader.next_part().unwrap().is_some());
        assert!(reader.next_part().unwrap().is_none());
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_empty_stream() {
        let builder = MultipartBuilder::with_boundary(Vec::new(), 0, "B").unwrap();
        let stream = builder.finalize().unwrap();
        let mut reader = MultipartReader::new(&stream[..], "B", 0).unwrap();
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_empty_boundary_rejected() {
        let err = MultipartReader::new(&b""[..], "", 0).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_large_file_with_structured_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..crate::DEFAULT_BUFFER_SIZE + 1).map(|i| (i % 253) as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let notes = vec![Note { text: "one".into() }, Note { text: "two".into() }];
        let mut builder = MultipartBuilder::new(Vec::new(), 0);
        builder.add_structured("notes", StructuredValue::list(&notes)).unwrap();
        builder.add_file("big", "big.bin", file.path(), "application/octet-stream", BTreeMap::new()).unwrap();
        let boundary = builder.boundary().to_string();
        let stream = builder.finalize().unwrap();

        let parts = collect(&stream, &boundary);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].0.size, Some(data.len() as u64));
        assert_eq!(parts[1].0.content_hash, Some(ContentHash::of(&data)));
        assert_ne!(parts[0].0.content_hash, parts[1].0.content_hash);
        assert_eq!(parts[1].1, data);
    }

    #[test]
    fn test_bytes_part_one_over_buffer_size() {
        let note = Note { text: "ten bytes!".into() };
        let data = vec![0x5au8; crate::DEFAULT_BUFFER_SIZE + 1];

        let mut builder = MultipartBuilder::new(Vec::new(), 0);
        builder.add_structured("finding", &note).unwrap();
        builder.add_bytes("blob", "blob.bin", "application/octet-stream", &data, BTreeMap::new()).unwrap();
        let boundary = builder.boundary().to_string();
        let stream = builder.finalize().unwrap();

        let hash_headers = stream
            .windows(b"\r\nContent-Hash: ".len())
            .filter(|w| *w == b"\r\nContent-Hash: ")
            .count();
        assert_eq!(hash_headers, 2);

        let mut reader = MultipartReader::new(&stream[..], &boundary, 0).unwrap();
        while let Some(part) = reader.next_part().unwrap() {
            part.verify().unwrap();
        }

        let parts = collect(&stream, &boundary);
        assert_eq!(parts[1].1.len(), data.len());
    }

    #[test]
    fn test_unread_body_is_skipped() {
        let mut builder = MultipartBuilder::with_boundary(Vec::new(), 0, "B").unwrap();
        builder.add_bytes("a", "a", "text/plain", b"skip me", BTreeMap::new()).unwrap();
        builder.add_bytes("b", "b", "text/plain", b"keep", BTreeMap::new()).unwrap();
        let stream = builder.finalize().unwrap();

        let mut reader = MultipartReader::new(&stream[..], "B", 4).unwrap();
        {
            let mut first = reader.next_part().unwrap().unwrap();
            let mut two = [0u8; 2];
            first.read_exact(&mut two).unwrap();
            assert_eq!(&two, b"sk");
        }
        let mut second = reader.next_part().unwrap().unwrap();
        assert_eq!(second.name(), "b");
        assert_eq!(second.read_to_vec().unwrap(), b"keep");
    }

    #[test]
    fn test_tampered_body_strict_and_lenient() {
        let mut builder = MultipartBuilder::with_boundary(Vec::new(), 0, "B").unwrap();
        builder.add_bytes("a", "a", "text/plain", b"original", BTreeMap::new()).unwrap();
        let mut stream = builder.finalize().unwrap();
        let pos = stream.windows(8).position(|w| w == b"original").unwrap();
        stream[pos] = b'O';

        let mut lenient = MultipartReader::new(&stream[..], "B", 0).unwrap();
        assert!(lenient.next_part().unwrap().is_some());
        assert!(lenient.next_part().unwrap().is_none());

        let mut strict = MultipartReader::with_options(
            &stream[..],
            "B",
            ReaderOptions { buffer_size: 0, strict: true },
        )
        .unwrap();
        assert!(strict.next_part().unwrap().is_some());
        let err = strict.next_part().err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Integrity);

        let mut reader = MultipartReader::new(&stream[..], "B", 0).unwrap();
        let part = reader.next_part().unwrap().unwrap();
        assert!(matches!(part.verify(), Err(WireError::Integrity { .. })));
    }

    #[test]
    fn test_bad_disposition_skipped() {
        let stream = b"--B\r\nContent-Disposition: file\r\nContent-Size: 3\r\n\r\nabc\
\r\n--B\r\nContent-Disposition: file; name=\"ok\"; filename=\"ok\"\r\nContent-Size: 2\r\n\r\nok\
\r\n--B--\r\n";
        let parts = collect(stream, "B");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].0.name(), "ok");
        assert_eq!(parts[0].1, b"ok");
    }

    #[test]
    fn test_legacy_part_without_size() {
        let stream = b"preamble\r\n--B\r\nContent-Disposition: file; name=\"old\"; filename=\"o\"\r\n\r\nlegacy body\
\r\n--B\r\nContent-Disposition: file; name=\"new\"; filename=\"n\"\r\nContent-Length: 3\r\n\r\nnew\
\r\n--B--\r\n";
        let mut reader = MultipartReader::new(&stream[..], "B", 0).unwrap();
        {
            let mut old = reader.next_part().unwrap().unwrap();
            assert_eq!(old.name(), "old");
            assert_eq!(old.header().size, None);
            let mut buf = [0u8; 4];
            assert!(old.read(&mut buf).is_err());
        }
        let mut new = reader.next_part().unwrap().unwrap();
        assert_eq!(new.read_to_vec().unwrap(), b"new");
        drop(new);
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_truncated_stream_is_malformed() {
        let stream = b"--B\r\nContent-Disposition: file; name=\"a\"; filename=\"a\"\r\nContent-Size: 10\r\n\r\nabc";
        let mut reader = MultipartReader::new(&stream[..], "B", 0).unwrap();
        assert!(reader.next_part().unwrap().is_some());
        let err = reader.next_part().err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Malformed);

        let no_boundary = b"just some bytes";
        let mut reader = MultipartReader::new(&no_boundary[..], "B", 0).unwrap();
        assert!(matches!(reader.next_part(), Err(WireError::Malformed(_))));
    }

    #[test]
    fn test_header_line_limit() {
        let mut stream = b"--B\r\nX-Long: ".to_vec();
        stream.extend(std::iter::repeat(b'a').take(MAX_HEADER_LINE + 10));
        stream.extend_from_slice(b"\r\n\r\n");
        let mut reader = MultipartReader::new(&stream[..], "B", 0).unwrap();
        assert!(matches!(reader.next_part(), Err(WireError::Malformed(_))));
    }

    #[test]
    fn test_metadata_summary() {
        let note = Note { text: "x".into() };
        let mut metadata = BTreeMap::new();
        metadata.insert("Original-Name".to_string(), "x.txt".to_string());
        let mut builder = MultipartBuilder::new(Vec::new(), 0);
        builder.add_structured("metadata", &note).unwrap();
        builder.add_bytes("doc", "x.txt", "text/plain", b"x", metadata).unwrap();
        let boundary = builder.boundary().to_string();
        let stream = builder.finalize().unwrap();

        let mut reader = MultipartReader::new(&stream[..], &boundary, 0).unwrap();
        let mut out = Vec::new();
        let summary = reader.metadata_summary(&mut out).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].part_type, PartKind::Structured);
        assert_eq!(summary[1].headers["Original-Name"], serde_json::json!("x.txt"));

        let parsed: Vec<PartMetadata> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed, summary);
    }

    #[test]
    fn test_scan_handles_overlapping_prefix() {
        let data = b"xx--B--Bz\r\n--BB";
        let mut inner = BufReader::with_capacity(3, &data[..]);
        assert!(scan_for(&mut inner, b"\r\n--B").unwrap());
        let mut rest = Vec::new();
        inner.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"B");
    }
}
