//! Multipart stream builder.
//!
//! Parts are written to the sink as soon as they are added:
//!
//! ```text
//! --<boundary>\r\n
//! <header block>\r\n
//! <Content-Size bytes of body>
//! \r\n--<boundary>\r\n
//! ...
//! \r\n--<boundary>--\r\n
//! ```
//!
//! The reader steps over each body using the declared size, so a body that
//! happens to contain the boundary text is harmless.

use crate::error::WireError;
use crate::hash::{digest_through, effective_buffer_size, ContentHash};
use crate::header::{validate_metadata, Disposition, DispositionType, PartHeader, STRUCTURED_CONTENT_TYPE};
use rand::RngCore;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Random bytes behind a generated boundary (rendered as hex)
const BOUNDARY_BYTES: usize = 30;

/// Longest boundary accepted from callers
pub const MAX_BOUNDARY_LEN: usize = 70;

/// A protobuf message that can be written into a structured part
pub trait StructuredMessage: Send + Sync {
    /// Rust type name, used in error messages
    fn type_name(&self) -> &'static str;

    /// Append the encoded message to `buf`
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), prost::EncodeError>;
}

impl<M: prost::Message> StructuredMessage for M {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<M>()
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), prost::EncodeError> {
        self.encode(buf)
    }
}

/// Argument of [`MultipartBuilder::add_structured`]: one message or a list of them
pub enum StructuredValue<'a> {
    /// A single message
    Message(&'a dyn StructuredMessage),
    /// Messages written back to back in order
    List(Vec<StructuredValue<'a>>),
}

impl<'a> StructuredValue<'a> {
    /// Single message
    pub fn message(message: &'a dyn StructuredMessage) -> Self {
        StructuredValue::Message(message)
    }

    /// Homogeneous slice of messages
    pub fn list<M: prost::Message>(messages: &'a [M]) -> Self {
        StructuredValue::List(
            messages
                .iter()
                .map(|m| StructuredValue::Message(m as &dyn StructuredMessage))
                .collect(),
        )
    }

    fn encode(&self, part: &str) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::new();
        match self {
            StructuredValue::Message(message) => encode_message(part, *message, &mut buf)?,
            StructuredValue::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    match item {
                        StructuredValue::Message(message) => encode_message(part, *message, &mut buf)?,
                        StructuredValue::List(_) => {
                            return Err(WireError::UnsupportedElement {
                                part: part.to_string(),
                                index,
                                found: "nested list",
                            })
                        }
                    }
                }
            }
        }
        Ok(buf)
    }
}

impl<'a, M: prost::Message> From<&'a M> for StructuredValue<'a> {
    fn from(message: &'a M) -> Self {
        StructuredValue::Message(message)
    }
}

fn encode_message(part: &str, message: &dyn StructuredMessage, buf: &mut Vec<u8>) -> Result<(), WireError> {
    message.encode_into(buf).map_err(|e| WireError::Encoding {
        part: part.to_string(),
        reason: format!("{}: {}", message.type_name(), e),
    })
}

/// Generate a fresh random boundary token
pub fn generate_boundary() -> String {
    let mut bytes = [0u8; BOUNDARY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn validate_boundary(boundary: &str) -> Result<(), WireError> {
    let valid = !boundary.is_empty()
        && boundary.len() <= MAX_BOUNDARY_LEN
        && boundary
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "'()+_,-./:=?".contains(c));
    if valid {
        Ok(())
    } else {
        Err(WireError::InvalidArgument(format!("invalid boundary {:?}", boundary)))
    }
}

/// Writes a multipart evidence stream into a sink
pub struct MultipartBuilder<W: Write> {
    writer: W,
    boundary: String,
    buffer_size: usize,
    scratch: Vec<u8>,
    parts: Vec<PartHeader>,
}

impl<W: Write> MultipartBuilder<W> {
    /// Create a builder with a freshly generated boundary.
    /// A `buffer_size` of zero selects [`crate::DEFAULT_BUFFER_SIZE`].
    pub fn new(sink: W, buffer_size: usize) -> Self {
        Self {
            writer: sink,
            boundary: generate_boundary(),
            buffer_size: effective_buffer_size(buffer_size),
            scratch: Vec::new(),
            parts: Vec::new(),
        }
    }

    /// Create a builder with a caller-chosen boundary
    pub fn with_boundary(sink: W, buffer_size: usize, boundary: impl Into<String>) -> Result<Self, WireError> {
        let boundary = boundary.into();
        validate_boundary(&boundary)?;
        let mut builder = Self::new(sink, buffer_size);
        builder.boundary = boundary;
        Ok(builder)
    }

    /// Boundary token the reader will need
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Copy buffer size in effect
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Headers of the parts written so far, in order
    pub fn parts(&self) -> &[PartHeader] {
        &self.parts
    }

    /// Add one or more structured messages as a single part
    pub fn add_structured<'a>(
        &mut self,
        part_name: &str,
        value: impl Into<StructuredValue<'a>>,
    ) -> Result<(), WireError> {
        let data = value.into().encode(part_name)?;
        let disposition = Disposition {
            typ: DispositionType::Structured,
            name: part_name.to_string(),
            filename: None,
        };
        let header = PartHeader::new(
            disposition,
            STRUCTURED_CONTENT_TYPE,
            data.len() as u64,
            ContentHash::of(&data),
            BTreeMap::new(),
        );
        self.write_header(&header)?;
        self.write_slice(part_name, &data)?;
        self.record(header);
        Ok(())
    }

    /// Add a file-backed part. The file is hashed in a first pass, rewound,
    /// then streamed through the copy buffer.
    pub fn add_file(
        &mut self,
        part_name: &str,
        display_filename: &str,
        path: impl AsRef<Path>,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), WireError> {
        validate_metadata(part_name, &metadata)?;
        let path = path.as_ref();
        let path_label = path.display().to_string();

        let mut file = File::open(path).map_err(|e| WireError::io(&path_label, "open file", e))?;
        let stat_len = file
            .metadata()
            .map_err(|e| WireError::io(&path_label, "stat file", e))?
            .len();

        self.ensure_scratch();
        let (hash, size) = digest_through(&mut file, &mut self.scratch)
            .map_err(|e| WireError::io(&path_label, "hash file", e))?;
        if size != stat_len {
            warn!(part = part_name, stat_len, size, "file length changed while hashing");
        }
        file.seek(SeekFrom::Start(0))
            .map_err(|e| WireError::io(&path_label, "rewind file", e))?;

        let disposition = Disposition {
            typ: DispositionType::File,
            name: part_name.to_string(),
            filename: Some(display_filename.to_string()),
        };
        let header = PartHeader::new(disposition, content_type, size, hash, metadata);
        self.write_header(&header)?;

        let copied = self.copy_body(part_name, file.take(size))?;
        if copied != size {
            return Err(WireError::io(
                part_name,
                "write file part",
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("file shrank to {} of {} hashed bytes", copied, size),
                ),
            ));
        }
        self.record(header);
        Ok(())
    }

    /// Add an in-memory document part
    pub fn add_bytes(
        &mut self,
        part_name: &str,
        display_filename: &str,
        content_type: &str,
        data: &[u8],
        metadata: BTreeMap<String, String>,
    ) -> Result<(), WireError> {
        validate_metadata(part_name, &metadata)?;
        let disposition = Disposition {
            typ: DispositionType::File,
            name: part_name.to_string(),
            filename: Some(display_filename.to_string()),
        };
        let header = PartHeader::new(
            disposition,
            content_type,
            data.len() as u64,
            ContentHash::of(data),
            metadata,
        );
        self.write_header(&header)?;
        self.write_slice(part_name, data)?;
        self.record(header);
        Ok(())
    }

    /// Write the closing delimiter, flush, and hand back the sink
    pub fn finalize(mut self) -> Result<W, WireError> {
        let closing = if self.parts.is_empty() {
            format!("--{}--\r\n", self.boundary)
        } else {
            format!("\r\n--{}--\r\n", self.boundary)
        };
        self.writer
            .write_all(closing.as_bytes())
            .map_err(|e| WireError::io("<stream>", "write closing boundary", e))?;
        self.writer
            .flush()
            .map_err(|e| WireError::io("<stream>", "flush stream", e))?;
        debug!(boundary = %self.boundary, parts = self.parts.len(), "multipart stream finalized");
        Ok(self.writer)
    }

    fn ensure_scratch(&mut self) {
        if self.scratch.len() != self.buffer_size {
            self.scratch = vec![0u8; self.buffer_size];
        }
    }

    fn write_header(&mut self, header: &PartHeader) -> Result<(), WireError> {
        let mut block = Vec::with_capacity(256);
        if !self.parts.is_empty() {
            block.extend_from_slice(b"\r\n");
        }
        block.extend_from_slice(b"--");
        block.extend_from_slice(self.boundary.as_bytes());
        block.extend_from_slice(b"\r\n");
        header.encode(&mut block)?;
        self.writer
            .write_all(&block)
            .map_err(|e| WireError::io(header.name(), "write part header", e))
    }

    fn write_slice(&mut self, part_name: &str, data: &[u8]) -> Result<(), WireError> {
        for chunk in data.chunks(self.buffer_size) {
            self.writer
                .write_all(chunk)
                .map_err(|e| WireError::io(part_name, "write part body", e))?;
        }
        Ok(())
    }

    fn copy_body<R: Read>(&mut self, part_name: &str, mut source: R) -> Result<u64, WireError> {
        self.ensure_scratch();
        let mut copied = 0u64;
        loop {
            let n = match source.read(&mut self.scratch) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WireError::io(part_name, "read part source", e)),
            };
            self.writer
                .write_all(&self.scratch[..n])
                .map_err(|e| WireError::io(part_name, "write part body", e))?;
            copied += n as u64;
        }
        Ok(copied)
    }

    fn record(&mut self, header: PartHeader) {
        debug!(
            part = header.name(),
            kind = ?header.kind,
            size = header.size.unwrap_or_default(),
            "part written"
        );
        self.parts.push(header);
    }
}
