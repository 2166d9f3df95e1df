//! Receiving side of `StreamReport`: rebuild the spool from transport units.

use crate::error::TransportError;
use crate::proto::receptor_v1::ReportChunk;
use receptor_wire::{MultipartReader, StreamContentType};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Appends payload units to a fresh spool after checking the declaration
pub struct SpoolAssembler {
    content_type: Option<StreamContentType>,
    spool: NamedTempFile,
    chunks: u64,
    bytes: u64,
}

impl SpoolAssembler {
    /// Spool in the system temp directory
    pub fn new() -> Result<Self, TransportError> {
        Self::create(None)
    }

    /// Spool inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Result<Self, TransportError> {
        Self::create(Some(dir.as_ref()))
    }

    fn create(dir: Option<&Path>) -> Result<Self, TransportError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("multipart-received_").suffix(".tmp");
        let spool = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| TransportError::spool(dir.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir), "create", e))?;
        Ok(Self {
            content_type: None,
            spool,
            chunks: 0,
            bytes: 0,
        })
    }

    /// Accept the next unit in arrival order
    pub fn push(&mut self, unit: ReportChunk) -> Result<(), TransportError> {
        if unit.is_boundary {
            if self.content_type.is_some() {
                return Err(TransportError::Protocol("second boundary declaration".to_string()));
            }
            let declared = std::str::from_utf8(&unit.content)
                .map_err(|_| TransportError::Protocol("boundary declaration is not UTF-8".to_string()))?;
            let content_type = declared
                .parse::<StreamContentType>()
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
            debug!(boundary = %content_type.boundary, "Boundary declaration received");
            self.content_type = Some(content_type);
            return Ok(());
        }

        if self.content_type.is_none() {
            return Err(TransportError::Protocol(
                "payload unit received before the boundary declaration".to_string(),
            ));
        }
        let path = self.spool.path().to_path_buf();
        self.spool
            .write_all(&unit.content)
            .map_err(|e| TransportError::spool(path, "write", e))?;
        self.chunks += 1;
        self.bytes += unit.content.len() as u64;
        Ok(())
    }

    /// Payload bytes received so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Flush the spool and hand it over with the parsed content type
    pub fn finish(mut self) -> Result<AssembledSpool, TransportError> {
        let content_type = self
            .content_type
            .take()
            .ok_or_else(|| TransportError::Protocol("stream carried no boundary declaration".to_string()))?;
        let path = self.spool.path().to_path_buf();
        self.spool
            .flush()
            .map_err(|e| TransportError::spool(&path, "flush", e))?;
        debug!(chunks = self.chunks, bytes = self.bytes, "Spool reassembled");
        Ok(AssembledSpool {
            content_type,
            spool: self.spool,
            bytes: self.bytes,
        })
    }
}

/// A reassembled spool, removed when dropped
pub struct AssembledSpool {
    /// Declared stream content type
    pub content_type: StreamContentType,
    spool: NamedTempFile,
    bytes: u64,
}

impl AssembledSpool {
    /// Spool location
    pub fn path(&self) -> &Path {
        self.spool.path()
    }

    /// Spool length in bytes
    pub fn len(&self) -> u64 {
        self.bytes
    }

    /// Whether no payload bytes were received
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Open a multipart reader over the spool using the declared boundary
    pub fn reader(&self, buffer_size: usize) -> Result<MultipartReader<File>, TransportError> {
        let path: PathBuf = self.spool.path().to_path_buf();
        let mut file = self
            .spool
            .reopen()
            .map_err(|e| TransportError::spool(&path, "reopen", e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| TransportError::spool(&path, "rewind", e))?;
        MultipartReader::new(file, &self.content_type.boundary, buffer_size)
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ChunkedStreamAdapter;
    use crate::memory::MemoryOpener;
    use bytes::Bytes;
    use receptor_wire::MultipartBuilder;
    use std::collections::BTreeMap;

    fn unit(content: &[u8], is_boundary: bool) -> ReportChunk {
        ReportChunk {
            content: Bytes::copy_from_slice(content),
            is_boundary,
        }
    }

    #[test]
    fn test_payload_before_declaration_rejected() {
        let mut assembler = SpoolAssembler::new().unwrap();
        assert!(matches!(assembler.push(unit(b"x", false)), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_second_declaration_rejected() {
        let mut assembler = SpoolAssembler::new().unwrap();
        assembler.push(unit(b"multipart/tr-mixed; a/b; boundary=x", true)).unwrap();
        assert!(assembler.push(unit(b"multipart/tr-mixed; a/b; boundary=y", true)).is_err());
    }

    #[test]
    fn test_missing_declaration_on_finish() {
        let assembler = SpoolAssembler::new().unwrap();
        assert!(assembler.finish().is_err());
    }

    #[test]
    fn test_declaration_without_boundary_rejected() {
        let mut assembler = SpoolAssembler::new().unwrap();
        assert!(assembler.push(unit(b"multipart/tr-mixed; a/b", true)).is_err());
    }

    #[tokio::test]
    async fn test_transmit_and_reassemble() {
        let dir = tempfile::tempdir().unwrap();
        let spool_path = dir.path().join("out.tmp");
        let file = File::create(&spool_path).unwrap();
        let mut builder = MultipartBuilder::new(file, 0);
        builder
            .add_bytes("doc", "doc.txt", "text/plain", b"some document text", BTreeMap::new())
            .unwrap();
        let content_type = StreamContentType::new("text/plain", builder.boundary()).to_string();
        builder.finalize().unwrap();

        let opener = MemoryOpener::new();
        ChunkedStreamAdapter::new(&opener, 7)
            .transmit(&spool_path, &content_type)
            .await
            .unwrap();

        let mut assembler = SpoolAssembler::in_dir(dir.path()).unwrap();
        for recorded in opener.streams() {
            for u in recorded.units {
                assembler.push(u).unwrap();
            }
        }
        let assembled = assembler.finish().unwrap();
        assert_eq!(assembled.len(), std::fs::metadata(&spool_path).unwrap().len());
        assert_eq!(assembled.content_type.payload_media_type, "text/plain");

        let mut reader = assembled.reader(0).unwrap();
        let mut part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.name(), "doc");
        assert_eq!(part.read_to_vec().unwrap(), b"some document text");
    }
}
