//! Evidence bundles, their part lists, and the build-then-send pipeline.

use crate::error::ReportError;
use crate::spool::Spool;
use receptor_grpc::{
    CancelSignal, ChunkedStreamAdapter, Document, Finding, Source, Sources, StreamOpener, TransmitSummary,
    DEFAULT_CHUNK_SIZE,
};
use receptor_wire::{
    MultipartBuilder, StreamContentType, StructuredMessage, StructuredValue, ARCHIVE_MEDIA_TYPE,
    DEFAULT_BUFFER_SIZE,
};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Part name of the finding metadata part
pub const FINDING_PART: &str = "receptor_v1.Finding";

/// Part name of the sources part
pub const SOURCES_PART: &str = "receptor_v1.Sources";

/// Payload media type of a bundle without documents
pub const DEFAULT_PAYLOAD_MEDIA_TYPE: &str = "application/octet-stream";

/// One part of a bundle, in the form the builder accepts
pub enum BundlePart {
    /// One or more protobuf messages written back to back
    Structured {
        /// Part name
        name: String,
        /// Messages in order
        messages: Vec<Box<dyn StructuredMessage>>,
    },
    /// Document streamed from a local file
    File {
        /// Part name
        name: String,
        /// Filename shown to the collector
        display_filename: String,
        /// Source file
        path: PathBuf,
        /// Payload media type
        content_type: String,
        /// Extra headers
        metadata: BTreeMap<String, String>,
    },
    /// In-memory document
    Bytes {
        /// Part name
        name: String,
        /// Filename shown to the collector
        display_filename: String,
        /// Payload media type
        content_type: String,
        /// Document body
        data: Vec<u8>,
        /// Extra headers
        metadata: BTreeMap<String, String>,
    },
}

impl BundlePart {
    /// Structured part holding a single message
    pub fn structured<M: prost::Message + 'static>(name: impl Into<String>, message: M) -> Self {
        BundlePart::Structured {
            name: name.into(),
            messages: vec![Box::new(message) as Box<dyn StructuredMessage>],
        }
    }

    /// Structured part holding several messages of one type
    pub fn structured_list<M: prost::Message + 'static>(name: impl Into<String>, messages: Vec<M>) -> Self {
        BundlePart::Structured {
            name: name.into(),
            messages: messages
                .into_iter()
                .map(|m| Box::new(m) as Box<dyn StructuredMessage>)
                .collect(),
        }
    }

    /// Part name
    pub fn name(&self) -> &str {
        match self {
            BundlePart::Structured { name, .. } | BundlePart::File { name, .. } | BundlePart::Bytes { name, .. } => name,
        }
    }

    fn add_to<W: std::io::Write>(&self, builder: &mut MultipartBuilder<W>) -> Result<(), ReportError> {
        match self {
            BundlePart::Structured { name, messages } => {
                let value = StructuredValue::List(
                    messages
                        .iter()
                        .map(|m| StructuredValue::Message(m.as_ref()))
                        .collect(),
                );
                builder.add_structured(name, value)?;
            }
            BundlePart::File {
                name,
                display_filename,
                path,
                content_type,
                metadata,
            } => builder.add_file(name, display_filename, path, content_type, metadata.clone())?,
            BundlePart::Bytes {
                name,
                display_filename,
                content_type,
                data,
                metadata,
            } => builder.add_bytes(name, display_filename, content_type, data, metadata.clone())?,
        }
        Ok(())
    }
}

/// Packaging and transport settings for one bundle
#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// Multipart copy buffer; zero selects the default
    pub buffer_size: usize,
    /// Transport unit size; zero selects the default
    pub chunk_size: usize,
    /// Directory for spools, system temp directory when unset
    pub spool_dir: Option<PathBuf>,
    /// Delete file-backed documents once they have been packaged
    pub remove_source_files: bool,
    /// Aborts the transmission when fired
    pub cancel: CancelSignal,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            spool_dir: None,
            remove_source_files: false,
            cancel: CancelSignal::never(),
        }
    }
}

/// Build `parts` into a fresh spool and return it with the stream content type
pub fn build_spool(
    parts: &[BundlePart],
    payload_media_type: &str,
    options: &PackageOptions,
) -> Result<(Spool, StreamContentType), ReportError> {
    let mut spool = Spool::create(options.spool_dir.as_deref())?;
    let boundary = {
        let mut builder = MultipartBuilder::new(spool.writer(), options.buffer_size);
        for part in parts {
            if options.cancel.is_cancelled() {
                return Err(ReportError::Cancelled);
            }
            part.add_to(&mut builder)?;
        }
        let boundary = builder.boundary().to_string();
        builder.finalize()?;
        boundary
    };
    let content_type = StreamContentType::new(payload_media_type, boundary);
    debug!(
        spool = %spool.path().display(),
        parts = parts.len(),
        content_type = %content_type,
        "Bundle spool built"
    );
    Ok((spool, content_type))
}

/// Build `parts` into a spool, send it through `opener`, and remove the spool
/// whatever the outcome.
///
/// A transmission error wins over a failed spool deletion; after a successful
/// transmission the deletion error is returned.
pub async fn package_and_send(
    parts: &[BundlePart],
    payload_media_type: &str,
    opener: &dyn StreamOpener,
    options: &PackageOptions,
) -> Result<TransmitSummary, ReportError> {
    let (spool, content_type) = build_spool(parts, payload_media_type, options)?;
    if options.remove_source_files {
        remove_source_files(parts);
    }

    let result = ChunkedStreamAdapter::new(opener, options.chunk_size)
        .with_cancel(options.cancel.clone())
        .transmit(spool.path(), &content_type.to_string())
        .await;

    match (result, spool.close()) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(e), Ok(())) => Err(e.into()),
        (Err(e), Err(cleanup)) => {
            warn!(error = %cleanup, "Failed to remove spool");
            Err(e.into())
        }
    }
}

fn remove_source_files(parts: &[BundlePart]) {
    for part in parts {
        if let BundlePart::File { path, .. } = part {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed packaged source file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove packaged source file"),
            }
        }
    }
}

/// Where a document's body comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentBody {
    /// Held in memory
    Bytes(Vec<u8>),
    /// Streamed from a local file
    File(PathBuf),
    /// Read from a local file into memory when the bundle is packaged
    Inline(PathBuf),
}

/// A document attached to an evidence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceDocument {
    /// Filename shown to the collector
    pub file_name: String,
    /// Document media type
    pub mime: String,
    /// Extra part headers
    pub metadata: BTreeMap<String, String>,
    /// Body source
    pub body: DocumentBody,
}

impl EvidenceDocument {
    /// File-backed document; the media type defaults from the extension
    pub fn from_path(path: impl Into<PathBuf>, mime: Option<&str>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            mime: mime.map(str::to_string).unwrap_or_else(|| guess_mime(&path).to_string()),
            file_name,
            metadata: BTreeMap::new(),
            body: DocumentBody::File(path),
        }
    }

    /// Document loaded into memory from `path` at packaging time, so an
    /// unreadable file fails only its own bundle
    pub fn inline(path: impl Into<PathBuf>, mime: Option<&str>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            mime: mime.map(str::to_string).unwrap_or_else(|| guess_mime(&path).to_string()),
            file_name,
            metadata: BTreeMap::new(),
            body: DocumentBody::Inline(path),
        }
    }

    /// In-memory document
    pub fn from_bytes(file_name: impl Into<String>, mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            metadata: BTreeMap::new(),
            body: DocumentBody::Bytes(data),
        }
    }

    fn descriptor(&self) -> Document {
        Document {
            file_name: self.file_name.clone(),
            mime: self.mime.clone(),
            metadata: self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            body: Vec::new(),
        }
    }
}

/// Media type for common evidence file extensions
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "json" => "application/json",
        "csv" => "text/csv",
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "zip" => "application/zip",
        "xml" => "application/xml",
        _ => DEFAULT_PAYLOAD_MEDIA_TYPE,
    }
}

/// A finding with its documents and sources, reported as one stream
#[derive(Debug, Clone, Default)]
pub struct EvidenceBundle {
    /// Finding metadata; its first evidence describes the documents
    pub finding: Finding,
    /// Attached documents
    pub documents: Vec<EvidenceDocument>,
    /// Raw API exchanges behind the evidence
    pub sources: Vec<Source>,
}

impl EvidenceBundle {
    /// Caption used to identify the bundle in logs
    pub fn caption(&self) -> &str {
        self.finding
            .evidences
            .first()
            .map(|e| e.caption.as_str())
            .unwrap_or("<no evidence>")
    }

    /// Payload media type declared in the stream content type
    pub fn payload_media_type(&self) -> &str {
        match self.documents.as_slice() {
            [] => DEFAULT_PAYLOAD_MEDIA_TYPE,
            [single] => single.mime.as_str(),
            _ => ARCHIVE_MEDIA_TYPE,
        }
    }

    /// Parts in conventional order: finding, in-memory documents, file
    /// documents, sources. Inline documents are read here.
    pub fn to_parts(&self) -> Result<Vec<BundlePart>, ReportError> {
        let caption = self.caption().to_string();
        let mut finding = self.finding.clone();
        let evidence = finding.evidences.first_mut().ok_or(ReportError::EmptyBundle)?;
        evidence.documents = self.documents.iter().map(EvidenceDocument::descriptor).collect();
        finding.evidences.truncate(1);

        let mut parts = vec![BundlePart::structured(FINDING_PART, finding)];

        for doc in &self.documents {
            let data = match &doc.body {
                DocumentBody::Bytes(data) => data.clone(),
                DocumentBody::Inline(path) => {
                    std::fs::read(path).map_err(|e| ReportError::io(path, "read document", e))?
                }
                DocumentBody::File(_) => continue,
            };
            let name = part_name(doc, &caption)?;
            parts.push(BundlePart::Bytes {
                display_filename: name.clone(),
                name,
                content_type: doc.mime.clone(),
                data,
                metadata: doc.metadata.clone(),
            });
        }
        for doc in &self.documents {
            if let DocumentBody::File(path) = &doc.body {
                let name = part_name(doc, &caption)?;
                parts.push(BundlePart::File {
                    display_filename: name.clone(),
                    name,
                    path: path.clone(),
                    content_type: doc.mime.clone(),
                    metadata: doc.metadata.clone(),
                });
            }
        }

        parts.push(BundlePart::structured(
            SOURCES_PART,
            Sources {
                sources: self.sources.clone(),
            },
        ));
        Ok(parts)
    }
}

fn part_name(doc: &EvidenceDocument, caption: &str) -> Result<String, ReportError> {
    if !doc.file_name.is_empty() {
        Ok(doc.file_name.clone())
    } else if !caption.is_empty() {
        Ok(caption.to_string())
    } else {
        Err(ReportError::Encoding("document has neither a file name nor a caption".to_string()))
    }
}

/// Package `bundle` and send it through `opener`
pub async fn send_bundle(
    bundle: &EvidenceBundle,
    opener: &dyn StreamOpener,
    options: &PackageOptions,
) -> Result<TransmitSummary, ReportError> {
    let parts = bundle.to_parts()?;
    let summary = package_and_send(&parts, bundle.payload_media_type(), opener, options).await?;
    info!(
        bundle = bundle.caption(),
        parts = parts.len(),
        bytes = summary.bytes,
        "Evidence bundle reported"
    );
    Ok(summary)
}
