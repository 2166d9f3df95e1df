//! Evidence bundles described on the command line or in a YAML manifest.

use anyhow::{Context, Result};
use receptor_grpc::{Evidence, Finding, Source};
use receptor_report::{EvidenceBundle, EvidenceDocument};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Receptor type used when neither the manifest nor the flags name one
pub const DEFAULT_RECEPTOR_TYPE: &str = "trr-custom";

/// A list of bundles sharing one receptor identity
///
/// ```yaml
/// receptor_type: trr-custom
/// account: "123456789012"
/// bundles:
///   - caption: Users
///     documents:
///       - path: users.csv
///         mime: text/csv
///     sources:
///       - raw_api_request: GET /users
///         raw_api_response: "[...]"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub receptor_type: Option<String>,
    pub account: String,
    pub bundles: Vec<BundleEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleEntry {
    pub caption: String,
    pub description: String,
    pub service_name: String,
    pub entity_type: String,
    pub documents: Vec<DocumentEntry>,
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentEntry {
    pub path: PathBuf,
    /// Guessed from the extension when absent
    pub mime: Option<String>,
    /// Defaults to the path's file name
    pub file_name: Option<String>,
    /// Read into memory instead of streamed from disk
    pub inline: bool,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceEntry {
    pub raw_api_request: String,
    pub raw_api_response: String,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest: Manifest = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;
        // Relative document paths resolve against the manifest's directory
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(manifest.rebased(base))
    }

    fn rebased(mut self, base: &Path) -> Self {
        for bundle in &mut self.bundles {
            for doc in &mut bundle.documents {
                if doc.path.is_relative() {
                    doc.path = base.join(&doc.path);
                }
            }
        }
        self
    }

    /// Documents are not opened here; an unreadable one fails its own bundle
    /// when the batch packages it
    pub fn into_bundles(self) -> Vec<EvidenceBundle> {
        let receptor_type = self
            .receptor_type
            .unwrap_or_else(|| DEFAULT_RECEPTOR_TYPE.to_string());
        self.bundles
            .into_iter()
            .map(|entry| entry.into_bundle(&receptor_type, &self.account))
            .collect()
    }
}

impl BundleEntry {
    pub fn into_bundle(self, receptor_type: &str, account: &str) -> EvidenceBundle {
        let documents = self
            .documents
            .into_iter()
            .map(DocumentEntry::into_document)
            .collect();

        EvidenceBundle {
            finding: Finding {
                receptor_type: receptor_type.to_string(),
                service_provider_account: account.to_string(),
                evidences: vec![Evidence {
                    caption: self.caption,
                    description: self.description,
                    service_name: self.service_name,
                    entity_type: self.entity_type,
                    documents: Vec::new(),
                }],
            },
            documents,
            sources: self
                .sources
                .into_iter()
                .map(|s| Source {
                    raw_api_request: s.raw_api_request,
                    raw_api_response: s.raw_api_response,
                })
                .collect(),
        }
    }
}

impl DocumentEntry {
    /// Parse `PATH[:MIME]`; the suffix counts as a MIME type only when it contains `/`
    pub fn parse_flag(raw: &str, inline: bool) -> Self {
        let (path, mime) = match raw.rsplit_once(':') {
            Some((path, mime)) if mime.contains('/') && !path.is_empty() => (path, Some(mime.to_string())),
            _ => (raw, None),
        };
        Self {
            path: PathBuf::from(path),
            mime,
            inline,
            ..Self::default()
        }
    }

    fn into_document(self) -> EvidenceDocument {
        let mut doc = if self.inline {
            EvidenceDocument::inline(self.path, self.mime.as_deref())
        } else {
            EvidenceDocument::from_path(self.path, self.mime.as_deref())
        };
        if let Some(name) = self.file_name {
            doc.file_name = name;
        }
        doc.metadata = self.metadata;
        doc
    }
}
