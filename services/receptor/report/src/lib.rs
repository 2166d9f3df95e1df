//! Evidence bundle packaging, scoped spools, and batch reporting for receptor.
//!
//! A bundle is built into a temporary spool, streamed to the collector, and
//! the spool is removed on every exit path. Batches report each bundle
//! independently so one failure never hides the others.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod bundle;
pub mod error;
pub mod spool;

pub use batch::{report_bundles, BatchOptions, BundleOutcome};
pub use bundle::{
    build_spool, guess_mime, package_and_send, send_bundle, BundlePart, DocumentBody, EvidenceBundle,
    EvidenceDocument, PackageOptions, DEFAULT_PAYLOAD_MEDIA_TYPE, FINDING_PART, SOURCES_PART,
};
pub use error::ReportError;
pub use spool::Spool;
