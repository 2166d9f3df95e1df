//! Reporting many bundles with per-bundle failure isolation.

use crate::bundle::{send_bundle, EvidenceBundle, PackageOptions};
use crate::error::ReportError;
use futures::stream::{self, StreamExt};
use receptor_grpc::{MemoryOpener, SpoolAssembler, StreamOpener, TransmitSummary};
use tracing::{error, info};
use uuid::Uuid;

/// Settings for [`report_bundles`]
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Per-bundle packaging settings
    pub package: PackageOptions,
    /// Bundles in flight at once (at least one)
    pub max_concurrent_bundles: usize,
    /// Build and inspect bundles locally instead of sending them
    pub dry_run: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            package: PackageOptions::default(),
            max_concurrent_bundles: 1,
            dry_run: false,
        }
    }
}

/// What happened to one bundle
#[derive(Debug)]
pub struct BundleOutcome {
    /// Id attached to this bundle's log lines
    pub id: Uuid,
    /// Caption of the bundle's evidence
    pub caption: String,
    /// Transmission result
    pub result: Result<TransmitSummary, ReportError>,
    /// JSON metadata summary of the stream, in dry-run mode
    pub dry_run_summary: Option<String>,
}

impl BundleOutcome {
    /// Whether the bundle was delivered (or, in dry-run mode, built and inspected)
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Report every bundle, at most `max_concurrent_bundles` at a time.
///
/// Outcomes come back in input order. A failed bundle is logged with its
/// caption and never stops the others.
pub async fn report_bundles(
    bundles: Vec<EvidenceBundle>,
    opener: &dyn StreamOpener,
    options: &BatchOptions,
) -> Vec<BundleOutcome> {
    let concurrency = options.max_concurrent_bundles.max(1);
    let total = bundles.len();

    let outcomes: Vec<BundleOutcome> = stream::iter(bundles)
        .map(|bundle| async move {
            let id = Uuid::new_v4();
            let caption = bundle.caption().to_string();
            let (result, dry_run_summary) = if options.dry_run {
                match dry_run_bundle(&bundle, &options.package).await {
                    Ok((summary, text)) => (Ok(summary), Some(text)),
                    Err(e) => (Err(e), None),
                }
            } else {
                (send_bundle(&bundle, opener, &options.package).await, None)
            };

            if let Err(e) = &result {
                error!(bundle = %id, caption = %caption, error = %e, "Failed to report evidence bundle");
            }
            BundleOutcome {
                id,
                caption,
                result,
                dry_run_summary,
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    info!(total, failed, dry_run = options.dry_run, "Evidence batch finished");
    outcomes
}

/// Send the bundle to an in-memory loopback, reassemble it, and summarize
/// the parts the collector would see
async fn dry_run_bundle(
    bundle: &EvidenceBundle,
    package: &PackageOptions,
) -> Result<(TransmitSummary, String), ReportError> {
    let loopback = MemoryOpener::new();
    let options = PackageOptions {
        remove_source_files: false,
        ..package.clone()
    };
    let summary = send_bundle(bundle, &loopback, &options).await?;

    let mut assembler = match &options.spool_dir {
        Some(dir) => SpoolAssembler::in_dir(dir)?,
        None => SpoolAssembler::new()?,
    };
    for recorded in loopback.streams() {
        for unit in recorded.units {
            assembler.push(unit)?;
        }
    }
    let assembled = assembler.finish()?;
    let mut reader = assembled.reader(options.buffer_size)?;
    let mut out = Vec::new();
    reader.metadata_summary(&mut out)?;
    Ok((summary, String::from_utf8_lossy(&out).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{EvidenceDocument, FINDING_PART, SOURCES_PART};
    use receptor_grpc::{Evidence, FailureMode, Finding, TransportError};
    use receptor_wire::PartMetadata;

    fn bundle(caption: &str) -> EvidenceBundle {
        EvidenceBundle {
            finding: Finding {
                receptor_type: "trr-test".to_string(),
                service_provider_account: "acct".to_string(),
                evidences: vec![Evidence {
                    caption: caption.to_string(),
                    ..Evidence::default()
                }],
            },
            documents: vec![EvidenceDocument::from_bytes(
                format!("{}.txt", caption),
                "text/plain",
                caption.as_bytes().to_vec(),
            )],
            sources: vec![],
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_bundle() {
        let bundles: Vec<_> = (1..=5).map(|i| bundle(&format!("bundle-{}", i))).collect();
        let opener = MemoryOpener::with_failures([(1, FailureMode::Send(1))]);

        let outcomes = report_bundles(bundles, &opener, &BatchOptions::default()).await;

        assert_eq!(outcomes.len(), 5);
        assert_eq!(opener.opened(), 5);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.caption, format!("bundle-{}", i + 1));
            assert_eq!(outcome.is_success(), i != 1, "bundle {}", i + 1);
        }
        assert!(matches!(
            outcomes[1].result,
            Err(ReportError::Transport(TransportError::Send { chunk: 1, .. }))
        ));

        let streams = opener.streams();
        for (i, recorded) in streams.iter().enumerate() {
            assert_eq!(recorded.acknowledged, i != 1);
        }
    }

    #[tokio::test]
    async fn test_concurrent_batch_keeps_input_order() {
        let bundles: Vec<_> = (0..8).map(|i| bundle(&format!("b{}", i))).collect();
        let opener = MemoryOpener::new();
        let options = BatchOptions {
            max_concurrent_bundles: 3,
            ..BatchOptions::default()
        };
        let outcomes = report_bundles(bundles, &opener, &options).await;
        let captions: Vec<_> = outcomes.iter().map(|o| o.caption.as_str()).collect();
        assert_eq!(captions, vec!["b0", "b1", "b2", "b3", "b4", "b5", "b6", "b7"]);
        assert!(outcomes.iter().all(BundleOutcome::is_success));
        assert_eq!(opener.opened(), 8);
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing_and_summarizes() {
        let opener = MemoryOpener::new();
        let options = BatchOptions {
            dry_run: true,
            ..BatchOptions::default()
        };
        let outcomes = report_bundles(vec![bundle("dry")], &opener, &options).await;
        assert_eq!(opener.opened(), 0);

        let text = outcomes[0].dry_run_summary.as_deref().unwrap();
        let parts: Vec<PartMetadata> = serde_json::from_str(text).unwrap();
        let names: Vec<_> = parts.iter().map(|p| p.part_name.as_str()).collect();
        assert_eq!(names, vec![FINDING_PART, "dry.txt", SOURCES_PART]);
    }

    #[tokio::test]
    async fn test_empty_bundle_reported_as_failure() {
        let opener = MemoryOpener::new();
        let outcomes = report_bundles(vec![EvidenceBundle::default(), bundle("ok")], &opener, &BatchOptions::default()).await;
        assert!(matches!(outcomes[0].result, Err(ReportError::EmptyBundle)));
        assert!(outcomes[1].is_success());
    }
}
