//! Per-NZB triage
//!
//! [`analyze_nzb`] turns one NZB payload into a [`TriageDecision`]:
//!
//! 1. parse the XML and look for NZB-level anomalies (inconsistent RAR sets)
//! 2. pick archive candidates; with none, STAT a few segments and stop
//! 3. inspect candidates already staged in the archive directories
//! 4. fetch and decode the first segment of the best candidate and inspect it
//!    (7z archives additionally get their end header fetched)
//! 5. STAT extra segments of the primary archive and of other candidates,
//!    unless a blocker is already known
//!
//! Every check appends an [`ArchiveFinding`]. Blockers and warnings are
//! derived from the findings as they are recorded and never removed.

mod candidates;
mod footer;
mod local;
pub mod nzb;
mod sampling;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::config::TriageOptions;
use crate::error::{Error, Result};
use crate::inspect::{self, Inspection};
use crate::metrics::MetricsCollector;
use crate::nntp::NntpPool;
use crate::types::{
    labels, ArchiveFinding, ArchiveFormat, FindingDetails, FindingSource, FindingStatus,
    NzbFile, StatusKind, TriageDecision, Verdict,
};
use crate::yenc;

use candidates::{has_inconsistent_parts, select_candidates, Candidate};
use sampling::Probe;

pub use nzb::{parse_nzb, ParsedNzb};

/// How a batch reaches the NNTP server
#[derive(Clone, Debug)]
pub enum NntpAccess {
    /// No server configured
    Disabled,
    /// The pool could not be built; carries [`NntpError::kind`](crate::NntpError::kind)
    Failed {
        /// Short error code
        kind: String,
    },
    /// A working pool
    Ready(NntpPool),
}

/// Everything one NZB analysis borrows from its batch
pub struct TriageEnv<'a> {
    /// Run options
    pub options: &'a TriageOptions,
    /// NNTP access for this batch
    pub access: &'a NntpAccess,
    /// Counters of this run
    pub metrics: &'a MetricsCollector,
}

/// Analyze one NZB payload.
///
/// Fails only when the payload cannot be parsed or an inspection task dies;
/// the scheduler turns that into an `analysis-error` decision.
pub async fn analyze_nzb(nzb_index: usize, payload: &str, env: &TriageEnv<'_>) -> Result<TriageDecision> {
    let nzb = parse_nzb(payload)?;
    debug!(
        nzb_index,
        files = nzb.files.len(),
        title = nzb.title.as_deref().unwrap_or(""),
        "analyzing nzb"
    );

    let mut analysis = Analysis::new(env, nzb.password.clone());

    if let Some(set) = has_inconsistent_parts(&nzb.files) {
        analysis.record(ArchiveFinding {
            source: FindingSource::NzbMetadata,
            filename: Some(set),
            subject: String::new(),
            status: FindingStatus::Anomaly(labels::RAR_INCONSISTENT_PARTS),
            details: None,
        });
        analysis.blocker(labels::RAR_INCONSISTENT_PARTS);
    }

    let candidates = select_candidates(&nzb.files);
    if candidates.is_empty() {
        debug!(nzb_index, "no archive candidates, sampling segments");
        analysis.sample_without_candidates(&nzb.files).await;
    } else {
        let primary_done = analysis.inspect_local(&candidates).await?;
        if !primary_done {
            analysis.inspect_primary(&candidates[0]).await?;
        }
        analysis.sample_candidates(&candidates).await;
    }

    let decision = analysis.finish(nzb_index, nzb.title, nzb.files.len());
    debug!(
        nzb_index,
        decision = ?decision.decision,
        blockers = ?decision.blockers,
        warnings = ?decision.warnings,
        "nzb analyzed"
    );
    Ok(decision)
}

/// Findings and verdict state of one NZB
pub(crate) struct Analysis<'a> {
    env: &'a TriageEnv<'a>,
    password: Option<String>,
    /// Message-ids already sent STAT, with the answer
    stat_results: HashMap<String, Probe>,
    /// Message-ids already fetched with BODY
    fetched: HashSet<String>,
    findings: Vec<ArchiveFinding>,
    blockers: Vec<String>,
    warnings: Vec<String>,
    stored_confirmed: bool,
    unavailable_reported: bool,
}

impl<'a> Analysis<'a> {
    fn new(env: &'a TriageEnv<'a>, password: Option<String>) -> Self {
        Self {
            env,
            password,
            stat_results: HashMap::new(),
            fetched: HashSet::new(),
            findings: Vec::new(),
            blockers: Vec::new(),
            warnings: Vec::new(),
            stored_confirmed: false,
            unavailable_reported: false,
        }
    }

    fn blocker(&mut self, label: &str) {
        if !self.blockers.iter().any(|b| b == label) {
            self.blockers.push(label.to_string());
        }
    }

    fn warning(&mut self, label: &str) {
        if !self.warnings.iter().any(|w| w == label) {
            self.warnings.push(label.to_string());
        }
    }

    fn record(&mut self, finding: ArchiveFinding) {
        self.findings.push(finding);
    }

    fn has_blockers(&self) -> bool {
        !self.blockers.is_empty()
    }

    /// Record an inspector result and fold its verdict into the decision
    fn record_inspection(
        &mut self,
        source: FindingSource,
        file: &NzbFile,
        inspection: Inspection,
        mut details: FindingDetails,
    ) {
        let status = inspection.status;
        match inspection.verdict() {
            Verdict::Stored => self.stored_confirmed = true,
            Verdict::Blocker => self.blocker(&status.to_string()),
            Verdict::Warning => self.warning(&status.to_string()),
        }
        debug!(file = file.display_name(), %status, ?source, "archive inspected");
        details.archive = Some(inspection.details);
        self.record(ArchiveFinding {
            source,
            filename: file.filename.clone(),
            subject: file.subject.clone(),
            status: FindingStatus::Archive(status),
            details: Some(details),
        });
    }

    /// The pool of this batch, or a one-time warning explaining its absence
    fn pool(&mut self, file: &NzbFile) -> Option<NntpPool> {
        let (status, label) = match self.env.access {
            NntpAccess::Ready(pool) => return Some(pool.clone()),
            NntpAccess::Disabled => (FindingStatus::NntpDisabled, labels::NNTP_DISABLED.to_string()),
            NntpAccess::Failed { kind } => (
                FindingStatus::NntpError(kind.clone()),
                format!("{}{}", labels::NNTP_ERROR_PREFIX, kind),
            ),
        };
        if !self.unavailable_reported {
            self.unavailable_reported = true;
            self.record(ArchiveFinding {
                source: FindingSource::Nntp,
                filename: file.filename.clone(),
                subject: file.subject.clone(),
                status,
                details: None,
            });
            self.warning(&label);
        }
        None
    }

    /// Inspect candidates staged in the archive directories.
    ///
    /// Returns whether the primary candidate got a conclusive local verdict,
    /// which makes its network inspection redundant.
    async fn inspect_local(&mut self, candidates: &[Candidate<'_>]) -> Result<bool> {
        let options = self.env.options;
        if options.archive_dirs.is_empty() {
            return Ok(false);
        }
        let mut found_any = false;
        let mut primary_done = false;
        for (position, candidate) in candidates.iter().enumerate() {
            let file = candidate.first();
            let Some(path) = local::find_local(&options.archive_dirs, file.display_name()).await else {
                continue;
            };
            let buf = match local::read_prefix(&path, options.max_decoded_bytes).await {
                Ok(buf) => buf,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read staged archive");
                    continue;
                }
            };
            found_any = true;
            let inspection = inspect_blocking(buf, self.password.clone()).await?;
            if position == 0 && inspection.verdict() != Verdict::Warning {
                primary_done = true;
            }
            self.record_inspection(
                FindingSource::Local,
                file,
                inspection,
                FindingDetails {
                    path: Some(path),
                    ..Default::default()
                },
            );
        }
        if !found_any {
            let file = candidates[0].first();
            self.record(ArchiveFinding {
                source: FindingSource::Local,
                filename: file.filename.clone(),
                subject: file.subject.clone(),
                status: FindingStatus::ArchiveNotFound,
                details: None,
            });
            self.warning(labels::ARCHIVE_NOT_FOUND);
        }
        Ok(primary_done)
    }

    /// Fetch, decode and inspect the head of the best candidate
    async fn inspect_primary(&mut self, candidate: &Candidate<'_>) -> Result<()> {
        let file = candidate.first();
        let Some(segment) = file.segments.first() else {
            let inspection = Inspection::new(
                candidate.format,
                StatusKind::InsufficientData,
                Default::default(),
            );
            self.record_inspection(FindingSource::NzbMetadata, file, inspection, FindingDetails::default());
            return Ok(());
        };
        if self.pool(file).is_none() {
            return Ok(());
        }

        if candidate.format == ArchiveFormat::SevenZip {
            self.precheck_volumes(candidate).await;
            if self.has_blockers() {
                return Ok(());
            }
        }

        let Some(raw) = self.fetch_body(file, segment).await else {
            return Ok(());
        };
        let article = match yenc::decode_article(&raw, self.env.options.max_decoded_bytes) {
            Ok(article) => article,
            Err(e) => {
                self.record(ArchiveFinding {
                    source: FindingSource::Nntp,
                    filename: file.filename.clone(),
                    subject: file.subject.clone(),
                    status: FindingStatus::DecodeFailed,
                    details: Some(FindingDetails {
                        message_id: Some(segment.id.clone()),
                        segment_number: Some(segment.number),
                        error: Some(e.to_string()),
                        ..Default::default()
                    }),
                });
                self.warning(labels::YENC_DECODE_FAILED);
                return Ok(());
            }
        };
        self.env.metrics.record_decoded(article.data.len());

        let mut inspection = inspect_blocking(article.data.clone(), self.password.clone()).await?;
        if candidate.format == ArchiveFormat::SevenZip && inspection.status.kind == StatusKind::SignatureOk {
            // the end header may sit past the decode cap of the first segment
            let full = yenc::decode_article(&raw, usize::MAX).unwrap_or_else(|_| article.clone());
            if let Some(tail) = footer::inspect_footer(self, candidate, &full).await? {
                inspection = tail;
            }
        }
        self.record_inspection(
            FindingSource::Nntp,
            file,
            inspection,
            FindingDetails {
                message_id: Some(segment.id.clone()),
                segment_number: Some(segment.number),
                ..Default::default()
            },
        );
        Ok(())
    }

    fn finish(mut self, nzb_index: usize, title: Option<String>, file_count: usize) -> TriageDecision {
        if !self.stored_confirmed && self.blockers.is_empty() {
            self.warning(labels::RAR_M0_UNVERIFIED);
        }
        TriageDecision::new(
            nzb_index,
            title,
            file_count,
            self.blockers,
            self.warnings,
            self.findings,
        )
    }
}

/// Run an inspector off the async workers; KDFs and LZMA are CPU-bound
async fn inspect_blocking(buf: Vec<u8>, password: Option<String>) -> Result<Inspection> {
    tokio::task::spawn_blocking(move || inspect::inspect_buffer(&buf, password.as_deref()))
        .await
        .map_err(|e| Error::TaskFailed(format!("inspection task failed: {}", e)))
}
