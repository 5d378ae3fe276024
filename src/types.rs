//! Core types for nzb-triage

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::inspect::ArchiveDetails;
use crate::metrics::RunMetrics;

/// Blocker and warning labels that are not archive statuses
pub mod labels {
    /// One or more sampled articles answered 430
    pub const MISSING_ARTICLES: &str = "missing-articles";
    /// Multi-part RAR set whose non-final parts disagree on segment count
    pub const RAR_INCONSISTENT_PARTS: &str = "rar-inconsistent-parts";
    /// Archive present but never confirmed stored
    pub const RAR_M0_UNVERIFIED: &str = "rar-m0-unverified";
    /// No NNTP configuration was given
    pub const NNTP_DISABLED: &str = "nntp-disabled";
    /// Prefix for NNTP failures that are not missing articles
    pub const NNTP_ERROR_PREFIX: &str = "nntp-error:";
    /// Archive directories were configured but held no candidate
    pub const ARCHIVE_NOT_FOUND: &str = "archive-not-found";
    /// A fetched article carried no yEnc payload
    pub const YENC_DECODE_FAILED: &str = "yenc-decode-failed";
    /// The NZB could not be analyzed at all
    pub const ANALYSIS_ERROR: &str = "analysis-error";
}

/// One Usenet article of an NZB file
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// 1-based segment number
    pub number: u32,
    /// Encoded article size as announced by the NZB
    pub bytes: u64,
    /// Message-id without angle brackets
    pub id: String,
}

/// One `<file>` entry of an NZB
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NzbFile {
    /// Raw subject line
    pub subject: String,
    /// Filename parsed from the subject, if any
    pub filename: Option<String>,
    /// Lower-cased extension without the dot
    pub extension: Option<String>,
    /// Segments ordered by number
    pub segments: Vec<Segment>,
}

impl NzbFile {
    /// Filename when known, subject otherwise
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or(&self.subject)
    }
}

/// Archive container formats recognized by the inspectors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// RAR 1.5-4.x and RAR 5
    Rar,
    /// PKZIP
    Zip,
    /// 7-Zip
    SevenZip,
}

impl ArchiveFormat {
    /// Status prefix used in the status vocabulary
    pub fn prefix(self) -> &'static str {
        match self {
            ArchiveFormat::Rar => "rar",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::SevenZip => "sevenzip",
        }
    }
}

/// Outcome class of an archive inspection, independent of the format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Copy-only payload with a playable entry
    Stored,
    /// Format confirmed, content not reached
    SignatureOk,
    /// Format confirmed, content could not be tested
    Untested,
    /// Non-copy codec
    Compressed,
    /// Encrypted with no usable password
    Encrypted,
    /// Encrypted headers that the available password does not open
    EncryptedHeadersDecryptFail,
    /// Entries are archives themselves
    NestedArchive,
    /// Entry is an optical disc image
    IsoImage,
    /// DVD/Blu-ray folder layout
    DiscStructure,
    /// Buffer ended before a verdict
    InsufficientData,
    /// Header present but malformed
    CorruptHeader,
    /// No recognizable header
    HeaderNotFound,
}

/// How a status weighs on the decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Confirms a playable stored payload
    Stored,
    /// Forces rejection
    Blocker,
    /// Inconclusive
    Warning,
}

impl StatusKind {
    fn suffix(self, format: ArchiveFormat) -> &'static str {
        match self {
            StatusKind::Stored => "stored",
            StatusKind::SignatureOk => "signature-ok",
            StatusKind::Untested => "untested",
            StatusKind::Compressed if format == ArchiveFormat::SevenZip => "unsupported",
            StatusKind::Compressed => "compressed",
            StatusKind::Encrypted => "encrypted",
            StatusKind::EncryptedHeadersDecryptFail => "encrypted-headers-decrypt-fail",
            StatusKind::NestedArchive => "nested-archive",
            StatusKind::IsoImage => "iso-image",
            StatusKind::DiscStructure => "disc-structure",
            StatusKind::InsufficientData => "insufficient-data",
            StatusKind::CorruptHeader => "corrupt-header",
            StatusKind::HeaderNotFound => "header-not-found",
        }
    }

    /// Weight of this status in the decision
    pub fn verdict(self) -> Verdict {
        match self {
            StatusKind::Stored => Verdict::Stored,
            StatusKind::Compressed
            | StatusKind::Encrypted
            | StatusKind::EncryptedHeadersDecryptFail
            | StatusKind::NestedArchive
            | StatusKind::IsoImage
            | StatusKind::DiscStructure => Verdict::Blocker,
            StatusKind::SignatureOk
            | StatusKind::Untested
            | StatusKind::InsufficientData
            | StatusKind::CorruptHeader
            | StatusKind::HeaderNotFound => Verdict::Warning,
        }
    }
}

/// A status from the closed archive vocabulary, e.g. `rar-stored`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArchiveStatus {
    /// Container format
    pub format: ArchiveFormat,
    /// Outcome class
    pub kind: StatusKind,
}

impl ArchiveStatus {
    /// Build a status
    pub const fn new(format: ArchiveFormat, kind: StatusKind) -> Self {
        Self { format, kind }
    }

    /// Status used when no known signature was sniffed
    pub const fn header_not_found() -> Self {
        Self::new(ArchiveFormat::Rar, StatusKind::HeaderNotFound)
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.format.prefix(),
            self.kind.suffix(self.format)
        )
    }
}

impl Serialize for ArchiveStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where a finding came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingSource {
    /// A file in one of the configured archive directories
    Local,
    /// A BODY fetch
    Nntp,
    /// A STAT probe
    NntpStat,
    /// The NZB itself (file list, metadata)
    NzbMetadata,
}

/// Status of one finding
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FindingStatus {
    /// Archive inspection result
    Archive(ArchiveStatus),
    /// STAT answered 223
    SegmentPresent,
    /// STAT or BODY answered 430
    SegmentMissing,
    /// NNTP failure other than a missing article, with [`NntpError::kind`](crate::NntpError::kind)
    NntpError(String),
    /// No NNTP configuration or no pool
    NntpDisabled,
    /// Not present in any archive directory
    ArchiveNotFound,
    /// Article had no yEnc payload
    DecodeFailed,
    /// NZB-level anomaly, e.g. inconsistent RAR parts
    Anomaly(&'static str),
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingStatus::Archive(status) => status.fmt(f),
            FindingStatus::SegmentPresent => f.write_str("segment-ok"),
            FindingStatus::SegmentMissing => f.write_str(labels::MISSING_ARTICLES),
            FindingStatus::NntpError(kind) => {
                write!(f, "{}{}", labels::NNTP_ERROR_PREFIX, kind)
            }
            FindingStatus::NntpDisabled => f.write_str(labels::NNTP_DISABLED),
            FindingStatus::ArchiveNotFound => f.write_str(labels::ARCHIVE_NOT_FOUND),
            FindingStatus::DecodeFailed => f.write_str(labels::YENC_DECODE_FAILED),
            FindingStatus::Anomaly(label) => f.write_str(label),
        }
    }
}

impl Serialize for FindingStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Extra context attached to a finding
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FindingDetails {
    /// Message-id that was probed or fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Segment number of that message-id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_number: Option<u32>,
    /// Local file that was inspected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Error text for failed checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Inspector output
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveDetails>,
}

/// One piece of evidence gathered while analyzing an NZB
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArchiveFinding {
    /// Origin of the evidence
    pub source: FindingSource,
    /// Filename of the NZB file concerned
    pub filename: Option<String>,
    /// Subject of the NZB file concerned
    pub subject: String,
    /// Outcome
    pub status: FindingStatus,
    /// Optional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<FindingDetails>,
}

/// Final verdict for one NZB
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// No blockers
    Accept,
    /// At least one blocker
    Reject,
}

/// Per-NZB result
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TriageDecision {
    /// Accept iff `blockers` is empty
    pub decision: Decision,
    /// Labels proving the release unusable
    pub blockers: Vec<String>,
    /// Inconclusive evidence
    pub warnings: Vec<String>,
    /// Number of `<file>` entries
    pub file_count: usize,
    /// `<meta type="title">`, if present
    pub nzb_title: Option<String>,
    /// Position of the NZB in the input batch
    pub nzb_index: usize,
    /// Evidence in the order it was gathered
    pub archive_findings: Vec<ArchiveFinding>,
}

impl TriageDecision {
    /// Build a decision; the verdict follows from `blockers` alone.
    pub fn new(
        nzb_index: usize,
        nzb_title: Option<String>,
        file_count: usize,
        blockers: Vec<String>,
        warnings: Vec<String>,
        archive_findings: Vec<ArchiveFinding>,
    ) -> Self {
        let decision = if blockers.is_empty() {
            Decision::Accept
        } else {
            Decision::Reject
        };
        Self {
            decision,
            blockers,
            warnings,
            file_count,
            nzb_title,
            nzb_index,
            archive_findings,
        }
    }

    /// Synthetic rejection for an NZB whose analysis failed outright
    pub fn analysis_error(nzb_index: usize, error: &str) -> Self {
        let finding = ArchiveFinding {
            source: FindingSource::NzbMetadata,
            filename: None,
            subject: String::new(),
            status: FindingStatus::Anomaly(labels::ANALYSIS_ERROR),
            details: Some(FindingDetails {
                error: Some(error.to_string()),
                ..Default::default()
            }),
        };
        Self::new(
            nzb_index,
            None,
            0,
            vec![labels::ANALYSIS_ERROR.to_string()],
            Vec::new(),
            vec![finding],
        )
    }

    /// Whether the NZB was accepted
    pub fn is_accepted(&self) -> bool {
        self.decision == Decision::Accept
    }
}

/// Result of one [`triage`](crate::TriageEngine::triage) call
#[derive(Clone, Debug, Serialize)]
pub struct Summary {
    /// One decision per input payload, `decisions[i].nzb_index == i`
    pub decisions: Vec<TriageDecision>,
    /// Accepted count
    pub accepted: usize,
    /// Rejected count
    pub rejected: usize,
    /// Wall-clock duration of the call
    pub elapsed_ms: u64,
    /// Occurrences of each blocker across decisions
    pub blocker_counts: BTreeMap<String, usize>,
    /// Occurrences of each warning across decisions
    pub warning_counts: BTreeMap<String, usize>,
    /// NNTP and pool counters
    pub metrics: RunMetrics,
}

impl Summary {
    /// Aggregate ordered decisions into a summary
    pub fn from_decisions(
        decisions: Vec<TriageDecision>,
        elapsed_ms: u64,
        metrics: RunMetrics,
    ) -> Self {
        let mut blocker_counts = BTreeMap::new();
        let mut warning_counts = BTreeMap::new();
        let mut accepted = 0;
        for decision in &decisions {
            if decision.is_accepted() {
                accepted += 1;
            }
            for blocker in &decision.blockers {
                *blocker_counts.entry(blocker.clone()).or_insert(0) += 1;
            }
            for warning in &decision.warnings {
                *warning_counts.entry(warning.clone()).or_insert(0) += 1;
            }
        }
        let rejected = decisions.len() - accepted;
        Self {
            decisions,
            accepted,
            rejected,
            elapsed_ms,
            blocker_counts,
            warning_counts,
            metrics,
        }
    }
}
