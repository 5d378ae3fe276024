//! Archive header inspectors
//!
//! Pure functions mapping a decoded buffer (plus an optional password) to an
//! [`ArchiveStatus`] and an [`ArchiveDetails`] record. Nothing here touches the
//! network; the orchestrator feeds in whatever prefix of the archive it managed
//! to fetch and decode, so every inspector must cope with truncated input.
//!
//! Each format module walks its headers into a list of [`Entry`] values and a
//! format-level [`Walk`] outcome; [`classify`] turns that into a status the same
//! way for every format. The filename scan in [`heuristics`] runs afterwards as
//! a separate pass when the structured result is inconclusive.

pub(crate) mod crypto;
pub mod heuristics;
pub(crate) mod lzma;
pub(crate) mod names;
pub(crate) mod rar4;
pub(crate) mod rar5;
pub(crate) mod reader;
pub mod sevenzip;
pub(crate) mod zip;

#[cfg(test)]
mod tests;

use serde::Serialize;

use crate::error::InspectError;
use crate::types::{ArchiveFormat, ArchiveStatus, StatusKind, Verdict};

/// Maximum number of entry names kept in [`ArchiveDetails::sample_entries`]
pub const ARCHIVE_SAMPLE_ENTRY_LIMIT: usize = 5;

pub(crate) const RAR4_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x00";
pub(crate) const RAR5_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x01\x00";
pub(crate) const SEVENZIP_SIGNATURE: &[u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
pub(crate) const ZIP_LOCAL_SIGNATURE: &[u8] = b"PK\x03\x04";

/// Diagnostics recorded by an inspector
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveDetails {
    /// First entry names seen, at most [`ARCHIVE_SAMPLE_ENTRY_LIMIT`]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample_entries: Vec<String>,
    /// Number of entries parsed
    pub entry_count: usize,
    /// The stored video entry that proved the archive playable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playable_entry: Option<String>,
    /// Compression method that caused a `compressed` verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Headers were encrypted (and, for non-blocker statuses, decrypted)
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub encrypted_headers: bool,
    /// Names recovered by the buffer scan
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub heuristic_names: Vec<String>,
    /// Why parsing stopped early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ArchiveDetails {
    pub(crate) fn record_entry(&mut self, name: &str) {
        self.entry_count += 1;
        if self.sample_entries.len() < ARCHIVE_SAMPLE_ENTRY_LIMIT {
            self.sample_entries.push(name.to_string());
        }
    }
}

/// Status plus diagnostics for one buffer
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Inspection {
    /// Classified status
    pub status: ArchiveStatus,
    /// Diagnostics
    pub details: ArchiveDetails,
}

impl Inspection {
    pub(crate) fn new(format: ArchiveFormat, kind: StatusKind, details: ArchiveDetails) -> Self {
        Self {
            status: ArchiveStatus::new(format, kind),
            details,
        }
    }

    /// Weight of the status in the decision
    pub fn verdict(&self) -> Verdict {
        self.status.kind.verdict()
    }

    /// Whether the status is inconclusive enough to warrant the buffer scan
    pub(crate) fn is_inconclusive(&self) -> bool {
        matches!(
            self.status.kind,
            StatusKind::SignatureOk
                | StatusKind::Untested
                | StatusKind::InsufficientData
                | StatusKind::CorruptHeader
        )
    }
}

/// Container format identified from the leading magic bytes
pub fn sniff(buf: &[u8]) -> Option<ArchiveFormat> {
    if buf.starts_with(RAR5_SIGNATURE) || buf.starts_with(RAR4_SIGNATURE) {
        Some(ArchiveFormat::Rar)
    } else if buf.starts_with(SEVENZIP_SIGNATURE) {
        Some(ArchiveFormat::SevenZip)
    } else if buf.starts_with(ZIP_LOCAL_SIGNATURE) {
        Some(ArchiveFormat::Zip)
    } else {
        None
    }
}

/// Inspect a decoded buffer that starts at offset 0 of an archive.
///
/// `password` comes from the NZB metadata; it is only used for encrypted
/// headers and to look through encrypted file data.
pub fn inspect_buffer(buf: &[u8], password: Option<&str>) -> Inspection {
    let inspection = if buf.starts_with(RAR5_SIGNATURE) {
        rar5::inspect(buf, password)
    } else if buf.starts_with(RAR4_SIGNATURE) {
        rar4::inspect(buf, password)
    } else if buf.starts_with(SEVENZIP_SIGNATURE) {
        sevenzip::inspect(buf, password)
    } else if buf.starts_with(ZIP_LOCAL_SIGNATURE) {
        zip::inspect(buf, password)
    } else {
        return Inspection {
            status: ArchiveStatus::header_not_found(),
            details: ArchiveDetails::default(),
        };
    };
    heuristics::refine(inspection, buf)
}

/// One archive member as seen in its header
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Entry {
    pub name: String,
    /// Copy-only (RAR method 0x30, ZIP method 0, 7z Copy coder)
    pub stored: bool,
    /// Method label when not stored
    pub method: Option<String>,
    /// File data is encrypted
    pub encrypted: bool,
    pub is_dir: bool,
}

impl Entry {
    pub(crate) fn file(name: impl Into<String>, stored: bool) -> Self {
        Self {
            name: name.into(),
            stored,
            method: None,
            encrypted: false,
            is_dir: false,
        }
    }
}

/// Result of walking a format's headers
#[derive(Debug, Default)]
pub(crate) struct Walk {
    pub entries: Vec<Entry>,
    /// Walk stopped at a read error after the signature
    pub stopped: Option<InspectError>,
    /// Headers were encrypted and decrypted successfully
    pub encrypted_headers: bool,
}

impl Walk {
    pub(crate) fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }
}

/// Shared entry classification.
///
/// Priority: undecryptable data, then compression, then disc layouts, then a
/// stored playable video, then disc images and nested archives. Entries that
/// are neither video nor blocker-worthy leave the archive untested.
pub(crate) fn classify(format: ArchiveFormat, walk: Walk, password: Option<&str>) -> Inspection {
    let mut details = ArchiveDetails {
        encrypted_headers: walk.encrypted_headers,
        ..Default::default()
    };
    for entry in &walk.entries {
        details.record_entry(&entry.name);
    }
    if let Some(err) = &walk.stopped {
        details.note = Some(err.to_string());
    }

    let files: Vec<&Entry> = walk.entries.iter().filter(|e| !e.is_dir).collect();
    if files.is_empty() {
        let kind = match &walk.stopped {
            Some(InspectError::Corrupt(_)) | Some(InspectError::Unsupported(_)) => {
                StatusKind::CorruptHeader
            }
            Some(InspectError::Decrypt(_)) => StatusKind::EncryptedHeadersDecryptFail,
            Some(InspectError::Truncated { .. }) => StatusKind::InsufficientData,
            None if walk.entries.is_empty() => StatusKind::InsufficientData,
            None => StatusKind::Untested,
        };
        return Inspection::new(format, kind, details);
    }

    if password.is_none() && files.iter().any(|e| e.encrypted) {
        return Inspection::new(format, StatusKind::Encrypted, details);
    }

    if let Some(compressed) = files.iter().find(|e| !e.stored) {
        details.method = compressed.method.clone();
        return Inspection::new(format, StatusKind::Compressed, details);
    }

    if walk.entries.iter().any(|e| names::is_disc_structure(&e.name)) {
        return Inspection::new(format, StatusKind::DiscStructure, details);
    }

    if let Some(video) = files.iter().find(|e| names::is_video(&e.name)) {
        details.playable_entry = Some(video.name.clone());
        return Inspection::new(format, StatusKind::Stored, details);
    }

    if files.iter().any(|e| names::is_disc_image(&e.name)) {
        return Inspection::new(format, StatusKind::IsoImage, details);
    }

    if files.iter().any(|e| names::is_archive(&e.name)) {
        return Inspection::new(format, StatusKind::NestedArchive, details);
    }

    Inspection::new(format, StatusKind::Untested, details)
}
