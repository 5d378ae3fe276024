//! Filename scan over raw buffers
//!
//! A second opinion for inspections that stopped short: the decoded prefix of
//! an archive often still contains entry names (in headers the walker could not
//! reach or decrypt) even when no structure could be parsed. The scan looks for
//! filename-shaped ASCII runs in the raw bytes and in UTF-16LE runs (7z names,
//! RAR unicode names) narrowed down to ASCII.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::bytes::{Regex, RegexBuilder};
use tracing::{debug, warn};

use super::names;
use super::{Inspection, ARCHIVE_SAMPLE_ENTRY_LIMIT};
use crate::types::StatusKind;

const FILENAME_PATTERN: &str = r"(?i-u)[a-z0-9][a-z0-9 ._\-()\[\]+&',!/\\]{0,160}\.(?:mkv|mp4|m4v|avi|mov|wmv|ts|m2ts|mts|mpg|mpeg|webm|flv|vob|rar|r[0-9]{2}|zip|7z(?:\.[0-9]{3})?|iso|img|nrg|mdf|ifo|bup|bdmv|mpls|clpi)\b";

fn filename_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            RegexBuilder::new(FILENAME_PATTERN)
                .size_limit(1024 * 1024)
                .build()
                .map_err(|e| warn!(error = %e, "filename pattern failed to compile"))
                .ok()
        })
        .as_ref()
}

/// Filenames recovered from a buffer and what they look like
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferNames {
    /// Distinct names in order of first appearance, at most
    /// [`ARCHIVE_SAMPLE_ENTRY_LIMIT`]
    pub names: Vec<String>,
    /// A video file name was seen
    pub has_video: bool,
    /// An archive or archive volume name was seen
    pub has_archive: bool,
    /// A disc image name was seen
    pub has_iso: bool,
    /// A DVD/Blu-ray layout name was seen
    pub has_disc: bool,
}

impl BufferNames {
    fn add(&mut self, name: &str, seen: &mut HashSet<String>) {
        let lower = name.to_lowercase();
        if !seen.insert(lower) {
            return;
        }
        // disc layouts win over the extension checks (VTS_01_1.VOB is a video
        // extension but only meaningful inside VIDEO_TS)
        if names::is_disc_structure(name) {
            self.has_disc = true;
        } else if names::is_video(name) {
            self.has_video = true;
        } else if names::is_disc_image(name) {
            self.has_iso = true;
        } else if names::is_archive(name) {
            self.has_archive = true;
        }
        if self.names.len() < ARCHIVE_SAMPLE_ENTRY_LIMIT {
            self.names.push(name.to_string());
        }
    }

    /// Nothing was found
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Scan `buf` for filename-shaped substrings
pub fn analyze_buffer_filenames(buf: &[u8]) -> BufferNames {
    let mut found = BufferNames::default();
    let Some(pattern) = filename_regex() else {
        return found;
    };
    let mut seen = HashSet::new();
    for m in pattern.find_iter(buf) {
        found.add(String::from_utf8_lossy(m.as_bytes()).trim(), &mut seen);
    }
    for run in utf16_runs(buf) {
        for m in pattern.find_iter(&run) {
            found.add(String::from_utf8_lossy(m.as_bytes()).trim(), &mut seen);
        }
    }
    found
}

/// Printable ASCII stored as UTF-16LE, at both byte alignments
fn utf16_runs(buf: &[u8]) -> Vec<Vec<u8>> {
    const MIN_RUN: usize = 5;
    let mut runs = Vec::new();
    for start in 0..2.min(buf.len()) {
        let mut current = Vec::new();
        for pair in buf[start..].chunks_exact(2) {
            if pair[1] == 0 && (pair[0].is_ascii_graphic() || pair[0] == b' ') {
                current.push(pair[0]);
            } else if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
    }
    runs.retain(|run| run.len() >= MIN_RUN);
    runs
}

/// Upgrade an inconclusive inspection from the names left in `buf`.
///
/// Disc layouts, disc images and nested archives become blockers. Video names
/// are only recorded: a name alone never proves the payload is stored.
pub(crate) fn refine(mut inspection: Inspection, buf: &[u8]) -> Inspection {
    if !inspection.is_inconclusive() {
        return inspection;
    }
    let found = analyze_buffer_filenames(buf);
    if found.is_empty() {
        return inspection;
    }
    let upgrade = if found.has_disc {
        Some(StatusKind::DiscStructure)
    } else if found.has_video {
        None
    } else if found.has_iso {
        Some(StatusKind::IsoImage)
    } else if found.has_archive {
        Some(StatusKind::NestedArchive)
    } else {
        None
    };
    if let Some(kind) = upgrade {
        debug!(
            from = %inspection.status,
            names = ?found.names,
            "buffer filenames changed inconclusive status"
        );
        inspection.status.kind = kind;
        inspection.details.note = Some("classified from buffer filenames".to_string());
    }
    inspection.details.heuristic_names = found.names;
    inspection
}
