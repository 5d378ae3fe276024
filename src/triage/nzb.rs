//! NZB payload parsing into the triage data model

use crate::error::{Error, Result};
use crate::inspect::names;
use crate::types::{NzbFile, Segment};

/// One NZB reduced to what triage looks at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedNzb {
    /// `<meta type="title">`
    pub title: Option<String>,
    /// `<meta type="password">`
    pub password: Option<String>,
    /// `<file>` entries in document order
    pub files: Vec<NzbFile>,
}

/// Parse an NZB XML document.
///
/// No structural validation beyond what the XML parser enforces: an NZB with
/// empty files or odd segment numbering still gets triaged.
pub fn parse_nzb(payload: &str) -> Result<ParsedNzb> {
    let nzb = nntp_rs::parse_nzb(payload)
        .map_err(|e| Error::InvalidNzb(format!("Failed to parse NZB: {}", e)))?;

    let title = nzb
        .meta
        .get("title")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let password = nzb
        .meta
        .get("password")
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty());

    let files = nzb
        .files
        .iter()
        .map(|file| {
            let filename = filename_from_subject(&file.subject);
            let extension = filename.as_deref().and_then(names::extension);
            let mut segments: Vec<Segment> = file
                .segments
                .iter()
                .map(|segment| Segment {
                    number: segment.number as u32,
                    bytes: segment.bytes as u64,
                    id: segment
                        .message_id
                        .trim()
                        .trim_start_matches('<')
                        .trim_end_matches('>')
                        .to_string(),
                })
                .collect();
            segments.sort_by_key(|s| s.number);
            NzbFile {
                subject: file.subject.clone(),
                filename,
                extension,
                segments,
            }
        })
        .collect();

    Ok(ParsedNzb {
        title,
        password,
        files,
    })
}

/// Parse a filename from an NZB subject line.
///
/// Posters put the filename in quotes, e.g.
/// `Some.Movie.2024 [01/50] - "Some.Movie.2024.part01.rar" yEnc (1/100)`.
/// Without quotes, the last whitespace-separated token that has an extension
/// is used.
pub(crate) fn filename_from_subject(subject: &str) -> Option<String> {
    if let Some(start) = subject.find('"')
        && let Some(end) = subject[start + 1..].find('"')
    {
        let filename = subject[start + 1..start + 1 + end].trim();
        if !filename.is_empty() {
            return Some(filename.to_string());
        }
    }
    subject
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| matches!(c, '[' | ']' | '(' | ')' | '-')))
        .filter(|token| {
            names::extension(token).is_some_and(|ext| {
                ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric())
            }) && !token.contains('/')
        })
        .last()
        .map(str::to_string)
}
