//! Archive candidate selection
//!
//! NZB files are classified by name into RAR, ZIP and 7z members. Volumes of
//! one set share a canonical key (`movie.part03.rar`, `movie.r02` and
//! `movie.rar` all map to `movie.rar`), so each set is inspected once, through
//! its first volume.

use std::collections::{BTreeMap, HashMap};

use crate::inspect::names;
use crate::types::{ArchiveFormat, NzbFile};

/// Share of non-final volumes that may disagree with the usual segment count
const INCONSISTENT_PARTS_RATIO: f64 = 0.2;

/// An archive set found in an NZB
#[derive(Clone, Debug)]
pub(crate) struct Candidate<'a> {
    /// Lower-cased set name, e.g. `movie.rar`
    pub canonical_key: String,
    pub format: ArchiveFormat,
    /// Volumes ordered first to last
    pub volumes: Vec<&'a NzbFile>,
    /// Selection score, higher is inspected first
    pub score: i32,
}

impl<'a> Candidate<'a> {
    /// The volume carrying the archive headers
    pub(crate) fn first(&self) -> &'a NzbFile {
        self.volumes[0]
    }
}

/// Position of a volume in its set; `None` for non-archives
pub(crate) fn volume_index(name: &str) -> Option<(ArchiveFormat, String, u32)> {
    let lower = names::base_name(name).to_ascii_lowercase();
    let (stem, ext) = lower.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }

    match ext {
        "rar" => {
            // movie.part01.rar is volume 1 of movie.rar, plain movie.rar is 0
            if let Some(idx) = stem.rfind(".part") {
                let digits = &stem[idx + 5..];
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    let number: u32 = digits.parse().unwrap_or(0);
                    return Some((ArchiveFormat::Rar, format!("{}.rar", &stem[..idx]), number));
                }
            }
            Some((ArchiveFormat::Rar, lower.clone(), 0))
        }
        "zip" => Some((ArchiveFormat::Zip, lower.clone(), 0)),
        "7z" => Some((ArchiveFormat::SevenZip, lower.clone(), 0)),
        _ if names::is_numbered_extension(ext, 'r') => {
            // movie.r00 follows movie.rar
            let number: u32 = ext[1..].parse().unwrap_or(0);
            Some((ArchiveFormat::Rar, format!("{}.rar", stem), number + 1))
        }
        _ if ext.len() == 3 && ext.chars().all(|c| c.is_ascii_digit()) => {
            let number: u32 = ext.parse().unwrap_or(0);
            if stem.ends_with(".7z") {
                Some((ArchiveFormat::SevenZip, stem.to_string(), number))
            } else if stem.ends_with(".zip") {
                Some((ArchiveFormat::Zip, stem.to_string(), number))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Deterministic inspection priority of a set, from its first volume's name
fn score(format: ArchiveFormat, first_name: &str, first_index: u32) -> i32 {
    let lower = first_name.to_ascii_lowercase();
    let mut score = match format {
        ArchiveFormat::Rar if lower.ends_with(".rar") && first_index <= 1 => 100,
        ArchiveFormat::Rar if lower.ends_with(".r00") => 90,
        ArchiveFormat::SevenZip if first_index <= 1 => 90,
        ArchiveFormat::Zip => 60,
        // set whose first volume is not in the NZB
        _ => 20,
    };
    if names::is_sample_like(&lower) {
        score -= 80;
    }
    if lower.contains(".nfo") {
        score -= 40;
    }
    let stem = lower.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(&lower);
    if names::VIDEO_EXTENSIONS
        .iter()
        .any(|ext| stem.contains(&format!(".{}", ext)))
    {
        score += 10;
    }
    score
}

/// Archive sets of an NZB, best candidate first.
///
/// Ties keep NZB order, so the result only depends on the NZB.
pub(crate) fn select_candidates(files: &[NzbFile]) -> Vec<Candidate<'_>> {
    let mut sets: HashMap<String, (ArchiveFormat, usize, Vec<(u32, &NzbFile)>)> = HashMap::new();
    for (position, file) in files.iter().enumerate() {
        let Some(name) = file.filename.as_deref() else {
            continue;
        };
        let Some((format, key, index)) = volume_index(name) else {
            continue;
        };
        sets.entry(key)
            .or_insert_with(|| (format, position, Vec::new()))
            .2
            .push((index, file));
    }

    let mut candidates: Vec<(usize, Candidate<'_>)> = sets
        .into_iter()
        .map(|(key, (format, position, mut volumes))| {
            volumes.sort_by_key(|(index, _)| *index);
            let (first_index, first) = volumes[0];
            let score = score(format, first.display_name(), first_index);
            (
                position,
                Candidate {
                    canonical_key: key,
                    format,
                    volumes: volumes.into_iter().map(|(_, file)| file).collect(),
                    score,
                },
            )
        })
        .collect();
    candidates.sort_by(|(pa, a), (pb, b)| b.score.cmp(&a.score).then(pa.cmp(pb)));
    candidates.into_iter().map(|(_, c)| c).collect()
}

/// Whether a multi-volume RAR set has volumes with odd segment counts.
///
/// Non-final volumes of a set are posted at one size, so they carry the same
/// number of segments. When more than a fifth of them disagree with the most
/// common count the release was padded or damaged.
pub(crate) fn has_inconsistent_parts(files: &[NzbFile]) -> Option<String> {
    let mut sets: HashMap<String, Vec<(u32, usize)>> = HashMap::new();
    for file in files {
        let Some(name) = file.filename.as_deref() else {
            continue;
        };
        if let Some((ArchiveFormat::Rar, key, index)) = volume_index(name) {
            sets.entry(key).or_default().push((index, file.segments.len()));
        }
    }

    let mut keys: Vec<&String> = sets.keys().collect();
    keys.sort();
    for key in keys {
        let mut volumes = sets[key].clone();
        volumes.sort_by_key(|(index, _)| *index);
        volumes.pop();
        // a single non-final part has nothing to differ from
        if volumes.len() < 2 {
            continue;
        }

        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for (_, segments) in &volumes {
            *counts.entry(*segments).or_insert(0) += 1;
        }
        let modal = counts.values().copied().max().unwrap_or(0);
        let differing = volumes.len() - modal;
        if differing as f64 / volumes.len() as f64 > INCONSISTENT_PARTS_RATIO {
            return Some(key.clone());
        }
    }
    None
}
