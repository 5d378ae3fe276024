//! 7z end-header fetch
//!
//! The end header of a 7z archive sits at `32 + nextHeaderOffset`, usually at
//! the very end of the last volume, far past the first segment. The segment
//! holding it is located from the yEnc metadata of the first segment:
//! `=ybegin size=` gives the volume size and `=ypart` the part length.
//! Articles are fetched until [`sevenzip::inspect_tail`] stops asking for
//! bytes or the fetch budget runs out.

use std::collections::HashMap;

use tracing::debug;

use super::candidates::Candidate;
use super::Analysis;
use crate::error::{Error, Result};
use crate::inspect::sevenzip::{self, ArchiveWindow, StartHeader, Tail};
use crate::inspect::{heuristics, Inspection};
use crate::yenc::{self, YencArticle};

/// Articles fetched for one end header, at most
const MAX_FOOTER_FETCHES: usize = 6;

/// Locate, fetch and inspect the end header. `None` when it stayed out of
/// reach.
pub(super) async fn inspect_footer(
    analysis: &mut Analysis<'_>,
    candidate: &Candidate<'_>,
    first: &YencArticle,
) -> Result<Option<Inspection>> {
    let Ok(start) = sevenzip::parse_start_header(&first.data) else {
        return Ok(None);
    };
    let Some(volume_size) = first.file_size.filter(|size| *size > 0) else {
        debug!("7z head carries no yEnc size, end header out of reach");
        return Ok(None);
    };
    let part_len = first
        .part_len()
        .unwrap_or(first.data.len() as u64)
        .max(1);

    let mut window = ArchiveWindow::new();
    window.insert(first.offset(), first.data.clone());
    // (volume, segment index) -> absolute range fetched
    let mut fetched: HashMap<(usize, usize), (u64, u64)> = HashMap::new();
    fetched.insert((0, 0), (first.offset(), first.offset() + first.data.len() as u64));

    for _ in 0..MAX_FOOTER_FETCHES {
        let (offset, len) = match tail_blocking(start, window.clone(), analysis.password.clone()).await? {
            Tail::Inspected(inspection) => {
                let header = window
                    .read(start.header_offset(), start.next_header_size)
                    .unwrap_or_default();
                return Ok(Some(heuristics::refine(inspection, &header)));
            }
            Tail::Needs { offset, len } => (offset, len),
        };
        let Some(gap) = window.first_gap(offset, len) else {
            return Ok(None);
        };

        let volume = (gap / volume_size) as usize;
        let within = gap % volume_size;
        let Some(file) = candidate.volumes.get(volume).copied() else {
            debug!(volume, "7z end header lies in a volume missing from the nzb");
            return Ok(None);
        };
        let Some(index) = locate_segment(&fetched, volume, (within / part_len) as usize, gap) else {
            return Ok(None);
        };
        let Some(segment) = file.segments.get(index) else {
            return Ok(None);
        };

        debug!(volume, segment = segment.number, gap, "fetching 7z end header segment");
        let Some(raw) = analysis.fetch_body(file, segment).await else {
            return Ok(None);
        };
        let Ok(article) = yenc::decode_article(&raw, usize::MAX) else {
            return Ok(None);
        };
        analysis.env.metrics.record_decoded(article.data.len());

        let volume_base = volume as u64 * volume_size;
        let begin = match article.part_begin {
            Some(_) => article.offset(),
            None => index as u64 * part_len,
        };
        let start_abs = volume_base + begin;
        fetched.insert((volume, index), (start_abs, start_abs + article.data.len() as u64));
        window.insert(start_abs, article.data);
    }
    Ok(None)
}

/// Segment index to fetch next, correcting the estimate with what earlier
/// fetches revealed about part boundaries
fn locate_segment(
    fetched: &HashMap<(usize, usize), (u64, u64)>,
    volume: usize,
    estimate: usize,
    gap: u64,
) -> Option<usize> {
    let mut index = estimate;
    for _ in 0..MAX_FOOTER_FETCHES {
        match fetched.get(&(volume, index)) {
            None => return Some(index),
            Some((_, end)) if *end <= gap => index += 1,
            Some((start, _)) if *start > gap => index = index.checked_sub(1)?,
            Some(_) => return None,
        }
    }
    None
}

async fn tail_blocking(start: StartHeader, window: ArchiveWindow, password: Option<String>) -> Result<Tail> {
    tokio::task::spawn_blocking(move || sevenzip::inspect_tail(&start, &window, password.as_deref()))
        .await
        .map_err(|e| Error::TaskFailed(format!("7z inspection task failed: {}", e)))
}
