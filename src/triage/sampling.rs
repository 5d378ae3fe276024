//! STAT and BODY lookups and the extra sampling policy

use std::time::Instant;

use tracing::{debug, warn};

use super::candidates::Candidate;
use super::Analysis;
use crate::error::NntpError;
use crate::metrics::{Command, Outcome};
use crate::types::{labels, ArchiveFinding, FindingDetails, FindingSource, FindingStatus, NzbFile, Segment};

/// Volumes of a multi-volume 7z probed before its head is fetched
const SEVENZIP_PRECHECK_VOLUMES: usize = 4;

/// Result of one STAT probe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Probe {
    /// 223
    Present,
    /// 430
    Missing,
    /// Transport, protocol or pool failure; a warning was recorded
    Failed,
    /// The message-id was already looked up in this analysis
    Skipped,
}

impl Analysis<'_> {
    /// Whether `id` already went out as STAT or BODY
    pub(super) fn looked_up(&self, id: &str) -> bool {
        self.stat_results.contains_key(id) || self.fetched.contains(id)
    }
}

fn outcome_of(result: &Result<impl Sized, NntpError>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(e) if e.is_missing_article() => Outcome::Missing,
        Err(_) => Outcome::Error,
    }
}

/// Up to `count` segments spread over `segments`, last one first
fn spread(segments: &[&Segment], count: usize) -> Vec<usize> {
    let total = segments.len();
    let mut picks = Vec::with_capacity(count);
    for i in 0..count.min(total) {
        let index = total - 1 - i * total / count.min(total);
        if !picks.contains(&index) {
            picks.push(index);
        }
    }
    picks
}

impl Analysis<'_> {
    fn segment_details(segment: &Segment, error: Option<String>) -> Option<FindingDetails> {
        Some(FindingDetails {
            message_id: Some(segment.id.clone()),
            segment_number: Some(segment.number),
            error,
            ..Default::default()
        })
    }

    fn record_missing(&mut self, source: FindingSource, file: &NzbFile, segment: &Segment) {
        debug!(message_id = %segment.id, "article missing");
        self.record(ArchiveFinding {
            source,
            filename: file.filename.clone(),
            subject: file.subject.clone(),
            status: FindingStatus::SegmentMissing,
            details: Self::segment_details(segment, None),
        });
        self.blocker(labels::MISSING_ARTICLES);
    }

    fn record_nntp_error(
        &mut self,
        source: FindingSource,
        file: &NzbFile,
        segment: &Segment,
        error: &NntpError,
    ) {
        warn!(message_id = %segment.id, error = %error, "nntp lookup failed");
        let kind = error.kind();
        self.warning(&format!("{}{}", labels::NNTP_ERROR_PREFIX, kind));
        self.record(ArchiveFinding {
            source,
            filename: file.filename.clone(),
            subject: file.subject.clone(),
            status: FindingStatus::NntpError(kind),
            details: Self::segment_details(segment, Some(error.to_string())),
        });
    }

    /// STAT one segment, unless it was already looked up
    pub(super) async fn stat_segment(&mut self, file: &NzbFile, segment: &Segment) -> Probe {
        if self.looked_up(&segment.id) {
            return Probe::Skipped;
        }
        let probe = self.send_stat(file, segment).await;
        self.stat_results.insert(segment.id.clone(), probe);
        probe
    }

    async fn send_stat(&mut self, file: &NzbFile, segment: &Segment) -> Probe {
        let Some(pool) = self.pool(file) else {
            return Probe::Failed;
        };
        let mut client = match pool.acquire().await {
            Ok(client) => client,
            Err(e) => {
                self.record_nntp_error(FindingSource::NntpStat, file, segment, &e);
                return Probe::Failed;
            }
        };

        let started = Instant::now();
        let result = client.stat(&segment.id).await;
        self.env
            .metrics
            .record_command(Command::Stat, outcome_of(&result), started.elapsed());

        match result {
            Ok(()) => {
                client.release(false);
                self.record(ArchiveFinding {
                    source: FindingSource::NntpStat,
                    filename: file.filename.clone(),
                    subject: file.subject.clone(),
                    status: FindingStatus::SegmentPresent,
                    details: Self::segment_details(segment, None),
                });
                Probe::Present
            }
            Err(e) if e.is_missing_article() => {
                client.release(false);
                self.record_missing(FindingSource::NntpStat, file, segment);
                Probe::Missing
            }
            Err(e) => {
                client.release(e.is_transport());
                self.record_nntp_error(FindingSource::NntpStat, file, segment, &e);
                Probe::Failed
            }
        }
    }

    /// BODY one segment, at most once per analysis. A segment that only had
    /// a successful STAT so far is still fetched; one STAT found missing is
    /// not. Failures are recorded; `None` means nothing usable came back.
    pub(super) async fn fetch_body(&mut self, file: &NzbFile, segment: &Segment) -> Option<Vec<u8>> {
        match self.stat_results.get(&segment.id) {
            None | Some(Probe::Present) => {}
            Some(_) => return None,
        }
        if !self.fetched.insert(segment.id.clone()) {
            return None;
        }
        let pool = self.pool(file)?;
        let mut client = match pool.acquire().await {
            Ok(client) => client,
            Err(e) => {
                self.record_nntp_error(FindingSource::Nntp, file, segment, &e);
                return None;
            }
        };

        let started = Instant::now();
        let result = client.body(&segment.id).await;
        self.env
            .metrics
            .record_command(Command::Body, outcome_of(&result), started.elapsed());

        match result {
            Ok(body) => {
                client.release(false);
                Some(body)
            }
            Err(e) if e.is_missing_article() => {
                client.release(false);
                self.record_missing(FindingSource::Nntp, file, segment);
                None
            }
            Err(e) => {
                client.release(e.is_transport());
                self.record_nntp_error(FindingSource::Nntp, file, segment, &e);
                None
            }
        }
    }

    /// STAT the first segment of the later volumes of a 7z set
    pub(super) async fn precheck_volumes(&mut self, candidate: &Candidate<'_>) {
        for volume in candidate.volumes.iter().skip(1).take(SEVENZIP_PRECHECK_VOLUMES) {
            let Some(segment) = volume.segments.first() else {
                continue;
            };
            if self.stat_segment(volume, segment).await == Probe::Missing {
                return;
            }
        }
    }

    /// Extra STATs on the primary archive and on other candidates
    pub(super) async fn sample_candidates(&mut self, candidates: &[Candidate<'_>]) {
        let options = self.env.options;
        let Some(primary) = candidates.first() else {
            return;
        };

        let segments: Vec<(&NzbFile, &Segment)> = primary
            .volumes
            .iter()
            .copied()
            .flat_map(|file| file.segments.iter().map(move |s| (file, s)))
            .filter(|(_, s)| !self.looked_up(&s.id))
            .collect();
        let refs: Vec<&Segment> = segments.iter().map(|(_, s)| *s).collect();
        for index in spread(&refs, options.stat_sample_count) {
            if self.has_blockers() {
                return;
            }
            let (file, segment) = segments[index];
            self.stat_segment(file, segment).await;
        }

        for candidate in candidates.iter().skip(1).take(options.archive_sample_count) {
            if self.has_blockers() {
                return;
            }
            let file = candidate.first();
            if let Some(segment) = file.segments.first() {
                self.stat_segment(file, segment).await;
            }
        }
    }

    /// STAT the first segment of the largest files of an NZB without archives
    pub(super) async fn sample_without_candidates(&mut self, files: &[NzbFile]) {
        let mut by_size: Vec<&NzbFile> = files.iter().filter(|f| !f.segments.is_empty()).collect();
        by_size.sort_by(|a, b| {
            let size = |f: &NzbFile| f.segments.iter().map(|s| s.bytes).sum::<u64>();
            size(b).cmp(&size(a))
        });
        let count = self.env.options.stat_sample_count.max(1);
        for file in by_size.into_iter().take(count) {
            if self.has_blockers() {
                return;
            }
            if let Some(segment) = file.segments.first() {
                self.stat_segment(file, segment).await;
            }
        }
    }
}
