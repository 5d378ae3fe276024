use std::collections::HashMap;
use std::result::Result;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use super::*;
use crate::config::TriageOptions;
use crate::error::NntpError;
use crate::inspect::rar4::fixtures as rar4;
use crate::inspect::sevenzip::fixtures as sz;
use crate::nntp::{NntpSession, PoolOptions, SessionConnector};
use crate::types::Decision;

/// Articles served from memory; every STAT/BODY is logged
#[derive(Default)]
struct Articles {
    bodies: HashMap<String, Vec<u8>>,
    lookups: Mutex<Vec<String>>,
}

impl Articles {
    fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    fn lookup(&self, id: &str) -> Result<Vec<u8>, NntpError> {
        self.lookups.lock().unwrap().push(id.to_string());
        self.bodies
            .get(id)
            .cloned()
            .ok_or_else(|| NntpError::ArticleNotFound(id.to_string()))
    }
}

struct ArticleSession(Arc<Articles>);

#[async_trait]
impl NntpSession for ArticleSession {
    async fn stat(&mut self, message_id: &str) -> Result<(), NntpError> {
        self.0.lookup(message_id).map(|_| ())
    }

    async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        self.0.lookup(message_id)
    }

    async fn quit(&mut self) {}
}

struct ArticleConnector(Arc<Articles>);

#[async_trait]
impl SessionConnector for ArticleConnector {
    async fn connect(&self) -> Result<Box<dyn NntpSession>, NntpError> {
        Ok(Box::new(ArticleSession(self.0.clone())))
    }
}

struct Harness {
    articles: Arc<Articles>,
    access: NntpAccess,
    options: TriageOptions,
    metrics: MetricsCollector,
}

impl Harness {
    fn new(bodies: Vec<(&str, Vec<u8>)>) -> Self {
        let articles = Arc::new(Articles {
            bodies: bodies.into_iter().map(|(id, body)| (id.to_string(), body)).collect(),
            ..Default::default()
        });
        let pool = NntpPool::new(
            Arc::new(ArticleConnector(articles.clone())),
            PoolOptions {
                size: 2,
                keep_alive: None,
            },
        );
        Self {
            articles,
            access: NntpAccess::Ready(pool),
            options: TriageOptions::default(),
            metrics: MetricsCollector::new(),
        }
    }

    fn without_nntp() -> Self {
        Self {
            access: NntpAccess::Disabled,
            ..Self::new(Vec::new())
        }
    }

    async fn analyze(&self, xml: &str) -> TriageDecision {
        let env = TriageEnv {
            options: &self.options,
            access: &self.access,
            metrics: &self.metrics,
        };
        analyze_nzb(0, xml, &env).await.unwrap()
    }
}

/// NZB with one `<file>` per entry, one segment per message-id
fn nzb_xml(files: &[(&str, Vec<&str>)]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">\n  <head>\n    <meta type=\"title\">Test Release</meta>\n  </head>\n",
    );
    for (name, ids) in files {
        xml.push_str(&format!(
            "  <file poster=\"poster@example.com\" date=\"1700000000\" subject=\"{} yEnc (1/{})\">\n    <groups><group>alt.binaries.test</group></groups>\n    <segments>\n",
            name,
            ids.len()
        ));
        for (i, id) in ids.iter().enumerate() {
            xml.push_str(&format!(
                "      <segment bytes=\"1000\" number=\"{}\">{}</segment>\n",
                i + 1,
                id
            ));
        }
        xml.push_str("    </segments>\n  </file>\n");
    }
    xml.push_str("</nzb>\n");
    xml
}

fn article(data: &[u8], name: &str) -> Vec<u8> {
    yenc::encode(data, name, 128)
}

fn stored_rar() -> Vec<u8> {
    article(&rar4::stored_archive("Movie.mkv", 0x30), "movie.rar")
}

fn statuses(decision: &TriageDecision) -> Vec<String> {
    decision
        .archive_findings
        .iter()
        .map(|f| f.status.to_string())
        .collect()
}

fn assert_no_duplicate_lookups(articles: &Articles) {
    let lookups = articles.lookups();
    let mut unique = lookups.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), lookups.len(), "duplicate lookups: {:?}", lookups);
}

#[tokio::test]
async fn stored_rar_is_accepted() {
    let harness = Harness::new(vec![("m1@test", stored_rar())]);
    let decision = harness.analyze(&nzb_xml(&[("movie.rar", vec!["m1@test"])])).await;

    assert_eq!(decision.decision, Decision::Accept);
    assert!(decision.blockers.is_empty());
    assert!(decision.warnings.is_empty());
    assert_eq!(decision.nzb_title.as_deref(), Some("Test Release"));
    assert_eq!(decision.file_count, 1);
    assert_eq!(statuses(&decision), vec!["rar-stored"]);
    let details = decision.archive_findings[0].details.as_ref().unwrap();
    assert_eq!(details.message_id.as_deref(), Some("m1@test"));
    assert_eq!(
        details.archive.as_ref().unwrap().playable_entry.as_deref(),
        Some("Movie.mkv")
    );
    assert_eq!(harness.articles.lookups(), vec!["m1@test"]);
}

#[tokio::test]
async fn missing_first_segment_rejects() {
    let harness = Harness::new(Vec::new());
    let decision = harness.analyze(&nzb_xml(&[("movie.rar", vec!["m1@test"])])).await;

    assert_eq!(decision.decision, Decision::Reject);
    assert_eq!(decision.blockers, vec!["missing-articles"]);
    assert_eq!(statuses(&decision), vec!["missing-articles"]);
    let snap = harness.metrics.snapshot(Default::default());
    assert_eq!(snap.body_calls, 1);
    assert_eq!(snap.body_missing, 1);
}

#[tokio::test]
async fn compressed_rar_rejects() {
    let body = article(&rar4::stored_archive("Movie.mkv", 0x33), "movie.rar");
    let harness = Harness::new(vec![("m1@test", body)]);
    let decision = harness.analyze(&nzb_xml(&[("movie.rar", vec!["m1@test"])])).await;
    assert_eq!(decision.blockers, vec!["rar-compressed"]);
}

#[tokio::test]
async fn extra_samples_catch_missing_segments() {
    let ids = vec!["m1@test", "m2@test", "m3@test"];
    let harness = Harness::new(vec![("m1@test", stored_rar()), ("m3@test", b"x".to_vec())]);
    let decision = harness.analyze(&nzb_xml(&[("movie.rar", ids.clone())])).await;
    // one extra STAT lands on the last segment, which exists
    assert!(decision.is_accepted());
    assert_eq!(statuses(&decision), vec!["rar-stored", "segment-ok"]);

    let mut harness = Harness::new(vec![("m1@test", stored_rar()), ("m3@test", b"x".to_vec())]);
    harness.options.stat_sample_count = 2;
    let decision = harness.analyze(&nzb_xml(&[("movie.rar", ids.clone())])).await;
    assert_eq!(decision.blockers, vec!["missing-articles"]);
    assert_eq!(
        statuses(&decision),
        vec!["rar-stored", "segment-ok", "missing-articles"]
    );
    assert_no_duplicate_lookups(&harness.articles);
}

#[tokio::test]
async fn other_candidates_are_sampled() {
    let harness = Harness::new(vec![("m1@test", stored_rar())]);
    let decision = harness
        .analyze(&nzb_xml(&[("movie.rar", vec!["m1@test"]), ("extras.zip", vec!["z1@test"])]))
        .await;
    assert_eq!(decision.blockers, vec!["missing-articles"]);
    assert_eq!(harness.articles.lookups(), vec!["m1@test", "z1@test"]);
}

#[tokio::test]
async fn no_candidates_samples_segments() {
    let harness = Harness::new(vec![("v1@test", b"x".to_vec())]);
    let decision = harness
        .analyze(&nzb_xml(&[("movie.mkv", vec!["v1@test", "v2@test"]), ("movie.nfo", vec!["n1@test"])]))
        .await;
    assert!(decision.is_accepted());
    assert_eq!(decision.warnings, vec!["rar-m0-unverified"]);
    assert_eq!(harness.articles.lookups(), vec!["v1@test"]);

    let harness = Harness::new(Vec::new());
    let decision = harness.analyze(&nzb_xml(&[("movie.mkv", vec!["v1@test"])])).await;
    assert_eq!(decision.blockers, vec!["missing-articles"]);
}

#[tokio::test]
async fn without_nntp_only_unverified_outcomes() {
    let harness = Harness::without_nntp();
    let decision = harness
        .analyze(&nzb_xml(&[("movie.rar", vec!["m1@test", "m2@test"])]))
        .await;
    assert!(decision.is_accepted());
    assert_eq!(decision.warnings, vec!["nntp-disabled", "rar-m0-unverified"]);
    assert!(!statuses(&decision).iter().any(|s| s.ends_with("-stored")));
    // reported once, not per lookup
    assert_eq!(statuses(&decision), vec!["nntp-disabled"]);
}

#[tokio::test]
async fn failed_pool_surfaces_its_error_kind() {
    let mut harness = Harness::new(Vec::new());
    harness.access = NntpAccess::Failed {
        kind: "auth-failed".into(),
    };
    let decision = harness.analyze(&nzb_xml(&[("movie.rar", vec!["m1@test"])])).await;
    assert!(decision.is_accepted());
    assert_eq!(decision.warnings, vec!["nntp-error:auth-failed", "rar-m0-unverified"]);
}

#[tokio::test]
async fn staged_archives_are_inspected_before_the_network() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("movie.rar"), rar4::stored_archive("Movie.mkv", 0x30)).unwrap();
    let mut harness = Harness::new(vec![("m1@test", stored_rar()), ("m2@test", b"x".to_vec())]);
    harness.options.archive_dirs = vec![dir.path().to_path_buf()];

    let decision = harness
        .analyze(&nzb_xml(&[("movie.part01.rar", vec!["m1@test", "m2@test"])]))
        .await;
    assert!(decision.is_accepted());
    assert!(decision.warnings.is_empty());
    assert_eq!(decision.archive_findings[0].source, FindingSource::Local);
    assert_eq!(decision.archive_findings[0].status.to_string(), "rar-stored");
    // no BODY for the primary, only the sampling STAT
    assert_eq!(harness.articles.lookups(), vec!["m2@test"]);
}

#[tokio::test]
async fn unstaged_archives_warn_and_fall_back_to_nntp() {
    let dir = TempDir::new().unwrap();
    let mut harness = Harness::new(vec![("m1@test", stored_rar())]);
    harness.options.archive_dirs = vec![dir.path().to_path_buf()];
    let decision = harness.analyze(&nzb_xml(&[("movie.rar", vec!["m1@test"])])).await;
    assert!(decision.is_accepted());
    assert_eq!(decision.warnings, vec!["archive-not-found"]);
    assert_eq!(statuses(&decision), vec!["archive-not-found", "rar-stored"]);
}

#[tokio::test]
async fn inconsistent_rar_sets_are_blocked() {
    let harness = Harness::without_nntp();
    let counts = [10usize, 10, 10, 10, 10, 4, 17, 2];
    let ids: Vec<Vec<String>> = counts
        .iter()
        .enumerate()
        .map(|(v, n)| (0..*n).map(|s| format!("v{}s{}@test", v, s)).collect())
        .collect();
    let names: Vec<String> = (1..=counts.len()).map(|n| format!("movie.part{:02}.rar", n)).collect();
    let files: Vec<(&str, Vec<&str>)> = names
        .iter()
        .zip(ids.iter())
        .map(|(name, ids)| (name.as_str(), ids.iter().map(String::as_str).collect()))
        .collect();

    let decision = harness.analyze(&nzb_xml(&files)).await;
    assert_eq!(decision.decision, Decision::Reject);
    assert_eq!(decision.blockers, vec!["rar-inconsistent-parts"]);
    assert_eq!(decision.archive_findings[0].source, FindingSource::NzbMetadata);
}

#[tokio::test]
async fn sevenzip_compressed_coder_rejects() {
    let header = sz::plain_header(&["Movie.mkv"], &[sz::lzma2(16)], 4);
    let body = article(&sz::archive(b"data", &header), "movie.7z");
    let harness = Harness::new(vec![("s1@test", body)]);
    let decision = harness.analyze(&nzb_xml(&[("movie.7z", vec!["s1@test"])])).await;
    assert_eq!(decision.blockers, vec!["sevenzip-unsupported"]);
}

#[tokio::test]
async fn sevenzip_end_header_is_fetched_from_a_later_segment() {
    const PART: usize = 1000;
    let packed = vec![0u8; 3000];
    let archive = sz::archive(&packed, &sz::plain_header(&["Movie.mkv"], &[sz::copy()], 3000));
    let total = archive.len() as u64;
    let ids = ["s1@test", "s2@test", "s3@test", "s4@test"];
    let bodies: Vec<(&str, Vec<u8>)> = archive
        .chunks(PART)
        .enumerate()
        .map(|(i, chunk)| {
            let body = yenc::encode_part(chunk, "movie.7z", i as u32 + 1, (i * PART) as u64 + 1, total, 128);
            (ids[i], body)
        })
        .collect();
    assert_eq!(bodies.len(), 4);

    let harness = Harness::new(bodies);
    let decision = harness.analyze(&nzb_xml(&[("movie.7z", ids.to_vec())])).await;
    assert!(decision.is_accepted(), "{:?}", decision);
    assert!(decision.warnings.is_empty());
    assert_eq!(statuses(&decision), vec!["sevenzip-stored", "segment-ok"]);
    // head, end header, then the sampling STAT on the last unchecked segment
    assert_eq!(harness.articles.lookups(), vec!["s1@test", "s4@test", "s3@test"]);
}

#[tokio::test]
async fn sevenzip_volumes_are_prechecked() {
    let header = sz::plain_header(&["Movie.mkv"], &[sz::copy()], 4);
    let body = article(&sz::archive(b"data", &header), "movie.7z.001");
    let harness = Harness::new(vec![("a1@test", body)]);
    let decision = harness
        .analyze(&nzb_xml(&[("movie.7z.001", vec!["a1@test"]), ("movie.7z.002", vec!["b1@test"])]))
        .await;
    assert_eq!(decision.blockers, vec!["missing-articles"]);
    // the head is never fetched once a volume is known missing
    assert_eq!(harness.articles.lookups(), vec!["b1@test"]);
}

#[tokio::test]
async fn sevenzip_end_header_in_a_prechecked_volume_is_fetched() {
    const VOLUME: usize = 1000;
    let packed = vec![0u8; 1500];
    let archive = sz::archive(&packed, &sz::plain_header(&["Movie.mkv"], &[sz::lzma2(16)], 1500));
    let (first, rest) = archive.split_at(VOLUME);
    assert!(rest.len() < VOLUME);
    let a1 = yenc::encode_part(first, "movie.7z.001", 1, 1, VOLUME as u64, 128);
    let b1 = yenc::encode_part(rest, "movie.7z.002", 1, 1, rest.len() as u64, 128);

    let harness = Harness::new(vec![("a1@test", a1), ("b1@test", b1)]);
    let decision = harness
        .analyze(&nzb_xml(&[("movie.7z.001", vec!["a1@test"]), ("movie.7z.002", vec!["b1@test"])]))
        .await;
    assert_eq!(decision.blockers, vec!["sevenzip-unsupported"], "{:?}", decision);
    assert_eq!(statuses(&decision), vec!["segment-ok", "sevenzip-unsupported"]);
    // STAT from the precheck, the head, then BODY of the segment holding the end header
    assert_eq!(harness.articles.lookups(), vec!["b1@test", "a1@test", "b1@test"]);
    let snap = harness.metrics.snapshot(Default::default());
    assert_eq!(snap.stat_calls, 1);
    assert_eq!(snap.body_calls, 2);
}

#[tokio::test]
async fn garbage_article_warns_decode_failure() {
    let harness = Harness::new(vec![("m1@test", b"not yenc at all\n".to_vec())]);
    let decision = harness.analyze(&nzb_xml(&[("movie.rar", vec!["m1@test"])])).await;
    assert!(decision.is_accepted());
    assert_eq!(decision.warnings, vec!["yenc-decode-failed", "rar-m0-unverified"]);
}

#[tokio::test]
async fn malformed_payload_is_an_error() {
    let harness = Harness::without_nntp();
    let env = TriageEnv {
        options: &harness.options,
        access: &harness.access,
        metrics: &harness.metrics,
    };
    assert!(analyze_nzb(3, "<nzb><file subject=", &env).await.is_err());
}
