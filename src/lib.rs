//! # nzb-triage
//!
//! Decides, before anything is downloaded, whether an NZB release is worth
//! queueing. Each NZB is checked by:
//!
//! - sampling its Usenet articles with NNTP `STAT`
//! - fetching and yEnc-decoding the first segment of its main archive
//! - reading the archive headers (RAR4, RAR5, ZIP, 7z), decrypting
//!   encrypted headers when the NZB carries a password
//!
//! Releases whose archives are compressed, encrypted, nested, disc images
//! or missing articles are rejected; stored (method 0) archives holding a
//! video are accepted. Anything inconclusive becomes a warning.
//!
//! ## Quick Start
//!
//! ```no_run
//! use nzb_triage::{NntpServerConfig, TriageEngine, TriageOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = TriageOptions {
//!         nntp_config: Some(NntpServerConfig {
//!             host: "news.example.com".to_string(),
//!             port: 563,
//!             user: Some("user".to_string()),
//!             pass: Some("pass".to_string()),
//!             use_tls: true,
//!         }),
//!         nntp_max_connections: 20,
//!         ..Default::default()
//!     };
//!
//!     let engine = TriageEngine::new();
//!     engine.pre_warm_nntp_pool(&options).await?;
//!
//!     let nzb = std::fs::read_to_string("release.nzb")?;
//!     let summary = engine.triage(&[nzb], &options).await?;
//!     for decision in &summary.decisions {
//!         println!("{:?} {:?}", decision.decision, decision.blockers);
//!     }
//!
//!     engine.close_shared_nntp_pool("shutdown").await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Triage engine and batch scheduler
pub mod engine;
/// Error types
pub mod error;
/// Archive header inspectors
pub mod inspect;
/// Per-run counters
pub mod metrics;
/// NNTP sessions and connection pooling
pub mod nntp;
/// Per-NZB analysis
pub mod triage;
/// Core types
pub mod types;
/// yEnc decoding
pub mod yenc;

// Re-export commonly used types
pub use config::{NntpServerConfig, TriageOptions};
pub use engine::TriageEngine;
pub use error::{Error, InspectError, NntpError, Result};
pub use inspect::{inspect_buffer, ArchiveDetails, Inspection};
pub use metrics::{PoolTotals, RunMetrics};
pub use nntp::{NntpPool, NntpSession, PoolOptions, SessionConnector};
pub use types::{
    ArchiveFinding, ArchiveFormat, ArchiveStatus, Decision, FindingDetails, FindingSource,
    FindingStatus, StatusKind, Summary, TriageDecision,
};
pub use yenc::{decode as decode_yenc, DecodeError, YencArticle};
