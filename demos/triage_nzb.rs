//! Triage NZB files from the command line
//!
//! Reads every NZB path given as an argument, triages them in one batch and
//! prints the summary as JSON.
//!
//! Server settings come from the environment:
//! - `NNTP_HOST` - server hostname (network checks are skipped when unset)
//! - `NNTP_PORT` - port (default: 563 with TLS, 119 without)
//! - `NNTP_USER` / `NNTP_PASS` - credentials (optional)
//! - `NNTP_TLS` - `0` or `false` for plain text (default: TLS)
//! - `ARCHIVE_DIR` - directory with already-staged archives (optional)
//!
//! ```bash
//! NNTP_HOST=news.example.com NNTP_USER=me NNTP_PASS=secret \
//!   cargo run --example triage_nzb -- release1.nzb release2.nzb
//! ```

use nzb_triage::{NntpServerConfig, TriageEngine, TriageOptions};

fn server_from_env() -> Option<NntpServerConfig> {
    let host = std::env::var("NNTP_HOST").ok()?;
    let use_tls = !matches!(
        std::env::var("NNTP_TLS").as_deref(),
        Ok("0") | Ok("false")
    );
    let port = std::env::var("NNTP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(if use_tls { 563 } else { 119 });
    Some(NntpServerConfig {
        host,
        port,
        user: std::env::var("NNTP_USER").ok(),
        pass: std::env::var("NNTP_PASS").ok(),
        use_tls,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: triage_nzb <file.nzb>...");
        std::process::exit(2);
    }

    let mut payloads = Vec::with_capacity(paths.len());
    for path in &paths {
        payloads.push(std::fs::read_to_string(path)?);
    }

    let options = TriageOptions {
        nntp_config: server_from_env(),
        nntp_max_connections: 10,
        archive_dirs: std::env::var("ARCHIVE_DIR").map(|d| vec![d.into()]).unwrap_or_default(),
        ..Default::default()
    };
    if options.nntp_config.is_none() {
        eprintln!("NNTP_HOST not set, skipping network checks");
    }

    let engine = TriageEngine::new();
    let summary = engine.triage(&payloads, &options).await?;
    engine.close_shared_nntp_pool("demo finished").await;

    for (path, decision) in paths.iter().zip(&summary.decisions) {
        eprintln!("{:?}  {}  {:?}", decision.decision, path, decision.blockers);
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
