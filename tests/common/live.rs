//! Live provider configuration loaded from `.env`

use nzb_triage::{NntpServerConfig, TriageOptions};

/// Whether `.env` or the environment carries provider credentials
pub fn has_live_credentials() -> bool {
    dotenvy::dotenv().ok();
    std::env::var("NNTP_HOST").is_ok()
        && std::env::var("NNTP_USERNAME").is_ok()
        && std::env::var("NNTP_PASSWORD").is_ok()
}

/// Server config for the live provider (implicit TLS)
pub fn live_server_config() -> Option<NntpServerConfig> {
    dotenvy::dotenv().ok();
    let host = std::env::var("NNTP_HOST").ok()?;
    let port = std::env::var("NNTP_PORT_SSL")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(563);
    Some(NntpServerConfig {
        host,
        port,
        user: std::env::var("NNTP_USERNAME").ok(),
        pass: std::env::var("NNTP_PASSWORD").ok(),
        use_tls: true,
    })
}

/// Triage options for the live provider
pub fn live_options() -> Option<TriageOptions> {
    let connections = std::env::var("NNTP_CONNECTIONS")
        .ok()
        .and_then(|c| c.parse().ok())
        .unwrap_or(4);
    Some(TriageOptions {
        nntp_config: Some(live_server_config()?),
        nntp_max_connections: connections,
        ..Default::default()
    })
}
