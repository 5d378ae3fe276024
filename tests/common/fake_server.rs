//! In-process NNTP server answering STAT/BODY from a message-id map

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nzb_triage::NntpServerConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Behavior of a [`FakeNntpServer`]
#[derive(Clone, Default)]
pub struct FakeServerOptions {
    /// Article bodies by message-id (without angle brackets)
    pub articles: HashMap<String, Vec<u8>>,
    /// Credentials expected by AUTHINFO
    pub credentials: Option<(String, String)>,
    /// Delay before every STAT/BODY reply
    pub delay: Option<Duration>,
}

#[derive(Default)]
struct ServerState {
    connections: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

/// Fake NNTP server bound to an ephemeral localhost port
pub struct FakeNntpServer {
    /// Bound address
    pub addr: SocketAddr,
    state: Arc<ServerState>,
}

impl FakeNntpServer {
    /// Start serving; the listener lives until the test runtime shuts down
    pub async fn start(options: FakeServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());
        let options = Arc::new(options);

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = accept_state.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &options, &state).await;
                });
            }
        });

        Self { addr, state }
    }

    /// Start a server holding `articles`
    pub async fn with_articles(articles: Vec<(&str, Vec<u8>)>) -> Self {
        Self::start(FakeServerOptions {
            articles: articles
                .into_iter()
                .map(|(id, body)| (id.to_string(), body))
                .collect(),
            ..Default::default()
        })
        .await
    }

    /// Server config pointing at this server
    pub fn config(&self) -> NntpServerConfig {
        NntpServerConfig::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// TCP connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Commands received so far, passwords included
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    /// STAT and BODY commands received for `message_id`
    pub fn lookups_of(&self, message_id: &str) -> usize {
        let bracketed = format!("<{}>", message_id);
        self.commands()
            .iter()
            .filter(|c| (c.starts_with("STAT ") || c.starts_with("BODY ")) && c.ends_with(&bracketed))
            .count()
    }
}

async fn serve(stream: TcpStream, options: &FakeServerOptions, state: &ServerState) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    write.write_all(b"200 fake server ready\r\n").await?;

    let mut user = None;
    while let Some(line) = lines.next_line().await? {
        state.commands.lock().unwrap().push(line.clone());
        let (command, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        match command.to_ascii_uppercase().as_str() {
            "AUTHINFO" => {
                let (kind, value) = arg.split_once(' ').unwrap_or((arg, ""));
                if kind.eq_ignore_ascii_case("USER") {
                    user = Some(value.to_string());
                    write.write_all(b"381 password required\r\n").await?;
                } else {
                    let accepted = match &options.credentials {
                        Some((u, p)) => user.as_deref() == Some(u.as_str()) && value == p,
                        None => true,
                    };
                    let reply: &[u8] = if accepted {
                        b"281 authentication accepted\r\n"
                    } else {
                        b"481 authentication failed\r\n"
                    };
                    write.write_all(reply).await?;
                }
            }
            "STAT" | "BODY" => {
                if let Some(delay) = options.delay {
                    tokio::time::sleep(delay).await;
                }
                let id = arg.trim_start_matches('<').trim_end_matches('>');
                match options.articles.get(id) {
                    None => write.write_all(b"430 no such article\r\n").await?,
                    Some(_) if command.eq_ignore_ascii_case("STAT") => {
                        write.write_all(format!("223 0 {}\r\n", arg).as_bytes()).await?
                    }
                    Some(body) => {
                        write.write_all(format!("222 0 {}\r\n", arg).as_bytes()).await?;
                        write.write_all(&dot_stuff(body)).await?;
                    }
                }
            }
            "QUIT" => {
                write.write_all(b"205 bye\r\n").await?;
                return Ok(());
            }
            _ => write.write_all(b"500 unknown command\r\n").await?,
        }
    }
    Ok(())
}

/// Multi-line block with leading dots doubled and the terminating `.`
fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    let body = body.strip_suffix(b"\n").unwrap_or(body);
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.starts_with(b".") {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}
