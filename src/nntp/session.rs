//! A single NNTP session
//!
//! Only the commands triage needs are spoken: the greeting, `AUTHINFO`,
//! `STAT`, `BODY` and `QUIT`. The session is a trait so the pool can be driven
//! by in-memory sessions in tests. [`TcpConnector`] opens the real thing:
//! TLS servers go through [`nntp_rs::NntpClient`], plain-text servers get the
//! same nntp-rs commands and reply parsing over a tokio socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nntp_rs::{NntpClient, codes, commands};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::NntpServerConfig;
use crate::error::NntpError;

const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

/// One authenticated NNTP connection
#[async_trait]
pub trait NntpSession: Send {
    /// `STAT <id>`: `Ok` when the article exists
    async fn stat(&mut self, message_id: &str) -> Result<(), NntpError>;

    /// `BODY <id>`: the raw article body, dot-unstuffed.
    ///
    /// Plain sessions keep line breaks as `\n`; TLS sessions return the lines
    /// joined without separators. The yEnc decoder accepts both.
    async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError>;

    /// Say goodbye, best effort
    async fn quit(&mut self);
}

/// Opens new sessions for a pool
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Connect, read the greeting and authenticate
    async fn connect(&self) -> Result<Box<dyn NntpSession>, NntpError>;
}

/// Wrap a message-id in angle brackets unless it already is
pub fn bracketed(message_id: &str) -> String {
    let id = message_id.trim();
    if id.starts_with('<') && id.ends_with('>') {
        id.to_string()
    } else {
        format!("<{}>", id.trim_matches(|c| c == '<' || c == '>'))
    }
}

/// Connector for a real server
#[derive(Clone, Debug)]
pub struct TcpConnector {
    server: NntpServerConfig,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl TcpConnector {
    /// Connector for `server` with the given timeouts
    pub fn new(server: NntpServerConfig, connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            server,
            connect_timeout,
            command_timeout,
        }
    }

    async fn open(&self) -> Result<Box<dyn NntpSession>, NntpError> {
        if self.server.use_tls {
            let session = TlsSession::open(&self.server, self.command_timeout).await?;
            Ok(Box::new(session))
        } else {
            let session = PlainSession::open(&self.server, self.command_timeout).await?;
            Ok(Box::new(session))
        }
    }
}

#[async_trait]
impl SessionConnector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn NntpSession>, NntpError> {
        debug!(server = %self.server.address(), tls = self.server.use_tls, "connecting to nntp server");
        timeout(self.connect_timeout, self.open())
            .await
            .map_err(|_| NntpError::Timeout)?
    }
}

/// Implicit-TLS session backed by [`nntp_rs::NntpClient`]
pub struct TlsSession {
    client: NntpClient,
    command_timeout: Duration,
}

impl TlsSession {
    async fn open(server: &NntpServerConfig, command_timeout: Duration) -> Result<Self, NntpError> {
        let mut client = NntpClient::connect(Arc::new(server.clone().into())).await?;
        if server.user.is_some() {
            client.authenticate().await?;
        }
        Ok(Self {
            client,
            command_timeout,
        })
    }
}

#[async_trait]
impl NntpSession for TlsSession {
    async fn stat(&mut self, message_id: &str) -> Result<(), NntpError> {
        let id = bracketed(message_id);
        timeout(self.command_timeout, self.client.stat(&id))
            .await
            .map_err(|_| NntpError::Timeout)??;
        Ok(())
    }

    async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        let id = bracketed(message_id);
        let response = timeout(self.command_timeout, self.client.fetch_body_binary(&id))
            .await
            .map_err(|_| NntpError::Timeout)??;
        Ok(response.data)
    }

    async fn quit(&mut self) {
        if let Ok(Err(e)) = timeout(QUIT_TIMEOUT, self.client.quit()).await {
            debug!(error = %e, "nntp quit failed");
        }
    }
}

/// Plain-text session over a tokio socket
pub struct PlainSession {
    stream: BufReader<TcpStream>,
    command_timeout: Duration,
}

impl PlainSession {
    async fn open(server: &NntpServerConfig, command_timeout: Duration) -> Result<Self, NntpError> {
        let tcp = TcpStream::connect((server.host.as_str(), server.port)).await?;
        tcp.set_nodelay(true)?;
        let mut session = Self {
            stream: BufReader::new(tcp),
            command_timeout,
        };

        let (code, message) = session.read_status().await?;
        if code != codes::READY_POSTING_ALLOWED && code != codes::READY_NO_POSTING {
            return Err(NntpError::Protocol { code, message });
        }
        if let Some(user) = &server.user {
            session.authenticate(user, server.pass.as_deref()).await?;
        }
        Ok(session)
    }

    /// Send a command built by [`nntp_rs::commands`] (CRLF included)
    async fn send(&mut self, command: &str) -> Result<(), NntpError> {
        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self, line: &mut Vec<u8>) -> Result<(), NntpError> {
        line.clear();
        if self.stream.read_until(b'\n', line).await? == 0 {
            return Err(NntpError::ConnectionClosed);
        }
        Ok(())
    }

    async fn read_status(&mut self) -> Result<(u16, String), NntpError> {
        let mut line = Vec::with_capacity(128);
        self.read_line(&mut line).await?;
        let text = String::from_utf8_lossy(&line);
        Ok(commands::parse_response_line(text.trim_end())?)
    }

    async fn authenticate(&mut self, user: &str, pass: Option<&str>) -> Result<(), NntpError> {
        self.send(&commands::authinfo_user(user)).await?;
        let (code, message) = self.read_status().await?;
        match code {
            codes::AUTH_ACCEPTED => return Ok(()),
            codes::AUTH_CONTINUE => {}
            _ => return Err(NntpError::AuthFailed(format!("{} {}", code, message))),
        }
        debug!("AUTHINFO PASS ****");
        self.send(&commands::authinfo_pass(pass.unwrap_or(""))).await?;
        let (code, message) = self.read_status().await?;
        if code != codes::AUTH_ACCEPTED {
            return Err(NntpError::AuthFailed(format!("{} {}", code, message)));
        }
        Ok(())
    }

    /// Multi-line block up to the lone `.`
    async fn read_block(&mut self) -> Result<Vec<u8>, NntpError> {
        let mut body = Vec::with_capacity(64 * 1024);
        let mut line = Vec::with_capacity(1024);
        loop {
            self.read_line(&mut line).await?;
            let mut content = line.as_slice();
            if let Some(stripped) = content.strip_suffix(b"\n") {
                content = stripped;
            }
            if let Some(stripped) = content.strip_suffix(b"\r") {
                content = stripped;
            }
            if content == b"." {
                return Ok(body);
            }
            if content.starts_with(b"..") {
                content = &content[1..];
            }
            body.extend_from_slice(content);
            body.push(b'\n');
        }
    }

    async fn stat_inner(&mut self, id: &str) -> Result<(), NntpError> {
        self.send(&commands::stat(id)).await?;
        let (code, message) = self.read_status().await?;
        match code {
            codes::ARTICLE_STAT => Ok(()),
            codes::NO_SUCH_ARTICLE_ID | codes::NO_SUCH_ARTICLE_NUMBER => {
                Err(NntpError::ArticleNotFound(id.to_string()))
            }
            _ => Err(NntpError::Protocol { code, message }),
        }
    }

    async fn body_inner(&mut self, id: &str) -> Result<Vec<u8>, NntpError> {
        self.send(&commands::body(id)).await?;
        let (code, message) = self.read_status().await?;
        match code {
            codes::BODY_FOLLOWS => self.read_block().await,
            codes::NO_SUCH_ARTICLE_ID | codes::NO_SUCH_ARTICLE_NUMBER => {
                Err(NntpError::ArticleNotFound(id.to_string()))
            }
            _ => Err(NntpError::Protocol { code, message }),
        }
    }
}

#[async_trait]
impl NntpSession for PlainSession {
    async fn stat(&mut self, message_id: &str) -> Result<(), NntpError> {
        let id = bracketed(message_id);
        let limit = self.command_timeout;
        timeout(limit, self.stat_inner(&id))
            .await
            .map_err(|_| NntpError::Timeout)?
    }

    async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        let id = bracketed(message_id);
        let limit = self.command_timeout;
        timeout(limit, self.body_inner(&id))
            .await
            .map_err(|_| NntpError::Timeout)?
    }

    async fn quit(&mut self) {
        let goodbye = async {
            self.send(commands::quit()).await?;
            self.read_status().await?;
            self.stream.get_mut().shutdown().await?;
            Ok::<(), NntpError>(())
        };
        if let Ok(Err(e)) = timeout(QUIT_TIMEOUT, goodbye).await {
            debug!(error = %e, "nntp quit failed");
        }
    }
}
