//! Fixed-size NNTP connection pool
//!
//! Sessions are opened lazily: an `acquire` that finds nothing idle queues
//! itself as a waiter and, while fewer than `size` sessions exist, starts a
//! connect whose session goes to the oldest waiter. Released sessions go to
//! the oldest waiter first and to the idle list otherwise, so waiters are
//! served in FIFO order.
//!
//! A session whose protocol state is unknown (transport error, or a
//! [`PooledClient`] dropped mid-command because its caller gave up) is never
//! reused: it is discarded and a replacement connect keeps the pool at size.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{NntpSession, SessionConnector};
use crate::error::NntpError;

/// Pool sizing and keep-alive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum number of sessions
    pub size: usize,
    /// Probe sessions idle for longer than this, `None` disables probing
    pub keep_alive: Option<Duration>,
}

/// Point-in-time view of the pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Sessions connected or connecting, idle or checked out
    pub live: usize,
    /// Sessions waiting in the idle list
    pub idle: usize,
    /// Callers waiting for a session
    pub waiting: usize,
    /// `close` has been called
    pub closing: bool,
}

type Waiter = oneshot::Sender<Result<PooledClient, NntpError>>;

struct IdleSession {
    session: Box<dyn NntpSession>,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleSession>,
    waiters: VecDeque<Waiter>,
    live: usize,
    closing: bool,
}

struct PoolInner {
    connector: Arc<dyn SessionConnector>,
    size: usize,
    state: Mutex<PoolState>,
    shutdown: CancellationToken,
}

/// Handle to a pool; clones share the same sessions
#[derive(Clone)]
pub struct NntpPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for NntpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NntpPool")
            .field("size", &self.inner.size)
            .field("status", &self.status())
            .finish()
    }
}

/// Session address for keep-alive probes; never routable
fn probe_message_id() -> String {
    format!("keepalive-{:016x}@nzb-triage.invalid", rand::random::<u64>())
}

impl NntpPool {
    /// Create an empty pool. With keep-alive enabled this spawns the probe
    /// task and must run inside a tokio runtime.
    pub fn new(connector: Arc<dyn SessionConnector>, options: PoolOptions) -> Self {
        let pool = Self {
            inner: Arc::new(PoolInner {
                connector,
                size: options.size.max(1),
                state: Mutex::new(PoolState::default()),
                shutdown: CancellationToken::new(),
            }),
        };
        if let Some(interval) = options.keep_alive {
            pool.start_keep_alive(interval);
        }
        pool
    }

    /// Maximum number of sessions
    pub fn size(&self) -> usize {
        self.inner.size
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // a panic while holding the lock leaves counters that are still usable
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current counts
    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        PoolStatus {
            live: state.live,
            idle: state.idle.len(),
            waiting: state.waiters.len(),
            closing: state.closing,
        }
    }

    /// Whether `close` has been called
    pub fn is_closing(&self) -> bool {
        self.lock().closing
    }

    /// Whether both handles point at the same pool
    pub fn ptr_eq(&self, other: &NntpPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Open up to `count` sessions now and park them idle.
    ///
    /// Returns how many connected; fails only when every attempt failed.
    pub async fn warm(&self, count: usize) -> Result<usize, NntpError> {
        let wanted = {
            let mut state = self.lock();
            if state.closing {
                return Err(NntpError::PoolClosing);
            }
            let n = count.min(self.inner.size.saturating_sub(state.live));
            state.live += n;
            n
        };
        if wanted == 0 {
            return Ok(0);
        }
        let results = join_all((0..wanted).map(|_| self.inner.connector.connect())).await;
        let mut connected = 0;
        let mut last_error = None;
        for result in results {
            match result {
                Ok(session) => {
                    connected += 1;
                    self.hand_over(session);
                }
                Err(e) => last_error = self.connect_failed(e),
            }
        }
        match last_error {
            Some(e) if connected == 0 => Err(e),
            _ => Ok(connected),
        }
    }

    /// Check out a session, waiting for one if none is idle
    pub async fn acquire(&self) -> Result<PooledClient, NntpError> {
        let receiver = {
            let mut state = self.lock();
            if state.closing {
                return Err(NntpError::PoolClosing);
            }
            if let Some(idle) = state.idle.pop_front() {
                return Ok(PooledClient::new(self.clone(), idle.session));
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            if state.live < self.inner.size {
                state.live += 1;
                drop(state);
                self.spawn_connect();
            }
            receiver
        };
        receiver.await.unwrap_or(Err(NntpError::PoolClosing))
    }

    /// Return a session. `discard` throws it away and starts a replacement.
    pub fn release(&self, client: PooledClient, discard: bool) {
        client.release(discard);
    }

    /// Stop handing out sessions: waiters get [`NntpError::PoolClosing`], idle
    /// sessions are closed now and checked-out ones when they come back.
    pub async fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.lock();
            if state.closing {
                return;
            }
            state.closing = true;
            let idle: Vec<IdleSession> = state.idle.drain(..).collect();
            state.live = state.live.saturating_sub(idle.len());
            let waiters: Vec<Waiter> = state.waiters.drain(..).collect();
            (idle, waiters)
        };
        self.inner.shutdown.cancel();
        info!(
            closed_idle = idle.len(),
            rejected_waiters = waiters.len(),
            "closing nntp pool"
        );
        for waiter in waiters {
            let _ = waiter.send(Err(NntpError::PoolClosing));
        }
        join_all(idle.into_iter().map(|mut idle| async move {
            idle.session.quit().await;
        }))
        .await;
    }

    fn spawn_connect(&self) {
        let pool = self.clone();
        tokio::spawn(async move {
            match pool.inner.connector.connect().await {
                Ok(session) => pool.hand_over(session),
                Err(e) => {
                    warn!(error = %e, "nntp connect failed");
                    if let Some(e) = pool.connect_failed(e) {
                        debug!(error = %e, "connect failure not delivered to a waiter");
                    }
                }
            }
        });
    }

    /// Account for a failed connect. With nothing else live, the oldest
    /// waiter gets the error and the next waiter gets a fresh attempt; the
    /// error comes back when no waiter took it.
    fn connect_failed(&self, error: NntpError) -> Option<NntpError> {
        let mut state = self.lock();
        state.live = state.live.saturating_sub(1);
        if state.live > 0 || state.closing {
            return Some(error);
        }
        let mut error = error;
        loop {
            let Some(waiter) = state.waiters.pop_front() else {
                return Some(error);
            };
            match waiter.send(Err(error)) {
                Ok(()) => break,
                // waiter already gone
                Err(Err(e)) => error = e,
                Err(Ok(client)) => {
                    drop(client.into_session());
                    return None;
                }
            }
        }
        if !state.waiters.is_empty() && state.live < self.inner.size {
            state.live += 1;
            drop(state);
            self.spawn_connect();
        }
        None
    }

    /// Give a healthy session to the oldest waiter, or park it idle
    fn hand_over(&self, session: Box<dyn NntpSession>) {
        let mut state = self.lock();
        if state.closing {
            state.live = state.live.saturating_sub(1);
            drop(state);
            quit_in_background(session);
            return;
        }
        let mut session = session;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(Ok(PooledClient::new(self.clone(), session))) {
                Ok(()) => return,
                Err(returned) => match returned.ok().and_then(PooledClient::into_session) {
                    Some(back) => session = back,
                    None => return,
                },
            }
        }
        state.idle.push_back(IdleSession {
            session,
            since: Instant::now(),
        });
    }

    fn give_back(&self, session: Box<dyn NntpSession>, discard: bool) {
        if !discard {
            self.hand_over(session);
            return;
        }
        drop(session);
        let mut state = self.lock();
        state.live = state.live.saturating_sub(1);
        if state.closing {
            return;
        }
        debug!(live = state.live, "discarded nntp session, reconnecting");
        if state.live < self.inner.size {
            state.live += 1;
            drop(state);
            self.spawn_connect();
        }
    }

    fn start_keep_alive(&self, interval: Duration) {
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                NntpPool { inner }.probe_idle(interval).await;
            }
            debug!("nntp keep-alive stopped");
        });
    }

    /// STAT a synthetic id on every session idle for at least `min_idle`
    async fn probe_idle(&self, min_idle: Duration) {
        let stale: Vec<IdleSession> = {
            let mut state = self.lock();
            let (stale, fresh): (Vec<_>, Vec<_>) = state
                .idle
                .drain(..)
                .partition(|idle| idle.since.elapsed() >= min_idle);
            state.idle = fresh.into();
            stale
        };
        for mut idle in stale {
            match idle.session.stat(&probe_message_id()).await {
                Ok(()) => self.give_back(idle.session, false),
                Err(e) if e.is_missing_article() => self.give_back(idle.session, false),
                Err(e) => {
                    warn!(error = %e, "keep-alive probe failed, replacing session");
                    self.give_back(idle.session, true);
                }
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn quit_in_background(mut session: Box<dyn NntpSession>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move { session.quit().await });
    }
}

/// A checked-out session.
///
/// Call [`release`](Self::release) when done. Dropping it instead discards the
/// session, since a caller that stopped polling may have left a response
/// half-read.
pub struct PooledClient {
    session: Option<Box<dyn NntpSession>>,
    pool: NntpPool,
}

impl PooledClient {
    fn new(pool: NntpPool, session: Box<dyn NntpSession>) -> Self {
        Self {
            session: Some(session),
            pool,
        }
    }

    fn into_session(mut self) -> Option<Box<dyn NntpSession>> {
        self.session.take()
    }

    fn session(&mut self) -> Result<&mut Box<dyn NntpSession>, NntpError> {
        self.session
            .as_mut()
            .ok_or_else(|| NntpError::Unavailable("session already released".into()))
    }

    /// `STAT` through this session
    pub async fn stat(&mut self, message_id: &str) -> Result<(), NntpError> {
        self.session()?.stat(message_id).await
    }

    /// `BODY` through this session
    pub async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        self.session()?.body(message_id).await
    }

    /// Hand the session back; `discard` replaces it instead of reusing it
    pub fn release(mut self, discard: bool) {
        if let Some(session) = self.session.take() {
            self.pool.give_back(session, discard);
        }
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.give_back(session, true);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory sessions answering from a set of present message-ids
    #[derive(Default)]
    pub(crate) struct MemoryConnector {
        pub present: HashSet<String>,
        pub connects: AtomicUsize,
        pub fail_connects: bool,
        pub stat_calls: Arc<AtomicUsize>,
    }

    struct MemorySession {
        present: HashSet<String>,
        stat_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NntpSession for MemorySession {
        async fn stat(&mut self, message_id: &str) -> Result<(), NntpError> {
            self.stat_calls.fetch_add(1, Ordering::SeqCst);
            if self.present.contains(message_id) {
                Ok(())
            } else {
                Err(NntpError::ArticleNotFound(message_id.to_string()))
            }
        }

        async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
            self.stat(message_id).await.map(|_| b"body\n".to_vec())
        }

        async fn quit(&mut self) {}
    }

    #[async_trait]
    impl SessionConnector for MemoryConnector {
        async fn connect(&self) -> Result<Box<dyn NntpSession>, NntpError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connects {
                return Err(NntpError::Io(std::io::Error::other("refused")));
            }
            Ok(Box::new(MemorySession {
                present: self.present.clone(),
                stat_calls: self.stat_calls.clone(),
            }))
        }
    }

    fn pool(connector: Arc<MemoryConnector>, size: usize) -> NntpPool {
        NntpPool::new(connector, PoolOptions { size, keep_alive: None })
    }

    fn connector_with(ids: &[&str]) -> Arc<MemoryConnector> {
        Arc::new(MemoryConnector {
            present: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn released_sessions_are_reused() {
        let connector = connector_with(&["a@b"]);
        let pool = pool(connector.clone(), 4);
        for _ in 0..3 {
            let mut client = pool.acquire().await.unwrap();
            client.stat("a@b").await.unwrap();
            client.release(false);
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().idle, 1);
        assert_eq!(pool.status().live, 1);
    }

    #[tokio::test]
    async fn waiters_are_served_in_order() {
        let connector = connector_with(&[]);
        let pool = pool(connector.clone(), 1);
        let first = pool.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let waiter_pool = pool.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let client = waiter_pool.acquire().await.unwrap();
                order.lock().unwrap().push(i);
                client.release(false);
            }));
            // let each waiter queue before the next
            while pool.status().waiting < i + 1 {
                tokio::task::yield_now().await;
            }
        }
        first.release(false);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_clients_are_replaced() {
        let connector = connector_with(&[]);
        let pool = pool(connector.clone(), 2);
        let client = pool.acquire().await.unwrap();
        drop(client);
        // the replacement connect runs in the background
        for _ in 0..100 {
            if pool.status().idle == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().live, 1);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn connect_failure_reaches_the_waiter() {
        let connector = Arc::new(MemoryConnector {
            fail_connects: true,
            ..Default::default()
        });
        let pool = pool(connector, 2);
        let err = pool.acquire().await.err().unwrap();
        assert!(err.is_transport());
        assert_eq!(pool.status().live, 0);
        assert!(pool.warm(2).await.is_err());
    }

    #[tokio::test]
    async fn close_rejects_waiters_and_new_acquires() {
        let connector = connector_with(&[]);
        let pool = pool(connector, 1);
        let held = pool.acquire().await.unwrap();
        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.err() })
        };
        while pool.status().waiting == 0 {
            tokio::task::yield_now().await;
        }
        pool.close().await;
        assert!(matches!(waiting.await.unwrap(), Some(NntpError::PoolClosing)));
        assert!(matches!(pool.acquire().await.err(), Some(NntpError::PoolClosing)));
        held.release(false);
        assert_eq!(pool.status().live, 0);
    }

    #[tokio::test]
    async fn warm_fills_up_to_size() {
        let connector = connector_with(&[]);
        let pool = pool(connector.clone(), 3);
        assert_eq!(pool.warm(5).await.unwrap(), 3);
        assert_eq!(pool.status().idle, 3);
        assert_eq!(pool.warm(1).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_probes_idle_sessions() {
        let connector = connector_with(&[]);
        let pool = NntpPool::new(
            connector.clone(),
            PoolOptions {
                size: 1,
                keep_alive: Some(Duration::from_millis(50)),
            },
        );
        pool.warm(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(connector.stat_calls.load(Ordering::SeqCst) >= 1);
        // a 430 answer keeps the session
        assert_eq!(pool.status().idle, 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        pool.close().await;
    }

    #[test]
    fn probe_ids_are_unroutable() {
        let id = probe_message_id();
        assert!(id.starts_with("keepalive-"));
        assert!(id.ends_with("@nzb-triage.invalid"));
        assert_ne!(id, probe_message_id());
    }
}
