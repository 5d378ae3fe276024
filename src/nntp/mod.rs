//! NNTP access: sessions, the connection pool and the shared pool registry

mod pool;
pub(crate) mod registry;
mod session;

pub use pool::{NntpPool, PoolOptions, PoolStatus, PooledClient};
pub use session::{bracketed, NntpSession, PlainSession, SessionConnector, TcpConnector, TlsSession};

#[cfg(test)]
pub(crate) use pool::tests::MemoryConnector;
