//! Common test utilities for nzb-triage integration tests

#[allow(dead_code)]
pub mod fake_server;
#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod live;

#[allow(unused_imports)]
pub use fake_server::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use live::*;
