//! Integration tests for the session manager and authorized pipeline.
//!
//! These run a real `SessionManager` against an in-process mock backend.
//!
//! Tests are organized into:
//! - `harness.rs`: Mock backend and test harness
//! - `login.rs`: Login, logout, and shutdown flows
//! - `restore.rs`: Restoring a persisted session on startup
//! - `single_flight.rs`: Concurrent 401s sharing one refresh
//! - `refresh_failure.rs`: Forced logout when a refresh cannot succeed
//! - `register.rs`: Account registration


mod refresh_failure;

#[allow(unused_imports)]
pub(crate) use harness::{MockBackend, RefreshReply, TestHarness};
