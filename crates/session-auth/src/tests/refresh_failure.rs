//! Forced logout when a refresh cannot succeed.

use super::harness::{RefreshReply, TestHarness, PASSWORD};
use crate::{ApiRequest, AuthError, Credentials, RefreshConfig, SessionStatus};
use futures_util::future::join_all;
use serde_json::json;
use std::time::Duration;
use token_store::{KeyValueStorage, StorageKeys, TokenPair};

const REJECTED: &str = "Given token not valid for any token type";

fn assert_unauthorized(result: crate::AuthResult<serde_json::Value>) {
    match result {
        Err(AuthError::Unauthorized(message)) => assert_eq!(message, REJECTED),
        other => panic!("expected unauthorized, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_refresh_logs_out_once() {
    let harness = TestHarness::logged_in(true).await;
    harness.backend.expire_access();
    harness.backend.set_refresh_default(RefreshReply::Reject);

    let requests = (0..5).map(|_| {
        let client = harness.client.clone();
        async move { client.get_json("/leads/").await }
    });
    for result in join_all(requests).await {
        assert_unauthorized(result);
    }

    assert_eq!(harness.backend.refresh_calls(), 1);
    assert!(harness.session.current_user().is_none());
    assert!(!harness.session.is_authenticated());
    assert!(harness.store().load().is_none());
    assert!(harness.store().load_identity().is_none());
    assert_eq!(harness.notifications_to(SessionStatus::Unauthenticated), 1);
}

#[tokio::test]
async fn test_requests_after_forced_logout_skip_refresh() {
    let harness = TestHarness::logged_in(true).await;
    harness.backend.expire_access();
    harness.backend.set_refresh_default(RefreshReply::Reject);
    assert_unauthorized(harness.client.get_json("/leads/").await);

    let err = harness.client.get_json("/leads/").await.unwrap_err();

    assert!(matches!(err, AuthError::Unauthorized(_)));
    assert_eq!(harness.backend.refresh_calls(), 1);
    assert_eq!(harness.backend.protected_bearers().last(), Some(&None));
}

#[tokio::test]
async fn test_exhausted_transient_failures_log_out() {
    let harness = TestHarness::logged_in(true).await;
    harness.backend.expire_access();
    harness.backend.set_refresh_default(RefreshReply::Unavailable);

    assert_unauthorized(harness.client.get_json("/leads/").await);

    assert_eq!(harness.backend.refresh_calls(), 3);
    assert_eq!(harness.session.status(), SessionStatus::Unauthenticated);
    assert!(harness.store().load().is_none());
    assert_eq!(harness.notifications_to(SessionStatus::Unauthenticated), 1);
}

#[tokio::test]
async fn test_single_attempt_config_does_not_retry_offline_refresh() {
    let harness = TestHarness::with_refresh_config(RefreshConfig {
        max_retries: 1,
        initial_delay_ms: 1,
        max_delay_ms: 1,
    });
    harness.session.initialize().unwrap();
    harness.login(true).await.unwrap();
    harness.backend.expire_access();
    harness.backend.set_refresh_default(RefreshReply::Offline);

    assert_unauthorized(harness.client.get_json("/leads/").await);

    assert_eq!(harness.backend.refresh_calls(), 1);
    assert_eq!(harness.session.status(), SessionStatus::Unauthenticated);
}

#[tokio::test]
async fn test_second_401_is_returned_without_another_refresh() {
    let harness = TestHarness::logged_in(true).await;
    harness.backend.deny_all();

    let response = harness.client.send(ApiRequest::get("/leads/")).await.unwrap();

    assert_eq!(response.status, 401);
    assert_eq!(harness.backend.refresh_calls(), 1);
    assert_eq!(harness.backend.protected_calls(), 2);
    // The refresh itself succeeded, so the session survives
    assert_eq!(harness.session.status(), SessionStatus::Authenticated);
    assert_eq!(harness.store().load(), Some(TokenPair::new("A2", "R1")));
}

#[tokio::test]
async fn test_missing_refresh_token_ends_session() {
    let harness = TestHarness::logged_in(true).await;
    harness.storage.delete(StorageKeys::REFRESH_TOKEN).unwrap();
    harness.backend.expire_access();

    assert_unauthorized(harness.client.get_json("/leads/").await);

    assert_eq!(harness.backend.refresh_calls(), 0);
    assert_eq!(harness.session.status(), SessionStatus::Unauthenticated);
    assert!(harness.storage.is_empty());
}

#[tokio::test]
async fn test_logout_during_refresh_discards_result() {
    let harness = TestHarness::logged_in(true).await;
    harness.backend.expire_access();
    harness.backend.set_refresh_delay(Duration::from_millis(50));

    let client = harness.client.clone();
    let request = tokio::spawn(async move { client.get_json("/leads/").await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.session.logout();

    assert_unauthorized(request.await.unwrap());
    assert_eq!(harness.session.status(), SessionStatus::Unauthenticated);
    assert!(harness.session.access_token().is_none());
    assert!(harness.store().load().is_none());
}

#[tokio::test]
async fn test_shutdown_during_refresh_leaves_store_untouched() {
    let harness = TestHarness::logged_in(true).await;
    harness.backend.expire_access();
    harness.backend.set_refresh_delay(Duration::from_millis(50));

    let client = harness.client.clone();
    let request = tokio::spawn(async move { client.get_json("/leads/").await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.session.shutdown();

    let result = request.await.unwrap();
    assert!(matches!(result, Err(AuthError::SessionClosed)));
    assert_eq!(harness.store().load(), Some(TokenPair::new("A1", "R1")));
    assert_eq!(harness.notifications_to(SessionStatus::Unauthenticated), 0);
}

#[tokio::test]
async fn test_late_401_from_previous_user_gets_no_token() {
    let harness = TestHarness::logged_in(true).await;
    let (rejected, epoch) = harness.session.request_token().unwrap();
    harness.session.logout();

    harness
        .backend
        .set_login_reply(200, json!({ "access": "B1", "refresh": "R9" }));
    harness
        .session
        .login(Credentials::new("bob", PASSWORD), true)
        .await
        .unwrap();

    let err = harness
        .session
        .refresh_access_token(&rejected, epoch)
        .await
        .unwrap_err();

    assert!(matches!(*err, AuthError::NotLoggedIn));
    assert_eq!(harness.backend.refresh_calls(), 0);
    assert_eq!(harness.session.status(), SessionStatus::Authenticated);
    assert_eq!(harness.store().load(), Some(TokenPair::new("B1", "R9")));
}
