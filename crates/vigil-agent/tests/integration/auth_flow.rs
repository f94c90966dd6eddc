//! Authentication and authorization over a real TCP connection.

use serde_json::json;
use vigil_protocol::envelope::EnvelopeType;
use vigil_protocol::ErrorCode;

use crate::harness::{AgentOptions, TestAgent, TestClient};

#[tokio::test]
async fn test_hello_advertises_limits() {
    let agent = TestAgent::spawn(AgentOptions {
        max_in_flight: 3,
        max_frame_bytes: 4096,
        ..AgentOptions::default()
    })
    .await;

    let (_client, hello) = TestClient::connect(agent.addr).await;
    assert_eq!(hello.t, EnvelopeType::Hello);
    let data = hello.data.unwrap();
    assert_eq!(data["maxFrame"], 4096);
    assert_eq!(data["maxInFlight"], 3);
    assert_eq!(data["serverVersion"], 1);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_unauthenticated_request_rejected() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    let reply = client.request("GET_OS_INFO", None).await;
    assert_eq!(reply.t, EnvelopeType::Err);
    assert_eq!(reply.code, Some(ErrorCode::AuthRequired));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_auth_then_os_info() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let token = agent.mint(&[]);
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    let reply = client.auth(&token).await;
    assert_eq!(reply.t, EnvelopeType::Res, "{reply:?}");
    assert_eq!(reply.data.as_ref().unwrap()["authenticated"], true);

    let reply = client.request("GET_OS_INFO", None).await;
    assert_eq!(reply.t, EnvelopeType::Res);
    let data = reply.data.unwrap();
    assert_eq!(data["platform"], std::env::consts::OS);
    assert!(data["pid"].as_u64().unwrap() > 0);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_invalid_credential_rejected() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    let reply = client.auth("deadbeef.bogus").await;
    assert_eq!(reply.code, Some(ErrorCode::InvalidToken));

    // The connection survives a failed AUTH; a valid one still works.
    let token = agent.mint(&[]);
    let reply = client.auth(&token).await;
    assert_eq!(reply.t, EnvelopeType::Res);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_revoked_token_rejected() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let token = agent.mint(&["snapshot:create"]);
    let token_id = token.split_once('.').unwrap().0.to_string();
    vigil_storage::TokenStore::mark_revoked(agent.store.as_ref(), &token_id).unwrap();

    let (mut client, _hello) = TestClient::connect(agent.addr).await;
    let reply = client.auth(&token).await;
    assert_eq!(reply.code, Some(ErrorCode::InvalidToken));
    assert!(reply.msg.unwrap().contains("revoked"));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_wrong_scope_snapshot_forbidden() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let token = agent.mint(&["os:read"]);
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    client.auth(&token).await;
    let reply = client.request("SNAPSHOT", None).await;
    assert_eq!(reply.code, Some(ErrorCode::Forbidden));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_with_scope() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let token = agent.mint(&["snapshot:create"]);
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    client.auth(&token).await;
    let reply = client
        .request("SNAPSHOT", Some(json!({ "width": 640, "height": 480 })))
        .await;
    assert_eq!(reply.t, EnvelopeType::Res, "{reply:?}");
    let data = reply.data.unwrap();
    assert_eq!(data["width"], 640);
    assert_eq!(data["height"], 480);
    assert_eq!(data["cameraId"], "/dev/video0");
    assert_eq!(data["encoding"], "base64");

    agent.shutdown().await;
}

#[tokio::test]
async fn test_wildcard_scope_allows_snapshot() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let token = agent.mint(&["*"]);
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    client.auth(&token).await;
    let reply = client.request("SNAPSHOT", None).await;
    assert_eq!(reply.t, EnvelopeType::Res);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_second_auth_rejected() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let token = agent.mint(&["*"]);
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    client.auth(&token).await;
    let reply = client.auth(&token).await;
    assert_eq!(reply.code, Some(ErrorCode::BadRequest));

    agent.shutdown().await;
}
