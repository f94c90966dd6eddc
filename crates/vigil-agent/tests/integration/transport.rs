//! Framing and connection lifecycle over real sockets.

use serde_json::json;
use vigil_protocol::envelope::EnvelopeType;
use vigil_protocol::ErrorCode;

use crate::harness::{AgentOptions, TestAgent, TestClient};

#[tokio::test]
async fn test_malformed_json_is_per_message() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let token = agent.mint(&[]);
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    client.send_raw(b"{not json").await;
    let reply = client.recv().await.unwrap();
    assert_eq!(reply.code, Some(ErrorCode::BadRequest));
    assert!(reply.id.is_none());

    // The connection is still usable afterwards.
    let reply = client.auth(&token).await;
    assert_eq!(reply.t, EnvelopeType::Res);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_version_is_per_message() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    client
        .send_raw(br#"{"v":9,"t":"req","id":"x","act":"PING"}"#)
        .await;
    let reply = client.recv().await.unwrap();
    assert_eq!(reply.code, Some(ErrorCode::BadRequest));
    assert!(reply.msg.unwrap().contains("version"));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_non_request_envelope_rejected() {
    let agent = TestAgent::spawn(AgentOptions::default()).await;
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    client.send_raw(br#"{"v":1,"t":"hello"}"#).await;
    let reply = client.recv().await.unwrap();
    assert_eq!(reply.code, Some(ErrorCode::BadRequest));
    assert!(reply.msg.unwrap().contains("envelope type"));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let agent = TestAgent::spawn(AgentOptions {
        max_frame_bytes: 1024,
        ..AgentOptions::default()
    })
    .await;
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    // Declare a frame over the limit; the payload never needs to arrive.
    client.send_length_header(4096).await;

    let reply = client.recv().await.unwrap();
    assert_eq!(reply.code, Some(ErrorCode::PayloadTooLarge));

    // Fatal: the server hangs up after the notice.
    assert!(client.recv().await.is_none());

    agent.shutdown().await;
}

#[tokio::test]
async fn test_auth_grace_expiry_closes_connection() {
    let agent = TestAgent::spawn(AgentOptions {
        auth_grace_secs: 1,
        ..AgentOptions::default()
    })
    .await;
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    let reply = client.recv().await.unwrap();
    assert_eq!(reply.code, Some(ErrorCode::Connection));
    assert!(reply.msg.unwrap().contains("authentication timeout"));
    assert!(client.recv().await.is_none());

    agent.shutdown().await;
}

#[tokio::test]
async fn test_idle_timeout_closes_authenticated_connection() {
    let agent = TestAgent::spawn(AgentOptions {
        idle_timeout_secs: 1,
        auth_grace_secs: 30,
        ..AgentOptions::default()
    })
    .await;
    let token = agent.mint(&[]);
    let (mut client, _hello) = TestClient::connect(agent.addr).await;

    let reply = client.auth(&token).await;
    assert_eq!(reply.t, EnvelopeType::Res);

    let notice = client.recv().await.unwrap();
    assert_eq!(notice.code, Some(ErrorCode::Connection));
    assert!(notice.msg.unwrap().contains("idle timeout"));
    assert!(client.recv().await.is_none());

    agent.shutdown().await;
}

#[tokio::test]
async fn test_activity_defers_idle_timeout() {
    let agent = TestAgent::spawn(AgentOptions {
        idle_timeout_secs: 2,
        auth_grace_secs: 30,
        ..AgentOptions::default()
    })
    .await;
    let token = agent.mint(&[]);
    let (mut client, _hello) = TestClient::connect(agent.addr).await;
    client.auth(&token).await;

    // Keep the connection busy past the original deadline.
    for _ in 0..3 {
        tokio::time::sleep(std::time::Duration::from_millis(900)).await;
        let reply = client.request("PING", Some(json!({}))).await;
        assert_eq!(reply.t, EnvelopeType::Res);
    }

    agent.shutdown().await;
}
