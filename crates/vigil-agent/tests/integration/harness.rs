//! Test harness for in-process vigil-agent integration tests.
//!
//! Provides TestAgent (a full server on port 0 with a tempfile token DB)
//! and TestClient (a real TCP client speaking the framed protocol).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

use vigil_agent::commands::{builtin_registry, CameraService, Capture};
use vigil_agent::commands::snapshot::{CaptureFuture, SnapshotParams};
use vigil_agent::config::AgentConfig;
use vigil_agent::connection::ConnectionSettings;
use vigil_agent::pipeline::Pipeline;
use vigil_agent::registry::CommandDefinition;
use vigil_agent::server::AgentServer;
use vigil_auth::{mint_token, TokenService};
use vigil_protocol::codec::FrameCodec;
use vigil_protocol::envelope::{make_request, parse_envelope, Envelope};

/// Camera backend that returns a fixed frame without touching hardware.
pub struct MockCamera;

impl CameraService for MockCamera {
    fn capture(&self, params: SnapshotParams) -> CaptureFuture {
        Box::pin(async move {
            Ok(Capture {
                format: "jpeg".into(),
                width: params.width,
                height: params.height,
                size: 4,
                data: "/9j/AA==".into(),
            })
        })
    }
}

/// SLEEP: auth-only command that holds its in-flight slot for `delayMs`.
fn sleep_command() -> CommandDefinition {
    CommandDefinition {
        name: "SLEEP",
        required_scopes: vec![],
        validator: None,
        handler: Box::new(|payload, _ctx| {
            Box::pin(async move {
                let ms = payload.get("delayMs").and_then(Value::as_u64).unwrap_or(200);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "slept": ms }))
            })
        }),
    }
}

pub struct AgentOptions {
    pub max_in_flight: u32,
    pub rate_capacity: u32,
    pub rate_refill_per_sec: f64,
    pub idle_timeout_secs: u64,
    pub auth_grace_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            rate_capacity: 100,
            rate_refill_per_sec: 100.0,
            idle_timeout_secs: 30,
            auth_grace_secs: 30,
            max_frame_bytes: 256 * 1024,
        }
    }
}

pub struct TestAgent {
    pub addr: SocketAddr,
    pub store: Arc<vigil_storage::SqliteTokenStore>,
    shutdown_tx: broadcast::Sender<()>,
    _tempdir: tempfile::TempDir,
    _serve: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl TestAgent {
    pub async fn spawn(opts: AgentOptions) -> Self {
        let tempdir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            vigil_storage::SqliteTokenStore::open(&tempdir.path().join("tokens.db")).unwrap(),
        );

        let mut cfg = AgentConfig::default_with_roles();
        cfg.limits.max_in_flight = opts.max_in_flight;
        cfg.limits.rate_capacity = opts.rate_capacity;
        cfg.limits.rate_refill_per_sec = opts.rate_refill_per_sec;
        cfg.limits.idle_timeout_secs = opts.idle_timeout_secs;
        cfg.limits.auth_grace_secs = opts.auth_grace_secs;
        cfg.protocol.max_frame_bytes = opts.max_frame_bytes;

        let tokens = TokenService::new(store.clone());
        let mut registry = builtin_registry(&cfg, Arc::new(MockCamera));
        registry.register(sleep_command());

        let pipeline = Arc::new(Pipeline::new(
            Arc::new(registry),
            tokens,
            cfg.limits.max_in_flight,
        ));
        let settings = ConnectionSettings::from_config(&cfg);

        let (shutdown_tx, _) = broadcast::channel(1);
        let server = AgentServer::bind("127.0.0.1:0", pipeline, settings)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let serve = tokio::spawn(server.serve(shutdown_tx.clone()));

        Self {
            addr,
            store,
            shutdown_tx,
            _tempdir: tempdir,
            _serve: serve,
        }
    }

    /// Mint a credential directly in the agent's store.
    pub fn mint(&self, scopes: &[&str]) -> String {
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        mint_token(self.store.as_ref(), &scopes, None)
            .unwrap()
            .display
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub struct TestClient {
    framed: Framed<TcpStream, FrameCodec>,
    next_id: u64,
}

#[allow(dead_code)]
impl TestClient {
    /// Connect and consume the server hello.
    pub async fn connect(addr: SocketAddr) -> (Self, Envelope) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let framed = Framed::new(stream, FrameCodec::new(1024 * 1024));
        let mut client = Self { framed, next_id: 0 };
        let hello = client.recv().await.expect("server hello");
        (client, hello)
    }

    pub async fn send(&mut self, envelope: Envelope) {
        self.framed.send(envelope).await.unwrap();
    }

    /// Next envelope, or None once the server closes the connection.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let frame = tokio::time::timeout(Duration::from_secs(10), self.framed.next())
            .await
            .expect("timed out waiting for a frame");
        match frame {
            Some(Ok(raw)) => Some(parse_envelope(&raw).expect("server sent invalid envelope")),
            Some(Err(_)) | None => None,
        }
    }

    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("t-{}", self.next_id)
    }

    /// Send one request and return its id without waiting for a reply.
    pub async fn send_request(&mut self, action: &str, data: Option<Value>) -> String {
        let id = self.fresh_id();
        self.send(make_request(&id, action, data)).await;
        id
    }

    /// Send one request and wait for the next envelope.
    pub async fn request(&mut self, action: &str, data: Option<Value>) -> Envelope {
        self.send_request(action, data).await;
        self.recv().await.expect("reply")
    }

    pub async fn auth(&mut self, token: &str) -> Envelope {
        self.request("AUTH", Some(json!({ "token": token }))).await
    }

    /// Write a correctly framed but arbitrary payload, bypassing the
    /// envelope encoder.
    pub async fn send_raw(&mut self, payload: &[u8]) {
        let stream = self.framed.get_mut();
        stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
        stream.flush().await.unwrap();
    }

    /// Write only a length prefix, claiming a frame that never arrives.
    pub async fn send_length_header(&mut self, declared: u32) {
        let stream = self.framed.get_mut();
        stream.write_all(&declared.to_be_bytes()).await.unwrap();
        stream.flush().await.unwrap();
    }
}
