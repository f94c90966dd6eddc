//! TCP accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::connection::{handle_connection, ConnectionSettings};
use crate::pipeline::Pipeline;

pub struct AgentServer {
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
    settings: ConnectionSettings,
}

impl AgentServer {
    pub async fn bind(
        addr: &str,
        pipeline: Arc<Pipeline>,
        settings: ConnectionSettings,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "agent listening");
        Ok(Self {
            listener,
            pipeline,
            settings,
        })
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the shutdown channel fires. Each connection
    /// runs on its own task and observes the same shutdown signal.
    pub async fn serve(self, shutdown: broadcast::Sender<()>) {
        let mut shutdown_rx = shutdown.subscribe();
        let mut next_conn_id: u64 = 0;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        next_conn_id += 1;
                        let conn_id = next_conn_id;
                        let pipeline = self.pipeline.clone();
                        let settings = self.settings.clone();
                        let conn_shutdown = shutdown.subscribe();
                        tokio::spawn(async move {
                            handle_connection(stream, conn_id, pipeline, settings, conn_shutdown)
                                .await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("accept loop stopping");
                    break;
                }
            }
        }
    }
}
