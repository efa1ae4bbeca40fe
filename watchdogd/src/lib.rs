//! Watchdog hub.
//!
//! Agents push alerts over the RPC listener ([`rpc_server`]); each alert is
//! logged once and fanned out by the [`hub::Hub`] to every observer held in
//! the [`registry::Registry`], which is fed by the WebSocket push channel
//! ([`push_server`]).

pub mod hub;
pub mod push_server;
pub mod registry;
pub mod rpc_server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use watchdog_common::Shutdown;

use crate::hub::Hub;

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub rpc_addr: String,
    pub http_addr: String,
    pub endpoint: String,
    pub push_timeout: Duration,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            rpc_addr: "0.0.0.0:40090".to_string(),
            http_addr: "0.0.0.0:40080".to_string(),
            endpoint: watchdog_common::PUSH_ENDPOINT.to_string(),
            push_timeout: registry::DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Both listeners bound and serving.
pub struct RunningHub {
    pub hub: Arc<Hub>,
    pub rpc_addr: SocketAddr,
    pub push_addr: SocketAddr,
    rpc_task: JoinHandle<Result<()>>,
    push_task: JoinHandle<Result<()>>,
}

/// Push endpoint as a route path: trimmed, with a leading `/`.
pub fn normalize_endpoint(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("push endpoint must not be empty"));
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{}", trimmed))
    }
}

/// Bind the RPC and push listeners and start serving them. A bad endpoint or
/// a bind failure is returned to the caller before anything is spawned.
pub async fn start(options: &HubOptions, shutdown: &Shutdown) -> Result<RunningHub> {
    let endpoint = normalize_endpoint(&options.endpoint)?;
    let rpc_listener = TcpListener::bind(&options.rpc_addr)
        .await
        .with_context(|| format!("Failed to bind alert RPC listener to {}", options.rpc_addr))?;
    let push_listener = TcpListener::bind(&options.http_addr)
        .await
        .with_context(|| format!("Failed to bind push channel to {}", options.http_addr))?;

    let rpc_addr = rpc_listener.local_addr()?;
    let push_addr = push_listener.local_addr()?;
    let hub = Arc::new(Hub::new(options.push_timeout));

    info!("alert RPC listening on {}", rpc_addr);
    info!(
        "observer push channel listening on ws://{}{}",
        push_addr, endpoint
    );

    let rpc_task = tokio::spawn(rpc_server::serve_rpc(
        rpc_listener,
        hub.clone(),
        shutdown.listener(),
    ));

    let push_hub = hub.clone();
    let push_shutdown = shutdown.listener();
    let push_task = tokio::spawn(async move {
        push_server::serve_push(push_listener, push_hub, &endpoint, push_shutdown).await
    });

    Ok(RunningHub {
        hub,
        rpc_addr,
        push_addr,
        rpc_task,
        push_task,
    })
}

impl RunningHub {
    /// Close every observer and wait up to `grace` for both listeners to
    /// stop. The shutdown signal must already be triggered. Returns `false`
    /// when the grace window ran out.
    pub async fn stop(self, grace: Duration) -> bool {
        self.hub.registry().close_all().await;

        let joined = tokio::time::timeout(grace, async {
            for (name, task) in [("RPC", self.rpc_task), ("push", self.push_task)] {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("{} listener failed: {:#}", name, e),
                    Err(e) => error!("{} listener panicked: {}", name, e),
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!("listeners still busy after {:?}, exiting anyway", grace);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_leading_slash() {
        assert_eq!(normalize_endpoint("ws/connect").unwrap(), "/ws/connect");
        assert_eq!(normalize_endpoint("/ws/connect").unwrap(), "/ws/connect");
        assert_eq!(normalize_endpoint(" /ws ").unwrap(), "/ws");
        assert!(normalize_endpoint("  ").is_err());
    }
}
