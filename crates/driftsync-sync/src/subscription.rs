//! The receive loop shared by source and agent clients.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use driftsync_core::Envelope;

use crate::config::SyncConfig;
use crate::dispatch::KeyedDispatcher;
use crate::error::{Result, SyncError};
use crate::transport::Transport;

/// Side-specific behavior plugged into [`run`].
#[async_trait]
pub(crate) trait EventSink: Send + Sync {
    /// Runs on start and after every reconnect, before any further event.
    async fn on_connected(&self);

    /// Handle one inbound envelope. Must not fail: drops are logged.
    async fn on_event(&self, envelope: Envelope, dispatcher: &KeyedDispatcher);

    /// Housekeeping between receives.
    async fn on_tick(&self);
}

/// Consume events until cancelled.
///
/// Returns `Ok` on cancellation and an error only if the transport is gone
/// for good.
pub(crate) async fn run<S: EventSink>(
    sink: &S,
    transport: &dyn Transport,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let endpoint = transport.local_id().to_string();
    let dispatcher = KeyedDispatcher::new(cancel.child_token(), config.idle_worker_timeout);

    let mut connected = transport.is_connected();
    if connected && config.resync_on_start {
        sink.on_connected().await;
    }
    tracing::info!(endpoint = %endpoint, connected, "subscription started");

    let result = loop {
        if cancel.is_cancelled() {
            break Ok(());
        }

        if !transport.is_connected() {
            if connected {
                tracing::warn!(endpoint = %endpoint, "transport disconnected");
                connected = false;
            }
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(config.reconnect_backoff) => continue,
            }
        }

        if !connected {
            tracing::info!(endpoint = %endpoint, "transport reconnected, resyncing");
            connected = true;
            sink.on_connected().await;
        }

        sink.on_tick().await;

        let received = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            received = transport.recv_timeout(config.poll_interval) => received,
        };

        match received {
            Ok(Some(envelope)) => sink.on_event(envelope, &dispatcher).await,
            Ok(None) => {}
            Err(SyncError::TransportUnavailable(reason)) => {
                tracing::warn!(endpoint = %endpoint, reason = %reason, "transport unavailable");
                connected = false;
            }
            Err(e) => break Err(e),
        }
    };

    dispatcher.shutdown();
    tracing::info!(endpoint = %endpoint, "subscription stopped");
    result
}
