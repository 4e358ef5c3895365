//! Transport abstraction for the sync protocol.
//!
//! A transport moves [`Envelope`]s between one endpoint and the broker it
//! is attached to. Routing is the broker's concern: sources address agents
//! by the `clustername` attribute, agents address sources by
//! `originalsource`.

use std::time::Duration;

use async_trait::async_trait;
use driftsync_core::Envelope;

use crate::error::Result;

/// Transport trait for sending and receiving envelopes.
///
/// Implementations must be thread-safe (Send + Sync). While disconnected,
/// `send` and `recv_timeout` fail with `TransportUnavailable`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an envelope. Fire-and-forget: success means it was handed off.
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Receive the next envelope.
    ///
    /// Returns `None` if the timeout expires first.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>>;

    /// Whether the endpoint currently has a connection.
    fn is_connected(&self) -> bool;

    /// The local endpoint identity (source id or cluster name).
    fn local_id(&self) -> &str;
}

/// An in-memory broker for tests and single-process deployments.
///
/// Uses channels to simulate message passing between endpoints.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, RwLock};
    use tokio::sync::{mpsc, Mutex};

    use driftsync_core::keys;

    use crate::error::SyncError;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Role {
        Source,
        Agent,
    }

    struct Endpoint {
        tx: mpsc::UnboundedSender<Envelope>,
        connected: AtomicBool,
    }

    impl Endpoint {
        fn deliver(&self, envelope: Envelope) {
            // Disconnected endpoints lose traffic, as a real broker would.
            if self.connected.load(Ordering::SeqCst) {
                let _ = self.tx.send(envelope);
            }
        }
    }

    /// Routes envelopes between sources and agents.
    #[derive(Default)]
    pub struct MemoryBroker {
        sources: RwLock<HashMap<String, Arc<Endpoint>>>,
        agents: RwLock<HashMap<String, Arc<Endpoint>>>,
    }

    impl MemoryBroker {
        /// Create a new broker.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Attach a source endpoint.
        pub fn connect_source(self: &Arc<Self>, source_id: impl Into<String>) -> MemoryTransport {
            self.attach(Role::Source, source_id.into())
        }

        /// Attach an agent endpoint for a cluster.
        pub fn connect_agent(self: &Arc<Self>, cluster_name: impl Into<String>) -> MemoryTransport {
            self.attach(Role::Agent, cluster_name.into())
        }

        fn attach(self: &Arc<Self>, role: Role, id: String) -> MemoryTransport {
            let (tx, rx) = mpsc::unbounded_channel();
            let endpoint = Arc::new(Endpoint {
                tx,
                connected: AtomicBool::new(true),
            });
            self.table(role)
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(id.clone(), endpoint.clone());

            MemoryTransport {
                id,
                role,
                endpoint,
                broker: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        fn table(&self, role: Role) -> &RwLock<HashMap<String, Arc<Endpoint>>> {
            match role {
                Role::Source => &self.sources,
                Role::Agent => &self.agents,
            }
        }

        fn route(&self, from: Role, envelope: Envelope) {
            let (table, key) = match from {
                Role::Source => (&self.agents, envelope.cluster_name()),
                Role::Agent => (
                    &self.sources,
                    envelope
                        .get(keys::ORIGINAL_SOURCE)
                        .map(|v| v.as_text())
                        .filter(|s| !s.is_empty()),
                ),
            };
            let table = table.read().unwrap_or_else(|e| e.into_inner());
            match key {
                Some(key) => {
                    if let Some(endpoint) = table.get(&key) {
                        endpoint.deliver(envelope);
                    }
                }
                None => {
                    for endpoint in table.values() {
                        endpoint.deliver(envelope.clone());
                    }
                }
            }
        }
    }

    /// One endpoint attached to a [`MemoryBroker`].
    pub struct MemoryTransport {
        id: String,
        role: Role,
        endpoint: Arc<Endpoint>,
        broker: Arc<MemoryBroker>,
        receiver: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    }

    impl MemoryTransport {
        /// Simulate losing the connection. Traffic to this endpoint is dropped.
        pub fn disconnect(&self) {
            self.endpoint.connected.store(false, Ordering::SeqCst);
        }

        /// Restore the connection.
        pub fn reconnect(&self) {
            self.endpoint.connected.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, envelope: Envelope) -> Result<()> {
            if !self.is_connected() {
                return Err(SyncError::TransportUnavailable(self.id.clone()));
            }
            self.broker.route(self.role, envelope);
            Ok(())
        }

        async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>> {
            if !self.is_connected() {
                tokio::time::sleep(timeout).await;
                return Err(SyncError::TransportUnavailable(self.id.clone()));
            }
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(envelope)) => Ok(Some(envelope)),
                Ok(None) => Err(SyncError::TransportClosed(self.id.clone())),
                Err(_) => Ok(None),
            }
        }

        fn is_connected(&self) -> bool {
            self.endpoint.connected.load(Ordering::SeqCst)
        }

        fn local_id(&self) -> &str {
            &self.id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBroker;
    use super::*;
    use driftsync_core::keys;

    const WAIT: Duration = Duration::from_millis(100);

    fn envelope() -> Envelope {
        Envelope::with_raw_type("io.example.v1.things.spec.create_request", "hub")
    }

    #[tokio::test]
    async fn test_source_routes_by_cluster() {
        let broker = MemoryBroker::new();
        let source = broker.connect_source("hub");
        let agent1 = broker.connect_agent("cluster1");
        let agent2 = broker.connect_agent("cluster2");

        source
            .send(envelope().attribute(keys::CLUSTER_NAME, "cluster1"))
            .await
            .unwrap();

        assert!(agent1.recv_timeout(WAIT).await.unwrap().is_some());
        assert!(agent2.recv_timeout(WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_source_broadcasts_without_cluster() {
        let broker = MemoryBroker::new();
        let source = broker.connect_source("hub");
        let agent1 = broker.connect_agent("cluster1");
        let agent2 = broker.connect_agent("cluster2");

        source.send(envelope()).await.unwrap();

        assert!(agent1.recv_timeout(WAIT).await.unwrap().is_some());
        assert!(agent2.recv_timeout(WAIT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_agent_routes_by_original_source() {
        let broker = MemoryBroker::new();
        let hub_a = broker.connect_source("hub-a");
        let hub_b = broker.connect_source("hub-b");
        let agent = broker.connect_agent("cluster1");

        agent
            .send(envelope().attribute(keys::ORIGINAL_SOURCE, "hub-b"))
            .await
            .unwrap();

        assert!(hub_a.recv_timeout(WAIT).await.unwrap().is_none());
        assert!(hub_b.recv_timeout(WAIT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disconnected_endpoint() {
        let broker = MemoryBroker::new();
        let source = broker.connect_source("hub");
        let agent = broker.connect_agent("cluster1");

        agent.disconnect();
        assert!(!agent.is_connected());
        assert!(matches!(
            agent.send(envelope()).await,
            Err(crate::SyncError::TransportUnavailable(_))
        ));

        // Sent while the agent is away: lost.
        source.send(envelope()).await.unwrap();
        agent.reconnect();
        assert!(agent.recv_timeout(WAIT).await.unwrap().is_none());

        source.send(envelope()).await.unwrap();
        assert!(agent.recv_timeout(WAIT).await.unwrap().is_some());
        assert_eq!(agent.local_id(), "cluster1");
    }
}
