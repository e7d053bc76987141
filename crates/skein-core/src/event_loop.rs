//! Per-group stream workers.
//!
//! Each subscribed (group, stream) pair gets its own worker so groups make
//! progress independently, while events of a single stream are always
//! handed to the projector one at a time, in stream order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};

use skein_api::wire::AppMessage;

use crate::error::CoreError;
use crate::projector::Projector;
use crate::protocol::ProtocolClient;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Metadata,
    Messages,
}

/// Cloneable handle the projector uses to extend the event loop with new
/// group subscriptions.
#[derive(Clone)]
pub struct Subscriptions {
    registry: Arc<Mutex<Vec<(String, StreamKind)>>>,
    spawn_tx: mpsc::UnboundedSender<(String, StreamKind)>,
}

impl Subscriptions {
    pub(crate) fn new(spawn_tx: mpsc::UnboundedSender<(String, StreamKind)>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Vec::new())),
            spawn_tx,
        }
    }

    pub async fn subscribe_metadata(&self, group_pk: &str) {
        self.register(group_pk, StreamKind::Metadata).await;
    }

    pub async fn subscribe_messages(&self, group_pk: &str) {
        self.register(group_pk, StreamKind::Messages).await;
    }

    pub async fn subscribe_group(&self, group_pk: &str) {
        self.register(group_pk, StreamKind::Metadata).await;
        self.register(group_pk, StreamKind::Messages).await;
    }

    pub async fn active(&self) -> Vec<(String, StreamKind)> {
        self.registry.lock().await.clone()
    }

    async fn register(&self, group_pk: &str, kind: StreamKind) {
        let mut registry = self.registry.lock().await;
        if registry.iter().any(|(g, k)| g == group_pk && *k == kind) {
            return;
        }
        registry.push((group_pk.to_string(), kind));
        // The loop may already be shut down; the registry entry still lets
        // `pump` drain the stream.
        let _ = self.spawn_tx.send((group_pk.to_string(), kind));
    }
}

pub(crate) struct EventLoop {
    pub(crate) rx: mpsc::UnboundedReceiver<(String, StreamKind)>,
    pub(crate) projector: Arc<Projector>,
    pub(crate) protocol: Arc<dyn ProtocolClient>,
    pub(crate) poll_interval_ms: u64,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl EventLoop {
    pub(crate) fn spawn(mut self) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.shutdown.changed() => break,
                    cmd = self.rx.recv() => match cmd {
                        Some((group_pk, kind)) => self.spawn_worker(group_pk, kind),
                        None => break,
                    },
                }
            }
        });
    }

    fn spawn_worker(&self, group_pk: String, kind: StreamKind) {
        if self.poll_interval_ms == 0 {
            return;
        }
        let projector = self.projector.clone();
        let protocol = self.protocol.clone();
        let mut shutdown = self.shutdown.clone();
        let interval = self.poll_interval_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(err) =
                            drain_stream(projector.as_ref(), protocol.as_ref(), &group_pk, kind).await
                        {
                            tracing::warn!(group = %group_pk, error = %err, "stream drain failed");
                        }
                    }
                }
            }
        });
    }
}

/// Drains one stream of one group and projects every event in order. A
/// failing event is logged and skipped so a poison event cannot wedge the
/// stream.
pub(crate) async fn drain_stream(
    projector: &Projector,
    protocol: &dyn ProtocolClient,
    group_pk: &str,
    kind: StreamKind,
) -> Result<(), CoreError> {
    match kind {
        StreamKind::Metadata => {
            for event in protocol.receive_metadata(group_pk).await? {
                if let Err(err) = projector.project_metadata(&event).await {
                    tracing::warn!(group = %group_pk, error = %err, "metadata projection failed");
                }
            }
        }
        StreamKind::Messages => {
            for event in protocol.receive_messages(group_pk).await? {
                let message = match AppMessage::decode(&event.message) {
                    Ok(message) => message,
                    Err(_) => {
                        tracing::warn!(group = %group_pk, "undecodable app message");
                        continue;
                    }
                };
                if let Err(err) = projector.project_app_message(group_pk, &event, &message).await {
                    tracing::warn!(group = %group_pk, error = %err, "message projection failed");
                }
            }
        }
    }
    Ok(())
}
