//! Event-handling core of the skein messenger.
//!
//! Consumes the metadata and message streams of every active group from the
//! protocol service and projects them into the durable local view, emitting
//! view updates and notifications once each projection has committed.

mod app_message;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_loop;
mod metadata;
pub mod projector;
pub mod protocol;
pub mod time;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

pub use config::MessengerConfig;
pub use dispatcher::{BroadcastDispatcher, Dispatcher, StreamReceiver};
pub use error::CoreError;
pub use event_loop::{StreamKind, Subscriptions};
pub use projector::Projector;
pub use protocol::{InMemoryProtocol, ProtocolClient};

use event_loop::EventLoop;
use skein_store::Store;

/// Service façade: owns the projector and the event loop.
///
/// Must be created inside a tokio runtime; the loop task starts
/// immediately. With `poll_interval_ms == 0` no background workers run and
/// streams are drained explicitly through [`Messenger::pump`].
pub struct Messenger {
    store: Store,
    protocol: Arc<dyn ProtocolClient>,
    projector: Arc<Projector>,
    subscriptions: Subscriptions,
    shutdown: watch::Sender<bool>,
}

impl Messenger {
    pub fn new(
        config: MessengerConfig,
        store: Store,
        protocol: Arc<dyn ProtocolClient>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (spawn_tx, spawn_rx) = mpsc::unbounded_channel();
        let subscriptions = Subscriptions::new(spawn_tx);
        let projector = Arc::new(Projector::new(
            store.clone(),
            protocol.clone(),
            dispatcher,
            subscriptions.clone(),
            config.replay,
        ));
        EventLoop {
            rx: spawn_rx,
            projector: projector.clone(),
            protocol: protocol.clone(),
            poll_interval_ms: config.poll_interval_ms,
            shutdown: shutdown_rx,
        }
        .spawn();

        Self {
            store,
            protocol,
            projector,
            subscriptions,
            shutdown: shutdown_tx,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn projector(&self) -> Arc<Projector> {
        self.projector.clone()
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Drains every active subscription once, inline. Deterministic
    /// counterpart of the background workers.
    pub async fn pump(&self) -> Result<(), CoreError> {
        for (group_pk, kind) in self.subscriptions.active().await {
            event_loop::drain_stream(
                self.projector.as_ref(),
                self.protocol.as_ref(),
                &group_pk,
                kind,
            )
            .await?;
        }
        Ok(())
    }

    /// Stops the event loop and every stream worker.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        self.shutdown();
    }
}
