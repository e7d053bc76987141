use tokio::sync::broadcast;

use skein_api::stream::{Notification, NotificationKind, StreamEvent, StreamEventPayload};

use crate::error::CoreError;

/// Fan-out of view updates and notifications to subscribers.
pub trait Dispatcher: Send + Sync {
    fn stream_event(&self, payload: StreamEventPayload, is_new: bool) -> Result<(), CoreError>;

    fn notify(&self, kind: NotificationKind, title: &str, body: &str) -> Result<(), CoreError> {
        self.stream_event(
            StreamEventPayload::Notified(Notification {
                kind,
                title: title.to_string(),
                body: body.to_string(),
            }),
            true,
        )
    }
}

pub type StreamReceiver = broadcast::Receiver<StreamEvent>;

#[derive(Clone)]
pub struct BroadcastDispatcher {
    tx: broadcast::Sender<StreamEvent>,
}

impl BroadcastDispatcher {
    pub fn new(size: usize) -> Self {
        let (tx, _) = broadcast::channel(size);
        Self { tx }
    }

    pub fn subscribe(&self) -> StreamReceiver {
        self.tx.subscribe()
    }
}

impl Dispatcher for BroadcastDispatcher {
    fn stream_event(&self, payload: StreamEventPayload, is_new: bool) -> Result<(), CoreError> {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(StreamEvent::new(payload, is_new));
        Ok(())
    }
}
