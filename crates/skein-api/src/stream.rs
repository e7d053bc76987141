use serde::{Deserialize, Serialize};

use crate::types::{Account, Contact, Conversation, Device, Interaction, Media, Member};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    ContactRequestSent,
    ContactRequestReceived,
    MessageReceived,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

/// View updates pushed to subscribers after a projection commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEventPayload {
    AccountUpdated(Account),
    ContactUpdated(Contact),
    ConversationUpdated(Conversation),
    MemberUpdated(Member),
    DeviceUpdated(Device),
    InteractionUpdated(Interaction),
    InteractionDeleted(String),
    MediaUpdated(Media),
    Notified(Notification),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub payload: StreamEventPayload,
    /// True on first appearance of the entity, false on later updates.
    pub is_new: bool,
}

impl StreamEvent {
    pub fn new(payload: StreamEventPayload, is_new: bool) -> Self {
        Self { payload, is_new }
    }
}
