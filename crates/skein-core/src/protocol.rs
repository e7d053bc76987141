use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use skein_api::wire::{
    GroupInfoReply, GroupInfoRequest, GroupMessageEvent, GroupMetadataEvent, InstanceConfig,
};

use crate::codec;
use crate::error::CoreError;

/// Client surface of the lower-level cryptographic protocol service.
///
/// Group keys are raw bytes on the RPC side; the receive methods take the
/// base64 form because that is how the event loop tracks subscriptions.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn instance_get_configuration(&self) -> Result<InstanceConfig, CoreError>;
    async fn group_info(&self, request: GroupInfoRequest) -> Result<GroupInfoReply, CoreError>;
    async fn activate_group(&self, group_pk: &[u8]) -> Result<(), CoreError>;
    async fn app_message_send(&self, group_pk: &[u8], payload: Vec<u8>) -> Result<(), CoreError>;
    /// Drains the pending metadata events of a group.
    async fn receive_metadata(&self, group_pk: &str) -> Result<Vec<GroupMetadataEvent>, CoreError>;
    /// Drains the pending message events of a group.
    async fn receive_messages(&self, group_pk: &str) -> Result<Vec<GroupMessageEvent>, CoreError>;
}

#[derive(Default)]
struct ProtocolState {
    config: InstanceConfig,
    groups: HashMap<String, GroupInfoReply>,
    contacts: HashMap<String, GroupInfoReply>,
    metadata: HashMap<String, Vec<GroupMetadataEvent>>,
    messages: HashMap<String, Vec<GroupMessageEvent>>,
    activated: Vec<String>,
    sent: Vec<(String, Vec<u8>)>,
}

/// In-memory protocol service for tests and demos: events are queued per
/// group, outbound calls are recorded for inspection.
#[derive(Clone, Default)]
pub struct InMemoryProtocol {
    inner: Arc<Mutex<ProtocolState>>,
}

impl InMemoryProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_configuration(&self, config: InstanceConfig) {
        self.inner.lock().await.config = config;
    }

    pub async fn register_group(&self, reply: GroupInfoReply) {
        let key = codec::b64_encode(&reply.group.public_key);
        self.inner.lock().await.groups.insert(key, reply);
    }

    pub async fn register_contact(&self, contact_pk: &[u8], reply: GroupInfoReply) {
        let key = codec::b64_encode(contact_pk);
        self.inner.lock().await.contacts.insert(key, reply);
    }

    pub async fn push_metadata(&self, event: GroupMetadataEvent) {
        let key = codec::b64_encode(&event.event_context.group_pk);
        self.inner
            .lock()
            .await
            .metadata
            .entry(key)
            .or_default()
            .push(event);
    }

    pub async fn push_message(&self, event: GroupMessageEvent) {
        let key = codec::b64_encode(&event.event_context.group_pk);
        self.inner
            .lock()
            .await
            .messages
            .entry(key)
            .or_default()
            .push(event);
    }

    /// Base64 group keys passed to `activate_group`, in call order.
    pub async fn activated_groups(&self) -> Vec<String> {
        self.inner.lock().await.activated.clone()
    }

    /// Payloads passed to `app_message_send`, with their base64 group key.
    pub async fn sent_app_messages(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.lock().await.sent.clone()
    }
}

#[async_trait]
impl ProtocolClient for InMemoryProtocol {
    async fn instance_get_configuration(&self) -> Result<InstanceConfig, CoreError> {
        Ok(self.inner.lock().await.config.clone())
    }

    async fn group_info(&self, request: GroupInfoRequest) -> Result<GroupInfoReply, CoreError> {
        let guard = self.inner.lock().await;
        if let Some(group_pk) = request.group_pk.as_deref() {
            return guard
                .groups
                .get(&codec::b64_encode(group_pk))
                .cloned()
                .ok_or_else(|| CoreError::GroupInfo("unknown group".to_string()));
        }
        if let Some(contact_pk) = request.contact_pk.as_deref() {
            return guard
                .contacts
                .get(&codec::b64_encode(contact_pk))
                .cloned()
                .ok_or_else(|| CoreError::GroupInfo("unknown contact".to_string()));
        }
        Err(CoreError::GroupInfo("missing key".to_string()))
    }

    async fn activate_group(&self, group_pk: &[u8]) -> Result<(), CoreError> {
        self.inner
            .lock()
            .await
            .activated
            .push(codec::b64_encode(group_pk));
        Ok(())
    }

    async fn app_message_send(&self, group_pk: &[u8], payload: Vec<u8>) -> Result<(), CoreError> {
        self.inner
            .lock()
            .await
            .sent
            .push((codec::b64_encode(group_pk), payload));
        Ok(())
    }

    async fn receive_metadata(&self, group_pk: &str) -> Result<Vec<GroupMetadataEvent>, CoreError> {
        let mut guard = self.inner.lock().await;
        Ok(guard.metadata.remove(group_pk).unwrap_or_default())
    }

    async fn receive_messages(&self, group_pk: &str) -> Result<Vec<GroupMessageEvent>, CoreError> {
        let mut guard = self.inner.lock().await;
        Ok(guard.messages.remove(group_pk).unwrap_or_default())
    }
}
