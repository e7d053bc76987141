use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AppMessageKind, Media, ServiceToken};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode")]
    Encode,
    #[error("decode")]
    Decode,
    #[error("payload kind mismatch")]
    KindMismatch,
}

/// Event kinds surfaced on a group metadata stream. Kinds the core does not
/// project are still listed so they decode cleanly and can be skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataEventKind {
    AccountGroupJoined,
    AccountContactRequestOutgoingEnqueued,
    AccountContactRequestOutgoingSent,
    AccountContactRequestIncomingReceived,
    AccountContactRequestIncomingAccepted,
    AccountContactRequestIncomingDiscarded,
    AccountContactBlocked,
    AccountContactUnblocked,
    AccountServiceTokenAdded,
    GroupMemberDeviceAdded,
    GroupDeviceSecretAdded,
    GroupMetadataPayloadSent,
    GroupReplicating,
    MultiMemberGroupInitialMemberAnnounced,
    #[serde(other)]
    Undefined,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub id: Vec<u8>,
    pub group_pk: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub kind: MetadataEventKind,
    #[serde(default)]
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMetadataEvent {
    pub event_context: EventContext,
    pub metadata: GroupMetadata,
    /// Opaque encoded form of the kind-specific event body.
    pub event: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeaders {
    pub device_pk: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessageEvent {
    pub event_context: EventContext,
    /// Encoded [`AppMessage`].
    pub message: Vec<u8>,
    pub headers: MessageHeaders,
}

// ---------------------------------------------------------------------------
// Metadata event bodies
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub public_key: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountGroupJoined {
    pub group: Group,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDescriptor {
    pub pk: Vec<u8>,
    /// Encoded [`ContactMetadata`].
    #[serde(default)]
    pub metadata: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMetadata {
    pub display_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContactRequestEnqueued {
    pub contact: ContactDescriptor,
    #[serde(default)]
    pub group_pk: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContactRequestSent {
    pub contact_pk: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContactRequestReceived {
    pub contact_pk: Vec<u8>,
    /// Encoded [`ContactMetadata`].
    #[serde(default)]
    pub contact_metadata: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContactRequestAccepted {
    pub contact_pk: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDeviceAdded {
    pub member_pk: Vec<u8>,
    pub device_pk: Vec<u8>,
}

/// An app message smuggled over the metadata stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPayloadSent {
    /// Encoded [`AppMessage`].
    pub message: Vec<u8>,
    pub device_pk: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTokenAdded {
    pub service_token: ServiceToken,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReplicating {
    pub authentication_url: String,
    pub replication_server: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiMemberInitialMember {
    pub member_pk: Vec<u8>,
}

// ---------------------------------------------------------------------------
// App messages
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMessage {
    pub kind: AppMessageKind,
    pub payload: Vec<u8>,
    pub sent_date: i64,
    #[serde(default)]
    pub medias: Vec<Media>,
    #[serde(default)]
    pub target_cid: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessagePayload {
    pub body: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetUserInfoPayload {
    pub display_name: String,
    pub avatar_cid: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgePayload {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInvitationPayload {
    pub link: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOption {
    pub display: String,
    pub payload: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOptionsPayload {
    pub options: Vec<ReplyOption>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReactionPayload {
    pub emoji: String,
    pub state: bool,
}

/// Typed view over [`AppMessage::payload`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppMessagePayload {
    Acknowledge(AcknowledgePayload),
    GroupInvitation(GroupInvitationPayload),
    UserMessage(UserMessagePayload),
    SetUserInfo(SetUserInfoPayload),
    ReplyOptions(ReplyOptionsPayload),
    UserReaction(UserReactionPayload),
}

impl AppMessage {
    pub fn new(
        kind: AppMessageKind,
        payload: &impl Serialize,
        sent_date: i64,
        target_cid: impl Into<String>,
    ) -> Result<Self, WireError> {
        Ok(Self {
            kind,
            payload: serde_json::to_vec(payload).map_err(|_| WireError::Encode)?,
            sent_date,
            medias: Vec::new(),
            target_cid: target_cid.into(),
        })
    }

    pub fn acknowledge(target_cid: impl Into<String>, sent_date: i64) -> Result<Self, WireError> {
        Self::new(
            AppMessageKind::Acknowledge,
            &AcknowledgePayload {},
            sent_date,
            target_cid,
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(|_| WireError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(|_| WireError::Decode)
    }

    pub fn decode_payload(&self) -> Result<AppMessagePayload, WireError> {
        fn typed<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
            serde_json::from_slice(bytes).map_err(|_| WireError::Decode)
        }
        match self.kind {
            AppMessageKind::Acknowledge => {
                Ok(AppMessagePayload::Acknowledge(typed(&self.payload)?))
            }
            AppMessageKind::GroupInvitation => {
                Ok(AppMessagePayload::GroupInvitation(typed(&self.payload)?))
            }
            AppMessageKind::UserMessage => {
                Ok(AppMessagePayload::UserMessage(typed(&self.payload)?))
            }
            AppMessageKind::SetUserInfo => {
                Ok(AppMessagePayload::SetUserInfo(typed(&self.payload)?))
            }
            AppMessageKind::ReplyOptions => {
                Ok(AppMessagePayload::ReplyOptions(typed(&self.payload)?))
            }
            AppMessageKind::UserReaction => {
                Ok(AppMessagePayload::UserReaction(typed(&self.payload)?))
            }
            AppMessageKind::Undefined => Err(WireError::KindMismatch),
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol service DTOs
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub account_pk: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfoRequest {
    pub group_pk: Option<Vec<u8>>,
    pub contact_pk: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfoReply {
    pub group: Group,
    /// Local member public key within the group.
    pub member_pk: Vec<u8>,
    /// Local device public key within the group.
    pub device_pk: Vec<u8>,
}

impl GroupInfoRequest {
    pub fn for_group(group_pk: Vec<u8>) -> Self {
        Self {
            group_pk: Some(group_pk),
            contact_pk: None,
        }
    }

    pub fn for_contact(contact_pk: Vec<u8>) -> Self {
        Self {
            group_pk: None,
            contact_pk: Some(contact_pk),
        }
    }
}
