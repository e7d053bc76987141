use serde::{Deserialize, Serialize};

/// Public keys and content ids are carried as base64 strings inside the
/// model; raw bytes only exist at the wire boundary.
pub type PublicKeyB64 = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationKind {
    Contact,
    MultiMember,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactState {
    Unknown,
    IncomingRequest,
    OutgoingRequestEnqueued,
    OutgoingRequestSent,
    Accepted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaState {
    NeverDownloaded,
    Downloading,
    Downloaded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppMessageKind {
    Acknowledge,
    GroupInvitation,
    UserMessage,
    SetUserInfo,
    ReplyOptions,
    UserReaction,
    #[serde(other)]
    Undefined,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceToken {
    pub token: String,
    pub authentication_url: String,
    pub expiration: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub public_key: PublicKeyB64,
    pub display_name: String,
    pub avatar_cid: String,
    #[serde(default)]
    pub service_tokens: Vec<ServiceToken>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub public_key: PublicKeyB64,
    pub display_name: String,
    pub avatar_cid: String,
    pub conversation_public_key: PublicKeyB64,
    pub state: ContactState,
    pub info_date: i64,
}

/// Replication details announced for a conversation, kept alongside the
/// conversation row and attached on read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationInfo {
    pub cid: String,
    pub conversation_public_key: PublicKeyB64,
    pub member_public_key: PublicKeyB64,
    pub authentication_url: String,
    pub replication_server: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub public_key: PublicKeyB64,
    pub kind: ConversationKind,
    pub contact_public_key: PublicKeyB64,
    pub display_name: String,
    pub unread_count: u32,
    pub last_update: i64,
    pub is_open: bool,
    #[serde(skip)]
    pub replication_info: Option<ReplicationInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub public_key: PublicKeyB64,
    pub conversation_public_key: PublicKeyB64,
    pub display_name: String,
    pub avatar_cid: String,
    pub is_me: bool,
    pub is_creator: bool,
    pub info_date: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub public_key: PublicKeyB64,
    pub member_public_key: PublicKeyB64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub cid: String,
    pub mime_type: String,
    pub display_name: String,
    pub filename: String,
    pub interaction_cid: String,
    pub state: MediaState,
}

/// One aggregated emoji entry on an interaction, rebuilt from the reaction
/// rows every time the interaction is streamed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionView {
    pub emoji: String,
    pub count: u64,
    pub own_state: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub cid: String,
    pub kind: AppMessageKind,
    pub payload: Vec<u8>,
    pub conversation_public_key: PublicKeyB64,
    pub device_public_key: PublicKeyB64,
    /// Empty while the owning device is unknown; filled by backlog
    /// attribution once the device is announced.
    pub member_public_key: PublicKeyB64,
    pub sent_date: i64,
    pub target_cid: String,
    pub is_mine: bool,
    pub acknowledged: bool,
    #[serde(default)]
    pub medias: Vec<Media>,
    #[serde(default)]
    pub reactions: Vec<ReactionView>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub target_cid: String,
    pub member_public_key: PublicKeyB64,
    pub emoji: String,
    pub is_mine: bool,
    pub state: bool,
    pub state_date: i64,
}

impl Contact {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            display_name: String::new(),
            avatar_cid: String::new(),
            conversation_public_key: String::new(),
            state: ContactState::Unknown,
            info_date: 0,
        }
    }
}

impl Conversation {
    pub fn multi_member(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            kind: ConversationKind::MultiMember,
            contact_public_key: String::new(),
            display_name: String::new(),
            unread_count: 0,
            last_update: 0,
            is_open: false,
            replication_info: None,
        }
    }

    pub fn for_contact(
        public_key: impl Into<String>,
        contact_public_key: impl Into<String>,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            kind: ConversationKind::Contact,
            contact_public_key: contact_public_key.into(),
            display_name: String::new(),
            unread_count: 0,
            last_update: 0,
            is_open: false,
            replication_info: None,
        }
    }
}
