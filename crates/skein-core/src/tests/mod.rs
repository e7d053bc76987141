pub mod contact_flow_tests;
pub mod replay_tests;
pub mod unread_tests;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError;

use skein_api::stream::StreamEvent;
use skein_api::types::{
    Account, AppMessageKind, Contact, ContactState, Conversation, ConversationKind,
};
use skein_api::wire::{
    AppMessage, EventContext, Group, GroupInfoReply, GroupMessageEvent, GroupMetadata,
    GroupMetadataEvent, MessageHeaders, MetadataEventKind, SetUserInfoPayload, UserMessagePayload,
    UserReactionPayload,
};
use skein_store::Store;

use crate::codec;
use crate::dispatcher::{BroadcastDispatcher, StreamReceiver};
use crate::error::CoreError;
use crate::{InMemoryProtocol, Messenger, MessengerConfig};

pub(crate) const GROUP_PK: &[u8] = b"group-main";
pub(crate) const MEMBER_SELF: &[u8] = b"member-self";
pub(crate) const DEVICE_SELF: &[u8] = b"device-self";
pub(crate) const MEMBER_PEER: &[u8] = b"member-peer";
pub(crate) const DEVICE_PEER: &[u8] = b"device-peer";
pub(crate) const CONTACT_PK: &[u8] = b"contact-bob";

pub(crate) struct Harness {
    pub messenger: Messenger,
    pub protocol: InMemoryProtocol,
    pub events: StreamReceiver,
}

pub(crate) async fn harness(replay: bool) -> Harness {
    let protocol = InMemoryProtocol::new();
    let dispatcher = BroadcastDispatcher::new(1024);
    let events = dispatcher.subscribe();
    let messenger = Messenger::new(
        MessengerConfig {
            replay,
            poll_interval_ms: 0,
        },
        Store::open_in_memory(),
        Arc::new(protocol.clone()),
        Arc::new(dispatcher),
    );
    Harness {
        messenger,
        protocol,
        events,
    }
}

pub(crate) fn b64(bytes: &[u8]) -> String {
    codec::b64_encode(bytes)
}

/// Registers the main test group with ourselves as member/device.
pub(crate) async fn register_main_group(h: &Harness) {
    h.protocol
        .register_group(GroupInfoReply {
            group: Group {
                public_key: GROUP_PK.to_vec(),
            },
            member_pk: MEMBER_SELF.to_vec(),
            device_pk: DEVICE_SELF.to_vec(),
        })
        .await;
}

pub(crate) async fn seed_multi_member_conversation(h: &Harness) {
    let conversation = Conversation::multi_member(b64(GROUP_PK));
    h.messenger
        .store()
        .tx(|tx| tx.save_conversation(&conversation))
        .await
        .expect("seed conversation");
}

pub(crate) async fn seed_contact_conversation(h: &Harness) {
    let conversation = Conversation::for_contact(b64(GROUP_PK), b64(CONTACT_PK));
    let contact = Contact {
        conversation_public_key: b64(GROUP_PK),
        state: ContactState::Accepted,
        ..Contact::new(b64(CONTACT_PK))
    };
    h.messenger
        .store()
        .tx(|tx| {
            tx.save_conversation(&conversation)?;
            tx.save_contact(&contact)
        })
        .await
        .expect("seed contact conversation");
}

pub(crate) async fn seed_account(h: &Harness, display_name: &str) {
    let account = Account {
        public_key: b64(b"account-self"),
        display_name: display_name.to_string(),
        ..Account::default()
    };
    h.messenger
        .store()
        .tx(|tx| tx.save_account(&account))
        .await
        .expect("seed account");
}

pub(crate) async fn seed_device(h: &Harness, device_pk: &[u8], member_pk: &[u8]) {
    let device = b64(device_pk);
    let member = b64(member_pk);
    h.messenger
        .store()
        .tx(move |tx| tx.add_device(&device, &member))
        .await
        .expect("seed device");
}

pub(crate) fn metadata_event<T: Serialize>(
    kind: MetadataEventKind,
    group_pk: &[u8],
    id: &[u8],
    body: &T,
) -> GroupMetadataEvent {
    GroupMetadataEvent {
        event_context: EventContext {
            id: id.to_vec(),
            group_pk: group_pk.to_vec(),
        },
        metadata: GroupMetadata {
            kind,
            payload: Vec::new(),
        },
        event: serde_json::to_vec(body).expect("encode event body"),
    }
}

pub(crate) fn message_event(
    group_pk: &[u8],
    id: &[u8],
    device_pk: &[u8],
    message: &AppMessage,
) -> GroupMessageEvent {
    GroupMessageEvent {
        event_context: EventContext {
            id: id.to_vec(),
            group_pk: group_pk.to_vec(),
        },
        message: message.encode().expect("encode app message"),
        headers: MessageHeaders {
            device_pk: device_pk.to_vec(),
        },
    }
}

pub(crate) fn user_message(body: &str, sent_date: i64) -> AppMessage {
    AppMessage::new(
        AppMessageKind::UserMessage,
        &UserMessagePayload {
            body: body.to_string(),
        },
        sent_date,
        "",
    )
    .expect("build user message")
}

pub(crate) fn set_user_info(display_name: &str, sent_date: i64) -> AppMessage {
    AppMessage::new(
        AppMessageKind::SetUserInfo,
        &SetUserInfoPayload {
            display_name: display_name.to_string(),
            avatar_cid: String::new(),
        },
        sent_date,
        "",
    )
    .expect("build set user info")
}

pub(crate) fn user_reaction(emoji: &str, state: bool, target: &str, sent_date: i64) -> AppMessage {
    AppMessage::new(
        AppMessageKind::UserReaction,
        &UserReactionPayload {
            emoji: emoji.to_string(),
            state,
        },
        sent_date,
        target,
    )
    .expect("build reaction")
}

pub(crate) fn acknowledge(target: &str, sent_date: i64) -> AppMessage {
    AppMessage::acknowledge(target, sent_date).expect("build ack")
}

/// Projects one message event into the main test group.
pub(crate) async fn project_message(
    h: &Harness,
    id: &[u8],
    device_pk: &[u8],
    message: &AppMessage,
) -> Result<(), CoreError> {
    let event = message_event(GROUP_PK, id, device_pk, message);
    h.messenger
        .projector()
        .project_app_message(&b64(GROUP_PK), &event, message)
        .await
}

pub(crate) fn drain_events(events: &mut StreamReceiver) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => out.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
