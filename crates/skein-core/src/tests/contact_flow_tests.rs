use super::*;
use skein_api::stream::StreamEventPayload;
use skein_api::wire::{
    AccountContactRequestEnqueued, AccountContactRequestSent, ContactDescriptor, ContactMetadata,
    MemberDeviceAdded,
};

const ACCOUNT_GROUP_PK: &[u8] = b"group-account";
const CONTACT_GROUP_PK: &[u8] = b"group-bob";
const DEVICE_BOB: &[u8] = b"device-bob";

async fn register_contact_group(h: &Harness) {
    let reply = GroupInfoReply {
        group: Group {
            public_key: CONTACT_GROUP_PK.to_vec(),
        },
        member_pk: MEMBER_SELF.to_vec(),
        device_pk: DEVICE_SELF.to_vec(),
    };
    h.protocol.register_group(reply.clone()).await;
    h.protocol.register_contact(CONTACT_PK, reply).await;
}

fn contact_metadata_bytes(display_name: &str) -> Vec<u8> {
    serde_json::to_vec(&ContactMetadata {
        display_name: display_name.to_string(),
    })
    .expect("encode contact metadata")
}

#[tokio::test]
async fn outgoing_request_reaches_accepted_state() {
    let mut h = harness(false).await;
    register_contact_group(&h).await;
    seed_account(&h, "Alice").await;
    let projector = h.messenger.projector();

    // Enqueued: contact + 1-to-1 conversation come into existence.
    let enqueued = metadata_event(
        MetadataEventKind::AccountContactRequestOutgoingEnqueued,
        ACCOUNT_GROUP_PK,
        b"meta-1",
        &AccountContactRequestEnqueued {
            contact: ContactDescriptor {
                pk: CONTACT_PK.to_vec(),
                metadata: contact_metadata_bytes("Bob"),
            },
            group_pk: CONTACT_GROUP_PK.to_vec(),
        },
    );
    projector.project_metadata(&enqueued).await.expect("enqueued");

    let store = h.messenger.store();
    let contact = store
        .view(|t| t.get_contact(&b64(CONTACT_PK)))
        .await
        .expect("contact");
    assert_eq!(contact.state, ContactState::OutgoingRequestEnqueued);
    assert_eq!(contact.display_name, "Bob");
    let conversation = store
        .view(|t| t.get_conversation(&b64(CONTACT_GROUP_PK)))
        .await
        .expect("conversation");
    assert_eq!(conversation.kind, ConversationKind::Contact);
    assert_eq!(conversation.contact_public_key, b64(CONTACT_PK));

    // Sent: state advances, the group is activated and our user info goes
    // out on it.
    let sent = metadata_event(
        MetadataEventKind::AccountContactRequestOutgoingSent,
        ACCOUNT_GROUP_PK,
        b"meta-2",
        &AccountContactRequestSent {
            contact_pk: CONTACT_PK.to_vec(),
        },
    );
    projector.project_metadata(&sent).await.expect("sent");

    let contact = store
        .view(|t| t.get_contact(&b64(CONTACT_PK)))
        .await
        .expect("contact");
    assert_eq!(contact.state, ContactState::OutgoingRequestSent);
    assert_eq!(h.protocol.activated_groups().await, vec![b64(CONTACT_GROUP_PK)]);
    let sent_messages = h.protocol.sent_app_messages().await;
    assert_eq!(sent_messages.len(), 1);
    let announced = AppMessage::decode(&sent_messages[0].1).expect("decode announcement");
    assert_eq!(announced.kind, AppMessageKind::SetUserInfo);

    // The remote device appears: that is the acceptance signal.
    let device_added = metadata_event(
        MetadataEventKind::GroupMemberDeviceAdded,
        CONTACT_GROUP_PK,
        b"meta-3",
        &MemberDeviceAdded {
            member_pk: CONTACT_PK.to_vec(),
            device_pk: DEVICE_BOB.to_vec(),
        },
    );
    projector
        .project_metadata(&device_added)
        .await
        .expect("device added");

    let contact = store
        .view(|t| t.get_contact(&b64(CONTACT_PK)))
        .await
        .expect("contact");
    assert_eq!(contact.state, ContactState::Accepted);
    assert_eq!(contact.conversation_public_key, b64(CONTACT_GROUP_PK));

    // Activated after Sent and again after the acceptance.
    assert_eq!(
        h.protocol.activated_groups().await,
        vec![b64(CONTACT_GROUP_PK), b64(CONTACT_GROUP_PK)]
    );

    let events = drain_events(&mut h.events);
    let contact_updates: Vec<bool> = events
        .iter()
        .filter_map(|e| match &e.payload {
            StreamEventPayload::ContactUpdated(_) => Some(e.is_new),
            _ => None,
        })
        .collect();
    assert_eq!(contact_updates, vec![true, false, false]);

    // Message stream of the contact group is live now.
    let active = h.messenger.subscriptions().active().await;
    assert!(active.contains(&(b64(CONTACT_GROUP_PK), crate::StreamKind::Messages)));
}

#[tokio::test]
async fn replaying_the_enqueued_event_is_a_no_op() {
    let h = harness(false).await;
    register_contact_group(&h).await;
    let projector = h.messenger.projector();

    let enqueued = metadata_event(
        MetadataEventKind::AccountContactRequestOutgoingEnqueued,
        ACCOUNT_GROUP_PK,
        b"meta-1",
        &AccountContactRequestEnqueued {
            contact: ContactDescriptor {
                pk: CONTACT_PK.to_vec(),
                metadata: contact_metadata_bytes("Bob"),
            },
            group_pk: CONTACT_GROUP_PK.to_vec(),
        },
    );
    projector.project_metadata(&enqueued).await.expect("first");
    let snapshot = h.messenger.store().snapshot().await;

    projector.project_metadata(&enqueued).await.expect("second");
    assert_eq!(h.messenger.store().snapshot().await, snapshot);
}

#[tokio::test]
async fn group_pk_is_resolved_from_contact_when_missing() {
    let h = harness(false).await;
    register_contact_group(&h).await;
    let projector = h.messenger.projector();

    let enqueued = metadata_event(
        MetadataEventKind::AccountContactRequestOutgoingEnqueued,
        ACCOUNT_GROUP_PK,
        b"meta-1",
        &AccountContactRequestEnqueued {
            contact: ContactDescriptor {
                pk: CONTACT_PK.to_vec(),
                metadata: contact_metadata_bytes("Bob"),
            },
            group_pk: Vec::new(),
        },
    );
    projector.project_metadata(&enqueued).await.expect("enqueued");

    let contact = h
        .messenger
        .store()
        .view(|t| t.get_contact(&b64(CONTACT_PK)))
        .await
        .expect("contact");
    assert_eq!(contact.conversation_public_key, b64(CONTACT_GROUP_PK));
}
