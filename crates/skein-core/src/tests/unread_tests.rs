use super::*;
use skein_api::stream::StreamEventPayload;
use skein_api::wire::GroupInvitationPayload;

async fn seed_unread_conversation(h: &Harness, unread_count: u32, is_open: bool) {
    let conversation = Conversation {
        unread_count,
        is_open,
        ..Conversation::multi_member(b64(GROUP_PK))
    };
    h.messenger
        .store()
        .tx(|tx| tx.save_conversation(&conversation))
        .await
        .expect("seed conversation");
}

#[tokio::test]
async fn incoming_message_bumps_unread_of_closed_conversation() {
    let mut h = harness(false).await;
    register_main_group(&h).await;
    seed_unread_conversation(&h, 3, false).await;

    project_message(&h, b"cid-1", DEVICE_PEER, &user_message("ping", 1))
        .await
        .expect("project message");

    let conversation = h
        .messenger
        .store()
        .view(|t| t.get_conversation(&b64(GROUP_PK)))
        .await
        .expect("conversation");
    assert_eq!(conversation.unread_count, 4);
    assert!(conversation.last_update > 0);

    let events = drain_events(&mut h.events);
    let conversation_updates = events
        .iter()
        .filter(|e| matches!(&e.payload, StreamEventPayload::ConversationUpdated(_)))
        .count();
    assert_eq!(conversation_updates, 1);
}

#[tokio::test]
async fn open_conversation_does_not_accumulate_unread() {
    let h = harness(false).await;
    register_main_group(&h).await;
    seed_unread_conversation(&h, 0, true).await;

    project_message(&h, b"cid-1", DEVICE_PEER, &user_message("ping", 1))
        .await
        .expect("project message");

    let conversation = h
        .messenger
        .store()
        .view(|t| t.get_conversation(&b64(GROUP_PK)))
        .await
        .expect("conversation");
    assert_eq!(conversation.unread_count, 0);
}

#[tokio::test]
async fn own_message_does_not_bump_unread() {
    let h = harness(false).await;
    register_main_group(&h).await;
    seed_unread_conversation(&h, 0, false).await;

    project_message(&h, b"cid-1", DEVICE_SELF, &user_message("from me", 1))
        .await
        .expect("project message");

    let conversation = h
        .messenger
        .store()
        .view(|t| t.get_conversation(&b64(GROUP_PK)))
        .await
        .expect("conversation");
    assert_eq!(conversation.unread_count, 0);
}

#[tokio::test]
async fn group_invitation_is_visible_and_counts() {
    let h = harness(false).await;
    register_main_group(&h).await;
    seed_unread_conversation(&h, 0, false).await;

    let invitation = AppMessage::new(
        AppMessageKind::GroupInvitation,
        &GroupInvitationPayload {
            link: "skein://invite/abc".to_string(),
        },
        1,
        "",
    )
    .expect("build invitation");
    project_message(&h, b"cid-inv", DEVICE_PEER, &invitation)
        .await
        .expect("project invitation");

    let store = h.messenger.store();
    let interaction = store
        .view(|t| t.get_interaction(&b64(b"cid-inv")))
        .await
        .expect("interaction");
    assert_eq!(interaction.kind, AppMessageKind::GroupInvitation);
    let conversation = store
        .view(|t| t.get_conversation(&b64(GROUP_PK)))
        .await
        .expect("conversation");
    assert_eq!(conversation.unread_count, 1);
    // Invitations are not acknowledged back.
    assert!(h.protocol.sent_app_messages().await.is_empty());
}

#[tokio::test]
async fn duplicate_delivery_counts_once() {
    let h = harness(false).await;
    register_main_group(&h).await;
    seed_unread_conversation(&h, 0, false).await;

    let message = user_message("ping", 1);
    project_message(&h, b"cid-1", DEVICE_PEER, &message)
        .await
        .expect("first delivery");
    project_message(&h, b"cid-1", DEVICE_PEER, &message)
        .await
        .expect("second delivery");

    let conversation = h
        .messenger
        .store()
        .view(|t| t.get_conversation(&b64(GROUP_PK)))
        .await
        .expect("conversation");
    assert_eq!(conversation.unread_count, 1);
}
