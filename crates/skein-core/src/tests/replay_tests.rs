use super::*;
use std::collections::BTreeMap;

use skein_api::stream::StreamEventPayload;

use crate::projector::Projector;

async fn project_hundred_messages(projector: &Projector) {
    for n in 0..100u32 {
        let cid = format!("cid-{:03}", n);
        let message = user_message(&format!("message {}", n), 1_000 + i64::from(n));
        let event = message_event(GROUP_PK, cid.as_bytes(), DEVICE_PEER, &message);
        projector
            .project_app_message(&b64(GROUP_PK), &event, &message)
            .await
            .expect("project message");
    }
}

async fn seed_conversation(store: &Store) {
    let conversation = Conversation::multi_member(b64(GROUP_PK));
    store
        .tx(|tx| tx.save_conversation(&conversation))
        .await
        .expect("seed conversation");
}

fn strip_read_state(snapshot: BTreeMap<String, Vec<u8>>) -> BTreeMap<String, Vec<u8>> {
    snapshot
        .into_iter()
        .filter(|(key, _)| !key.starts_with("conversation:"))
        .collect()
}

#[tokio::test]
async fn replay_rebuilds_the_same_interactions_without_side_effects() {
    let store = Store::open_in_memory();
    let group_reply = GroupInfoReply {
        group: Group {
            public_key: GROUP_PK.to_vec(),
        },
        member_pk: MEMBER_SELF.to_vec(),
        device_pk: DEVICE_SELF.to_vec(),
    };

    // Live pass.
    let live_protocol = InMemoryProtocol::new();
    live_protocol.register_group(group_reply.clone()).await;
    let live_dispatcher = BroadcastDispatcher::new(1024);
    let mut live_events = live_dispatcher.subscribe();
    let live = Messenger::new(
        MessengerConfig {
            replay: false,
            poll_interval_ms: 0,
        },
        store.clone(),
        std::sync::Arc::new(live_protocol.clone()),
        std::sync::Arc::new(live_dispatcher),
    );
    seed_conversation(&store).await;
    project_hundred_messages(&live.projector()).await;

    let live_interactions = store
        .view(|t| t.interactions_for_conversation(&b64(GROUP_PK)))
        .await
        .expect("live interactions");
    assert_eq!(live_interactions.len(), 100);
    // Every incoming message got acknowledged back.
    assert_eq!(live_protocol.sent_app_messages().await.len(), 100);
    let live_notified = drain_events(&mut live_events)
        .iter()
        .filter(|e| matches!(&e.payload, StreamEventPayload::Notified(_)))
        .count();
    assert_eq!(live_notified, 100);
    let live_snapshot = strip_read_state(store.snapshot().await);

    // Clear and rebuild from history.
    store.clear().await.expect("clear store");
    let replay_protocol = InMemoryProtocol::new();
    replay_protocol.register_group(group_reply).await;
    let replay_dispatcher = BroadcastDispatcher::new(1024);
    let mut replay_events = replay_dispatcher.subscribe();
    let replayed = Messenger::new(
        MessengerConfig {
            replay: true,
            poll_interval_ms: 0,
        },
        store.clone(),
        std::sync::Arc::new(replay_protocol.clone()),
        std::sync::Arc::new(replay_dispatcher),
    );
    seed_conversation(&store).await;
    project_hundred_messages(&replayed.projector()).await;

    let replay_interactions = store
        .view(|t| t.interactions_for_conversation(&b64(GROUP_PK)))
        .await
        .expect("replayed interactions");
    assert_eq!(replay_interactions.len(), 100);
    assert!(replay_protocol.sent_app_messages().await.is_empty());
    let replay_notified = drain_events(&mut replay_events)
        .iter()
        .filter(|e| matches!(&e.payload, StreamEventPayload::Notified(_)))
        .count();
    assert_eq!(replay_notified, 0);

    // Outside read-state accounting, the rebuilt state is identical.
    assert_eq!(strip_read_state(store.snapshot().await), live_snapshot);
}

#[tokio::test]
async fn replay_does_not_touch_unread_counts() {
    let h = harness(true).await;
    register_main_group(&h).await;
    seed_multi_member_conversation(&h).await;

    project_message(&h, b"cid-1", DEVICE_PEER, &user_message("old news", 1))
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
