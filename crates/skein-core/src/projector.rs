use std::sync::Arc;

use skein_api::stream::{NotificationKind, StreamEvent, StreamEventPayload};
use skein_api::types::{AppMessageKind, Interaction, ReactionView};
use skein_api::wire::{AppMessage, SetUserInfoPayload};
use skein_store::{Store, Tables};

use crate::codec;
use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::event_loop::Subscriptions;
use crate::protocol::ProtocolClient;
use crate::time::now_ms;

/// Projects decoded protocol events into store mutations and view updates.
///
/// Every projected event runs inside a single store transaction; dispatcher
/// and protocol side effects are buffered during the transaction and only
/// performed once it has committed.
pub struct Projector {
    pub(crate) store: Store,
    pub(crate) protocol: Arc<dyn ProtocolClient>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) subscriptions: Subscriptions,
    pub(crate) replay: bool,
}

/// Side effects gathered while a transaction is open.
#[derive(Default)]
pub(crate) struct Effects {
    events: Vec<StreamEvent>,
    notifications: Vec<(NotificationKind, String, String)>,
    /// `(target cid, conversation pk)` of an acknowledge to send back.
    ack: Option<(String, String)>,
}

impl Effects {
    pub(crate) fn push(&mut self, payload: StreamEventPayload, is_new: bool) {
        self.events.push(StreamEvent::new(payload, is_new));
    }

    pub(crate) fn notify(&mut self, kind: NotificationKind, title: String, body: String) {
        self.notifications.push((kind, title, body));
    }

    pub(crate) fn ack(&mut self, cid: String, conversation_pk: String) {
        self.ack = Some((cid, conversation_pk));
    }
}

impl Projector {
    pub(crate) fn new(
        store: Store,
        protocol: Arc<dyn ProtocolClient>,
        dispatcher: Arc<dyn Dispatcher>,
        subscriptions: Subscriptions,
        replay: bool,
    ) -> Self {
        Self {
            store,
            protocol,
            dispatcher,
            subscriptions,
            replay,
        }
    }

    /// Emit one stream event, logging instead of failing: the transaction
    /// that produced it is already committed.
    pub(crate) fn emit(&self, payload: StreamEventPayload, is_new: bool) {
        if let Err(err) = self.dispatcher.stream_event(payload, is_new) {
            tracing::warn!(error = %err, "failed to dispatch stream event");
        }
    }

    pub(crate) fn notify_user(&self, kind: NotificationKind, title: &str, body: &str) {
        if self.replay {
            return;
        }
        if let Err(err) = self.dispatcher.notify(kind, title, body) {
            tracing::warn!(error = %err, "failed to notify");
        }
    }

    pub(crate) async fn flush(&self, fx: Effects) {
        for event in fx.events {
            self.emit(event.payload, event.is_new);
        }
        for (kind, title, body) in fx.notifications {
            self.notify_user(kind, &title, &body);
        }
        if self.replay {
            return;
        }
        if let Some((cid, conversation_pk)) = fx.ack {
            if let Err(err) = self.send_ack(&cid, &conversation_pk).await {
                tracing::error!(cid = %cid, conversation = %conversation_pk, error = %err, "error while sending ack");
            }
        }
    }

    /// Loads the interaction, rebuilds its aggregated reaction view and
    /// queues an update event for it.
    pub(crate) fn stream_interaction(
        &self,
        tables: &Tables,
        cid: &str,
        is_new: bool,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        let mut interaction = tables.get_interaction(cid)?;
        interaction.reactions = build_reactions_view(tables, cid)?;
        fx.push(StreamEventPayload::InteractionUpdated(interaction), is_new);
        Ok(())
    }

    /// Consumes backlog acknowledges targeting a freshly arrived
    /// interaction: the flag is set before the row is inserted, so its first
    /// update event already carries `acknowledged = true`.
    pub(crate) fn consume_acks(
        &self,
        tables: &mut Tables,
        interaction: &mut Interaction,
        fx: &mut Effects,
    ) -> Result<(), CoreError> {
        let cids = tables.acks_targeting(&interaction.cid)?;
        if cids.is_empty() {
            return Ok(());
        }
        interaction.acknowledged = true;
        tables.delete_interactions(&cids)?;
        for cid in cids {
            tracing::debug!(target = %interaction.cid, ack = %cid, "consumed ack from backlog");
            fx.push(StreamEventPayload::InteractionDeleted(cid), false);
        }
        Ok(())
    }

    /// Unread accounting for a newly inserted visible interaction, run in
    /// its own transaction after the main one committed.
    pub(crate) async fn dispatch_visible_interaction(
        &self,
        interaction: &Interaction,
    ) -> Result<(), CoreError> {
        let bump_wanted = !self.replay && !interaction.is_mine;
        let conversation_pk = interaction.conversation_public_key.clone();
        let conversation = self
            .store
            .tx(move |tx| {
                let conversation = tx.get_conversation(&conversation_pk)?;
                let bump = bump_wanted && !conversation.is_open;
                Ok::<_, CoreError>(tx.update_read_state(&conversation_pk, bump, now_ms())?)
            })
            .await?;
        self.emit(StreamEventPayload::ConversationUpdated(conversation), false);
        Ok(())
    }

    pub(crate) async fn send_ack(&self, cid: &str, conversation_pk: &str) -> Result<(), CoreError> {
        tracing::debug!(target = %cid, "sending ack");
        let payload = AppMessage::acknowledge(cid, now_ms())?.encode()?;
        let group_pk = codec::b64_decode(conversation_pk)?;
        self.protocol.app_message_send(&group_pk, payload).await
    }

    /// Announces the local account's user info into a group.
    pub(crate) async fn send_account_user_info(&self, group_pk: &str) -> Result<(), CoreError> {
        let account = self.store.view(|t| t.get_account()).await?;
        let message = AppMessage::new(
            AppMessageKind::SetUserInfo,
            &SetUserInfoPayload {
                display_name: account.display_name,
                avatar_cid: account.avatar_cid,
            },
            now_ms(),
            "",
        )?;
        let group_pk = codec::b64_decode(group_pk)?;
        self.protocol
            .app_message_send(&group_pk, message.encode()?)
            .await
    }
}

/// Aggregates the set reactions of a target by emoji.
pub(crate) fn build_reactions_view(
    tables: &Tables,
    target_cid: &str,
) -> Result<Vec<ReactionView>, CoreError> {
    let mut views: Vec<ReactionView> = Vec::new();
    for reaction in tables.reactions_for_target(target_cid)? {
        if !reaction.state {
            continue;
        }
        match views.iter_mut().find(|v| v.emoji == reaction.emoji) {
            Some(view) => {
                view.count += 1;
                view.own_state |= reaction.is_mine;
            }
            None => views.push(ReactionView {
                emoji: reaction.emoji.clone(),
                count: 1,
                own_state: reaction.is_mine,
            }),
        }
    }
    views.sort_by(|a, b| a.emoji.cmp(&b.emoji));
    Ok(views)
}
