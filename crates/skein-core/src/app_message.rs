use skein_api::stream::{NotificationKind, StreamEventPayload};
use skein_api::types::{
    AppMessageKind, Conversation, ConversationKind, Interaction, MediaState, Member, Reaction,
};
use skein_api::wire::{
    AppMessage, AppMessagePayload, GroupInfoRequest, GroupMessageEvent, SetUserInfoPayload,
    UserMessagePayload, UserReactionPayload,
};
use skein_store::{StoreError, StoreTx};

use crate::codec;
use crate::error::CoreError;
use crate::projector::{Effects, Projector};

/// Whether an app-message kind is routed at all, and whether a new insert
/// of it triggers the visible-interaction side effects.
fn handler_visibility(kind: AppMessageKind) -> Option<bool> {
    match kind {
        AppMessageKind::Acknowledge => Some(false),
        AppMessageKind::GroupInvitation => Some(true),
        AppMessageKind::UserMessage => Some(true),
        AppMessageKind::SetUserInfo => Some(false),
        AppMessageKind::ReplyOptions => Some(true),
        AppMessageKind::UserReaction => Some(false),
        AppMessageKind::Undefined => None,
    }
}

impl Projector {
    /// Projects one group message event. Total and idempotent: replays of an
    /// already-seen CID settle into the same state and suppress the
    /// first-appearance side effects.
    pub async fn project_app_message(
        &self,
        group_pk: &str,
        event: &GroupMessageEvent,
        message: &AppMessage,
    ) -> Result<(), CoreError> {
        match self.project_app_message_inner(group_pk, event, message).await {
            Err(CoreError::AlreadyExists) => Ok(()),
            Err(CoreError::Deserialization) => {
                tracing::warn!(kind = ?message.kind, "malformed app message payload");
                Ok(())
            }
            other => other,
        }
    }

    async fn project_app_message_inner(
        &self,
        group_pk: &str,
        event: &GroupMessageEvent,
        message: &AppMessage,
    ) -> Result<(), CoreError> {
        let Some(visible) = handler_visibility(message.kind) else {
            tracing::warn!(kind = ?message.kind, "unsupported app message kind");
            return Ok(());
        };

        if message.kind != AppMessageKind::Acknowledge {
            match codec::cid_string(&event.event_context.id) {
                Some(cid) => tracing::info!(
                    kind = ?message.kind,
                    medias = message.medias.len(),
                    cid = %cid,
                    target = %message.target_cid,
                    "handling app message"
                ),
                None => {
                    tracing::error!(kind = ?message.kind, "failed to cast cid for logging");
                }
            }
        }

        // Typed payload for the handlers that look inside it.
        let payload = match message.kind {
            AppMessageKind::UserMessage
            | AppMessageKind::SetUserInfo
            | AppMessageKind::UserReaction => Some(message.decode_payload()?),
            _ => None,
        };

        let group_info = self
            .protocol
            .group_info(GroupInfoRequest::for_group(codec::b64_decode(group_pk)?))
            .await?;
        let is_mine =
            !event.headers.device_pk.is_empty() && group_info.device_pk == event.headers.device_pk;

        let cid = codec::b64_encode(&event.event_context.id);
        let device_pk = codec::b64_encode(&event.headers.device_pk);
        let medias = message
            .medias
            .iter()
            .cloned()
            .map(|mut media| {
                media.interaction_cid = cid.clone();
                media.state = MediaState::NeverDownloaded;
                media
            })
            .collect();
        let interaction = Interaction {
            cid,
            kind: message.kind,
            payload: message.payload.clone(),
            conversation_public_key: group_pk.to_string(),
            device_public_key: device_pk,
            member_public_key: String::new(),
            sent_date: message.sent_date,
            target_cid: message.target_cid.clone(),
            is_mine,
            acknowledged: false,
            medias,
            reactions: Vec::new(),
        };

        let group = group_pk.to_string();
        let (interaction, is_new, fx) = self
            .store
            .tx(move |tx| self.project_interaction(tx, group, interaction, payload))
            .await?;

        self.flush(fx).await;

        if visible && is_new {
            if let Err(err) = self.dispatch_visible_interaction(&interaction).await {
                tracing::error!(cid = %interaction.cid, error = %err, "unable to dispatch visible interaction update");
            }
        }

        Ok(())
    }

    /// Body of the app-message transaction.
    fn project_interaction(
        &self,
        tx: &mut StoreTx,
        group_pk: String,
        mut interaction: Interaction,
        payload: Option<AppMessagePayload>,
    ) -> Result<(Interaction, bool, Effects), CoreError> {
        let mut fx = Effects::default();

        interaction.member_public_key = tx
            .member_pk_for_device(&interaction.device_public_key)?
            .unwrap_or_default();

        let medias_added = tx.add_medias(&interaction.medias)?;

        let conversation = match tx.get_conversation(&group_pk) {
            Ok(conversation) => Some(conversation),
            Err(StoreError::NotFound) => {
                tracing::warn!(group = %group_pk, "conversation related to interaction not found");
                None
            }
            Err(err) => return Err(err.into()),
        };

        self.consume_acks(tx, &mut interaction, &mut fx)?;

        let medias = interaction.medias.clone();
        let (interaction, is_new) =
            self.route(tx, interaction, payload, conversation.as_ref(), &mut fx)?;

        for (media, added) in medias.iter().zip(medias_added) {
            if added {
                fx.push(StreamEventPayload::MediaUpdated(media.clone()), true);
            }
        }

        Ok((interaction, is_new, fx))
    }

    fn route(
        &self,
        tx: &mut StoreTx,
        interaction: Interaction,
        payload: Option<AppMessagePayload>,
        conversation: Option<&Conversation>,
        fx: &mut Effects,
    ) -> Result<(Interaction, bool), CoreError> {
        match (interaction.kind, payload) {
            (AppMessageKind::Acknowledge, _) => self.handle_acknowledge(tx, interaction, fx),
            (AppMessageKind::GroupInvitation, _) | (AppMessageKind::ReplyOptions, _) => {
                self.handle_plain_insert(tx, interaction, fx)
            }
            (AppMessageKind::UserMessage, Some(AppMessagePayload::UserMessage(payload))) => {
                self.handle_user_message(tx, interaction, &payload, conversation, fx)
            }
            (AppMessageKind::SetUserInfo, Some(AppMessagePayload::SetUserInfo(payload))) => {
                self.handle_set_user_info(tx, interaction, &payload, conversation, fx)
            }
            (AppMessageKind::UserReaction, Some(AppMessagePayload::UserReaction(payload))) => {
                self.handle_reaction(tx, interaction, &payload, fx)
            }
            _ => Err(CoreError::Deserialization),
        }
    }

    fn handle_acknowledge(
        &self,
        tx: &mut StoreTx,
        interaction: Interaction,
        fx: &mut Effects,
    ) -> Result<(Interaction, bool), CoreError> {
        if interaction.target_cid.is_empty() {
            return Err(CoreError::InvalidInput("empty target cid"));
        }
        match tx.mark_interaction_acknowledged(&interaction.target_cid)? {
            None => {
                tracing::debug!(
                    target = %interaction.target_cid,
                    cid = %interaction.cid,
                    "storing ack in backlog"
                );
                let (interaction, _) = tx.add_interaction(interaction)?;
                Ok((interaction, false))
            }
            Some(target) => {
                self.stream_interaction(tx, &target.cid, false, fx)?;
                Ok((interaction, false))
            }
        }
    }

    fn handle_plain_insert(
        &self,
        tx: &mut StoreTx,
        interaction: Interaction,
        fx: &mut Effects,
    ) -> Result<(Interaction, bool), CoreError> {
        let (interaction, is_new) = tx.add_interaction(interaction)?;
        self.stream_interaction(tx, &interaction.cid, is_new, fx)?;
        Ok((interaction, is_new))
    }

    fn handle_user_message(
        &self,
        tx: &mut StoreTx,
        interaction: Interaction,
        payload: &UserMessagePayload,
        conversation: Option<&Conversation>,
        fx: &mut Effects,
    ) -> Result<(Interaction, bool), CoreError> {
        let (interaction, is_new) = tx.add_interaction(interaction)?;
        self.stream_interaction(tx, &interaction.cid, is_new, fx)?;

        if interaction.is_mine || self.replay || !is_new {
            return Ok((interaction, is_new));
        }

        fx.ack(
            interaction.cid.clone(),
            interaction.conversation_public_key.clone(),
        );

        // No notification for a conversation we do not know yet.
        let Some(conversation) = conversation else {
            return Ok((interaction, is_new));
        };

        let title;
        let mut body = payload.body.clone();
        if conversation.kind == ConversationKind::Contact {
            let contact = match tx.get_contact(&conversation.contact_public_key) {
                Ok(contact) => Some(contact),
                Err(_) => {
                    tracing::warn!(
                        contact = %conversation.contact_public_key,
                        "1to1 message contact not found"
                    );
                    None
                }
            };
            title = contact.map(|c| c.display_name).unwrap_or_default();
        } else {
            title = conversation.display_name.clone();
            let member_name = tx
                .get_member(
                    &interaction.member_public_key,
                    &interaction.conversation_public_key,
                )
                .map(|m| m.display_name)
                .unwrap_or_default();
            if !member_name.is_empty() {
                body = format!("{}: {}", member_name, payload.body);
            }
        }
        fx.notify(NotificationKind::MessageReceived, title, body);

        Ok((interaction, is_new))
    }

    fn handle_set_user_info(
        &self,
        tx: &mut StoreTx,
        interaction: Interaction,
        payload: &SetUserInfoPayload,
        conversation: Option<&Conversation>,
        fx: &mut Effects,
    ) -> Result<(Interaction, bool), CoreError> {
        if let Some(conversation) = conversation.filter(|c| c.kind == ConversationKind::Contact) {
            if interaction.is_mine {
                return Ok((interaction, false));
            }
            let mut contact = tx.get_contact(&conversation.contact_public_key)?;
            if interaction.sent_date <= contact.info_date {
                return Ok((interaction, false));
            }
            contact.display_name = payload.display_name.clone();
            contact.avatar_cid = payload.avatar_cid.clone();
            contact.info_date = interaction.sent_date;
            tx.save_contact(&contact)?;
            tracing::debug!(
                name = %contact.display_name,
                conversation = %interaction.conversation_public_key,
                "applied contact user info"
            );
            fx.push(StreamEventPayload::ContactUpdated(contact), false);
            return Ok((interaction, false));
        }

        if interaction.member_public_key.is_empty() {
            // Device unknown so far: keep the row for later attribution.
            tracing::info!(
                name = %payload.display_name,
                device = %interaction.device_public_key,
                conversation = %interaction.conversation_public_key,
                "storing user info in backlog"
            );
            let (interaction, is_new) = tx.add_interaction(interaction)?;
            return Ok((interaction, is_new));
        }

        match tx.get_member(
            &interaction.member_public_key,
            &interaction.conversation_public_key,
        ) {
            Ok(existing) if interaction.sent_date <= existing.info_date => {
                return Ok((interaction, false));
            }
            Ok(_) | Err(StoreError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let (member, is_new) = tx.upsert_member(Member {
            public_key: interaction.member_public_key.clone(),
            conversation_public_key: interaction.conversation_public_key.clone(),
            display_name: payload.display_name.clone(),
            avatar_cid: payload.avatar_cid.clone(),
            info_date: interaction.sent_date,
            ..Member::default()
        })?;
        fx.push(StreamEventPayload::MemberUpdated(member), is_new);
        Ok((interaction, false))
    }

    fn handle_reaction(
        &self,
        tx: &mut StoreTx,
        interaction: Interaction,
        payload: &UserReactionPayload,
        fx: &mut Effects,
    ) -> Result<(Interaction, bool), CoreError> {
        if interaction.member_public_key.is_empty() {
            return Err(CoreError::InvalidInput("empty member public key"));
        }
        if interaction.target_cid.is_empty() {
            return Err(CoreError::InvalidInput("empty target cid"));
        }

        let incoming = Reaction {
            target_cid: interaction.target_cid.clone(),
            member_public_key: interaction.member_public_key.clone(),
            emoji: payload.emoji.clone(),
            is_mine: interaction.is_mine,
            state: payload.state,
            state_date: interaction.sent_date,
        };

        let updated = match tx.get_reaction(
            &incoming.target_cid,
            &incoming.member_public_key,
            &incoming.emoji,
        )? {
            None => {
                tx.save_reaction(&incoming)?;
                true
            }
            Some(existing) if incoming.state_date > existing.state_date => {
                tx.save_reaction(&incoming)?;
                true
            }
            Some(_) => false,
        };

        if updated {
            // The target may not have arrived yet; the view catches up when
            // it does.
            if let Err(err) = self.stream_interaction(tx, &interaction.target_cid, false, fx) {
                tracing::debug!(target = %interaction.target_cid, error = %err, "failed to stream reaction target");
            }
        }

        Ok((interaction, false))
    }
}
