use skein_api::stream::{NotificationKind, StreamEventPayload};
use skein_api::types::{AppMessageKind, ContactState, Member, ReplicationInfo};
use skein_api::wire::{
    AccountContactRequestAccepted, AccountContactRequestEnqueued, AccountContactRequestReceived,
    AccountContactRequestSent, AccountGroupJoined, AppMessage, ContactMetadata, GroupInfoRequest,
    GroupMessageEvent, GroupMetadataEvent, GroupReplicating, MemberDeviceAdded, MessageHeaders,
    MetadataEventKind, MetadataPayloadSent, MultiMemberInitialMember, ServiceTokenAdded,
    SetUserInfoPayload,
};
use skein_store::StoreError;

use crate::codec;
use crate::error::CoreError;
use crate::projector::{Effects, Projector};

impl Projector {
    /// Projects one group metadata event. Unknown kinds are skipped,
    /// malformed bodies are logged and skipped, duplicate entries settle as
    /// no-ops.
    pub async fn project_metadata(&self, event: &GroupMetadataEvent) -> Result<(), CoreError> {
        let kind = event.metadata.kind;
        tracing::info!(kind = ?kind, "received metadata event");

        let result = match kind {
            MetadataEventKind::AccountGroupJoined => self.account_group_joined(event).await,
            MetadataEventKind::AccountContactRequestOutgoingEnqueued => {
                self.contact_request_outgoing_enqueued(event).await
            }
            MetadataEventKind::AccountContactRequestOutgoingSent => {
                self.contact_request_outgoing_sent(event).await
            }
            MetadataEventKind::AccountContactRequestIncomingReceived => {
                self.contact_request_incoming_received(event).await
            }
            MetadataEventKind::AccountContactRequestIncomingAccepted => {
                self.contact_request_incoming_accepted(event).await
            }
            MetadataEventKind::GroupMemberDeviceAdded => self.member_device_added(event).await,
            MetadataEventKind::GroupMetadataPayloadSent => self.metadata_payload_sent(event).await,
            MetadataEventKind::AccountServiceTokenAdded => self.service_token_added(event).await,
            MetadataEventKind::GroupReplicating => self.group_replicating(event).await,
            MetadataEventKind::MultiMemberGroupInitialMemberAnnounced => {
                self.initial_member_announced(event).await
            }
            _ => {
                tracing::info!(kind = ?kind, "metadata event ignored");
                Ok(())
            }
        };

        match result {
            Err(CoreError::AlreadyExists) => Ok(()),
            Err(CoreError::Deserialization) => {
                tracing::warn!(kind = ?kind, "malformed metadata event body");
                Ok(())
            }
            other => other,
        }
    }

    async fn account_group_joined(&self, event: &GroupMetadataEvent) -> Result<(), CoreError> {
        let ev: AccountGroupJoined = codec::decode_event(&event.event)?;
        let group_pk_bytes = ev.group.public_key;
        let group_pk = codec::b64_encode(&group_pk_bytes);

        let joined = {
            let group_pk = group_pk.clone();
            self.store
                .tx(move |tx| {
                    // A group we reached through a contact request stays a
                    // 1-to-1 conversation.
                    let contact = tx.contact_for_conversation(&group_pk)?;
                    let added = match contact {
                        Some(contact) => {
                            tx.add_conversation_for_contact(&group_pk, &contact.public_key)
                        }
                        None => tx.add_conversation_multi_member(&group_pk),
                    };
                    match added {
                        Ok(conversation) => Ok::<_, CoreError>(Some(conversation)),
                        Err(StoreError::AlreadyExists) => Ok(None),
                        Err(err) => Err(err.into()),
                    }
                })
                .await?
        };

        match joined {
            Some(conversation) => {
                self.emit(StreamEventPayload::ConversationUpdated(conversation), true);
            }
            None => tracing::info!(group = %group_pk, "conversation already known"),
        }

        if let Err(err) = self.protocol.activate_group(&group_pk_bytes).await {
            tracing::warn!(group = %group_pk, error = %err, "failed to activate group");
        }
        self.subscriptions.subscribe_group(&group_pk).await;
        tracing::info!(group = %group_pk, "account joined group");
        Ok(())
    }

    async fn contact_request_outgoing_enqueued(
        &self,
        event: &GroupMetadataEvent,
    ) -> Result<(), CoreError> {
        let ev: AccountContactRequestEnqueued = codec::decode_event(&event.event)?;
        let contact_pk = codec::b64_encode(&ev.contact.pk);
        let metadata: ContactMetadata = codec::decode_event(&ev.contact.metadata)?;

        let group_pk = if ev.group_pk.is_empty() {
            let reply = self
                .protocol
                .group_info(GroupInfoRequest::for_contact(ev.contact.pk.clone()))
                .await?;
            codec::b64_encode(&reply.group.public_key)
        } else {
            codec::b64_encode(&ev.group_pk)
        };

        let (contact, conversation) = self
            .store
            .tx(move |tx| {
                let contact = tx.add_contact_outgoing_enqueued(
                    &contact_pk,
                    &metadata.display_name,
                    &group_pk,
                )?;
                let conversation = match tx.add_conversation_for_contact(&group_pk, &contact_pk) {
                    Ok(conversation) => conversation,
                    Err(StoreError::AlreadyExists) => tx.get_conversation(&group_pk)?,
                    Err(err) => return Err(err.into()),
                };
                Ok::<_, CoreError>((contact, conversation))
            })
            .await?;

        self.emit(StreamEventPayload::ContactUpdated(contact), true);
        self.emit(StreamEventPayload::ConversationUpdated(conversation), true);
        Ok(())
    }

    async fn contact_request_outgoing_sent(
        &self,
        event: &GroupMetadataEvent,
    ) -> Result<(), CoreError> {
        let ev: AccountContactRequestSent = codec::decode_event(&event.event)?;
        let contact_pk = codec::b64_encode(&ev.contact_pk);

        let contact = {
            let contact_pk = contact_pk.clone();
            self.store
                .tx(move |tx| tx.mark_contact_outgoing_sent(&contact_pk))
                .await?
        };

        self.emit(StreamEventPayload::ContactUpdated(contact.clone()), false);
        self.notify_user(
            NotificationKind::ContactRequestSent,
            "Contact request sent",
            &format!("To: {}", contact.display_name),
        );

        let reply = self
            .protocol
            .group_info(GroupInfoRequest::for_contact(ev.contact_pk.clone()))
            .await?;
        let group_pk = codec::b64_encode(&reply.group.public_key);

        if let Err(err) = self.protocol.activate_group(&reply.group.public_key).await {
            tracing::warn!(group = %group_pk, error = %err, "failed to activate group");
        }
        if let Err(err) = self.send_account_user_info(&group_pk).await {
            tracing::error!(group = %group_pk, error = %err, "failed to announce user info after request sent");
        }
        self.subscriptions.subscribe_metadata(&group_pk).await;
        Ok(())
    }

    async fn contact_request_incoming_received(
        &self,
        event: &GroupMetadataEvent,
    ) -> Result<(), CoreError> {
        let ev: AccountContactRequestReceived = codec::decode_event(&event.event)?;
        let contact_pk = codec::b64_encode(&ev.contact_pk);
        let metadata: ContactMetadata = codec::decode_event(&ev.contact_metadata)?;

        let reply = self
            .protocol
            .group_info(GroupInfoRequest::for_contact(ev.contact_pk.clone()))
            .await?;
        let group_pk = codec::b64_encode(&reply.group.public_key);

        let (contact, conversation) = self
            .store
            .tx(move |tx| {
                let contact = tx.add_contact_incoming_received(
                    &contact_pk,
                    &metadata.display_name,
                    &group_pk,
                )?;
                let conversation = match tx.add_conversation_for_contact(&group_pk, &contact_pk) {
                    Ok(conversation) => conversation,
                    Err(StoreError::AlreadyExists) => tx.get_conversation(&group_pk)?,
                    Err(err) => return Err(err.into()),
                };
                Ok::<_, CoreError>((contact, conversation))
            })
            .await?;

        self.emit(StreamEventPayload::ContactUpdated(contact.clone()), true);
        self.emit(StreamEventPayload::ConversationUpdated(conversation), true);
        self.notify_user(
            NotificationKind::ContactRequestReceived,
            "Contact request received",
            &format!("From: {}", contact.display_name),
        );
        Ok(())
    }

    async fn contact_request_incoming_accepted(
        &self,
        event: &GroupMetadataEvent,
    ) -> Result<(), CoreError> {
        let ev: AccountContactRequestAccepted = codec::decode_event(&event.event)?;
        if ev.contact_pk.is_empty() {
            return Err(CoreError::InvalidInput("contact pk is empty"));
        }
        let contact_pk = codec::b64_encode(&ev.contact_pk);

        let reply = self
            .protocol
            .group_info(GroupInfoRequest::for_contact(ev.contact_pk.clone()))
            .await?;
        let group_pk = codec::b64_encode(&reply.group.public_key);

        let contact = {
            let contact_pk = contact_pk.clone();
            let group_pk = group_pk.clone();
            self.store
                .tx(move |tx| tx.accept_contact(&contact_pk, &group_pk))
                .await?
        };

        self.emit(StreamEventPayload::ContactUpdated(contact), false);

        if let Err(err) = self.protocol.activate_group(&reply.group.public_key).await {
            tracing::warn!(group = %group_pk, error = %err, "failed to activate group");
        }
        if let Err(err) = self.send_account_user_info(&group_pk).await {
            tracing::error!(group = %group_pk, error = %err, "failed to announce user info after accepting request");
        }
        self.subscriptions.subscribe_group(&group_pk).await;
        Ok(())
    }

    /// Fires when any member of any joined group announces a device: our
    /// own, a contact's, or a fellow multi-member's. Registers the device,
    /// completes a pending outgoing contact request if this is the first
    /// sign of the remote side, then drains the backlog rows waiting for
    /// this device.
    async fn member_device_added(&self, event: &GroupMetadataEvent) -> Result<(), CoreError> {
        let ev: MemberDeviceAdded = codec::decode_event(&event.event)?;
        let group_pk_bytes = event.event_context.group_pk.clone();
        if ev.member_pk.is_empty() || ev.device_pk.is_empty() || group_pk_bytes.is_empty() {
            return Err(CoreError::InvalidInput("missing metadata event references"));
        }

        let member_pk = codec::b64_encode(&ev.member_pk);
        let device_pk = codec::b64_encode(&ev.device_pk);
        let group_pk = codec::b64_encode(&group_pk_bytes);

        let reply = self
            .protocol
            .group_info(GroupInfoRequest::for_group(group_pk_bytes))
            .await?;
        let is_me = reply.member_pk == ev.member_pk;

        // When this device belongs to a contact we invited, its appearance
        // is the acceptance signal; resolve the contact's group up front so
        // the transition can run inside the transaction.
        let pending_contact = self
            .store
            .view(|t| {
                t.get_contact(&member_pk)
                    .ok()
                    .filter(|c| c.state == ContactState::OutgoingRequestSent)
            })
            .await;
        let accepted_group = match pending_contact {
            Some(_) => {
                let contact_reply = self
                    .protocol
                    .group_info(GroupInfoRequest::for_contact(ev.member_pk.clone()))
                    .await?;
                Some(contact_reply.group.public_key)
            }
            None => None,
        };

        let fx = {
            let member_pk = member_pk.clone();
            let device_pk = device_pk.clone();
            let group_pk = group_pk.clone();
            let accepted_group = accepted_group.clone();
            self.store
                .tx(move |tx| {
                    let mut fx = Effects::default();

                    if matches!(tx.get_device(&device_pk), Err(StoreError::NotFound)) {
                        let device = tx.add_device(&device_pk, &member_pk)?;
                        fx.push(StreamEventPayload::DeviceUpdated(device), true);
                    }

                    if let Some(accepted_group) = accepted_group.as_deref() {
                        let contact = tx
                            .accept_contact(&member_pk, &codec::b64_encode(accepted_group))?;
                        fx.push(StreamEventPayload::ContactUpdated(contact), false);
                    }

                    let backlog = tx.attribute_backlog(&device_pk, &group_pk, &member_pk)?;
                    let mut user_info: Option<SetUserInfoPayload> = None;
                    for element in backlog {
                        tracing::info!(
                            kind = ?element.kind,
                            device = %element.device_public_key,
                            conversation = %element.conversation_public_key,
                            "found element in backlog"
                        );
                        if element.kind == AppMessageKind::SetUserInfo {
                            match serde_json::from_slice::<SetUserInfoPayload>(&element.payload) {
                                Ok(payload) => user_info = Some(payload),
                                Err(_) => {
                                    tracing::warn!(cid = %element.cid, "undecodable user info in backlog");
                                }
                            }
                            tx.delete_interactions(std::slice::from_ref(&element.cid))?;
                            fx.push(StreamEventPayload::InteractionDeleted(element.cid), false);
                        } else {
                            self.stream_interaction(tx, &element.cid, false, &mut fx)?;
                        }
                    }

                    let user_info = user_info.unwrap_or_default();
                    let (member, is_new) = tx.upsert_member(Member {
                        public_key: member_pk.clone(),
                        conversation_public_key: group_pk.clone(),
                        display_name: user_info.display_name,
                        avatar_cid: user_info.avatar_cid,
                        is_me,
                        ..Member::default()
                    })?;
                    fx.push(StreamEventPayload::MemberUpdated(member), is_new);

                    Ok::<_, CoreError>(fx)
                })
                .await?
        };

        self.flush(fx).await;

        if let Some(accepted_group) = accepted_group {
            let accepted_pk = codec::b64_encode(&accepted_group);
            if let Err(err) = self.protocol.activate_group(&accepted_group).await {
                tracing::warn!(group = %accepted_pk, error = %err, "failed to activate group");
            }
            self.subscriptions.subscribe_messages(&accepted_pk).await;
        }
        Ok(())
    }

    /// An app message carried over the metadata stream; re-enter the
    /// app-message path with the metadata event's context.
    async fn metadata_payload_sent(&self, event: &GroupMetadataEvent) -> Result<(), CoreError> {
        let ev: MetadataPayloadSent = codec::decode_event(&event.event)?;
        let message = AppMessage::decode(&ev.message)?;
        let message_event = GroupMessageEvent {
            event_context: event.event_context.clone(),
            message: ev.message,
            headers: MessageHeaders {
                device_pk: ev.device_pk,
            },
        };
        let group_pk = codec::b64_encode(&event.event_context.group_pk);
        self.project_app_message(&group_pk, &message_event, &message)
            .await
    }

    async fn service_token_added(&self, event: &GroupMetadataEvent) -> Result<(), CoreError> {
        let config = self.protocol.instance_get_configuration().await?;
        let ev: ServiceTokenAdded = codec::decode_event(&event.event)?;
        let account_pk = codec::b64_encode(&config.account_pk);

        let account = self
            .store
            .tx(move |tx| tx.add_service_token(&account_pk, &ev.service_token))
            .await?;

        self.emit(StreamEventPayload::AccountUpdated(account), false);
        Ok(())
    }

    async fn group_replicating(&self, event: &GroupMetadataEvent) -> Result<(), CoreError> {
        let ev: GroupReplicating = codec::decode_event(&event.event)?;
        let conversation_pk = codec::b64_encode(&event.event_context.group_pk);
        let cid = codec::b64_encode(&event.event_context.id);

        // Best effort: the info is worth keeping even when the member key
        // cannot be resolved.
        let member_pk = match self
            .protocol
            .group_info(GroupInfoRequest::for_group(
                event.event_context.group_pk.clone(),
            ))
            .await
        {
            Ok(reply) => codec::b64_encode(&reply.member_pk),
            Err(err) => {
                tracing::warn!(conversation = %conversation_pk, error = %err, "cannot resolve member for replication info");
                String::new()
            }
        };

        let info = ReplicationInfo {
            cid,
            conversation_public_key: conversation_pk.clone(),
            member_public_key: member_pk,
            authentication_url: ev.authentication_url,
            replication_server: ev.replication_server,
        };
        self.store
            .tx(move |tx| tx.save_replication_info(&info))
            .await?;

        match self
            .store
            .view(|t| t.get_conversation(&conversation_pk))
            .await
        {
            Ok(conversation) => {
                self.emit(StreamEventPayload::ConversationUpdated(conversation), false);
            }
            Err(_) => tracing::warn!(conversation = %conversation_pk, "unknown conversation"),
        }
        Ok(())
    }

    async fn initial_member_announced(&self, event: &GroupMetadataEvent) -> Result<(), CoreError> {
        let ev: MultiMemberInitialMember = codec::decode_event(&event.event)?;
        let member_pk = codec::b64_encode(&ev.member_pk);
        let group_pk = codec::b64_encode(&event.event_context.group_pk);

        let reply = self
            .protocol
            .group_info(GroupInfoRequest::for_group(
                event.event_context.group_pk.clone(),
            ))
            .await?;
        let is_me = reply.member_pk == ev.member_pk;

        let member = self
            .store
            .tx(move |tx| {
                match tx.get_member(&member_pk, &group_pk) {
                    Err(StoreError::NotFound) => {
                        tx.save_member(&Member {
                            public_key: member_pk.clone(),
                            conversation_public_key: group_pk.clone(),
                            is_me,
                            is_creator: true,
                            ..Member::default()
                        })?;
                    }
                    Ok(mut member) => {
                        member.is_creator = true;
                        tx.save_member(&member)?;
                    }
                    Err(err) => return Err(err.into()),
                }
                Ok::<_, CoreError>(tx.get_member(&member_pk, &group_pk)?)
            })
            .await?;

        self.emit(StreamEventPayload::MemberUpdated(member), true);
        Ok(())
    }
}
