use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use skein_api::types::{
    Account, AppMessageKind, Contact, ContactState, Conversation, Device, Interaction, Media,
    Member, Reaction, ReplicationInfo, ServiceToken,
};

use crate::error::{Result, StoreError};

const ACCOUNT_KEY: &str = "account";

fn contact_key(pk: &str) -> String {
    format!("contact:{}", pk)
}

fn conversation_key(pk: &str) -> String {
    format!("conversation:{}", pk)
}

fn replication_key(conversation_pk: &str) -> String {
    format!("replication:{}", conversation_pk)
}

fn member_key(conversation_pk: &str, member_pk: &str) -> String {
    format!("member:{}:{}", conversation_pk, member_pk)
}

fn device_key(pk: &str) -> String {
    format!("device:{}", pk)
}

fn interaction_key(cid: &str) -> String {
    format!("interaction:{}", cid)
}

fn media_key(cid: &str) -> String {
    format!("media:{}", cid)
}

fn reaction_key(target_cid: &str, member_pk: &str, emoji: &str) -> String {
    format!("reaction:{}:{}:{}", target_cid, member_pk, emoji)
}

/// The full key space of the local view. Every value is a serde_json
/// document; keys are prefix-partitioned per entity.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    entries: BTreeMap<String, Vec<u8>>,
}

impl Tables {
    fn get_doc<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.entries.get(key) {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(bytes).map_err(|_| StoreError::Codec)?,
            )),
            None => Ok(None),
        }
    }

    fn put_doc<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|_| StoreError::Codec)?;
        self.entries.insert(key.to_string(), bytes);
        Ok(())
    }

    fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for (_, bytes) in self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            out.push(serde_json::from_slice(bytes).map_err(|_| StoreError::Codec)?);
        }
        Ok(out)
    }

    // -- account ------------------------------------------------------------

    pub fn get_account(&self) -> Result<Account> {
        self.get_doc(ACCOUNT_KEY)?.ok_or(StoreError::NotFound)
    }

    pub fn save_account(&mut self, account: &Account) -> Result<()> {
        self.put_doc(ACCOUNT_KEY, account)
    }

    /// Appends a service token to the account; adding the same token twice
    /// is a no-op.
    pub fn add_service_token(&mut self, account_pk: &str, token: &ServiceToken) -> Result<Account> {
        let mut account = self.get_account()?;
        if account.public_key != account_pk {
            return Err(StoreError::NotFound);
        }
        if !account.service_tokens.iter().any(|t| t.token == token.token) {
            account.service_tokens.push(token.clone());
            self.save_account(&account)?;
        }
        Ok(account)
    }

    // -- contacts -----------------------------------------------------------

    pub fn get_contact(&self, pk: &str) -> Result<Contact> {
        self.get_doc(&contact_key(pk))?.ok_or(StoreError::NotFound)
    }

    pub fn save_contact(&mut self, contact: &Contact) -> Result<()> {
        self.put_doc(&contact_key(&contact.public_key), contact)
    }

    pub fn add_contact_outgoing_enqueued(
        &mut self,
        pk: &str,
        display_name: &str,
        conversation_pk: &str,
    ) -> Result<Contact> {
        if self.entries.contains_key(&contact_key(pk)) {
            return Err(StoreError::AlreadyExists);
        }
        let contact = Contact {
            display_name: display_name.to_string(),
            conversation_public_key: conversation_pk.to_string(),
            state: ContactState::OutgoingRequestEnqueued,
            ..Contact::new(pk)
        };
        self.save_contact(&contact)?;
        Ok(contact)
    }

    pub fn mark_contact_outgoing_sent(&mut self, pk: &str) -> Result<Contact> {
        let mut contact = self.get_contact(pk)?;
        contact.state = ContactState::OutgoingRequestSent;
        self.save_contact(&contact)?;
        Ok(contact)
    }

    pub fn add_contact_incoming_received(
        &mut self,
        pk: &str,
        display_name: &str,
        conversation_pk: &str,
    ) -> Result<Contact> {
        if self.entries.contains_key(&contact_key(pk)) {
            return Err(StoreError::AlreadyExists);
        }
        let contact = Contact {
            display_name: display_name.to_string(),
            conversation_public_key: conversation_pk.to_string(),
            state: ContactState::IncomingRequest,
            ..Contact::new(pk)
        };
        self.save_contact(&contact)?;
        Ok(contact)
    }

    pub fn accept_contact(&mut self, pk: &str, conversation_pk: &str) -> Result<Contact> {
        let mut contact = self.get_contact(pk)?;
        contact.state = ContactState::Accepted;
        contact.conversation_public_key = conversation_pk.to_string();
        self.save_contact(&contact)?;
        Ok(contact)
    }

    /// Finds the contact whose 1-to-1 group is `conversation_pk`.
    pub fn contact_for_conversation(&self, conversation_pk: &str) -> Result<Option<Contact>> {
        let contacts: Vec<Contact> = self.scan_prefix("contact:")?;
        Ok(contacts
            .into_iter()
            .find(|c| c.conversation_public_key == conversation_pk))
    }

    // -- conversations ------------------------------------------------------

    pub fn get_conversation(&self, pk: &str) -> Result<Conversation> {
        let mut conversation: Conversation = self
            .get_doc(&conversation_key(pk))?
            .ok_or(StoreError::NotFound)?;
        conversation.replication_info = self.get_doc(&replication_key(pk))?;
        Ok(conversation)
    }

    pub fn save_conversation(&mut self, conversation: &Conversation) -> Result<()> {
        self.put_doc(&conversation_key(&conversation.public_key), conversation)
    }

    pub fn add_conversation_multi_member(&mut self, pk: &str) -> Result<Conversation> {
        if self.entries.contains_key(&conversation_key(pk)) {
            return Err(StoreError::AlreadyExists);
        }
        let conversation = Conversation::multi_member(pk);
        self.save_conversation(&conversation)?;
        Ok(conversation)
    }

    pub fn add_conversation_for_contact(
        &mut self,
        pk: &str,
        contact_pk: &str,
    ) -> Result<Conversation> {
        if self.entries.contains_key(&conversation_key(pk)) {
            return Err(StoreError::AlreadyExists);
        }
        let conversation = Conversation::for_contact(pk, contact_pk);
        self.save_conversation(&conversation)?;
        Ok(conversation)
    }

    /// Stamps the conversation's last-update time and bumps the unread
    /// counter when asked to.
    pub fn update_read_state(
        &mut self,
        pk: &str,
        increment_unread: bool,
        now_ms: i64,
    ) -> Result<Conversation> {
        let mut conversation = self.get_conversation(pk)?;
        if increment_unread {
            conversation.unread_count += 1;
        }
        conversation.last_update = now_ms;
        self.save_conversation(&conversation)?;
        Ok(conversation)
    }

    pub fn save_replication_info(&mut self, info: &ReplicationInfo) -> Result<()> {
        self.put_doc(&replication_key(&info.conversation_public_key), info)
    }

    // -- members ------------------------------------------------------------

    pub fn get_member(&self, member_pk: &str, conversation_pk: &str) -> Result<Member> {
        self.get_doc(&member_key(conversation_pk, member_pk))?
            .ok_or(StoreError::NotFound)
    }

    pub fn save_member(&mut self, member: &Member) -> Result<()> {
        self.put_doc(
            &member_key(&member.conversation_public_key, &member.public_key),
            member,
        )
    }

    /// Creates the member or merges the non-empty fields of `patch` into the
    /// existing row. Boolean flags only ever turn on; `info_date` only moves
    /// forward.
    pub fn upsert_member(&mut self, patch: Member) -> Result<(Member, bool)> {
        match self.get_member(&patch.public_key, &patch.conversation_public_key) {
            Err(StoreError::NotFound) => {
                self.save_member(&patch)?;
                Ok((patch, true))
            }
            Err(err) => Err(err),
            Ok(mut existing) => {
                if !patch.display_name.is_empty() {
                    existing.display_name = patch.display_name;
                }
                if !patch.avatar_cid.is_empty() {
                    existing.avatar_cid = patch.avatar_cid;
                }
                existing.is_me |= patch.is_me;
                existing.is_creator |= patch.is_creator;
                if patch.info_date > existing.info_date {
                    existing.info_date = patch.info_date;
                }
                self.save_member(&existing)?;
                Ok((existing, false))
            }
        }
    }

    // -- devices ------------------------------------------------------------

    pub fn get_device(&self, pk: &str) -> Result<Device> {
        self.get_doc(&device_key(pk))?.ok_or(StoreError::NotFound)
    }

    pub fn add_device(&mut self, device_pk: &str, member_pk: &str) -> Result<Device> {
        if self.entries.contains_key(&device_key(device_pk)) {
            return Err(StoreError::AlreadyExists);
        }
        let device = Device {
            public_key: device_pk.to_string(),
            member_public_key: member_pk.to_string(),
        };
        self.put_doc(&device_key(device_pk), &device)?;
        Ok(device)
    }

    pub fn member_pk_for_device(&self, device_pk: &str) -> Result<Option<String>> {
        Ok(self
            .get_doc::<Device>(&device_key(device_pk))?
            .map(|d| d.member_public_key))
    }

    // -- interactions ---------------------------------------------------------

    pub fn get_interaction(&self, cid: &str) -> Result<Interaction> {
        self.get_doc(&interaction_key(cid))?
            .ok_or(StoreError::NotFound)
    }

    /// Inserts the interaction, or returns the stored row untouched when the
    /// CID is already known.
    pub fn add_interaction(&mut self, mut interaction: Interaction) -> Result<(Interaction, bool)> {
        if let Some(existing) = self.get_doc(&interaction_key(&interaction.cid))? {
            return Ok((existing, false));
        }
        interaction.reactions = Vec::new();
        self.put_doc(&interaction_key(&interaction.cid), &interaction)?;
        Ok((interaction, true))
    }

    pub fn delete_interactions(&mut self, cids: &[String]) -> Result<()> {
        for cid in cids {
            self.entries.remove(&interaction_key(cid));
        }
        Ok(())
    }

    /// Flags the interaction targeted by an acknowledge. `None` means the
    /// target has not arrived yet and the ack belongs in the backlog.
    pub fn mark_interaction_acknowledged(&mut self, target_cid: &str) -> Result<Option<Interaction>> {
        match self.get_doc::<Interaction>(&interaction_key(target_cid))? {
            None => Ok(None),
            Some(mut target) => {
                target.acknowledged = true;
                self.put_doc(&interaction_key(target_cid), &target)?;
                Ok(Some(target))
            }
        }
    }

    /// CIDs of acknowledge rows waiting for `cid` to arrive.
    pub fn acks_targeting(&self, cid: &str) -> Result<Vec<String>> {
        let rows: Vec<Interaction> = self.scan_prefix("interaction:")?;
        Ok(rows
            .into_iter()
            .filter(|i| i.kind == AppMessageKind::Acknowledge && i.target_cid == cid)
            .map(|i| i.cid)
            .collect())
    }

    /// Stamps `member_pk` on every backlog row of this device in this
    /// conversation and returns them, oldest first.
    pub fn attribute_backlog(
        &mut self,
        device_pk: &str,
        conversation_pk: &str,
        member_pk: &str,
    ) -> Result<Vec<Interaction>> {
        let rows: Vec<Interaction> = self.scan_prefix("interaction:")?;
        let mut matched: Vec<Interaction> = rows
            .into_iter()
            .filter(|i| {
                i.device_public_key == device_pk
                    && i.conversation_public_key == conversation_pk
                    && i.member_public_key.is_empty()
            })
            .collect();
        matched.sort_by(|a, b| (a.sent_date, &a.cid).cmp(&(b.sent_date, &b.cid)));
        for interaction in matched.iter_mut() {
            interaction.member_public_key = member_pk.to_string();
            self.put_doc(&interaction_key(&interaction.cid), interaction)?;
        }
        Ok(matched)
    }

    pub fn interactions_for_conversation(&self, conversation_pk: &str) -> Result<Vec<Interaction>> {
        let rows: Vec<Interaction> = self.scan_prefix("interaction:")?;
        Ok(rows
            .into_iter()
            .filter(|i| i.conversation_public_key == conversation_pk)
            .collect())
    }

    // -- medias ---------------------------------------------------------------

    pub fn get_media(&self, cid: &str) -> Result<Media> {
        self.get_doc(&media_key(cid))?.ok_or(StoreError::NotFound)
    }

    /// Stores the medias that are not yet known; the returned flags line up
    /// with the input and say which rows were inserted.
    pub fn add_medias(&mut self, medias: &[Media]) -> Result<Vec<bool>> {
        let mut added = Vec::with_capacity(medias.len());
        for media in medias {
            if self.entries.contains_key(&media_key(&media.cid)) {
                added.push(false);
            } else {
                self.put_doc(&media_key(&media.cid), media)?;
                added.push(true);
            }
        }
        Ok(added)
    }

    // -- reactions ------------------------------------------------------------

    pub fn get_reaction(
        &self,
        target_cid: &str,
        member_pk: &str,
        emoji: &str,
    ) -> Result<Option<Reaction>> {
        self.get_doc(&reaction_key(target_cid, member_pk, emoji))
    }

    pub fn save_reaction(&mut self, reaction: &Reaction) -> Result<()> {
        self.put_doc(
            &reaction_key(
                &reaction.target_cid,
                &reaction.member_public_key,
                &reaction.emoji,
            ),
            reaction,
        )
    }

    pub fn reactions_for_target(&self, target_cid: &str) -> Result<Vec<Reaction>> {
        self.scan_prefix(&format!("reaction:{}:", target_cid))
    }

    // -- maintenance ----------------------------------------------------------

    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
