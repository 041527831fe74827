//! Conversation and message synchronisation over the live socket.
//!
//! [`ConversationManager`] owns the state of the messaging screen: the
//! conversation list, the open conversation's history, presence and typing
//! indicators. It reconciles three sources of change:
//!
//! * sends initiated locally, shown immediately as `sending`;
//! * server acknowledgements (`message-sent`) and peer pushes (`new-message`);
//! * REST edits and deletes.
//!
//! Sends are fire-and-forget. A send lost with the connection stays visible
//! as `sending` until the user resends it by hand.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::ChatApi;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, ServerEvent};
use crate::models::{Category, Conversation, Media, Message, MessageStatus, Reaction, UserRef};
use crate::socket::EventSink;

pub const TYPING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub text: String,
    pub media: Option<Media>,
}

impl OutgoingMessage {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        OutgoingMessage {
            text: text.into(),
            media: None,
        }
    }
}

/// Asks the user to confirm a destructive action.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationFilter {
    Primary,
    General,
    Requests,
}

#[derive(Default)]
struct SyncState {
    conversations: Vec<Conversation>,
    active: Option<String>,
    messages: Vec<Message>,
    online: HashSet<String>,
    typing: HashMap<String, HashSet<String>>,
    draft: String,
    /// Bumped on every selection change; history responses carry the value
    /// they were requested under.
    generation: u64,
    load_cancel: Option<CancellationToken>,
    typing_timer: Option<JoinHandle<()>>,
    typing_sent: bool,
}

#[derive(Clone)]
pub struct ConversationManager {
    me: String,
    api: Arc<dyn ChatApi>,
    sink: Arc<dyn EventSink>,
    state: Arc<RwLock<SyncState>>,
    typing_timeout: Duration,
}

impl ConversationManager {
    #[must_use]
    pub fn new(me: impl Into<String>, api: Arc<dyn ChatApi>, sink: Arc<dyn EventSink>) -> Self {
        ConversationManager {
            me: me.into(),
            api,
            sink,
            state: Arc::new(RwLock::new(SyncState::default())),
            typing_timeout: TYPING_TIMEOUT,
        }
    }

    #[must_use]
    pub fn me(&self) -> &str {
        &self.me
    }

    /// Registers our presence on a fresh connection.
    ///
    /// # Errors
    ///
    /// Fails when the socket is closed.
    pub fn join(&self) -> Result<()> {
        self.sink.emit(ClientEvent::Join { user_id: self.me.clone() })
    }

    /// Reloads the conversation list.
    ///
    /// # Errors
    ///
    /// Returns the REST error when the list cannot be fetched.
    pub async fn refresh_conversations(&self) -> Result<()> {
        let conversations = self.api.conversations().await.map_err(|e| {
            error!("Failed to load conversations: {e}");
            e
        })?;
        info!("loaded {} conversations", conversations.len());
        self.state.write().await.conversations = conversations;
        Ok(())
    }

    pub async fn conversations(&self, filter: ConversationFilter) -> Vec<Conversation> {
        let state = self.state.read().await;
        state
            .conversations
            .iter()
            .filter(|c| match filter {
                ConversationFilter::Requests => c.is_request,
                ConversationFilter::Primary => !c.is_request && c.category == Category::Primary,
                ConversationFilter::General => !c.is_request && c.category == Category::General,
            })
            .cloned()
            .collect()
    }

    pub async fn conversation(&self, id: &str) -> Option<Conversation> {
        self.state.read().await.conversations.iter().find(|c| c.id == id).cloned()
    }

    /// Switches the open conversation and loads its history.
    ///
    /// Any history request still in flight for the previous selection is
    /// cancelled; a response that lands after the selection changed is
    /// discarded. Sends and pushes that arrive while the history loads are
    /// kept after the fetched page.
    ///
    /// # Errors
    ///
    /// Returns the REST error when the history cannot be fetched.
    pub async fn select_conversation(&self, conversation_id: &str) -> Result<()> {
        let (cancel, generation) = {
            let mut state = self.state.write().await;
            if let Some(previous) = state.load_cancel.take() {
                previous.cancel();
            }
            self.stop_typing_locked(&mut state);

            let cancel = CancellationToken::new();
            state.load_cancel = Some(cancel.clone());
            state.generation += 1;
            state.messages.clear();

            let previous = state.active.replace(conversation_id.to_string());
            if let Some(previous) = previous.filter(|p| p != conversation_id) {
                self.emit_logged(ClientEvent::LeaveConversation { conversation_id: previous });
            }
            self.emit_logged(ClientEvent::JoinConversation {
                conversation_id: conversation_id.to_string(),
            });
            (cancel, state.generation)
        };

        let result = tokio::select! {
            () = cancel.cancelled() => {
                debug!("history load for {conversation_id} cancelled");
                return Ok(());
            }
            result = self.api.messages(conversation_id) => result,
        };

        let messages = result.map_err(|e| {
            error!("Failed to load messages for {conversation_id}: {e}");
            e
        })?;

        let last_peer_message = {
            let mut state = self.state.write().await;
            if state.generation != generation || state.active.as_deref() != Some(conversation_id) {
                debug!("discarding stale history for {conversation_id}");
                return Ok(());
            }
            state.load_cancel = None;

            let arrived_meanwhile = std::mem::take(&mut state.messages);
            state.messages = merge_history(messages, arrived_meanwhile);
            if let Some(conversation) = state.conversations.iter_mut().find(|c| c.id == conversation_id) {
                conversation.unread_count = 0;
            }
            state
                .messages
                .iter()
                .rev()
                .find(|m| m.sender.id() != self.me)
                .map(|m| m.id.clone())
        };

        if let Some(message_id) = last_peer_message {
            self.emit_logged(ClientEvent::MessageSeen {
                conversation_id: conversation_id.to_string(),
                message_id: Some(message_id),
                user_id: self.me.clone(),
            });
        }
        Ok(())
    }

    pub async fn leave_conversation(&self) {
        let mut state = self.state.write().await;
        if let Some(cancel) = state.load_cancel.take() {
            cancel.cancel();
        }
        self.stop_typing_locked(&mut state);
        state.generation += 1;
        state.messages.clear();
        if let Some(conversation_id) = state.active.take() {
            self.emit_logged(ClientEvent::LeaveConversation { conversation_id });
        }
    }

    pub async fn active_conversation(&self) -> Option<String> {
        self.state.read().await.active.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.read().await.messages.clone()
    }

    pub async fn draft(&self) -> String {
        self.state.read().await.draft.clone()
    }

    pub async fn set_draft(&self, text: impl Into<String>) {
        self.state.write().await.draft = text.into();
        self.keystroke().await;
    }

    /// Emits `typing` on the first keystroke and `stop-typing` once no
    /// keystroke has arrived for the typing timeout.
    pub async fn keystroke(&self) {
        let mut state = self.state.write().await;
        let Some(conversation_id) = state.active.clone() else {
            return;
        };

        if !state.typing_sent {
            self.emit_logged(ClientEvent::Typing {
                conversation_id: conversation_id.clone(),
                user_id: self.me.clone(),
            });
            state.typing_sent = true;
        }
        if let Some(timer) = state.typing_timer.take() {
            timer.abort();
        }

        let manager = self.clone();
        state.typing_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(manager.typing_timeout).await;
            let mut state = manager.state.write().await;
            if state.typing_sent && state.active.as_deref() == Some(conversation_id.as_str()) {
                state.typing_sent = false;
                state.typing_timer = None;
                manager.emit_logged(ClientEvent::StopTyping {
                    conversation_id,
                    user_id: manager.me.clone(),
                });
            }
        }));
    }

    /// Appends an optimistic copy and emits the send.
    ///
    /// Returns the temporary id, or `None` when there is nothing to send.
    ///
    /// # Errors
    ///
    /// [`ClientError::NoActiveConversation`] when nothing is open. A failed
    /// emit is logged, not returned.
    pub async fn send_message(&self, outgoing: OutgoingMessage) -> Result<Option<String>> {
        let mut state = self.state.write().await;
        let conversation_id = state.active.clone().ok_or(ClientError::NoActiveConversation)?;

        let text = outgoing.text.trim().to_string();
        if text.is_empty() && outgoing.media.is_none() {
            return Ok(None);
        }

        let temp_id = format!("temp-{}", Uuid::new_v4());
        state.messages.push(Message {
            id: temp_id.clone(),
            conversation_id: Some(conversation_id.clone()),
            sender: UserRef::Id(self.me.clone()),
            text: text.clone(),
            media: outgoing.media.clone(),
            status: MessageStatus::Sending,
            reactions: Vec::new(),
            edited: false,
            client_message_id: Some(temp_id.clone()),
            created_at: Utc::now(),
        });
        state.draft.clear();
        self.stop_typing_locked(&mut state);
        drop(state);

        let event = ClientEvent::SendMessage {
            conversation_id,
            sender_id: self.me.clone(),
            text,
            media: outgoing.media,
            client_message_id: temp_id.clone(),
        };
        if let Err(e) = self.sink.emit(event) {
            error!("message {temp_id} was not sent: {e}");
        }
        Ok(Some(temp_id))
    }

    /// Re-emits a message still marked `sending`. Only ever user-initiated.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotFound`] when `temp_id` is not a pending message, or
    /// the socket error when the emit fails.
    pub async fn resend(&self, temp_id: &str) -> Result<()> {
        let event = {
            let state = self.state.read().await;
            let conversation_id = state.active.clone().ok_or(ClientError::NoActiveConversation)?;
            let message = state
                .messages
                .iter()
                .find(|m| m.id == temp_id && m.is_pending())
                .ok_or_else(|| ClientError::not_found("pending message", temp_id))?;
            ClientEvent::SendMessage {
                conversation_id,
                sender_id: self.me.clone(),
                text: message.text.clone(),
                media: message.media.clone(),
                client_message_id: temp_id.to_string(),
            }
        };
        self.sink.emit(event)
    }

    /// # Errors
    ///
    /// Fails without an open conversation or when the socket is closed.
    pub async fn react(&self, message_id: &str, emoji: &str) -> Result<()> {
        let conversation_id = self.active_conversation().await.ok_or(ClientError::NoActiveConversation)?;
        self.sink.emit(ClientEvent::MessageReaction {
            conversation_id,
            message_id: message_id.to_string(),
            user_id: self.me.clone(),
            emoji: emoji.to_string(),
        })
    }

    /// # Errors
    ///
    /// [`ClientError::Validation`] for blank text, otherwise the REST error.
    pub async fn edit_message(&self, message_id: &str, text: &str) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::validation("Message text cannot be empty"));
        }

        let updated = self.api.edit_message(message_id, text).await.map_err(|e| {
            error!("Failed to edit message {message_id}: {e}");
            e
        })?;

        let mut state = self.state.write().await;
        if let Some(message) = state.messages.iter_mut().find(|m| m.id == message_id) {
            message.text.clone_from(&updated.text);
            message.edited = true;
        }
        Ok(updated)
    }

    /// Deletes after confirmation. Returns whether the message was deleted.
    ///
    /// # Errors
    ///
    /// Returns the REST error; the local list is left untouched.
    pub async fn delete_message(&self, message_id: &str, confirm: &dyn Confirm) -> Result<bool> {
        if !confirm.confirm("Delete this message?") {
            return Ok(false);
        }

        self.api.delete_message(message_id).await.map_err(|e| {
            error!("Failed to delete message {message_id}: {e}");
            e
        })?;

        let mut state = self.state.write().await;
        state.messages.retain(|m| m.id != message_id);
        let replacement = state.messages.last().cloned();
        if let Some(active) = state.active.clone() {
            if let Some(conversation) = state.conversations.iter_mut().find(|c| c.id == active) {
                if conversation.last_message.as_ref().is_some_and(|m| m.id == message_id) {
                    conversation.last_message = replacement.map(Box::new);
                }
            }
        }
        Ok(true)
    }

    /// Applies a server push. Feed events are ignored here.
    pub async fn apply(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage { conversation_id, message }
            | ServerEvent::MessageSent { conversation_id, message } => {
                self.receive_message(conversation_id, message).await;
            }
            ServerEvent::Typing { conversation_id, user_id } => {
                if user_id != self.me {
                    let mut state = self.state.write().await;
                    state.typing.entry(conversation_id).or_default().insert(user_id);
                }
            }
            ServerEvent::StopTyping { conversation_id, user_id } => {
                let mut state = self.state.write().await;
                if let Some(users) = state.typing.get_mut(&conversation_id) {
                    users.remove(&user_id);
                }
            }
            ServerEvent::UserStatus { user_id, status } => {
                let mut state = self.state.write().await;
                if status == "online" {
                    state.online.insert(user_id);
                } else {
                    state.online.remove(&user_id);
                }
            }
            ServerEvent::MessageSeen { conversation_id, message_id, user_id } => {
                if user_id != self.me {
                    self.mark_seen(&conversation_id, message_id.as_deref()).await;
                }
            }
            ServerEvent::MessageReaction { message_id, reactions, .. } => {
                self.set_reactions(&message_id, reactions).await;
            }
            ServerEvent::MessageEdited { message, .. } => {
                let mut state = self.state.write().await;
                if let Some(local) = state.messages.iter_mut().find(|m| m.id == message.id) {
                    local.text.clone_from(&message.text);
                    local.edited = true;
                }
                for conversation in &mut state.conversations {
                    if let Some(last) = conversation.last_message.as_mut().filter(|m| m.id == message.id) {
                        last.text.clone_from(&message.text);
                        last.edited = true;
                    }
                }
            }
            other => debug!("sync manager ignoring {other:?}"),
        }
    }

    async fn receive_message(&self, conversation_id: String, mut message: Message) {
        message.conversation_id = Some(conversation_id.clone());
        if message.status == MessageStatus::Sending {
            message.status = MessageStatus::Delivered;
        }
        let from_peer = message.sender.id() != self.me;

        let mut state = self.state.write().await;
        let is_active = state.active.as_deref() == Some(conversation_id.as_str());

        if is_active {
            reconcile(&mut state.messages, message.clone());
        }

        match state.conversations.iter().position(|c| c.id == conversation_id) {
            Some(index) => {
                let mut conversation = state.conversations.remove(index);
                conversation.updated_at = Some(message.created_at);
                if from_peer && !is_active {
                    conversation.unread_count += 1;
                }
                conversation.last_message = Some(Box::new(message.clone()));
                state.conversations.insert(0, conversation);
            }
            None => debug!("message for unknown conversation {conversation_id}"),
        }
        drop(state);

        if is_active && from_peer {
            self.emit_logged(ClientEvent::MessageSeen {
                conversation_id,
                message_id: Some(message.id),
                user_id: self.me.clone(),
            });
        }
    }

    async fn mark_seen(&self, conversation_id: &str, up_to: Option<&str>) {
        let mut state = self.state.write().await;
        if state.active.as_deref() != Some(conversation_id) {
            return;
        }
        let end = match up_to {
            Some(id) => match state.messages.iter().position(|m| m.id == id) {
                Some(index) => index + 1,
                None => return,
            },
            None => state.messages.len(),
        };
        for message in &mut state.messages[..end] {
            if message.sender.id() == self.me && message.status == MessageStatus::Delivered {
                message.status = MessageStatus::Seen;
            }
        }
    }

    async fn set_reactions(&self, message_id: &str, reactions: Vec<Reaction>) {
        let mut state = self.state.write().await;
        if let Some(message) = state.messages.iter_mut().find(|m| m.id == message_id) {
            message.reactions = reactions;
        }
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.state.read().await.online.contains(user_id)
    }

    pub async fn online_users(&self) -> HashSet<String> {
        self.state.read().await.online.clone()
    }

    pub async fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut users: Vec<String> = state
            .typing
            .get(conversation_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    fn stop_typing_locked(&self, state: &mut SyncState) {
        if let Some(timer) = state.typing_timer.take() {
            timer.abort();
        }
        if state.typing_sent {
            state.typing_sent = false;
            if let Some(conversation_id) = state.active.clone() {
                self.emit_logged(ClientEvent::StopTyping {
                    conversation_id,
                    user_id: self.me.clone(),
                });
            }
        }
    }

    fn emit_logged(&self, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.sink.emit(event) {
            warn!("could not emit {name}: {e}");
        }
    }
}

/// Combines a fetched history page with whatever was sent or pushed while it
/// was loading.
///
/// Local entries follow the fetched ones. A pending send is dropped only when
/// the page already holds the server copy carrying its temporary id; other
/// local entries are dropped when their id is in the page.
fn merge_history(fetched: Vec<Message>, local: Vec<Message>) -> Vec<Message> {
    let fetched_ids: HashSet<&str> = fetched.iter().map(|m| m.id.as_str()).collect();
    let echoed: HashSet<&str> = fetched.iter().filter_map(|m| m.client_message_id.as_deref()).collect();

    let carried: Vec<Message> = local
        .into_iter()
        .filter(|m| {
            if m.is_pending() {
                !echoed.contains(m.id.as_str())
            } else {
                !fetched_ids.contains(m.id.as_str())
            }
        })
        .collect();

    let mut seen_ids = HashSet::new();
    fetched
        .iter()
        .cloned()
        .chain(carried)
        .filter(|m| seen_ids.insert(m.id.clone()))
        .collect()
}

/// Folds a confirmed message into the open history.
///
/// Order of precedence: an entry with the same id is updated in place; else
/// the first pending entry from the same sender with the same text is
/// replaced; else the message is appended.
fn reconcile(messages: &mut Vec<Message>, incoming: Message) {
    if let Some(existing) = messages.iter_mut().find(|m| m.id == incoming.id) {
        *existing = incoming;
        return;
    }

    let pending = messages.iter().position(|m| {
        m.is_pending() && m.text == incoming.text && m.sender.id() == incoming.sender.id()
    });
    match pending {
        Some(index) => messages[index] = incoming,
        None => messages.push(incoming),
    }
}
