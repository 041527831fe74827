//! Named events carried over the real-time channel.
//!
//! Every text frame is a JSON envelope `{"event": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::models::{Comment, Media, Message, Post, Reaction, Story};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Join {
        user_id: String,
    },
    JoinConversation {
        conversation_id: String,
    },
    LeaveConversation {
        conversation_id: String,
    },
    SendMessage {
        conversation_id: String,
        sender_id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media: Option<Media>,
        /// Temporary id of the optimistic copy; echoed back by the server.
        client_message_id: String,
    },
    Typing {
        conversation_id: String,
        user_id: String,
    },
    StopTyping {
        conversation_id: String,
        user_id: String,
    },
    MessageSeen {
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        user_id: String,
    },
    MessageReaction {
        conversation_id: String,
        message_id: String,
        user_id: String,
        emoji: String,
    },
    StoryViewed {
        story_id: String,
        user_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    NewMessage {
        conversation_id: String,
        message: Message,
    },
    /// Acknowledgement of our own `send-message`.
    MessageSent {
        conversation_id: String,
        message: Message,
    },
    Typing {
        conversation_id: String,
        user_id: String,
    },
    StopTyping {
        conversation_id: String,
        user_id: String,
    },
    UserStatus {
        user_id: String,
        status: String,
    },
    MessageSeen {
        conversation_id: String,
        #[serde(default)]
        message_id: Option<String>,
        user_id: String,
    },
    MessageReaction {
        #[serde(default)]
        conversation_id: Option<String>,
        message_id: String,
        reactions: Vec<Reaction>,
    },
    MessageEdited {
        #[serde(default)]
        conversation_id: Option<String>,
        message: Message,
    },
    PostLiked {
        post_id: String,
        user_id: String,
        liked: bool,
    },
    PostCommented {
        post_id: String,
        comment: Comment,
    },
    ReelLiked {
        reel_id: String,
        user_id: String,
        liked: bool,
    },
    ReelCommented {
        reel_id: String,
        comment: Comment,
    },
    NewPost {
        post: Post,
    },
    NewStory {
        story: Story,
    },
    StoryViewed {
        story_id: String,
        viewer_id: String,
    },
}

impl ClientEvent {
    /// # Errors
    ///
    /// Only if a payload fails to serialize.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::JoinConversation { .. } => "join-conversation",
            ClientEvent::LeaveConversation { .. } => "leave-conversation",
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::StopTyping { .. } => "stop-typing",
            ClientEvent::MessageSeen { .. } => "message-seen",
            ClientEvent::MessageReaction { .. } => "message-reaction",
            ClientEvent::StoryViewed { .. } => "story-viewed",
        }
    }
}

impl ServerEvent {
    /// # Errors
    ///
    /// The decode error for malformed JSON or an unknown event name.
    pub fn from_frame(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Whether the event belongs to the messaging side rather than the feed.
    #[must_use]
    pub fn is_chat(&self) -> bool {
        matches!(
            self,
            ServerEvent::NewMessage { .. }
                | ServerEvent::MessageSent { .. }
                | ServerEvent::Typing { .. }
                | ServerEvent::StopTyping { .. }
                | ServerEvent::UserStatus { .. }
                | ServerEvent::MessageSeen { .. }
                | ServerEvent::MessageReaction { .. }
                | ServerEvent::MessageEdited { .. }
        )
    }
}
