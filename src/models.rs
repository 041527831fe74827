use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub following: Vec<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// A user reference as the backend sends it: either a bare id or a populated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(String),
    User(User),
}

impl UserRef {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            UserRef::Id(id) => id,
            UserRef::User(user) => &user.id,
        }
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            UserRef::Id(_) => None,
            UserRef::User(user) => Some(&user.username),
        }
    }
}

impl From<&str> for UserRef {
    fn from(id: &str) -> Self {
        UserRef::Id(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistic, not yet confirmed by the server.
    Sending,
    #[default]
    #[serde(alias = "sent")]
    Delivered,
    Seen,
}

/// Message attachment, discriminated by `type`.
///
/// Story, post and reel shares are rendered as previews only. Their targets
/// may have expired or been deleted; nothing here checks that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Media {
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
    Video {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumbnail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },
    Voice {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },
    Story {
        story_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<UserRef>,
    },
    Post {
        post_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<UserRef>,
    },
    Reel {
        reel_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumbnail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<UserRef>,
    },
}

impl Media {
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Media::Image { url, .. } | Media::Video { url, .. } | Media::Voice { url, .. } => Some(url),
            Media::Story { url, .. } | Media::Post { url, .. } | Media::Reel { url, .. } => url.as_deref(),
        }
    }

    #[must_use]
    pub fn is_share(&self) -> bool {
        matches!(self, Media::Story { .. } | Media::Post { .. } | Media::Reel { .. })
    }

    /// Short placeholder used as a conversation preview.
    #[must_use]
    pub fn preview_label(&self) -> &'static str {
        match self {
            Media::Image { .. } => "Photo",
            Media::Video { .. } => "Video",
            Media::Voice { .. } => "Voice message",
            Media::Story { .. } => "Shared a story",
            Media::Post { .. } => "Shared a post",
            Media::Reel { .. } => "Shared a reel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user: UserRef,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default, alias = "conversation", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub sender: UserRef,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Sending
    }

    #[must_use]
    pub fn preview(&self) -> &str {
        if self.text.trim().is_empty() {
            self.media.as_ref().map_or("", Media::preview_label)
        } else {
            &self.text
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Primary,
    General,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub participants: Vec<UserRef>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Box<Message>>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub muted_by: Vec<String>,
    #[serde(default)]
    pub is_request: bool,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    #[must_use]
    pub fn is_muted_for(&self, user_id: &str) -> bool {
        self.muted_by.iter().any(|id| id == user_id)
    }

    pub fn other_participants<'a>(&'a self, me: &'a str) -> impl Iterator<Item = &'a UserRef> + 'a {
        self.participants.iter().filter(move |p| p.id() != me)
    }

    /// Group name, or the other participants' usernames joined.
    #[must_use]
    pub fn title(&self, me: &str) -> String {
        if let Some(name) = self.group_name.as_ref().filter(|n| !n.is_empty()) {
            return name.clone();
        }
        let names: Vec<&str> = self
            .other_participants(me)
            .map(|p| p.username().unwrap_or_else(|| p.id()))
            .collect();
        if names.is_empty() {
            self.id.clone()
        } else {
            names.join(", ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub user: UserRef,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(alias = "author")]
    pub user: UserRef,
    #[serde(default)]
    pub caption: String,
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub saved_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Post {
    #[must_use]
    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reel {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub user: UserRef,
    #[serde(alias = "video")]
    pub video_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub views: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Reel {
    #[must_use]
    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryMediaKind {
    #[default]
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub user: UserRef,
    #[serde(alias = "media")]
    pub media_url: String,
    #[serde(default)]
    pub media_type: StoryMediaKind,
    #[serde(default)]
    pub viewers: Vec<String>,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Story {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    #[must_use]
    pub fn is_viewed_by(&self, user_id: &str) -> bool {
        self.viewers.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub reels: Vec<Reel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_ref_accepts_id_or_object() {
        let by_id: UserRef = serde_json::from_value(json!("u1")).unwrap();
        assert_eq!(by_id.id(), "u1");
        assert_eq!(by_id.username(), None);

        let populated: UserRef =
            serde_json::from_value(json!({"_id": "u2", "username": "mira", "profilePicture": "/uploads/m.jpg"}))
                .unwrap();
        assert_eq!(populated.id(), "u2");
        assert_eq!(populated.username(), Some("mira"));
    }

    #[test]
    fn test_message_from_backend_json() {
        let message: Message = serde_json::from_value(json!({
            "_id": "m1",
            "conversation": "c1",
            "sender": {"_id": "u1", "username": "ana"},
            "text": "hi",
            "status": "sent",
            "createdAt": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(message.id, "m1");
        assert_eq!(message.conversation_id.as_deref(), Some("c1"));
        assert_eq!(message.sender.id(), "u1");
        assert_eq!(message.status, MessageStatus::Delivered);
        assert!(message.reactions.is_empty());
        assert!(message.media.is_none());
    }

    #[test]
    fn test_media_tagged_union() {
        let media: Media = serde_json::from_value(json!({
            "type": "reel",
            "reelId": "r9",
            "thumbnail": "https://res.cloudinary.com/x/r9.jpg"
        }))
        .unwrap();

        assert!(media.is_share());
        assert_eq!(media.preview_label(), "Shared a reel");
        assert_eq!(media.url(), None);

        let voice = Media::Voice { url: "/uploads/v.webm".to_string(), duration: Some(3.5) };
        let value = serde_json::to_value(&voice).unwrap();
        assert_eq!(value, json!({"type": "voice", "url": "/uploads/v.webm", "duration": 3.5}));
    }

    #[test]
    fn test_unknown_media_type_rejected() {
        let result: Result<Media, _> = serde_json::from_value(json!({"type": "gif", "url": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_conversation_title() {
        let conversation: Conversation = serde_json::from_value(json!({
            "_id": "c1",
            "participants": [
                {"_id": "me", "username": "me"},
                {"_id": "u2", "username": "mira"},
                "u3"
            ],
            "mutedBy": ["me"]
        }))
        .unwrap();

        assert_eq!(conversation.title("me"), "mira, u3");
        assert!(conversation.is_muted_for("me"));
        assert_eq!(conversation.category, Category::Primary);
        assert!(!conversation.is_request);
    }

    #[test]
    fn test_message_preview_falls_back_to_media_label() {
        let message = Message {
            id: "m1".to_string(),
            conversation_id: None,
            sender: UserRef::from("u1"),
            text: "  ".to_string(),
            media: Some(Media::Image { url: "/uploads/a.jpg".to_string(), width: None, height: None }),
            status: MessageStatus::Delivered,
            reactions: vec![],
            edited: false,
            client_message_id: None,
            created_at: Utc::now(),
        };
        assert_eq!(message.preview(), "Photo");
    }

    #[test]
    fn test_story_expiry() {
        let story: Story = serde_json::from_value(json!({
            "_id": "s1",
            "user": "u1",
            "media": "/uploads/s1.jpg",
            "expiresAt": "2024-01-02T00:00:00Z"
        }))
        .unwrap();

        let before = "2024-01-01T12:00:00Z".parse().unwrap();
        let after = "2024-01-02T00:00:01Z".parse().unwrap();
        assert!(!story.is_expired(before));
        assert!(story.is_expired(after));
    }
}
