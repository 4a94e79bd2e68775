use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

const FALLBACK_CHAT_NAME: &str = "Chat";

/// Identity snapshot of a chat participant, as the server embeds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            profile_image: None,
        }
    }
}

/// A conversation as the directory service describes it. Consumed, never owned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub is_group_chat: bool,
    #[serde(default)]
    pub chat_name: String,
    #[serde(default, deserialize_with = "members")]
    pub users: Vec<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_image: Option<String>,
}

impl Conversation {
    /// A conversation known only by id (membership unknown).
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_group_chat: false,
            chat_name: String::new(),
            users: Vec::new(),
            group_image: None,
        }
    }

    /// The first member that is not `self_id`.
    pub fn peer(&self, self_id: &str) -> Option<&User> {
        self.users.iter().find(|user| user.id != self_id)
    }

    /// Groups show their stored name; direct chats show the other member.
    pub fn display_name(&self, self_id: &str) -> String {
        if self.is_group_chat {
            return self.chat_name.clone();
        }
        self.peer(self_id)
            .map(|user| user.name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| FALLBACK_CHAT_NAME.to_string())
    }
}

/// `users` is populated on some routes and left as raw ids on others.
#[derive(Deserialize)]
#[serde(untagged)]
enum Member {
    Populated(User),
    Id(String),
}

fn members<'de, D>(deserializer: D) -> Result<Vec<User>, D::Error>
where
    D: Deserializer<'de>,
{
    let members = Option::<Vec<Member>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(members
        .into_iter()
        .map(|member| match member {
            Member::Populated(user) => user,
            Member::Id(id) => User::new(id, ""),
        })
        .collect())
}

/// Just the id of a chat object whose other fields did not parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatId {
    #[serde(rename = "_id")]
    pub id: String,
}

/// The `chat` field of a message: populated on live events, sometimes a bare id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatRef {
    Populated(Conversation),
    Id(String),
    Unpopulated(ChatId),
}

impl ChatRef {
    pub fn id(&self) -> &str {
        match self {
            ChatRef::Populated(conversation) => &conversation.id,
            ChatRef::Id(id) => id,
            ChatRef::Unpopulated(chat) => &chat.id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryState {
    /// Optimistic entry waiting for the server.
    Pending,
    #[default]
    Sent,
    Failed,
}

/// Domain model đại diện một tin nhắn chat.
///
/// `client_ref` and `delivery_state` exist only on this client; everything
/// else round-trips through the server shape, including fields this crate
/// does not interpret (kept in `extra`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip)]
    pub client_ref: Option<String>,
    pub chat: ChatRef,
    pub sender: User,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub seen: bool,
    #[serde(skip)]
    pub delivery_state: DeliveryState,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// A locally composed message that has not reached the server yet.
    pub fn draft(conversation: &Conversation, sender: &User, content: impl Into<String>) -> Self {
        Self {
            id: None,
            client_ref: Some(new_client_ref()),
            chat: ChatRef::Populated(conversation.clone()),
            sender: sender.clone(),
            content: content.into(),
            created_at: Utc::now(),
            seen: false,
            delivery_state: DeliveryState::Pending,
            extra: Map::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        self.chat.id()
    }

    pub fn sender_id(&self) -> &str {
        &self.sender.id
    }

    pub fn sender_name(&self) -> &str {
        &self.sender.name
    }
}

/// Generate a fresh client reference for an optimistic message.
pub fn new_client_ref() -> String {
    format!("temp-{}", Uuid::new_v4())
}

/// A message that arrived for a conversation other than the active one.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEntry {
    pub message_id: String,
    pub conversation_id: String,
    pub message: Message,
}
