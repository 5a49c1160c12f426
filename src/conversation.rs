//! Sessions and the per-user conversation collection
//!
//! A conversation owns its history; the collection is stored as one value
//! (id -> conversation) under the user's conversations key.

use crate::history::History;
use crate::message::{Message, MessageKind, Role};
use crate::store::{DurableStore, StoreKey};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_TITLE: &str = "새 대화";
const TITLE_CHARS: usize = 30;

/// Characters `encodeURIComponent` leaves alone
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// AI service a finished prompt is handed to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetService {
    #[default]
    #[serde(rename = "chatgpt")]
    ChatGpt,
    Claude,
    Gemini,
    Perplexity,
}

impl TargetService {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "chatgpt" => Some(Self::ChatGpt),
            "claude" => Some(Self::Claude),
            "gemini" => Some(Self::Gemini),
            "perplexity" => Some(Self::Perplexity),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatGpt => "chatgpt",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Perplexity => "perplexity",
        }
    }

    fn base_url(self) -> &'static str {
        match self {
            Self::ChatGpt => "https://chatgpt.com/?q=",
            Self::Claude => "https://claude.ai/new?q=",
            Self::Gemini => "https://gemini.google.com/?q=",
            Self::Perplexity => "https://www.perplexity.ai/?q=",
        }
    }

    /// Link that opens the service with `prompt` prefilled
    pub fn deep_link(self, prompt: &str) -> String {
        format!("{}{}", self.base_url(), utf8_percent_encode(prompt, URI_COMPONENT))
    }
}

impl fmt::Display for TargetService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub messages: History,
    pub created_at: i64,
    #[serde(default)]
    pub selected_service: TargetService,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

/// First user message, cut to 30 characters
pub fn title_from(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

impl Conversation {
    pub fn new(id: String, created_at: i64) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            messages: History::new(),
            created_at,
            selected_service: TargetService::default(),
        }
    }

    /// Append a user turn; the first one names the conversation
    pub fn append_user(&mut self, message: Message) -> i64 {
        let first = !self
            .messages
            .snapshot()
            .iter()
            .any(|m| m.role == Role::User);
        if first {
            if let MessageKind::Text { text } = &message.kind {
                if !text.trim().is_empty() {
                    self.title = title_from(text);
                }
            }
        }
        self.messages.append(message)
    }

    /// Storable copy with every attachment run through the storage codec
    pub fn for_durable_storage(&self, strip_payload: bool) -> Self {
        let turns = self
            .messages
            .snapshot()
            .iter()
            .map(|m| {
                let mut m = m.clone();
                m.attachments = m
                    .attachments
                    .iter()
                    .map(|a| a.for_durable_storage(strip_payload))
                    .collect();
                m
            })
            .collect();
        Self {
            messages: History::from_turns(turns),
            ..self.clone()
        }
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            message_count: self.messages.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub message_count: usize,
}

/// All conversations of one user, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConversationBook {
    chats: BTreeMap<String, Conversation>,
}

impl<'de> Deserialize<'de> for ConversationBook {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
        let chats = raw
            .into_iter()
            .filter_map(|(id, value)| match serde_json::from_value::<Conversation>(value) {
                Ok(chat) => Some((id, chat)),
                Err(e) => {
                    tracing::warn!(conversation_id = %id, error = %e, "Dropping unreadable stored conversation");
                    None
                }
            })
            .collect();
        Ok(Self { chats })
    }
}

impl ConversationBook {
    pub fn load(store: &DurableStore, user: &str) -> Self {
        store
            .load(&StoreKey::Conversations {
                user: user.to_string(),
            })
            .unwrap_or_default()
    }

    /// Full write, then a payload-stripped retry on capacity failure
    pub fn save(&self, store: &DurableStore, user: &str) -> bool {
        let key = StoreKey::Conversations {
            user: user.to_string(),
        };
        store.save_degradable(&key, &self.durable(false), |_| self.durable(true))
    }

    fn durable(&self, strip_payload: bool) -> Self {
        Self {
            chats: self
                .chats
                .iter()
                .map(|(id, chat)| (id.clone(), chat.for_durable_storage(strip_payload)))
                .collect(),
        }
    }

    /// Start a new conversation with a `chat_<millis>` id
    pub fn create(&mut self, now_ms: i64) -> &mut Conversation {
        let mut stamp = now_ms;
        while self.chats.contains_key(&format!("chat_{stamp}")) {
            stamp += 1;
        }
        let id = format!("chat_{stamp}");
        self.chats
            .entry(id.clone())
            .or_insert_with(|| Conversation::new(id, now_ms))
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.chats.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.chats.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Newest first
    pub fn list(&self) -> Vec<ConversationSummary> {
        let mut list: Vec<_> = self.chats.values().map(Conversation::summary).collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        list
    }

    pub fn latest_id(&self) -> Option<String> {
        self.list().into_iter().next().map(|s| s.id)
    }
}
