//! Durable store key layout

use std::fmt;

const PREFIX: &str = "promptcraft";

/// Every durable key the application writes. All keys except the active
/// user profile are namespaced by user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    UserProfile,
    Conversations { user: String },
    ApiKey { user: String },
    Onboarding { user: String },
    MemoryNotes { user: String },
    Projects { user: String },
    PromptLibrary { user: String },
    PromptGallery { user: String },
    RemoteCredential { user: String },
}

impl StoreKey {
    /// Collections the front-end keeps in the store as opaque JSON
    pub fn collection(name: &str, user: String) -> Option<StoreKey> {
        match name {
            "projects" => Some(StoreKey::Projects { user }),
            "prompt-library" => Some(StoreKey::PromptLibrary { user }),
            "prompt-gallery" => Some(StoreKey::PromptGallery { user }),
            _ => None,
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            StoreKey::UserProfile => "user",
            StoreKey::Conversations { .. } => "chats",
            StoreKey::ApiKey { .. } => "apikey",
            StoreKey::Onboarding { .. } => "onboarding",
            StoreKey::MemoryNotes { .. } => "memory",
            StoreKey::Projects { .. } => "projects",
            StoreKey::PromptLibrary { .. } => "library",
            StoreKey::PromptGallery { .. } => "gallery",
            StoreKey::RemoteCredential { .. } => "github_token",
        }
    }

    fn user(&self) -> Option<&str> {
        match self {
            StoreKey::UserProfile => None,
            StoreKey::Conversations { user }
            | StoreKey::ApiKey { user }
            | StoreKey::Onboarding { user }
            | StoreKey::MemoryNotes { user }
            | StoreKey::Projects { user }
            | StoreKey::PromptLibrary { user }
            | StoreKey::PromptGallery { user }
            | StoreKey::RemoteCredential { user } => Some(user),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user() {
            Some(user) => write!(f, "{PREFIX}_{user}_{}", self.suffix()),
            None => write!(f, "{PREFIX}_{}", self.suffix()),
        }
    }
}
