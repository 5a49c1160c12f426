//! Chat controller
//!
//! Owns the active user's conversation collection and runs the send
//! pipeline: append the user turn, call the model, dispatch tool calls,
//! then ask once for a natural-language follow-up. Every append is followed
//! by a full save of the collection.
//!
//! Session state sits behind one async mutex that is held only while turns
//! are appended. Model and remote calls run unlocked, so a pending request
//! suspends only the operation that issued it, and its later turns land in
//! the conversation it started in.

use super::traits::LlmClient;
use crate::attachment::{Attachment, AttachmentView, IncomingFile, Provenance};
use crate::conversation::{Conversation, ConversationBook, ConversationSummary, TargetService};
use crate::llm::{LlmError, LlmRequest, LlmResponse};
use crate::message::{Message, ToolCall};
use crate::remote::{RemoteError, RemoteRef, RemoteSource};
use crate::store::{DurableStore, StoreKey};
use crate::system_prompt::{build_system_prompt, OnboardingProfile};
use crate::tools::{self, ToolCommand, ToolContext, ToolOutput};
use crate::widget::prompt_options::{self, choice_message};
use crate::widget::survey;
use crate::widget::{
    PromptOptionsEffect, PromptOptionsEvent, PromptOptionsRecord, SurveyEffect, SurveyEvent,
    SurveyRecord, WidgetError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

const MODEL_ERROR_PREFIX: &str = "죄송합니다. 오류가 발생했습니다: ";
const USER_SAVE_WARNING: &str =
    "로그인한 사용자 정보를 저장하지 못했습니다. 새로고침하면 이전 사용자로 돌아갈 수 있습니다.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("No API key configured")]
    MissingApiKey,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("User name must not be empty")]
    InvalidUser,
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Attachment not found: {0}")]
    AttachmentNotFound(String),
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    #[error(transparent)]
    Widget(#[from] WidgetError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// The signed-in user, stored under the un-namespaced profile key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub signed_in_at: i64,
}

/// One user submission
#[derive(Debug, Default)]
pub struct SendInput {
    pub text: String,
    pub files: Vec<IncomingFile>,
    pub remote: Vec<RemoteRef>,
}

impl SendInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn chat_mut<'a>(
    book: &'a mut ConversationBook,
    id: &str,
) -> Result<&'a mut Conversation, ChatError> {
    book.get_mut(id)
        .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))
}

/// The signed-in user with their collection and the selected conversation
struct Session {
    user: String,
    book: ConversationBook,
    active_id: String,
}

impl Session {
    /// Load `user`'s collection and select the newest conversation,
    /// creating one when there is none
    fn load(store: &DurableStore, user: String) -> Self {
        let mut book = ConversationBook::load(store, &user);
        let active_id = match book.latest_id() {
            Some(id) => id,
            None => {
                let id = book.create(now_ms()).id.clone();
                book.save(store, &user);
                id
            }
        };
        tracing::info!(user = %user, conversation_id = %active_id, "Session loaded");
        Self {
            user,
            book,
            active_id,
        }
    }

    fn active(&self) -> Result<&Conversation, ChatError> {
        self.book
            .get(&self.active_id)
            .ok_or_else(|| ChatError::ConversationNotFound(self.active_id.clone()))
    }

    fn target(&self) -> ChatTarget {
        ChatTarget {
            user: self.user.clone(),
            chat_id: self.active_id.clone(),
        }
    }
}

/// Conversation a running pipeline appends to
#[derive(Debug, Clone)]
struct ChatTarget {
    user: String,
    chat_id: String,
}

pub struct ChatController<L: LlmClient, R: RemoteSource> {
    llm: L,
    remote: R,
    store: DurableStore,
    fallback_api_key: Option<String>,
    session: Mutex<Session>,
}

impl<L: LlmClient, R: RemoteSource> ChatController<L, R> {
    /// Restore the last signed-in user (or `default_user`) and select their
    /// most recent conversation, creating one when there is none.
    pub fn open(
        llm: L,
        remote: R,
        store: DurableStore,
        default_user: &str,
        fallback_api_key: Option<String>,
    ) -> Self {
        let user = store
            .load::<UserProfile>(&StoreKey::UserProfile)
            .map(|p| p.name)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_user.to_string());
        let session = Session::load(&store, user);

        Self {
            llm,
            remote,
            store,
            fallback_api_key,
            session: Mutex::new(session),
        }
    }

    fn persist(&self, session: &Session) -> bool {
        session.book.save(&self.store, &session.user)
    }

    /// Apply `f` to the target conversation and save its collection. When the
    /// session moved to another user meanwhile, the target user's stored
    /// collection is updated instead.
    async fn update_chat<T>(
        &self,
        target: &ChatTarget,
        f: impl FnOnce(&mut Conversation) -> T,
    ) -> Result<T, ChatError> {
        let mut guard = self.session.lock().await;
        let session = &mut *guard;
        let mut stored;
        let book = if session.user == target.user {
            &mut session.book
        } else {
            stored = ConversationBook::load(&self.store, &target.user);
            &mut stored
        };
        let out = f(chat_mut(book, &target.chat_id)?);
        book.save(&self.store, &target.user);
        Ok(out)
    }

    async fn read_chat<T>(
        &self,
        target: &ChatTarget,
        f: impl FnOnce(&Conversation) -> T,
    ) -> Result<T, ChatError> {
        let session = self.session.lock().await;
        let missing = || ChatError::ConversationNotFound(target.chat_id.clone());
        if session.user == target.user {
            session.book.get(&target.chat_id).map(f).ok_or_else(missing)
        } else {
            ConversationBook::load(&self.store, &target.user)
                .get(&target.chat_id)
                .map(f)
                .ok_or_else(missing)
        }
    }

    /// Apply `f` to the selected conversation and save when it succeeds
    async fn update_active<T>(
        &self,
        f: impl FnOnce(&mut Conversation, &str) -> Result<T, ChatError>,
    ) -> Result<T, ChatError> {
        let mut guard = self.session.lock().await;
        let session = &mut *guard;
        let out = f(chat_mut(&mut session.book, &session.active_id)?, &session.user)?;
        self.persist(session);
        Ok(out)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub async fn user(&self) -> String {
        self.session.lock().await.user.clone()
    }

    pub async fn active(&self) -> Result<Conversation, ChatError> {
        self.session.lock().await.active().cloned()
    }

    pub async fn list_conversations(&self) -> Vec<ConversationSummary> {
        self.session.lock().await.book.list()
    }

    pub async fn new_conversation(&self) -> Result<Conversation, ChatError> {
        let mut session = self.session.lock().await;
        let id = session.book.create(now_ms()).id.clone();
        session.active_id = id;
        self.persist(&session);
        tracing::info!(conversation_id = %session.active_id, "Conversation created");
        session.active().cloned()
    }

    pub async fn switch_conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        let mut session = self.session.lock().await;
        let chat = session
            .book
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
        session.active_id = chat.id.clone();
        Ok(chat)
    }

    pub async fn set_selected_service(&self, service: TargetService) -> Result<(), ChatError> {
        self.update_active(|chat, _| {
            chat.selected_service = service;
            Ok(())
        })
        .await
    }

    /// Sign in as `name`, replacing the whole session
    pub async fn set_user(&self, name: &str) -> Result<(), ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidUser);
        }
        let profile = UserProfile {
            name: name.to_string(),
            signed_in_at: now_ms(),
        };

        let mut session = self.session.lock().await;
        if !self.store.save(&StoreKey::UserProfile, &profile) {
            tracing::warn!(user = %profile.name, "Signed-in user was not saved");
            self.store.warn(USER_SAVE_WARNING);
        }
        *session = Session::load(&self.store, profile.name);
        Ok(())
    }

    // ========================================================================
    // Settings
    // ========================================================================

    async fn key(&self, make: fn(String) -> StoreKey) -> StoreKey {
        make(self.user().await)
    }

    fn api_key_for(&self, user: &str) -> Option<String> {
        self.store
            .load::<String>(&StoreKey::ApiKey {
                user: user.to_string(),
            })
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.fallback_api_key.clone())
    }

    /// Stored credential, else the process-level fallback
    pub async fn api_key(&self) -> Option<String> {
        self.api_key_for(&self.user().await)
    }

    pub async fn set_api_key(&self, key: &str) -> bool {
        let store_key = self.key(|user| StoreKey::ApiKey { user }).await;
        match key.trim() {
            "" => self.store.remove(&store_key),
            key => self.store.save(&store_key, key),
        }
    }

    pub async fn onboarding(&self) -> Option<OnboardingProfile> {
        self.store
            .load(&self.key(|user| StoreKey::Onboarding { user }).await)
    }

    pub async fn set_onboarding(&self, profile: &OnboardingProfile) -> bool {
        self.store
            .save(&self.key(|user| StoreKey::Onboarding { user }).await, profile)
    }

    pub async fn memory_notes(&self) -> Vec<String> {
        self.store
            .load(&self.key(|user| StoreKey::MemoryNotes { user }).await)
            .unwrap_or_default()
    }

    pub async fn set_remote_token(&self, token: &str) -> bool {
        let store_key = self.key(|user| StoreKey::RemoteCredential { user }).await;
        match token.trim() {
            "" => self.store.remove(&store_key),
            token => self.store.save(&store_key, token),
        }
    }

    async fn collection_key(&self, name: &str) -> Result<StoreKey, ChatError> {
        StoreKey::collection(name, self.user().await)
            .ok_or_else(|| ChatError::UnknownCollection(name.to_string()))
    }

    /// A front-end collection (projects, prompt library, prompt gallery);
    /// absent or unreadable values read as an empty list
    pub async fn collection(&self, name: &str) -> Result<Value, ChatError> {
        let key = self.collection_key(name).await?;
        Ok(self
            .store
            .load(&key)
            .unwrap_or_else(|| Value::Array(Vec::new())))
    }

    pub async fn set_collection(&self, name: &str, value: &Value) -> Result<bool, ChatError> {
        let key = self.collection_key(name).await?;
        Ok(self.store.save(&key, value))
    }

    /// Pending storage warnings, drained
    pub fn take_warnings(&self) -> Vec<String> {
        self.store.take_warnings()
    }

    // ========================================================================
    // Send pipeline
    // ========================================================================

    /// Send to the selected conversation
    pub async fn send(&self, input: SendInput) -> Result<(), ChatError> {
        let target = self.session.lock().await.target();
        self.send_to(&target, input).await
    }

    async fn send_to(&self, target: &ChatTarget, input: SendInput) -> Result<(), ChatError> {
        let text = input.text.trim().to_string();
        if text.is_empty() && input.files.is_empty() && input.remote.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let api_key = self
            .api_key_for(&target.user)
            .ok_or(ChatError::MissingApiKey)?;

        let mut attachments: Vec<Attachment> =
            input.files.into_iter().map(Attachment::ingest).collect();
        for reference in input.remote {
            let file = self.remote.fetch_file(&reference).await?;
            let provenance = Provenance::Remote {
                owner: reference.owner,
                repo: reference.repo,
                branch: reference.branch,
                path: reference.path,
                url: file.url,
            };
            attachments.push(Attachment::ingest_remote(
                IncomingFile {
                    name: file.name,
                    mime_type: file.mime_type,
                    bytes: file.bytes,
                },
                provenance,
            ));
        }

        self.update_chat(target, |chat| {
            chat.append_user(Message::user_text(text, attachments));
        })
        .await?;

        let request = self.build_request(target, &api_key).await?;
        match self.llm.complete(&request).await {
            Ok(response) => self.handle_model_turn(target, response, &api_key).await,
            Err(e) => self.record_model_error(target, &e).await,
        }
    }

    async fn build_request(
        &self,
        target: &ChatTarget,
        api_key: &str,
    ) -> Result<LlmRequest, ChatError> {
        let profile: Option<OnboardingProfile> = self.store.load(&StoreKey::Onboarding {
            user: target.user.clone(),
        });
        let notes: Vec<String> = self
            .store
            .load(&StoreKey::MemoryNotes {
                user: target.user.clone(),
            })
            .unwrap_or_default();
        Ok(LlmRequest {
            system: build_system_prompt(profile.as_ref(), &notes),
            messages: self
                .read_chat(target, |chat| chat.messages.model_messages())
                .await?,
            tools: tools::definitions(),
            max_tokens: None,
            api_key: Some(api_key.to_string()),
        })
    }

    async fn record_model_error(
        &self,
        target: &ChatTarget,
        error: &LlmError,
    ) -> Result<(), ChatError> {
        tracing::warn!(kind = ?error.kind, error = %error, "Model call failed");
        let notice = Message::error(format!("{MODEL_ERROR_PREFIX}{}", error.message));
        self.update_chat(target, |chat| {
            chat.messages.append(notice);
        })
        .await
    }

    async fn append_assistant_text(&self, target: &ChatTarget, text: &str) -> Result<(), ChatError> {
        self.update_chat(target, |chat| {
            chat.messages.append(Message::assistant_text(text));
        })
        .await
    }

    /// Record a model response; tool calls are dispatched in received order
    /// and answered by exactly one follow-up request.
    async fn handle_model_turn(
        &self,
        target: &ChatTarget,
        response: LlmResponse,
        api_key: &str,
    ) -> Result<(), ChatError> {
        let text = response.text();
        let uses = response.tool_uses();
        if uses.is_empty() {
            if text.trim().is_empty() {
                tracing::warn!("Model returned neither text nor tool calls");
                return Ok(());
            }
            return self.append_assistant_text(target, &text).await;
        }

        let calls: Vec<ToolCall> = uses
            .into_iter()
            .map(|u| ToolCall {
                id: u.id,
                function_name: u.name,
                raw_arguments: u.arguments,
            })
            .collect();
        let preface = Some(text).filter(|t| !t.trim().is_empty());
        let declared = Message::tool_calls(preface, calls.clone());
        self.update_chat(target, |chat| {
            chat.messages.append(declared);
        })
        .await?;

        for call in &calls {
            self.update_chat(target, |chat| self.dispatch(chat, &target.user, call))
                .await?;
        }

        let request = self.build_request(target, api_key).await?;
        match self.llm.complete(&request).await {
            Ok(follow_up) => {
                if follow_up.has_tool_use() {
                    tracing::warn!(
                        count = follow_up.tool_uses().len(),
                        "Dropping tool calls returned by the follow-up request"
                    );
                }
                let text = follow_up.text();
                if text.trim().is_empty() {
                    Ok(())
                } else {
                    self.append_assistant_text(target, &text).await
                }
            }
            Err(e) => self.record_model_error(target, &e).await,
        }
    }

    /// Run one call and append its tool turn
    fn dispatch(&self, chat: &mut Conversation, user: &str, call: &ToolCall) -> ToolOutput {
        let output = match ToolCommand::parse(&call.function_name, &call.raw_arguments) {
            Ok(command) => {
                let mut ctx = ToolContext {
                    conversation: &mut *chat,
                    store: &self.store,
                    user,
                    now_ms: now_ms(),
                };
                command.run(&mut ctx)
            }
            Err(e) => {
                tracing::warn!(
                    tool = %call.function_name,
                    tool_call_id = %call.id,
                    error = %e,
                    "Rejected tool call"
                );
                ToolOutput::error(format!("알 수 없는 함수입니다: {}", call.function_name))
            }
        };
        tracing::info!(
            tool = %call.function_name,
            tool_call_id = %call.id,
            success = output.success,
            "Tool call handled"
        );

        chat.messages
            .append(Message::tool_result(&call.id, output.to_content()));
        output
    }

    // ========================================================================
    // Widgets
    // ========================================================================

    pub async fn prompt_options_event(
        &self,
        timestamp: i64,
        event: PromptOptionsEvent,
    ) -> Result<(), ChatError> {
        self.update_active(|chat, _| {
            let effect = chat
                .messages
                .update_widget(timestamp, |record: &PromptOptionsRecord| {
                    prompt_options::transition(record, event)
                })?;
            if let PromptOptionsEffect::Confirmed { title, prompt_text } = effect {
                chat.append_user(Message::user_text(choice_message(&title), Vec::new()));
                chat.messages.append(Message::prompt_update(prompt_text));
            }
            Ok(())
        })
        .await
    }

    /// Apply a survey edit. A successful submission sends the synthesized
    /// answer through the normal pipeline.
    pub async fn survey_event(&self, timestamp: i64, event: SurveyEvent) -> Result<(), ChatError> {
        let submitting = matches!(event, SurveyEvent::Submit { .. });
        let (target, effect) = self
            .update_active(|chat, user| {
                if submitting && self.api_key_for(user).is_none() {
                    return Err(ChatError::MissingApiKey);
                }
                let effect = chat
                    .messages
                    .update_widget(timestamp, |record: &SurveyRecord| {
                        survey::transition(record, event)
                    })?;
                let target = ChatTarget {
                    user: user.to_string(),
                    chat_id: chat.id.clone(),
                };
                Ok((target, effect))
            })
            .await?;

        match effect {
            SurveyEffect::Answered { message } => {
                self.send_to(&target, SendInput::text(message)).await
            }
            SurveyEffect::None => Ok(()),
        }
    }

    // ========================================================================
    // Attachments
    // ========================================================================

    pub async fn attachment_view(
        &self,
        timestamp: i64,
        attachment_id: &str,
    ) -> Result<AttachmentView, ChatError> {
        self.session
            .lock()
            .await
            .active()?
            .messages
            .find(timestamp)
            .and_then(|m| m.attachments.iter().find(|a| a.id == attachment_id))
            .map(Attachment::view)
            .ok_or_else(|| ChatError::AttachmentNotFound(attachment_id.to_string()))
    }

    /// Download a repository archive with the stored remote credential
    pub async fn fetch_archive(&self, reference: RemoteRef) -> Result<Attachment, ChatError> {
        let token: Option<String> = self
            .store
            .load(&self.key(|user| StoreKey::RemoteCredential { user }).await);
        let file = self
            .remote
            .fetch_archive(&reference, token.as_deref())
            .await?;
        Ok(Attachment::ingest_remote(
            IncomingFile {
                name: file.name,
                mime_type: file.mime_type,
                bytes: file.bytes,
            },
            Provenance::Remote {
                owner: reference.owner,
                repo: reference.repo,
                branch: reference.branch,
                path: reference.path,
                url: file.url,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{AttachmentClass, UNRECOVERABLE_MESSAGE};
    use crate::llm::{ContentBlock, MessageRole};
    use crate::message::MessageKind;
    use crate::runtime::testing::{
        text_response, tool_response, DelayedMockLlmClient, MockLlmClient, MockRemoteSource,
    };
    use crate::store::{
        KeyValueStore, MemoryStore, StoreError, StoreResult, CAPACITY_WARNING,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    type TestController = ChatController<Arc<MockLlmClient>, Arc<MockRemoteSource>>;

    struct Harness {
        llm: Arc<MockLlmClient>,
        remote: Arc<MockRemoteSource>,
        backend: Arc<dyn KeyValueStore>,
    }

    impl Harness {
        fn new(capacity: usize) -> Self {
            Self::with_remote(capacity, MockRemoteSource::new())
        }

        fn with_remote(capacity: usize, remote: MockRemoteSource) -> Self {
            Self::with_backend(Arc::new(MemoryStore::new(capacity)), remote)
        }

        fn with_backend(backend: Arc<dyn KeyValueStore>, remote: MockRemoteSource) -> Self {
            Self {
                llm: Arc::new(MockLlmClient::new("mock")),
                remote: Arc::new(remote),
                backend,
            }
        }

        /// A fresh controller over the same backend, i.e. a reload
        fn open(&self, api_key: Option<&str>) -> TestController {
            ChatController::open(
                self.llm.clone(),
                self.remote.clone(),
                DurableStore::new(self.backend.clone()),
                "tester",
                api_key.map(str::to_string),
            )
        }
    }

    /// Backend that refuses every write to one key
    struct RefusingStore {
        inner: MemoryStore,
        refused: String,
    }

    impl KeyValueStore for RefusingStore {
        fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            if key == self.refused {
                return Err(StoreError::QuotaExceeded {
                    needed: value.len(),
                    available: 0,
                });
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> StoreResult<()> {
            self.inner.remove(key)
        }
    }

    async fn turns(c: &TestController) -> Vec<Message> {
        c.active().await.unwrap().messages.snapshot().to_vec()
    }

    async fn kinds(c: &TestController) -> Vec<&'static str> {
        turns(c).await.iter().map(|m| m.kind.name()).collect()
    }

    const TWO_OPTIONS: &str = r#"{"options":[{"title":"Cozy","prompt":"Write a warm tagline"},{"title":"Bold","prompt":"Write a punchy tagline"}]}"#;

    async fn widget_ts(c: &TestController, kind: &str) -> i64 {
        turns(c)
            .await
            .iter()
            .find(|m| m.kind.name() == kind)
            .map(|m| m.timestamp)
            .unwrap()
    }

    #[tokio::test]
    async fn scenario_a_two_options_render_a_chooser() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        h.llm
            .queue_response(tool_response(&[("call_1", "suggest_prompt_options", TWO_OPTIONS)]));
        h.llm.queue_response(text_response("두 가지 옵션을 준비했어요."));

        c.send(SendInput::text("Write me a tagline for a coffee shop"))
            .await
            .unwrap();

        assert_eq!(
            kinds(&c).await,
            vec!["text", "tool_calls", "prompt_options", "tool_result", "text"]
        );
        let all = turns(&c).await;
        let MessageKind::PromptOptions(record) = &all[2].kind else {
            panic!("expected chooser");
        };
        assert_eq!(record.state.selected_index, None);
        assert!(!record.state.completed);
        assert_eq!(
            c.active().await.unwrap().title,
            "Write me a tagline for a coffe..."
        );

        let view = crate::widget::project(&all[2]).unwrap();
        assert!(matches!(view, crate::widget::WidgetView::PromptOptions { completed: false, .. }));
    }

    #[tokio::test]
    async fn scenario_b_confirming_records_the_choice() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        h.llm
            .queue_response(tool_response(&[("call_1", "suggest_prompt_options", TWO_OPTIONS)]));
        h.llm.queue_response(text_response("골라 주세요."));
        c.send(SendInput::text("Write me a tagline for a coffee shop"))
            .await
            .unwrap();

        let ts = widget_ts(&c, "prompt_options").await;
        c.prompt_options_event(ts, PromptOptionsEvent::Select(1))
            .await
            .unwrap();
        c.prompt_options_event(ts, PromptOptionsEvent::Confirm)
            .await
            .unwrap();

        let all = turns(&c).await;
        let MessageKind::PromptOptions(record) = &all[2].kind else {
            panic!("expected chooser");
        };
        assert!(record.state.completed);
        assert_eq!(record.state.selected_index, Some(1));

        let n = all.len();
        assert_eq!(all[n - 2].role, crate::message::Role::User);
        assert!(
            matches!(&all[n - 2].kind, MessageKind::Text { text } if text == "\"Bold\" 옵션을 선택했습니다.")
        );
        assert!(
            matches!(&all[n - 1].kind, MessageKind::PromptUpdate { prompt } if prompt == "Write a punchy tagline")
        );

        let submitted = c.active().await.unwrap().messages.model_messages();
        let last = submitted.last().unwrap();
        assert_eq!(last.role, MessageRole::User);
        assert_eq!(last.content, vec![ContentBlock::text("\"Bold\" 옵션을 선택했습니다.")]);

        // Absorbing
        let err = c
            .prompt_options_event(ts, PromptOptionsEvent::Select(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Widget(WidgetError::Closed)));

        // Widget state survives a reload
        let reloaded = turns(&h.open(Some("sk"))).await;
        let MessageKind::PromptOptions(record) = &reloaded[2].kind else {
            panic!("expected chooser");
        };
        assert!(record.state.completed);
    }

    #[tokio::test]
    async fn scenario_c_oversized_text_is_session_only_after_reload() {
        let h = Harness::new(5_000_000);
        let c = h.open(Some("sk"));
        h.llm.queue_response(text_response("받았습니다."));

        let bytes = vec![b'a'; 5 * 1024 * 1024];
        c.send(SendInput {
            text: "요약해 줘".into(),
            files: vec![IncomingFile {
                name: "big.txt".into(),
                mime_type: Some("text/plain".into()),
                bytes,
            }],
            remote: Vec::new(),
        })
        .await
        .unwrap();

        let user_turn = turns(&c).await[0].clone();
        let att = &user_turn.attachments[0];
        assert_eq!(att.class, AttachmentClass::Text);
        assert!(att.text_preview.is_none());
        assert!(matches!(
            c.attachment_view(user_turn.timestamp, &att.id).await.unwrap(),
            AttachmentView::Text { partial: false, .. }
        ));

        let reloaded = h.open(Some("sk"));
        let stored = turns(&reloaded).await[0].clone();
        let stored_att = &stored.attachments[0];
        assert!(stored_att.session_only);
        assert!(stored_att.payload.is_none());
        assert_eq!(stored_att.size_bytes, 5 * 1024 * 1024);
        assert_eq!(stored_att.mime_type, "text/plain");
        assert_eq!(stored_att.class, AttachmentClass::Text);
        assert_eq!(stored_att.name, "big.txt");
        assert_eq!(
            reloaded
                .attachment_view(stored.timestamp, &stored_att.id)
                .await
                .unwrap(),
            AttachmentView::Unrecoverable {
                message: UNRECOVERABLE_MESSAGE.to_string()
            }
        );
        assert_eq!(kinds(&reloaded).await, vec!["text", "text"]);
    }

    #[tokio::test]
    async fn scenario_d_two_calls_then_one_follow_up() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        h.llm.queue_response(tool_response(&[
            (
                "call_s",
                "request_survey",
                r#"{"survey_id":"tone","prompt":"어떤 톤?","survey_type":"multiple_choice","options":["따뜻함","대담함"]}"#,
            ),
            ("call_m", "remember_memory", r#"{"note":"커피숍 운영"}"#),
        ]));
        h.llm.queue_response(text_response("설문에 답해 주세요."));

        c.send(SendInput::text("tagline please")).await.unwrap();

        let all = turns(&c).await;
        let results: Vec<&str> = all
            .iter()
            .filter_map(|m| match &m.kind {
                MessageKind::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec!["call_s", "call_m"]);

        let requests = h.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        let follow_up_results: Vec<String> = requests[1]
            .messages
            .iter()
            .flat_map(|m| &m.content)
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(follow_up_results, vec!["call_s", "call_m"]);
        assert_eq!(c.memory_notes().await, vec!["커피숍 운영"]);
        assert!(matches!(&all.last().unwrap().kind, MessageKind::Text { text } if text == "설문에 답해 주세요."));
    }

    #[tokio::test]
    async fn survey_submission_goes_through_the_pipeline() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        h.llm.queue_response(tool_response(&[(
            "call_s",
            "request_survey",
            r#"{"title":"톤","prompt":"어떤 톤?","options":["따뜻함","대담함"],"allow_multiple":true}"#,
        )]));
        h.llm.queue_response(text_response("질문드릴게요."));
        c.send(SendInput::text("start")).await.unwrap();
        let ts = widget_ts(&c, "survey").await;

        // Required answer missing: rejected in place
        let err = c
            .survey_event(ts, SurveyEvent::Submit { at: 5 })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Widget(WidgetError::AnswerRequired)));
        let before = turns(&c).await.len();

        c.survey_event(ts, SurveyEvent::Toggle("대담함".into()))
            .await
            .unwrap();
        c.survey_event(ts, SurveyEvent::Toggle("따뜻함".into()))
            .await
            .unwrap();
        assert_eq!(turns(&c).await.len(), before);

        h.llm.queue_response(text_response("좋아요."));
        c.survey_event(ts, SurveyEvent::Submit { at: 5 })
            .await
            .unwrap();

        let all = turns(&c).await;
        let answer = &all[before];
        assert_eq!(answer.role, crate::message::Role::User);
        assert!(matches!(
            &answer.kind,
            MessageKind::Text { text } if text.starts_with("[설문 응답 - 톤]\n어떤 톤?\n선택한 옵션: ")
        ));
        assert_eq!(h.llm.recorded_requests().len(), 3);
        let record = all
            .iter()
            .find_map(|m| match &m.kind {
                MessageKind::Survey(r) => Some(r.clone()),
                _ => None,
            })
            .unwrap();
        assert!(record.state.completed);
        assert_eq!(record.state.submitted_at, Some(5));
    }

    #[tokio::test]
    async fn unknown_function_still_gets_a_failure_result() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        h.llm.queue_response(tool_response(&[
            ("call_x", "launch_rockets", "{}"),
            ("call_u", "update_prompt", "not json"),
        ]));
        h.llm.queue_response(text_response("ok"));
        c.send(SendInput::text("hi")).await.unwrap();

        assert_eq!(
            kinds(&c).await,
            vec!["text", "tool_calls", "tool_result", "prompt_update", "tool_result", "text"]
        );
        let all = turns(&c).await;
        let MessageKind::ToolResult { content, .. } = &all[2].kind else {
            panic!("expected tool result");
        };
        let output: ToolOutput = serde_json::from_str(content).unwrap();
        assert!(!output.success);
    }

    #[tokio::test]
    async fn follow_up_tool_calls_are_not_dispatched() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        h.llm
            .queue_response(tool_response(&[("call_1", "update_prompt", r#"{"updated_prompt":"v1"}"#)]));
        h.llm
            .queue_response(tool_response(&[("call_2", "update_prompt", r#"{"updated_prompt":"v2"}"#)]));
        c.send(SendInput::text("hi")).await.unwrap();

        assert_eq!(
            kinds(&c).await,
            vec!["text", "tool_calls", "prompt_update", "tool_result"]
        );
        assert_eq!(h.llm.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn model_failure_becomes_an_error_turn() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        h.llm
            .queue_response(tool_response(&[("call_1", "update_prompt", r#"{"updated_prompt":"v1"}"#)]));
        h.llm.queue_error(LlmError::server_error("upstream down"));
        c.send(SendInput::text("hi")).await.unwrap();

        let all = turns(&c).await;
        assert_eq!(
            kinds(&c).await,
            vec!["text", "tool_calls", "prompt_update", "tool_result", "error"]
        );
        assert!(matches!(
            &all[4].kind,
            MessageKind::Error { message } if message == "죄송합니다. 오류가 발생했습니다: upstream down"
        ));
        // The error turn is never submitted
        assert_eq!(
            c.active().await.unwrap().messages.for_model_submission().len(),
            3
        );
    }

    #[tokio::test]
    async fn missing_key_rejects_before_appending() {
        let h = Harness::new(1_000_000);
        let c = h.open(None);
        let err = c.send(SendInput::text("hi")).await.unwrap_err();
        assert!(matches!(err, ChatError::MissingApiKey));
        assert!(turns(&c).await.is_empty());
        assert!(h.llm.recorded_requests().is_empty());

        assert!(c.set_api_key("sk-saved").await);
        h.llm.queue_response(text_response("hello"));
        c.send(SendInput::text("hi")).await.unwrap();
        assert_eq!(h.llm.recorded_requests()[0].api_key.as_deref(), Some("sk-saved"));
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        assert!(matches!(
            c.send(SendInput::text("   ")).await.unwrap_err(),
            ChatError::EmptyMessage
        ));
    }

    #[tokio::test]
    async fn context_turns_reach_the_model() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        c.set_onboarding(&OnboardingProfile {
            role: "마케터".into(),
            ..Default::default()
        })
        .await;
        h.llm.queue_response(text_response("hello"));
        c.send(SendInput::text("hi")).await.unwrap();

        let request = &h.llm.recorded_requests()[0];
        assert_eq!(request.system.len(), 2);
        assert_eq!(request.tools.len(), tools::definitions().len());
    }

    #[tokio::test]
    async fn remote_files_become_attachments() {
        let remote = MockRemoteSource::new().with_file("src/main.rs", b"fn main() {}");
        let h = Harness::with_remote(1_000_000, remote);
        let c = h.open(Some("sk"));
        h.llm.queue_response(text_response("looks fine"));
        c.send(SendInput {
            text: "review".into(),
            files: Vec::new(),
            remote: vec![RemoteRef {
                owner: "o".into(),
                repo: "r".into(),
                branch: "main".into(),
                path: "src/main.rs".into(),
            }],
        })
        .await
        .unwrap();

        let first = turns(&c).await[0].clone();
        let att = &first.attachments[0];
        assert_eq!(att.name, "main.rs");
        assert_eq!(att.text_preview.as_deref(), Some("fn main() {}"));
        assert!(matches!(att.provenance, Provenance::Remote { .. }));

        let err = c
            .send(SendInput {
                text: "more".into(),
                files: Vec::new(),
                remote: vec![RemoteRef {
                    owner: "o".into(),
                    repo: "r".into(),
                    branch: "main".into(),
                    path: "missing.rs".into(),
                }],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Remote(RemoteError::NotFound(_))));
        assert_eq!(turns(&c).await.len(), 2);
    }

    #[tokio::test]
    async fn archive_surfaces_redirect_error() {
        let remote = MockRemoteSource::new().with_archive(Err(RemoteError::ArchiveRedirectBlocked {
            location: Some("https://codeload.example/zip".into()),
        }));
        let h = Harness::with_remote(1_000_000, remote);
        let c = h.open(Some("sk"));
        let reference = RemoteRef {
            owner: "o".into(),
            repo: "r".into(),
            branch: "main".into(),
            path: String::new(),
        };

        let err = c.fetch_archive(reference.clone()).await.unwrap_err();
        assert!(matches!(err, ChatError::Remote(RemoteError::MissingToken)));

        assert!(c.set_remote_token("ghp_token").await);
        let err = c.fetch_archive(reference).await.unwrap_err();
        assert!(matches!(
            err,
            ChatError::Remote(RemoteError::ArchiveRedirectBlocked { .. })
        ));
        assert_eq!(
            h.remote.archive_tokens.lock().unwrap().last().cloned().flatten().as_deref(),
            Some("ghp_token")
        );
    }

    #[tokio::test]
    async fn conversations_switch_and_users_are_namespaced() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        let first = c.active().await.unwrap().id;
        h.llm.queue_response(text_response("a"));
        c.send(SendInput::text("first chat")).await.unwrap();

        let second = c.new_conversation().await.unwrap().id;
        assert_ne!(first, second);
        assert!(turns(&c).await.is_empty());
        assert_eq!(c.list_conversations().await.len(), 2);

        let switched = c.switch_conversation(&first).await.unwrap();
        assert_eq!(switched.messages.len(), 2);
        assert_eq!(turns(&c).await.len(), 2);
        assert!(matches!(
            c.switch_conversation("chat_nope").await.unwrap_err(),
            ChatError::ConversationNotFound(_)
        ));

        c.set_user("alice").await.unwrap();
        assert_eq!(c.user().await, "alice");
        assert_eq!(c.list_conversations().await.len(), 1);
        assert!(turns(&c).await.is_empty());

        // Last signed-in user is restored on reload
        let reloaded = h.open(Some("sk"));
        assert_eq!(reloaded.user().await, "alice");
        assert!(matches!(
            c.set_user("  ").await.unwrap_err(),
            ChatError::InvalidUser
        ));
        assert!(c.take_warnings().is_empty());
    }

    #[tokio::test]
    async fn unsaved_sign_in_warns() {
        let backend = Arc::new(RefusingStore {
            inner: MemoryStore::new(1_000_000),
            refused: StoreKey::UserProfile.to_string(),
        });
        let h = Harness::with_backend(backend, MockRemoteSource::new());
        let c = h.open(Some("sk"));

        c.set_user("alice").await.unwrap();
        assert_eq!(c.user().await, "alice");
        assert_eq!(c.take_warnings(), vec![USER_SAVE_WARNING.to_string()]);

        // Nothing was saved, so a reload falls back to the default user
        assert_eq!(h.open(Some("sk")).user().await, "tester");
    }

    #[tokio::test]
    async fn capacity_pressure_strips_payloads_and_warns_once() {
        let h = Harness::new(60_000);
        let c = h.open(Some("sk"));
        h.llm.queue_response(text_response("ok"));
        c.send(SendInput {
            text: "see file".into(),
            files: vec![IncomingFile {
                name: "data.csv".into(),
                mime_type: None,
                bytes: vec![b'1'; 100_000],
            }],
            remote: Vec::new(),
        })
        .await
        .unwrap();

        assert_eq!(c.take_warnings(), vec![CAPACITY_WARNING.to_string()]);
        assert!(c.take_warnings().is_empty());

        let live = turns(&c).await[0].clone();
        let reloaded = h.open(Some("sk"));
        let stored = turns(&reloaded).await[0].clone();
        assert!(matches!(&stored.kind, MessageKind::Text { text } if text == "see file"));
        let stored_att = &stored.attachments[0];
        assert!(stored_att.session_only);
        assert!(stored_att.text_preview.is_some());
        assert_eq!(stored_att.mime_type, live.attachments[0].mime_type);
        assert_eq!(stored_att.class, AttachmentClass::Text);
        assert_eq!(stored_att.size_bytes, 100_000);
    }

    #[tokio::test]
    async fn collections_are_stored_per_user() {
        let h = Harness::new(1_000_000);
        let c = h.open(Some("sk"));
        assert_eq!(c.collection("projects").await.unwrap(), json!([]));

        let library = json!([{"title": "Tagline", "prompt": "Write a tagline"}]);
        assert!(c.set_collection("prompt-library", &library).await.unwrap());
        assert_eq!(c.collection("prompt-library").await.unwrap(), library);

        c.set_user("alice").await.unwrap();
        assert_eq!(c.collection("prompt-library").await.unwrap(), json!([]));

        assert!(matches!(
            c.collection("chats").await.unwrap_err(),
            ChatError::UnknownCollection(_)
        ));
    }

    #[tokio::test]
    async fn pending_model_call_leaves_the_session_free() {
        let llm = Arc::new(DelayedMockLlmClient::new("mock", Duration::from_millis(500)));
        llm.queue_response(text_response("늦은 답변"));
        let c = Arc::new(ChatController::open(
            llm.clone(),
            Arc::new(MockRemoteSource::new()),
            DurableStore::new(Arc::new(MemoryStore::new(1_000_000))),
            "tester",
            Some("sk".to_string()),
        ));
        let first = c.active().await.unwrap().id;

        let started = llm.request_started.notified();
        let pending = {
            let c = c.clone();
            tokio::spawn(async move { c.send(SendInput::text("천천히")).await })
        };
        started.await;

        let quick = Duration::from_millis(200);
        let second = tokio::time::timeout(quick, c.new_conversation())
            .await
            .expect("session should not wait for the model")
            .unwrap();
        assert_ne!(second.id, first);
        let listed = tokio::time::timeout(quick, c.list_conversations())
            .await
            .expect("session should not wait for the model");
        assert_eq!(listed.len(), 2);

        pending.await.unwrap().unwrap();

        // The reply lands where the request started, not in the new chat
        assert!(c.active().await.unwrap().messages.is_empty());
        let origin = c.switch_conversation(&first).await.unwrap();
        let texts: Vec<&str> = origin
            .messages
            .snapshot()
            .iter()
            .filter_map(|m| match &m.kind {
                MessageKind::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["천천히", "늦은 답변"]);
    }

    #[tokio::test]
    async fn reply_after_user_switch_goes_to_the_original_user() {
        let llm = Arc::new(DelayedMockLlmClient::new("mock", Duration::from_millis(300)));
        llm.queue_response(text_response("tester에게"));
        let backend = Arc::new(MemoryStore::new(1_000_000));
        let open = || {
            ChatController::open(
                llm.clone(),
                Arc::new(MockRemoteSource::new()),
                DurableStore::new(backend.clone()),
                "tester",
                Some("sk".to_string()),
            )
        };
        let c = Arc::new(open());

        let started = llm.request_started.notified();
        let pending = {
            let c = c.clone();
            tokio::spawn(async move { c.send(SendInput::text("hi")).await })
        };
        started.await;
        c.set_user("alice").await.unwrap();
        pending.await.unwrap().unwrap();

        assert!(c.active().await.unwrap().messages.is_empty());
        c.set_user("tester").await.unwrap();
        assert_eq!(c.active().await.unwrap().messages.len(), 2);
        assert_eq!(open().user().await, "tester");
    }
}
