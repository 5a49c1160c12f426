//! HTTP request handlers

use super::types::{
    ApiKeyRequest, ArchiveResponse, ChatRequest, ConversationListResponse, ConversationResponse,
    ErrorResponse, ExplainRequest, ExplainResponse, PromptOptionsEventRequest, RemoteTokenRequest,
    ServiceRequest, SuccessResponse, SurveyEventRequest, UserRequest,
};
use super::AppState;
use crate::attachment::AttachmentView;
use crate::llm::LlmErrorKind;
use crate::remote::{RemoteError, RemoteRef};
use crate::runtime::{ChatError, ProductionController, SendInput};
use crate::system_prompt::OnboardingProfile;
use crate::widget::WidgetError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::Value;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Conversations
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/service", put(set_service))
        // Chat pipeline
        .route("/api/chat", post(send_chat))
        // Widgets, addressed by the timestamp of their turn
        .route(
            "/api/widgets/:timestamp/prompt-options",
            post(prompt_options_event),
        )
        .route("/api/widgets/:timestamp/survey", post(survey_event))
        // Attachments
        .route(
            "/api/attachments/:timestamp/:attachment_id",
            get(get_attachment),
        )
        .route("/api/remote/archive", post(fetch_archive))
        // Inline explanation
        .route("/api/explain", post(explain))
        // Settings
        .route("/api/settings/api-key", put(set_api_key))
        .route("/api/settings/remote-token", put(set_remote_token))
        .route("/api/user", put(set_user))
        .route("/api/onboarding", get(get_onboarding).put(set_onboarding))
        // Front-end collections: projects, prompt-library, prompt-gallery
        .route(
            "/api/collections/:name",
            get(get_collection).put(set_collection),
        )
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Conversations
// ============================================================

async fn list_conversations(State(state): State<AppState>) -> Json<ConversationListResponse> {
    let controller = &state.controller;
    Json(ConversationListResponse {
        conversations: controller.list_conversations().await,
        active_id: controller.active().await.ok().map(|c| c.id),
    })
}

async fn create_conversation(
    State(state): State<AppState>,
) -> Result<Json<ConversationResponse>, AppError> {
    let conversation = state.controller.new_conversation().await?;
    Ok(Json(ConversationResponse::new(
        &conversation,
        state.controller.take_warnings(),
    )))
}

/// Switch to a conversation and return it
async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let conversation = state.controller.switch_conversation(&id).await?;
    Ok(Json(ConversationResponse::new(
        &conversation,
        state.controller.take_warnings(),
    )))
}

async fn set_service(
    State(state): State<AppState>,
    Json(req): Json<ServiceRequest>,
) -> Result<Json<ConversationResponse>, AppError> {
    state.controller.set_selected_service(req.service).await?;
    active_response(&state.controller).await
}

async fn active_response(
    controller: &ProductionController,
) -> Result<Json<ConversationResponse>, AppError> {
    let conversation = controller.active().await?;
    Ok(Json(ConversationResponse::new(
        &conversation,
        controller.take_warnings(),
    )))
}

// ============================================================
// Chat
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ConversationResponse>, AppError> {
    let files = req
        .attachments
        .into_iter()
        .map(|f| f.decode())
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::BadRequest)?;

    state
        .controller
        .send(SendInput {
            text: req.text,
            files,
            remote: req.remote,
        })
        .await?;
    active_response(&state.controller).await
}

// ============================================================
// Widgets
// ============================================================

async fn prompt_options_event(
    State(state): State<AppState>,
    Path(timestamp): Path<i64>,
    Json(req): Json<PromptOptionsEventRequest>,
) -> Result<Json<ConversationResponse>, AppError> {
    state
        .controller
        .prompt_options_event(timestamp, req.into())
        .await?;
    active_response(&state.controller).await
}

async fn survey_event(
    State(state): State<AppState>,
    Path(timestamp): Path<i64>,
    Json(req): Json<SurveyEventRequest>,
) -> Result<Json<ConversationResponse>, AppError> {
    let event = req.into_event(chrono::Utc::now().timestamp_millis());
    state.controller.survey_event(timestamp, event).await?;
    active_response(&state.controller).await
}

// ============================================================
// Attachments
// ============================================================

async fn get_attachment(
    State(state): State<AppState>,
    Path((timestamp, attachment_id)): Path<(i64, String)>,
) -> Result<Json<AttachmentView>, AppError> {
    let view = state
        .controller
        .attachment_view(timestamp, &attachment_id)
        .await?;
    Ok(Json(view))
}

async fn fetch_archive(
    State(state): State<AppState>,
    Json(reference): Json<RemoteRef>,
) -> Result<Json<ArchiveResponse>, AppError> {
    let attachment = state.controller.fetch_archive(reference).await?;
    Ok(Json(ArchiveResponse { attachment }))
}

// ============================================================
// Explain
// ============================================================

async fn explain(
    State(state): State<AppState>,
    Json(req): Json<ExplainRequest>,
) -> Result<Json<ExplainResponse>, AppError> {
    if req.selection.trim().is_empty() {
        return Err(AppError::BadRequest("Selection is empty".to_string()));
    }
    let Some(api_key) = state.controller.api_key().await else {
        return Err(ChatError::MissingApiKey.into());
    };

    let explanation = state
        .explainer
        .explain(&req.selection, Some(api_key))
        .await
        .map_err(|e| match e.kind {
            LlmErrorKind::Auth => AppError::Unauthorized(e.message),
            _ => AppError::BadGateway(e.message),
        })?;
    Ok(Json(ExplainResponse {
        superseded: explanation.is_none(),
        explanation,
    }))
}

// ============================================================
// Settings
// ============================================================

async fn set_api_key(
    State(state): State<AppState>,
    Json(req): Json<ApiKeyRequest>,
) -> Json<SuccessResponse> {
    let success = state.controller.set_api_key(&req.api_key).await;
    Json(SuccessResponse {
        success,
        warnings: state.controller.take_warnings(),
    })
}

async fn set_remote_token(
    State(state): State<AppState>,
    Json(req): Json<RemoteTokenRequest>,
) -> Json<SuccessResponse> {
    let success = state.controller.set_remote_token(&req.token).await;
    Json(SuccessResponse {
        success,
        warnings: state.controller.take_warnings(),
    })
}

/// Sign in as another user and load their conversations
async fn set_user(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> Result<Json<ConversationResponse>, AppError> {
    state.controller.set_user(&req.name).await?;
    active_response(&state.controller).await
}

async fn get_onboarding(State(state): State<AppState>) -> Json<Option<OnboardingProfile>> {
    Json(state.controller.onboarding().await)
}

async fn set_onboarding(
    State(state): State<AppState>,
    Json(profile): Json<OnboardingProfile>,
) -> Json<SuccessResponse> {
    let success = state.controller.set_onboarding(&profile).await;
    Json(SuccessResponse {
        success,
        warnings: state.controller.take_warnings(),
    })
}

async fn get_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(state.controller.collection(&name).await?))
}

/// Replace a collection wholesale; the body is stored as given
async fn set_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<SuccessResponse>, AppError> {
    let success = state.controller.set_collection(&name, &value).await?;
    Ok(Json(SuccessResponse {
        success,
        warnings: state.controller.take_warnings(),
    }))
}

async fn get_version() -> &'static str {
    concat!("promptcraft ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        let message = e.to_string();
        match e {
            ChatError::MissingApiKey | ChatError::Remote(RemoteError::Auth(_)) => {
                AppError::Unauthorized(message)
            }
            ChatError::ConversationNotFound(_)
            | ChatError::AttachmentNotFound(_)
            | ChatError::UnknownCollection(_)
            | ChatError::Widget(WidgetError::NotFound(_))
            | ChatError::Remote(RemoteError::NotFound(_)) => AppError::NotFound(message),
            ChatError::Widget(WidgetError::Closed) => AppError::Conflict(message),
            ChatError::EmptyMessage
            | ChatError::InvalidUser
            | ChatError::Widget(_)
            | ChatError::Remote(RemoteError::MissingToken) => AppError::BadRequest(message),
            ChatError::Remote(_) => AppError::BadGateway(message),
        }
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::BadGateway(msg) => msg,
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
