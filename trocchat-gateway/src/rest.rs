//! REST routes for conversation snapshots and message history.
//!
//! The socket path carries live events; these routes carry state. Clients
//! call them on login and when opening a conversation, then keep the
//! result fresh from socket events. All routes require the same bearer
//! token the socket handshake uses.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use trocchat_proto::model::{Conversation, ConversationId, ListingId, Message, UserId};

use crate::auth::AuthError;
use crate::gateway::GatewayState;
use crate::store::{Page, StoreError};

/// Error envelope returned by every REST route.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable description of the failure.
    pub error: String,
}

/// REST-level failures, mapped onto HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid bearer token.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Store-level rejection.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The referenced user is not a known marketplace user.
    #[error("unknown user {0}")]
    UnknownUser(UserId),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Store(StoreError::Validation(_) | StoreError::SelfConversation(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Store(
                StoreError::ConversationNotFound(_) | StoreError::NotParticipant { .. },
            )
            | Self::UnknownUser(_) => StatusCode::NOT_FOUND,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// Builds the REST router. Merged with the WebSocket route at startup.
pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/conversations", get(list_conversations).post(create_conversation))
        .route("/conversations/{id}/messages", get(list_messages))
        .route("/conversations/{id}/read", post(mark_read))
        .route("/conversations/{id}/close", post(close_conversation))
}

/// Extracts and verifies the bearer token, returning the caller's id.
fn authenticate(state: &GatewayState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AuthError::InvalidToken("missing bearer token".to_string()))?;
    let claims = state.verifier.verify(token)?;
    Ok(UserId::from_uuid(claims.sub))
}

/// `GET /conversations` — the caller's conversations, most recent first.
async fn list_conversations(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let conversations = state.service.store().list_conversations(caller).await;
    Ok(Json(conversations))
}

/// Body of `POST /conversations`.
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// The other participant.
    pub counterpart_id: UserId,
    /// Listing that prompted the contact, if any. Only applied when the
    /// conversation does not already exist.
    #[serde(default)]
    pub listing_id: Option<ListingId>,
}

/// `POST /conversations` — find or create the conversation with a
/// counterpart. Idempotent: repeated calls return the same row.
async fn create_conversation(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<CreateConversationRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    if !state.service.directory().exists(body.counterpart_id).await {
        return Err(ApiError::UnknownUser(body.counterpart_id));
    }
    let conversation = state
        .service
        .store()
        .find_or_create(caller, body.counterpart_id, body.listing_id)
        .await?;
    Ok(Json(conversation))
}

/// Query string of `GET /conversations/{id}/messages`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Messages to skip from the start of the conversation.
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum messages to return; clamped server-side.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /conversations/{id}/messages` — a page of history, ascending by
/// creation order.
async fn list_messages(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<ConversationId>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Message>>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let store = state.service.store();
    let page = Page::new(
        query.offset.unwrap_or(0),
        query.limit.unwrap_or_else(|| store.default_page_size()),
        store.max_page_size(),
    );
    let messages = store.list_messages(id, caller, page).await?;
    Ok(Json(messages))
}

/// Body of the `read` response: how many messages were newly marked.
#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    /// Messages flipped from unread to read by this call.
    pub newly_read: u64,
}

/// `POST /conversations/{id}/read` — mark everything addressed to the
/// caller as read. Also relays the read receipt to the counterpart's
/// live sockets, same as the socket event.
async fn mark_read(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<ConversationId>,
    headers: HeaderMap,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let newly_read = state.service.handle_mark_read(caller, id).await?;
    Ok(Json(MarkReadResponse { newly_read }))
}

/// `POST /conversations/{id}/close` — mark the exchange as completed.
/// History stays readable.
async fn close_conversation(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<ConversationId>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let caller = authenticate(&state, &headers)?;
    state.service.store().close(id, caller).await?;
    Ok(StatusCode::NO_CONTENT)
}
