use crate::{
    error::AppError,
    middleware::guards::User,
    services::{
        conversation_service::ConversationService,
        read_service::{MarkReadOutcome, ReadService},
    },
    state::AppState,
};
use actix_web::{delete, get, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub member_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct MarkReadRequest {
    pub message_id: Uuid,
}

/// GET /conversations
/// Caller's conversations with unseen counts and the global badge
#[get("/conversations")]
pub async fn get_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let list = ConversationService::list(state.store.as_ref(), user.id).await?;
    Ok(HttpResponse::Ok().json(list))
}

/// POST /conversations
#[post("/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let conversation = ConversationService::create(
        state.store.as_ref(),
        &state.registry,
        user.id,
        body.name,
        body.member_ids,
    )
    .await?;
    Ok(HttpResponse::Created().json(conversation))
}

/// DELETE /conversations/{id}
#[delete("/conversations/{id}")]
pub async fn delete_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    ConversationService::delete(
        state.store.as_ref(),
        &state.registry,
        user.id,
        conversation_id.into_inner(),
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /conversations/{id}/members/me
#[delete("/conversations/{id}/members/me")]
pub async fn leave_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    ConversationService::leave(
        state.store.as_ref(),
        &state.registry,
        user.id,
        conversation_id.into_inner(),
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /conversations/{id}/watermarks
/// Every member's last seen message, caller included
#[get("/conversations/{id}/watermarks")]
pub async fn get_watermarks(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let rows =
        ReadService::watermarks(state.store.as_ref(), user.id, conversation_id.into_inner())
            .await?;
    Ok(HttpResponse::Ok().json(rows))
}

/// POST /conversations/{id}/read
/// Advance the caller's watermark; repeating or reordering calls is harmless
#[post("/conversations/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<MarkReadRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = conversation_id.into_inner();
    let outcome = ReadService::mark_read(
        state.store.as_ref(),
        &state.registry,
        user.id,
        conversation_id,
        body.message_id,
    )
    .await?;
    if outcome == MarkReadOutcome::Unchanged {
        tracing::trace!(%conversation_id, user_id = %user.id, "mark-read was a no-op");
    }
    Ok(HttpResponse::NoContent().finish())
}
