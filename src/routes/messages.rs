use crate::{
    error::AppError, middleware::guards::User, services::message_service::MessageService,
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Deserialize)]
pub struct FeedQuery {
    pub limit: Option<usize>,
}

/// GET /conversations/{id}/messages
/// Newest-first feed with seen-by labels on the caller's messages
#[get("/conversations/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    query: web::Query<FeedQuery>,
) -> Result<HttpResponse, AppError> {
    let max = state.config.message_page_limit;
    let limit = query.limit.unwrap_or(max).clamp(1, max);
    let feed =
        MessageService::feed(state.store.as_ref(), user.id, conversation_id.into_inner(), limit)
            .await?;
    Ok(HttpResponse::Ok().json(feed))
}

/// POST /conversations/{id}/messages
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message = MessageService::send(
        state.store.as_ref(),
        &state.registry,
        user.id,
        conversation_id.into_inner(),
        body.into_inner().content,
    )
    .await?;
    Ok(HttpResponse::Created().json(message))
}
