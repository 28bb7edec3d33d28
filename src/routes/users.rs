use crate::{
    error::AppError, middleware::guards::User, services::conversation_service::ConversationService,
    state::AppState,
};
use actix_web::{put, web, HttpResponse};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct UpsertProfileRequest {
    pub username: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// PUT /users/me
/// Create or update the caller's display name and avatar
#[put("/users/me")]
pub async fn upsert_me(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<UpsertProfileRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let profile = ConversationService::upsert_profile(
        state.store.as_ref(),
        user.id,
        body.username,
        body.image_url,
    )
    .await?;
    Ok(HttpResponse::Ok().json(profile))
}
