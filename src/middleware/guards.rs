//! Request guards for the caller's identity.
//!
//! Authentication happens upstream; the gateway forwards the verified user
//! id in the `x-user-id` header. Handlers take a `User` argument and never
//! read the header themselves.

use crate::error::AppError;
use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
}

impl User {
    fn from_headers(req: &HttpRequest) -> Result<Self, AppError> {
        let id = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .ok_or(AppError::Unauthorized)?;
        Ok(User { id })
    }
}

impl FromRequest for User {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(User::from_headers(req).map_err(Error::from))
    }
}
