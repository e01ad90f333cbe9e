//! Caller identity.
//!
//! Authentication happens upstream; the gateway forwards the authenticated user in
//! `x-user-id`, `x-user-name` and `x-tenant-id`.

use crate::error::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::header::USER_AGENT;
use laudo_core::{Actor, RequestMeta};
use laudo_ids::{TenantId, UserId};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Extracts the [`Actor`] of a request.
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER)
            .and_then(|v| UserId::parse(v).ok())
            .ok_or_else(|| ApiError::unauthenticated("missing or invalid x-user-id"))?;
        let tenant_id = header(parts, TENANT_ID_HEADER)
            .and_then(|v| TenantId::parse(v).ok())
            .ok_or_else(|| ApiError::unauthenticated("missing or invalid x-tenant-id"))?;
        let name = header(parts, USER_NAME_HEADER).unwrap_or_default().to_owned();

        let ip = header(parts, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_owned());
        let user_agent = header(parts, USER_AGENT.as_str()).map(str::to_owned);

        Ok(Self(Actor {
            id,
            name,
            tenant_id,
            request: RequestMeta { ip, user_agent },
        }))
    }
}
