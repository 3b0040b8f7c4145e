//! Resolves the `Authorization: Bearer` header into a [`Principal`] before
//! a handler body runs, mirroring C8's "fails closed" contract at the
//! boundary where an untrusted request first enters the process.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use std::sync::Arc;
use streamspace_auth::{AuthGate, Principal};
use streamspace_types::Error;

use crate::error::ApiError;

pub struct AuthedPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AuthedPrincipal
where
    Arc<AuthGate>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gate = Arc::<AuthGate>::from_ref(state);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::Unauthenticated)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(Error::Unauthenticated)?;
        let principal = gate.validate_bearer(token)?;
        Ok(AuthedPrincipal(principal))
    }
}
