//! services/proxy/src/web/auth.rs
//!
//! KoSync credentials carried on tracked requests.
//!
//! The proxy does not validate them; that is the backend's job. It only
//! requires their presence and relays them.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, HeaderValue},
};

use crate::error::ProxyError;

pub const AUTH_USER_HEADER: &str = "x-auth-user";
pub const AUTH_KEY_HEADER: &str = "x-auth-key";

/// The `x-auth-user` / `x-auth-key` pair from a request.
#[derive(Debug, Clone)]
pub struct KoSyncAuth {
    pub username: String,
    user_header: HeaderValue,
    key_header: HeaderValue,
}

impl KoSyncAuth {
    /// Headers to send upstream: the two credentials and nothing else.
    pub fn upstream_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_USER_HEADER, self.user_header.clone());
        headers.insert(AUTH_KEY_HEADER, self.key_header.clone());
        headers
    }
}

impl<S> FromRequestParts<S> for KoSyncAuth
where
    S: Send + Sync,
{
    type Rejection = ProxyError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let non_empty = |name: &str| {
            parts
                .headers
                .get(name)
                .filter(|value| !value.is_empty())
                .cloned()
        };

        let user_header = non_empty(AUTH_USER_HEADER).ok_or(ProxyError::MissingAuth)?;
        let key_header = non_empty(AUTH_KEY_HEADER).ok_or(ProxyError::MissingAuth)?;
        let username = user_header
            .to_str()
            .map_err(|_| ProxyError::MissingAuth)?
            .to_string();

        Ok(Self {
            username,
            user_header,
            key_header,
        })
    }
}
