//! Administrator authentication seam.

use axum::http::{header, HeaderMap};

/// Decides whether a request carries valid administrator credentials.
///
/// Session issuance lives outside this service; implementations only answer
/// yes or no for the headers they are given.
pub trait AdminAuthenticator: Send + Sync {
    fn is_admin(&self, headers: &HeaderMap) -> bool;
}

/// Accepts `Authorization: Bearer <token>` matching a configured token.
///
/// With no token configured every request is rejected.
pub struct BearerTokenAuthenticator {
    token: Option<String>,
}

impl BearerTokenAuthenticator {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

impl AdminAuthenticator for BearerTokenAuthenticator {
    fn is_admin(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.token.as_deref() else {
            return false;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|presented| constant_time_eq(presented.as_bytes(), expected.as_bytes()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
