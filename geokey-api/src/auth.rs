//! Bearer-token middleware
//!
//! Tokens are issued by the external OAuth2 provider; this service only
//! resolves them against the `access_tokens` table. A request without an
//! `Authorization` header runs as the anonymous identity with the smallest
//! privilege set; an unknown or expired token is rejected with 401.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

use geokey_common::db::init::ANONYMOUS_USER_ID;
use geokey_common::events::ActorRef;
use geokey_common::Error;

use crate::error::ApiError;
use crate::{store, AppState};

/// The identity a request runs under.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub display_name: String,
    pub is_superuser: bool,
    pub is_anonymous: bool,
}

impl CurrentUser {
    /// The shared anonymous identity.
    pub fn anonymous() -> Self {
        CurrentUser {
            id: Uuid::parse_str(ANONYMOUS_USER_ID).unwrap_or(Uuid::nil()),
            display_name: "AnonymousUser".to_string(),
            is_superuser: false,
            is_anonymous: true,
        }
    }

    /// Audit actor reference for this identity.
    pub fn actor(&self) -> ActorRef {
        ActorRef::new(self.id, self.display_name.clone())
    }

    /// Id as stored in TEXT columns.
    pub fn id_str(&self) -> String {
        self.id.to_string()
    }
}

/// Resolve the caller and stash a [`CurrentUser`] in request extensions.
pub async fn resolve_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = match request.headers().get(AUTHORIZATION) {
        None => CurrentUser::anonymous(),
        Some(value) => {
            let token = value
                .to_str()
                .ok()
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or_else(|| {
                    Error::Unauthorized("Expected an 'Authorization: Bearer' header.".to_string())
                })?;

            match store::users::resolve_token(&state.db, token).await? {
                Some(user) => user,
                None => {
                    debug!("Rejected unknown or expired access token");
                    return Err(
                        Error::Unauthorized("Unknown or expired access token.".to_string()).into(),
                    );
                }
            }
        }
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_identity_uses_the_seeded_user() {
        let user = CurrentUser::anonymous();
        assert!(user.is_anonymous);
        assert_eq!(user.id_str(), ANONYMOUS_USER_ID);
        assert_eq!(user.display_name, "AnonymousUser");
    }

    #[test]
    fn actor_carries_display_name() {
        let user = CurrentUser::anonymous();
        let actor = user.actor();
        assert_eq!(actor.display_name, "AnonymousUser");
    }
}
