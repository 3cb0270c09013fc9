use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use docsync::{AccessGrant, AuthenticationGate, HeaderBag, Identity, Rejection};
use tracing::{debug, error};

use crate::db::{DocRepo, DocumentInfo};

/// Admits a request when its session is valid and the user is an active
/// member of the organization owning the document.
///
/// Read-only: never creates or updates rows.
#[derive(Clone)]
pub struct SessionGate {
    repo: Arc<DocRepo>,
    cookie_name: String,
}

impl SessionGate {
    pub fn new(repo: Arc<DocRepo>, cookie_name: impl Into<String>) -> Self {
        Self {
            repo,
            cookie_name: cookie_name.into(),
        }
    }

    /// Like [`AuthenticationGate::admit`], also returning the document row.
    pub fn authorize(
        &self,
        document_id: &str,
        headers: &HeaderBag,
    ) -> Result<(Identity, DocumentInfo), Rejection> {
        let token = headers
            .session_token(&self.cookie_name)
            .ok_or(Rejection::AuthFailed)?;

        let session = match self.repo.validate_session(token) {
            Ok(Some(session)) => session,
            Ok(None) => return Err(Rejection::AuthFailed),
            Err(e) => {
                error!("Failed to validate session: {}", e);
                return Err(Rejection::AuthFailed);
            }
        };

        let user = match self.repo.get_user(&session.user_id) {
            Ok(Some(user)) => user,
            Ok(None) => return Err(Rejection::AuthFailed),
            Err(e) => {
                error!("Failed to load user {}: {}", session.user_id, e);
                return Err(Rejection::AuthFailed);
            }
        };

        // Missing, soft-deleted and foreign documents are indistinguishable.
        let document = match self.repo.get_document(document_id) {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!("Document {} not found for user {}", document_id, user.id);
                return Err(Rejection::AccessDenied);
            }
            Err(e) => {
                error!("Failed to load document {}: {}", document_id, e);
                return Err(Rejection::AccessDenied);
            }
        };

        match self.repo.is_active_member(&document.organization_id, &user.id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    "User {} is not an active member of {}",
                    user.id, document.organization_id
                );
                return Err(Rejection::AccessDenied);
            }
            Err(e) => {
                error!("Failed to check membership for {}: {}", user.id, e);
                return Err(Rejection::AccessDenied);
            }
        }

        let identity = Identity {
            display_name: user.display_name().to_string(),
            user_id: user.id,
        };
        Ok((identity, document))
    }
}

#[async_trait]
impl AuthenticationGate for SessionGate {
    async fn admit(&self, document_id: &str, headers: &HeaderBag) -> AccessGrant {
        self.authorize(document_id, headers)
            .map(|(identity, _)| identity)
    }
}

/// Copy an axum header map into a transport-neutral [`HeaderBag`].
pub fn headers_to_bag(headers: &HeaderMap) -> HeaderBag {
    HeaderBag::from_pairs(
        headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?.to_string()))),
    )
}
