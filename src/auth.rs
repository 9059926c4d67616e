//! Stand-in for the identity/session boundary (§6 "Identity collaborator").
//! Session issuance is explicitly out of scope for the core, treated as
//! an external collaborator specified only by the interface
//! it must expose: `current_identity(request) -> {id, email?, email_verified}`.
//! This is the thinnest workable implementation of that interface: a
//! bearer-token `AuthSessions` map (`DashMap` keyed by session id, one-hour
//! expiry) tracking an identity id and its verified-email flag.

use actix_web_httpauth::extractors::bearer::BearerAuth;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use utoipa::openapi::security::{Http, SecurityScheme};
use uuid::Uuid;

use crate::{AppState, errors::auth::AuthError};

#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: Uuid,
    pub email: Option<String>,
    pub email_verified: bool,
}

#[derive(Debug, Clone)]
struct Session {
    identity: Identity,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthSessions {
    sessions: DashMap<Uuid, Session>,
}

impl AuthSessions {
    /// Removes expired sessions.
    pub fn vacuum(&self) {
        let now = Utc::now();
        self.sessions.retain(|_, s| s.expires_at > now);
    }

    /// Registers a new session for an already-resolved identity. Stands in
    /// for whatever the real identity service issues post-login.
    pub fn register(&self, identity: Identity) -> (Uuid, DateTime<Utc>) {
        let session_id = Uuid::new_v4();
        let expires_at = Utc::now() + TimeDelta::hours(1);

        self.sessions.insert(session_id, Session { identity, expires_at });

        (session_id, expires_at)
    }

    pub fn revoke(&self, session_id: Uuid) -> Result<Uuid, AuthError> {
        self.sessions
            .remove(&session_id)
            .map(|(_, s)| s.identity.id)
            .ok_or(AuthError::InvalidSession)
    }

    pub fn current_identity(&self, session_id: Uuid) -> Option<Identity> {
        let session = self.sessions.get(&session_id)?;

        if session.expires_at <= Utc::now() {
            drop(session);
            self.sessions.remove(&session_id);
            return None;
        }

        Some(session.identity.clone())
    }
}

/// Resolves the caller's identity from a bearer token naming a session id.
pub async fn check_bearer(state: &AppState, cred: Option<BearerAuth>) -> Result<Identity, AuthError> {
    let Some(cred) = cred else {
        return Err(AuthError::MissingBearer);
    };

    let session_id = Uuid::try_parse(cred.token()).map_err(|_| AuthError::InvalidSession)?;

    state.auth.current_identity(session_id).ok_or(AuthError::InvalidSession)
}

pub struct AuthAddon;

impl utoipa::Modify for AuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(Http::new(utoipa::openapi::security::HttpAuthScheme::Bearer)),
        );
    }
}
