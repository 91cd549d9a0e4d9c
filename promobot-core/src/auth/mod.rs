// =============================================================================
// promobot-core/src/auth/mod.rs
// =============================================================================

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub mod callback_server;
pub mod token_store;

pub use token_store::FileRefreshTokenStore;

/// RFC 7636 verifier/challenge pair: 32 random bytes, base64url without
/// padding; challenge is the SHA-256 of the verifier, encoded the same way.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Random correlation token for an authorization round trip.
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Pending authorization state, created when an auth URL is issued and
/// consumed exactly once by the matching callback.
#[derive(Debug, Clone)]
pub struct OAuthSession {
    pub code_verifier: String,
    pub code_challenge: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

impl OAuthSession {
    pub fn new(pkce: &PkcePair, state: impl Into<String>) -> Self {
        Self {
            code_verifier: pkce.verifier.clone(),
            code_challenge: pkce.challenge.clone(),
            state: state.into(),
            created_at: Utc::now(),
        }
    }
}

/// In-memory store of pending authorizations, keyed by state token.
///
/// Injected into whatever serves the callbacks rather than living in a
/// process global. Sessions survive only for the lifetime of this process;
/// a restart invalidates all pending authorizations.
pub struct OAuthSessionStore {
    sessions: DashMap<String, OAuthSession>,
    ttl: Duration,
}

impl OAuthSessionStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::minutes(10))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, session: OAuthSession) {
        self.sweep_expired();
        self.sessions.insert(session.state.clone(), session);
    }

    /// Single-use lookup: removes the session so a state token can never be
    /// consumed twice. Expired sessions are treated as absent.
    pub fn take(&self, state: &str) -> Option<OAuthSession> {
        let (_, session) = self.sessions.remove(state)?;
        if Utc::now() - session.created_at > self.ttl {
            return None;
        }
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn sweep_expired(&self) {
        let cutoff = Utc::now() - self.ttl;
        self.sessions.retain(|_, s| s.created_at > cutoff);
    }
}

impl Default for OAuthSessionStore {
    fn default() -> Self {
        Self::new()
    }
}
