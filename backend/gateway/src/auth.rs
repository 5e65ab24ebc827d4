//! Sign-in with an Ethereum wallet (EIP-4361) and bearer sessions.
//!
//! ## Flow
//!
//! 1. `GET /auth/nonce` issues a single-use nonce.
//! 2. The wallet signs an EIP-4361 message embedding that nonce (EIP-191
//!    personal-sign).
//! 3. `POST /auth/verify` parses the message, recovers the signer, checks
//!    address, domain, nonce and validity window, and opens a session.
//! 4. Requests carry `Authorization: Bearer <token>`.
//!
//! Admin rights are never stored: every request re-evaluates the
//! [`AdminPolicy`] against the session's address.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use siwe::{Message, VerificationError};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::GatewayError;

const NONCE_TTL_SECS: i64 = 600;
const MAX_SESSION_TTL_SECS: u64 = 10 * 365 * 86_400;
/// Outstanding nonces allowed at once.
pub const MAX_PENDING_NONCES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Malformed sign-in message: {0}")]
    Malformed(String),
    #[error("Invalid signature: {0}")]
    BadSignature(String),
    #[error("Signature does not match the message address")]
    AddressMismatch,
    #[error("Sign-in message was issued for another domain")]
    DomainMismatch,
    #[error("Sign-in message is expired or not yet valid")]
    OutsideValidity,
    #[error("Unknown or already used nonce")]
    InvalidNonce,
    #[error("Too many pending sign-ins, try again later")]
    TooManyNonces,
    #[error("Missing or invalid session")]
    NoSession,
}

impl From<AuthError> for GatewayError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::TooManyNonces => GatewayError::Unavailable(e.to_string()),
            other => GatewayError::Unauthorized(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────
// EIP-4361 message
// ─────────────────────────────────────────────────────────

/// Parse and check a signed sign-in message.
///
/// Parsing, the validity window and EIP-191 signer recovery are done by
/// `siwe`; the domain is checked here. Nonce bookkeeping is left to the
/// caller.
pub fn verify_message(
    text: &str,
    signature: &str,
    expected_domain: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Message, AuthError> {
    let message =
        Message::from_str(text).map_err(|e| AuthError::Malformed(e.to_string()))?;

    if let Some(domain) = expected_domain {
        if message.domain.as_str() != domain {
            return Err(AuthError::DomainMismatch);
        }
    }

    let at = OffsetDateTime::from_unix_timestamp(now.timestamp())
        .map_err(|_| AuthError::OutsideValidity)?;
    if !message.valid_at(&at) {
        return Err(AuthError::OutsideValidity);
    }

    let raw = hex::decode(signature.trim().trim_start_matches("0x"))
        .map_err(|e| AuthError::BadSignature(e.to_string()))?;
    let raw: [u8; 65] = raw
        .as_slice()
        .try_into()
        .map_err(|_| AuthError::BadSignature(format!("expected 65 bytes, got {}", raw.len())))?;

    message.verify_eip191(&raw).map_err(|e| match e {
        VerificationError::Signer => AuthError::AddressMismatch,
        other => AuthError::BadSignature(other.to_string()),
    })?;
    Ok(message)
}

/// Signer of a verified message.
pub fn signer_address(message: &Message) -> Address {
    Address::from(message.address)
}

// ─────────────────────────────────────────────────────────
// Admin policy
// ─────────────────────────────────────────────────────────

pub trait AdminPolicy: Send + Sync {
    fn is_admin(&self, address: Address) -> bool;
}

/// Fixed set of admin addresses. Comparison is on the 20 raw bytes, so
/// checksum casing never matters.
#[derive(Debug, Clone, Default)]
pub struct AllowListPolicy {
    admins: HashSet<Address>,
}

impl AllowListPolicy {
    pub fn new(admins: impl IntoIterator<Item = Address>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

impl AdminPolicy for AllowListPolicy {
    fn is_admin(&self, address: Address) -> bool {
        self.admins.contains(&address)
    }
}

// ─────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub address: Address,
    pub expires_at: DateTime<Utc>,
}

/// Session as returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub token: String,
    pub address: Address,
    pub is_admin: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionTables {
    sessions: HashMap<String, Session>,
    nonces: HashMap<String, DateTime<Utc>>,
}

/// In-memory sessions and outstanding nonces. Clones share storage.
#[derive(Clone)]
pub struct SessionStore {
    tables: Arc<RwLock<SessionTables>>,
    ttl: chrono::Duration,
    max_nonces: usize,
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn random_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(17)
        .map(char::from)
        .collect()
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            tables: Arc::new(RwLock::new(SessionTables::default())),
            ttl: chrono::Duration::seconds(ttl_secs.min(MAX_SESSION_TTL_SECS) as i64),
            max_nonces: MAX_PENDING_NONCES,
        }
    }

    pub fn with_nonce_limit(mut self, max_nonces: usize) -> Self {
        self.max_nonces = max_nonces;
        self
    }

    /// Fails once `max_nonces` unexpired nonces are outstanding.
    pub async fn issue_nonce(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let mut tables = self.tables.write().await;
        if tables.nonces.len() >= self.max_nonces {
            tables.nonces.retain(|_, exp| *exp > now);
            if tables.nonces.len() >= self.max_nonces {
                return Err(AuthError::TooManyNonces);
            }
        }
        let nonce = random_nonce();
        tables
            .nonces
            .insert(nonce.clone(), now + chrono::Duration::seconds(NONCE_TTL_SECS));
        Ok(nonce)
    }

    /// `true` once for every nonce issued within the last ten minutes.
    pub async fn consume_nonce(&self, nonce: &str, now: DateTime<Utc>) -> bool {
        match self.tables.write().await.nonces.remove(nonce) {
            Some(expires_at) => expires_at > now,
            None => false,
        }
    }

    pub async fn open(&self, address: Address, now: DateTime<Utc>) -> (String, Session) {
        let token = random_token();
        let session = Session {
            address,
            expires_at: now + self.ttl,
        };
        self.tables
            .write()
            .await
            .sessions
            .insert(token.clone(), session.clone());
        info!("Session opened for {address}");
        (token, session)
    }

    pub async fn get(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        self.tables
            .read()
            .await
            .sessions
            .get(token)
            .filter(|s| s.expires_at > now)
            .cloned()
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.tables.write().await.sessions.remove(token).is_some()
    }

    /// Drop expired sessions and nonces; returns how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len() + tables.nonces.len();
        tables.sessions.retain(|_, s| s.expires_at > now);
        tables.nonces.retain(|_, exp| *exp > now);
        before - (tables.sessions.len() + tables.nonces.len())
    }
}

/// Background sweep of expired sessions.
pub async fn run_sweeper(store: SessionStore, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let removed = store.purge_expired(Utc::now()).await;
        if removed > 0 {
            debug!("Purged {removed} expired sessions and nonces");
        }
    }
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
