//! Session context: the current wallet and bearer token that scope every
//! operation. One explicit instance is passed to the components that need it,
//! so tests can inject their own.

use crate::error::StoreError;
use crate::ids::WalletId;
use crate::store::{last_sync_key, EventStore};
use base64::Engine;
use std::sync::{Arc, Mutex};
use tracing::info;

const WALLET_KEY: &str = "current_wallet_id";
const TOKEN_KEY: &str = "token";
const PREF_PREFIX: &str = "pref_";

pub struct SessionContext {
    store: Arc<EventStore>,
    wallet: Mutex<Option<WalletId>>,
    token: Mutex<Option<String>>,
}

impl SessionContext {
    /// Attach to a store, restoring any persisted wallet and token.
    pub fn attach(store: Arc<EventStore>) -> Result<Self, StoreError> {
        let wallet = store
            .config_get(WALLET_KEY)?
            .and_then(|s| WalletId::parse(&s).ok());
        let token = store.config_get(TOKEN_KEY)?;
        Ok(Self {
            store,
            wallet: Mutex::new(wallet),
            token: Mutex::new(token),
        })
    }

    pub fn current_wallet(&self) -> Option<WalletId> {
        self.wallet.lock().unwrap().clone()
    }

    /// Switch the active wallet. Clears that wallet's last-sync watermark so
    /// the next pull fetches the full partition.
    pub fn set_current_wallet(&self, wallet: Option<WalletId>) -> Result<(), StoreError> {
        match &wallet {
            Some(w) => {
                info!(wallet = %w, "switching current wallet");
                self.store.config_set(WALLET_KEY, w.as_str())?;
                self.store.config_remove(&last_sync_key(w))?;
            }
            None => self.store.config_remove(WALLET_KEY)?,
        }
        *self.wallet.lock().unwrap() = wallet;
        Ok(())
    }

    pub fn token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    pub fn set_token(&self, token: Option<String>) -> Result<(), StoreError> {
        match &token {
            Some(t) => self.store.config_set(TOKEN_KEY, t)?,
            None => self.store.config_remove(TOKEN_KEY)?,
        }
        *self.token.lock().unwrap() = token;
        Ok(())
    }

    /// Drop the session (token and wallet selection). Event data stays.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.set_token(None)?;
        self.set_current_wallet(None)
    }

    /// Username claim from the bearer token, if any. Decoded locally for
    /// display; the signature is not verified here.
    pub fn username(&self) -> Option<String> {
        self.token().as_deref().and_then(jwt_payload)?.username
    }

    /// True when the token is missing, unparseable, or past its `exp` claim.
    /// Used to avoid reconnect storms against an endpoint that will 401.
    pub fn is_token_expired(&self) -> bool {
        match self.token() {
            Some(t) if !t.is_empty() => jwt_payload(&t).map_or(true, |p| p.expired),
            _ => true,
        }
    }

    // --- Host UI preferences, namespaced inside the config area ---

    pub fn preference(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.store.config_get(&format!("{PREF_PREFIX}{key}"))
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.store.config_set(&format!("{PREF_PREFIX}{key}"), value)
    }
}

#[derive(Default)]
struct JwtPayload {
    username: Option<String>,
    expired: bool,
}

fn jwt_payload(token: &str) -> Option<JwtPayload> {
    let parts: Vec<&str> = token.splitn(3, '.').collect();
    if parts.len() != 3 {
        return None;
    }
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].as_bytes())
        .ok()?;
    let json: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let obj = json.as_object()?;
    let username = obj
        .get("username")
        .and_then(|v| v.as_str())
        .map(String::from);
    let expired = obj
        .get("exp")
        .and_then(|v| v.as_i64())
        .map_or(true, |exp_sec| chrono::Utc::now().timestamp() >= exp_sec);
    Some(JwtPayload { username, expired })
}
