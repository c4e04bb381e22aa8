//! # User store
//!
//! Users, their capabilities and their live refresh-token families. The
//! gateway talks to the store through [`UserStore`] so that a database
//! backend can replace the in-memory one.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use pixur_types::CapabilitySet;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::GatewayError;

/// A user as the token endpoints see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Numeric id; its varint text is the token subject
    pub user_id: i64,
    /// Login name
    pub ident: String,
    /// bcrypt hash of the login secret
    pub secret_hash: String,
    /// What the user may do
    #[serde(default)]
    pub capabilities: CapabilitySet,
}

impl UserRecord {
    /// Whether `secret` matches the stored hash. Deliberately slow; call it
    /// off the async executor.
    pub fn secret_matches(&self, secret: &str) -> bool {
        pixur_crypto::verify_secret(secret, &self.secret_hash)
    }
}

/// User and token-family persistence.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Looks a user up by login name.
    async fn find_by_ident(&self, ident: &str) -> Result<Option<UserRecord>, GatewayError>;

    /// Looks a user up by id.
    async fn find_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, GatewayError>;

    /// Starts family `new` for the user, ending family `old` if given.
    /// Returns `false`, changing nothing, when `old` is not live.
    async fn rotate_token(
        &self,
        user_id: i64,
        old: Option<i64>,
        new: i64,
    ) -> Result<bool, GatewayError>;

    /// Ends family `token_id`. Returns `false` if it was not live.
    async fn revoke_token(&self, user_id: i64, token_id: i64) -> Result<bool, GatewayError>;
}

/// Fresh refresh-token family id. Never zero, which means "unset" on the wire.
pub fn new_token_id() -> i64 {
    rand::thread_rng().gen_range(1..=i64::MAX)
}

/// Live refresh families kept per user. Starting one more ends the oldest.
pub const MAX_LIVE_FAMILIES: usize = 16;

struct StoredUser {
    record: UserRecord,
    /// Oldest first
    token_ids: VecDeque<i64>,
}

impl StoredUser {
    fn remove_family(&mut self, token_id: i64) -> bool {
        match self.token_ids.iter().position(|&id| id == token_id) {
            Some(pos) => {
                self.token_ids.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// [`UserStore`] held in memory, seeded from a JSON list of [`UserRecord`]s.
/// Token families do not survive a restart.
pub struct InMemoryUserStore {
    users: RwLock<HashMap<i64, StoredUser>>,
    family_limit: usize,
}

impl InMemoryUserStore {
    /// Store holding `records`.
    pub fn new(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let users = records
            .into_iter()
            .map(|record| {
                (
                    record.user_id,
                    StoredUser {
                        record,
                        token_ids: VecDeque::new(),
                    },
                )
            })
            .collect();
        InMemoryUserStore {
            users: RwLock::new(users),
            family_limit: MAX_LIVE_FAMILIES,
        }
    }

    /// Caps live families per user at `limit`, at least one.
    pub fn with_family_limit(mut self, limit: usize) -> Self {
        self.family_limit = limit.max(1);
        self
    }

    /// Parses a JSON array of users.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let records: Vec<UserRecord> = serde_json::from_str(json)?;
        Ok(Self::new(records))
    }

    /// Reads a JSON users file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let store = Self::from_json(&json)?;
        Ok(store)
    }
}

#[async_trait::async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_ident(&self, ident: &str) -> Result<Option<UserRecord>, GatewayError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.record.ident == ident)
            .map(|u| u.record.clone()))
    }

    async fn find_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, GatewayError> {
        let users = self.users.read().await;
        Ok(users.get(&user_id).map(|u| u.record.clone()))
    }

    async fn rotate_token(
        &self,
        user_id: i64,
        old: Option<i64>,
        new: i64,
    ) -> Result<bool, GatewayError> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(false);
        };
        if let Some(old) = old {
            if !user.remove_family(old) {
                return Ok(false);
            }
        }
        while user.token_ids.len() >= self.family_limit {
            if let Some(evicted) = user.token_ids.pop_front() {
                tracing::debug!(user_id, family = evicted, "oldest refresh family ended");
            }
        }
        user.token_ids.push_back(new);
        Ok(true)
    }

    async fn revoke_token(&self, user_id: i64, token_id: i64) -> Result<bool, GatewayError> {
        let mut users = self.users.write().await;
        Ok(users
            .get_mut(&user_id)
            .is_some_and(|u| u.remove_family(token_id)))
    }
}
