//! Dedup-check and write stages.
//!
//! Each stage takes one snapshot of the keys already present in the target,
//! then converts and inserts the source records in order. Per-record
//! failures are logged and counted; they never abort the stage.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::records::{LegacyToken, LegacyUser, NewToken, NewUser};
use crate::transform::{convert_token, convert_user};

/// Write side of a migration run.
#[allow(async_fn_in_trait)]
pub trait TargetStore {
    /// Keys of tokens that are not soft-deleted.
    async fn existing_token_keys(&self) -> anyhow::Result<HashSet<String>>;
    async fn existing_usernames(&self) -> anyhow::Result<HashSet<String>>;
    async fn insert_token(&self, token: &NewToken) -> anyhow::Result<()>;
    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<()>;
}

/// Outcome counts for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStats {
    pub migrated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl MigrationStats {
    pub fn total(&self) -> u64 {
        self.migrated + self.skipped + self.failed
    }
}

pub async fn migrate_users<T: TargetStore>(target: &T, users: &[LegacyUser]) -> MigrationStats {
    let mut stats = MigrationStats::default();
    if users.is_empty() {
        info!("no users found in source database");
        return stats;
    }

    let existing = match target.existing_usernames().await {
        Ok(set) => {
            info!(count = set.len(), "existing users in New API database");
            set
        }
        Err(err) => {
            warn!(err = %err, "could not check existing users");
            HashSet::new()
        }
    };

    for user in users {
        let Some(username) = user.username.as_deref().filter(|u| !u.is_empty()) else {
            warn!(id = ?user.id, "skipping user: no username found");
            stats.failed += 1;
            continue;
        };

        if existing.contains(username) {
            info!(username, "skipping existing user");
            stats.skipped += 1;
            continue;
        }

        match target.insert_user(&convert_user(user)).await {
            Ok(()) => {
                info!(username, "migrated user");
                stats.migrated += 1;
            }
            Err(err) => {
                error!(username, err = %format!("{err:#}"), "error inserting user");
                stats.failed += 1;
            }
        }
    }

    info!(
        total = stats.total(),
        migrated = stats.migrated,
        skipped = stats.skipped,
        failed = stats.failed,
        "user stage finished"
    );
    stats
}

pub async fn migrate_tokens<T: TargetStore>(target: &T, tokens: &[LegacyToken]) -> MigrationStats {
    let mut stats = MigrationStats::default();
    if tokens.is_empty() {
        info!("no tokens found in source");
        return stats;
    }

    let existing = match target.existing_token_keys().await {
        Ok(set) => {
            info!(count = set.len(), "existing tokens in New API database");
            set
        }
        Err(err) => {
            warn!(err = %err, "could not check existing tokens");
            HashSet::new()
        }
    };

    for token in tokens {
        let name = token.display_name();
        let Some(key) = token.key.as_deref().filter(|k| !k.is_empty()) else {
            warn!(name, "skipping token: no key found");
            stats.failed += 1;
            continue;
        };

        if existing.contains(key) {
            info!(name, "skipping existing token");
            stats.skipped += 1;
            continue;
        }

        match target.insert_token(&convert_token(token)).await {
            Ok(()) => {
                info!(name, "migrated token");
                stats.migrated += 1;
            }
            Err(err) => {
                error!(name, err = %format!("{err:#}"), "error inserting token");
                stats.failed += 1;
            }
        }
    }

    info!(
        total = stats.total(),
        migrated = stats.migrated,
        skipped = stats.skipped,
        failed = stats.failed,
        "token stage finished"
    );
    stats
}
