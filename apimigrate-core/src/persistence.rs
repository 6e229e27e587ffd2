use std::collections::HashSet;

use anyhow::Context;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use crate::backup::TokenSnapshot;
use crate::config::ResolvedTarget;
use crate::migrate::TargetStore;
use crate::records::{NewToken, NewUser, SqlValue};

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

const EXISTING_TOKEN_KEYS: &str = "SELECT key::text FROM tokens WHERE deleted_at IS NULL";

const EXISTING_USERNAMES: &str = "SELECT username::text FROM users";

const INSERT_TOKEN: &str = "\
    INSERT INTO tokens (
      user_id, key, status, name, created_time, accessed_time,
      expired_time, remain_quota, unlimited_quota, model_limits_enabled,
      model_limits, allow_ips, used_quota, \"group\"
    ) VALUES (
      $1::bigint, $2::text, $3::bigint, $4::text, $5::bigint, $6::bigint,
      $7::bigint, $8::bigint, $9::boolean, $10::boolean,
      $11::text, $12::text, $13::bigint, $14::text
    )";

const INSERT_USER: &str = "\
    INSERT INTO users (
      username, password, display_name, role, status, email,
      github_id, oidc_id, wechat_id, telegram_id, access_token,
      quota, used_quota, request_count, \"group\", aff_code, aff_count
    ) VALUES (
      $1::text, $2::text, $3::text, $4::bigint, $5::bigint, $6::text,
      $7::text, $8::text, $9::text, $10::text, $11::text,
      $12::bigint, $13::bigint, $14::bigint, $15::text, $16::text, $17::bigint
    )";

const TOKEN_COLUMNS_CATALOG: &str = "\
    SELECT column_name::text, data_type::text, is_nullable::text, column_default::text
    FROM information_schema.columns
    WHERE table_name = 'tokens'
    ORDER BY ordinal_position";

/// Columns captured by the manual backup, in output order.
pub const BACKUP_TOKEN_COLUMNS: [&str; 14] = [
    "user_id",
    "key",
    "status",
    "name",
    "created_time",
    "accessed_time",
    "expired_time",
    "remain_quota",
    "unlimited_quota",
    "model_limits_enabled",
    "model_limits",
    "allow_ips",
    "used_quota",
    "group",
];

const SELECT_BACKUP_TOKENS: &str = "\
    SELECT user_id::bigint, key::text, status::bigint, name::text,
           created_time::bigint, accessed_time::bigint, expired_time::bigint,
           remain_quota::bigint, unlimited_quota::boolean, model_limits_enabled::boolean,
           model_limits::text, allow_ips::text, used_quota::bigint, \"group\"::text
    FROM tokens";

/// One row of `information_schema.columns` for a target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

// ---------------------------------------------------------------------------
// Target connection
// ---------------------------------------------------------------------------

/// The single New API Postgres connection used for a migration run.
///
/// Statements are issued one at a time outside any explicit transaction, so
/// each insert commits as soon as it succeeds. Dropping the target closes
/// the connection.
pub struct PgTarget {
    client: Client,
    database: String,
}

impl PgTarget {
    pub async fn connect(target: &ResolvedTarget) -> anyhow::Result<Self> {
        let (client, connection) = target
            .pg_config()
            .connect(NoTls)
            .await
            .with_context(|| {
                format!(
                    "failed to connect to postgres at {}:{}/{}",
                    target.host, target.port, target.database
                )
            })?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(err = %err, "postgres connection error");
            }
        });
        info!(database = %target.database, "connected to New API database");
        Ok(Self {
            client,
            database: target.database.clone(),
        })
    }

    async fn key_set(&self, query: &str, what: &'static str) -> anyhow::Result<HashSet<String>> {
        let rows = self.client.query(query, &[]).await.context(what)?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get::<_, Option<String>>(0))
            .collect())
    }
}

impl TokenSnapshot for PgTarget {
    fn database(&self) -> &str {
        &self.database
    }

    /// Column definitions of the target `tokens` table, in ordinal order.
    async fn token_columns(&self) -> anyhow::Result<Vec<ColumnInfo>> {
        let rows = self
            .client
            .query(TOKEN_COLUMNS_CATALOG, &[])
            .await
            .context("token_columns")?;
        Ok(rows
            .iter()
            .map(|r| ColumnInfo {
                name: r.get(0),
                data_type: r.get(1),
                nullable: r.get::<_, Option<String>>(2).as_deref() != Some("NO"),
                default: r.get(3),
            })
            .collect())
    }

    /// All current token rows laid out as [`BACKUP_TOKEN_COLUMNS`].
    async fn token_rows(&self) -> anyhow::Result<Vec<Vec<SqlValue>>> {
        let rows = self
            .client
            .query(SELECT_BACKUP_TOKENS, &[])
            .await
            .context("token_rows")?;
        Ok(rows
            .iter()
            .map(|r| {
                vec![
                    SqlValue::from(r.get::<_, Option<i64>>(0)),
                    SqlValue::from(r.get::<_, Option<String>>(1)),
                    SqlValue::from(r.get::<_, Option<i64>>(2)),
                    SqlValue::from(r.get::<_, Option<String>>(3)),
                    SqlValue::from(r.get::<_, Option<i64>>(4)),
                    SqlValue::from(r.get::<_, Option<i64>>(5)),
                    SqlValue::from(r.get::<_, Option<i64>>(6)),
                    SqlValue::from(r.get::<_, Option<i64>>(7)),
                    SqlValue::from(r.get::<_, Option<bool>>(8)),
                    SqlValue::from(r.get::<_, Option<bool>>(9)),
                    SqlValue::from(r.get::<_, Option<String>>(10)),
                    SqlValue::from(r.get::<_, Option<String>>(11)),
                    SqlValue::from(r.get::<_, Option<i64>>(12)),
                    SqlValue::from(r.get::<_, Option<String>>(13)),
                ]
            })
            .collect())
    }
}

impl TargetStore for PgTarget {
    async fn existing_token_keys(&self) -> anyhow::Result<HashSet<String>> {
        self.key_set(EXISTING_TOKEN_KEYS, "existing_token_keys").await
    }

    async fn existing_usernames(&self) -> anyhow::Result<HashSet<String>> {
        self.key_set(EXISTING_USERNAMES, "existing_usernames").await
    }

    async fn insert_token(&self, token: &NewToken) -> anyhow::Result<()> {
        self.client
            .execute(
                INSERT_TOKEN,
                &[
                    &token.user_id,
                    &token.key,
                    &token.status,
                    &token.name,
                    &token.created_time,
                    &token.accessed_time,
                    &token.expired_time,
                    &token.remain_quota,
                    &token.unlimited_quota,
                    &token.model_limits_enabled,
                    &token.model_limits,
                    &token.allow_ips,
                    &token.used_quota,
                    &token.group,
                ],
            )
            .await
            .context("insert_token")?;
        Ok(())
    }

    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<()> {
        self.client
            .execute(
                INSERT_USER,
                &[
                    &user.username,
                    &user.password,
                    &user.display_name,
                    &user.role,
                    &user.status,
                    &user.email,
                    &user.github_id,
                    &user.oidc_id,
                    &user.wechat_id,
                    &user.telegram_id,
                    &user.access_token,
                    &user.quota,
                    &user.used_quota,
                    &user.request_count,
                    &user.group,
                    &user.aff_code,
                    &user.aff_count,
                ],
            )
            .await
            .context("insert_user")?;
        Ok(())
    }
}
