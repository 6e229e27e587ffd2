use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use apimigrate_core::records::{
    LEGACY_TOKEN_COLUMNS, LEGACY_USER_COLUMNS, LegacyToken, LegacyUser, SqlValue,
    USER_STATUS_DELETED,
};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use tracing::info;

/// Token columns that older One API schemas may lack, with the expression
/// projected in their place.
const TOKEN_FALLBACKS: &[(&str, &str)] = &[("models", "NULL"), ("subnet", "NULL")];

const USER_FALLBACKS: &[(&str, &str)] = &[
    ("lark_id", "NULL"),
    ("group_name", "'default'"),
    ("inviter_id", "NULL"),
];

pub fn read_tokens(path: impl AsRef<Path>) -> anyhow::Result<Vec<LegacyToken>> {
    let path = path.as_ref();
    info!(path = %path.display(), "reading tokens from SQLite");
    let conn = open_read_only(path)?;

    let query = format!(
        "SELECT {} FROM tokens",
        projection(&conn, "tokens", &LEGACY_TOKEN_COLUMNS, TOKEN_FALLBACKS)?
    );
    let tokens = query_rows(&conn, &query)
        .context("failed to read tokens table")?
        .iter()
        .map(|row| LegacyToken::from_values(row))
        .collect::<Vec<_>>();

    info!(count = tokens.len(), "read tokens from SQLite");
    Ok(tokens)
}

/// Read every user that is not soft-deleted (status 3).
///
/// The filter is `status IS NOT 3`, so users whose status is NULL are still
/// read. A plain `status != 3` would drop them under SQL NULL comparison.
pub fn read_users(path: impl AsRef<Path>) -> anyhow::Result<Vec<LegacyUser>> {
    let path = path.as_ref();
    info!(path = %path.display(), "reading users from SQLite");
    let conn = open_read_only(path)?;

    let query = format!(
        "SELECT {} FROM users WHERE status IS NOT {USER_STATUS_DELETED}",
        projection(&conn, "users", &LEGACY_USER_COLUMNS, USER_FALLBACKS)?
    );
    let users = query_rows(&conn, &query)
        .context("failed to read users table")?
        .iter()
        .map(|row| LegacyUser::from_values(row))
        .collect::<Vec<_>>();

    info!(count = users.len(), "read users from SQLite");
    Ok(users)
}

fn open_read_only(path: &Path) -> anyhow::Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open sqlite database: {}", path.display()))
}

/// Build the select list for `columns`, substituting the fallback expression
/// for any optional column the table does not have.
fn projection(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    fallbacks: &[(&str, &str)],
) -> anyhow::Result<String> {
    let present = table_columns(conn, table)?;
    let select = columns
        .iter()
        .map(|&col| {
            let fallback = fallbacks.iter().find(|(name, _)| *name == col);
            match fallback {
                Some((_, expr)) if !present.contains(col) => format!("{expr} AS \"{col}\""),
                _ => format!("\"{col}\""),
            }
        })
        .collect::<Vec<_>>();
    Ok(select.join(", "))
}

fn table_columns(conn: &Connection, table: &str) -> anyhow::Result<HashSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{table}\")"))
        .with_context(|| format!("failed to inspect table `{table}`"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("failed to inspect table `{table}`"))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(columns)
}

fn query_rows(conn: &Connection, query: &str) -> anyhow::Result<Vec<Vec<SqlValue>>> {
    let mut stmt = conn.prepare(query)?;
    let width = stmt.column_count();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|idx| row.get::<_, Value>(idx).map(sql_value))
                .collect::<Result<Vec<_>, _>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn sql_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Int(i),
        Value::Real(f) => SqlValue::Float(f),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(b) => SqlValue::Text(String::from_utf8_lossy(&b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed(sql: &str) -> (TempDir, std::path::PathBuf) {
        let tmp = TempDir::new().expect("create tempdir");
        let db_path = tmp.path().join("one-api.db");
        let conn = Connection::open(&db_path).expect("open sqlite");
        conn.execute_batch(sql).expect("seed tables");
        drop(conn);
        (tmp, db_path)
    }

    #[test]
    fn soft_deleted_users_are_not_read() {
        let (_tmp, db_path) = seed(
            "\
            CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, password TEXT,
              display_name TEXT, role INTEGER, status INTEGER, email TEXT, github_id TEXT,
              wechat_id TEXT, lark_id TEXT, oidc_id TEXT, access_token TEXT, quota INTEGER,
              used_quota INTEGER, request_count INTEGER, group_name TEXT, aff_code TEXT,
              inviter_id INTEGER);
            INSERT INTO users (id, username, status, group_name) VALUES (1, 'alice', 1, 'vip');
            INSERT INTO users (id, username, status) VALUES (2, 'mallory', 3);
            INSERT INTO users (id, username, status) VALUES (3, 'carol', NULL);
            ",
        );

        let users = read_users(&db_path).expect("read users");
        let names: Vec<_> = users.iter().filter_map(|u| u.username.as_deref()).collect();
        assert_eq!(names, vec!["alice", "carol"]);
        assert_eq!(users[0].group_name.as_deref(), Some("vip"));
    }

    #[test]
    fn older_user_schema_gets_fallback_columns() {
        let (_tmp, db_path) = seed(
            "\
            CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, password TEXT,
              display_name TEXT, role INTEGER, status INTEGER, email TEXT, github_id TEXT,
              wechat_id TEXT, oidc_id TEXT, access_token TEXT, quota INTEGER,
              used_quota INTEGER, request_count INTEGER, aff_code TEXT);
            INSERT INTO users (id, username, status, quota) VALUES (1, 'alice', 1, 100);
            ",
        );

        let users = read_users(&db_path).expect("read users");
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].group_name.as_deref(), Some("default"));
        assert!(users[0].lark_id.is_none());
        assert!(users[0].inviter_id.is_none());
        assert_eq!(users[0].quota, Some(100));
    }

    #[test]
    fn tokens_are_read_in_column_order() {
        let (_tmp, db_path) = seed(
            "\
            CREATE TABLE tokens (id INTEGER PRIMARY KEY, user_id INTEGER, key TEXT,
              status INTEGER, name TEXT, created_time INTEGER, accessed_time INTEGER,
              expired_time INTEGER, remain_quota INTEGER, unlimited_quota NUMERIC,
              used_quota INTEGER, models TEXT, subnet TEXT);
            INSERT INTO tokens VALUES (1, 7, 'sk-abc', 1, 'main', 10, 20, -1, 500, 1, 3, 'gpt-4', '');
            ",
        );

        let tokens = read_tokens(&db_path).expect("read tokens");
        assert_eq!(tokens.len(), 1);
        let token = &tokens[0];
        assert_eq!(token.user_id, Some(7));
        assert_eq!(token.key.as_deref(), Some("sk-abc"));
        assert_eq!(token.expired_time, Some(-1));
        assert_eq!(token.unlimited_quota, Some(true));
        assert_eq!(token.models.as_deref(), Some("gpt-4"));
        assert_eq!(token.subnet.as_deref(), Some(""));
    }

    #[test]
    fn missing_file_is_an_error_and_not_created() {
        let tmp = TempDir::new().expect("create tempdir");
        let db_path = tmp.path().join("absent.db");
        assert!(read_tokens(&db_path).is_err());
        assert!(!db_path.exists());
    }
}
