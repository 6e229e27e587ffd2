use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Loosely-typed literal values shared by both legacy sources
// ---------------------------------------------------------------------------

/// A single column value as read from a legacy source, before it is decoded
/// into a typed record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::Int(i) => Some(*i),
            SqlValue::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            SqlValue::Float(_) => None,
            SqlValue::Text(s) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(i) => Some(i),
                    Err(_) => s.parse::<f64>().ok().and_then(|f| SqlValue::Float(f).as_i64()),
                }
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Int(i) => Some(*i != 0),
            SqlValue::Float(f) => Some(*f != 0.0),
            SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Some(true),
                "false" | "f" | "0" | "no" | "" => Some(false),
                _ => None,
            },
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
        }
    }

    /// Render as a literal that a SQL client can replay.
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "true".to_string(),
            SqlValue::Bool(false) => "false".to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(value: Option<i64>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Int)
    }
}

impl From<Option<bool>> for SqlValue {
    fn from(value: Option<bool>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Bool)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Text)
    }
}

// ---------------------------------------------------------------------------
// Legacy (One API) records
// ---------------------------------------------------------------------------

/// Positional column order of a legacy token row, shared by the SQLite
/// projection and the dump tuple layout.
pub const LEGACY_TOKEN_COLUMNS: [&str; 13] = [
    "id",
    "user_id",
    "key",
    "status",
    "name",
    "created_time",
    "accessed_time",
    "expired_time",
    "remain_quota",
    "unlimited_quota",
    "used_quota",
    "models",
    "subnet",
];

/// Positional column order of a legacy user row.
pub const LEGACY_USER_COLUMNS: [&str; 18] = [
    "id",
    "username",
    "password",
    "display_name",
    "role",
    "status",
    "email",
    "github_id",
    "wechat_id",
    "lark_id",
    "oidc_id",
    "access_token",
    "quota",
    "used_quota",
    "request_count",
    "group_name",
    "aff_code",
    "inviter_id",
];

/// Legacy users with this status are soft-deleted and never migrated.
pub const USER_STATUS_DELETED: i64 = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyToken {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub key: Option<String>,
    pub status: Option<i64>,
    pub name: Option<String>,
    pub created_time: Option<i64>,
    pub accessed_time: Option<i64>,
    pub expired_time: Option<i64>,
    pub remain_quota: Option<i64>,
    pub unlimited_quota: Option<bool>,
    pub used_quota: Option<i64>,
    pub models: Option<String>,
    pub subnet: Option<String>,
}

impl LegacyToken {
    /// Decode a row laid out as [`LEGACY_TOKEN_COLUMNS`]. Missing trailing
    /// values decode as null.
    pub fn from_values(values: &[SqlValue]) -> Self {
        let at = |idx: usize| values.get(idx).unwrap_or(&SqlValue::Null);
        Self {
            id: at(0).as_i64(),
            user_id: at(1).as_i64(),
            key: at(2).as_text(),
            status: at(3).as_i64(),
            name: at(4).as_text(),
            created_time: at(5).as_i64(),
            accessed_time: at(6).as_i64(),
            expired_time: at(7).as_i64(),
            remain_quota: at(8).as_i64(),
            unlimited_quota: at(9).as_bool(),
            used_quota: at(10).as_i64(),
            models: at(11).as_text(),
            subnet: at(12).as_text(),
        }
    }

    /// Name used in log lines for this token.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyUser {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<i64>,
    pub status: Option<i64>,
    pub email: Option<String>,
    pub github_id: Option<String>,
    pub wechat_id: Option<String>,
    pub lark_id: Option<String>,
    pub oidc_id: Option<String>,
    pub access_token: Option<String>,
    pub quota: Option<i64>,
    pub used_quota: Option<i64>,
    pub request_count: Option<i64>,
    pub group_name: Option<String>,
    pub aff_code: Option<String>,
    pub inviter_id: Option<i64>,
}

impl LegacyUser {
    /// Decode a row laid out as [`LEGACY_USER_COLUMNS`].
    pub fn from_values(values: &[SqlValue]) -> Self {
        let at = |idx: usize| values.get(idx).unwrap_or(&SqlValue::Null);
        Self {
            id: at(0).as_i64(),
            username: at(1).as_text(),
            password: at(2).as_text(),
            display_name: at(3).as_text(),
            role: at(4).as_i64(),
            status: at(5).as_i64(),
            email: at(6).as_text(),
            github_id: at(7).as_text(),
            wechat_id: at(8).as_text(),
            lark_id: at(9).as_text(),
            oidc_id: at(10).as_text(),
            access_token: at(11).as_text(),
            quota: at(12).as_i64(),
            used_quota: at(13).as_i64(),
            request_count: at(14).as_i64(),
            group_name: at(15).as_text(),
            aff_code: at(16).as_text(),
            inviter_id: at(17).as_i64(),
        }
    }
}

// ---------------------------------------------------------------------------
// Target (New API) records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewToken {
    pub user_id: Option<i64>,
    pub key: String,
    pub status: i64,
    pub name: String,
    pub created_time: i64,
    pub accessed_time: i64,
    pub expired_time: i64,
    pub remain_quota: i64,
    pub unlimited_quota: bool,
    pub model_limits_enabled: bool,
    pub model_limits: String,
    pub allow_ips: Option<String>,
    pub used_quota: i64,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: Option<String>,
    pub display_name: String,
    pub role: i64,
    pub status: i64,
    pub email: String,
    pub github_id: String,
    pub oidc_id: String,
    pub wechat_id: String,
    pub telegram_id: String,
    pub access_token: Option<String>,
    pub quota: i64,
    pub used_quota: i64,
    pub request_count: i64,
    pub group: String,
    pub aff_code: String,
    pub aff_count: i64,
}
