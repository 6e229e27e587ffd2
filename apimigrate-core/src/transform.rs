//! Legacy → New API record mapping.
//!
//! Both conversions are total: every null or missing legacy field is
//! replaced by the New API default rather than rejected.

use crate::records::{LegacyToken, LegacyUser, NewToken, NewUser};

/// Tokens that never expire carry this `expired_time`.
pub const NEVER_EXPIRES: i64 = -1;
pub const DEFAULT_STATUS: i64 = 1;
pub const DEFAULT_ROLE: i64 = 1;
pub const DEFAULT_USER_GROUP: &str = "default";

/// Convert a legacy token. The caller guarantees `key` is present; a missing
/// key maps to an empty string here and is rejected before insertion.
pub fn convert_token(token: &LegacyToken) -> NewToken {
    let (model_limits_enabled, model_limits) = model_limits(token.models.as_deref());

    NewToken {
        user_id: token.user_id,
        key: token.key.clone().unwrap_or_default(),
        status: token.status.unwrap_or(DEFAULT_STATUS),
        name: token.name.clone().unwrap_or_default(),
        created_time: token.created_time.unwrap_or(0),
        accessed_time: token.accessed_time.unwrap_or(0),
        expired_time: token.expired_time.unwrap_or(NEVER_EXPIRES),
        remain_quota: token.remain_quota.unwrap_or(0),
        unlimited_quota: token.unlimited_quota.unwrap_or(false),
        model_limits_enabled,
        model_limits,
        allow_ips: non_empty(token.subnet.as_deref()).map(str::to_string),
        used_quota: token.used_quota.unwrap_or(0),
        group: String::new(),
    }
}

pub fn convert_user(user: &LegacyUser) -> NewUser {
    let username = user.username.clone().unwrap_or_default();
    let display_name = non_empty(user.display_name.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| username.clone());

    NewUser {
        display_name,
        password: user.password.clone(),
        role: user.role.unwrap_or(DEFAULT_ROLE),
        status: user.status.unwrap_or(DEFAULT_STATUS),
        email: user.email.clone().unwrap_or_default(),
        github_id: user.github_id.clone().unwrap_or_default(),
        oidc_id: user.oidc_id.clone().unwrap_or_default(),
        wechat_id: user.wechat_id.clone().unwrap_or_default(),
        telegram_id: String::new(),
        access_token: user.access_token.clone(),
        quota: user.quota.unwrap_or(0),
        used_quota: user.used_quota.unwrap_or(0),
        request_count: user.request_count.unwrap_or(0),
        group: non_empty(user.group_name.as_deref())
            .unwrap_or(DEFAULT_USER_GROUP)
            .to_string(),
        aff_code: user.aff_code.clone().unwrap_or_default(),
        aff_count: 0,
        username,
    }
}

/// Turn a comma-separated model list into the `(enabled, json_array)` pair
/// stored by New API. An empty list disables model limits.
pub fn model_limits(models: Option<&str>) -> (bool, String) {
    let list: Vec<&str> = non_empty(models)
        .map(|m| {
            m.split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if list.is_empty() {
        return (false, String::new());
    }

    match serde_json::to_string(&list) {
        Ok(json) => (true, json),
        Err(_) => (false, String::new()),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
