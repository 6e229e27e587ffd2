//! One API SQL dump reader.
//!
//! Only `tokens` INSERT statements are understood. Each statement may carry
//! several value tuples; tuples are decoded positionally in the legacy column
//! order.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context;
use apimigrate_core::records::{LEGACY_TOKEN_COLUMNS, LegacyToken, SqlValue};
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

/// Matches the head of an INSERT into `tokens`, up to and including `VALUES`.
static TOKEN_INSERT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*INSERT\s+(?:OR\s+\w+\s+)?INTO\s+(?:[`"\[]?\w+[`"\]]?\s*\.\s*)?[`"\[]?tokens[`"\]]?\s*(?:\([^)]*\)\s*)?VALUES\s*"#,
    )
    .expect("token insert pattern is valid")
});

/// Why a value tuple was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TupleError {
    #[error("insufficient fields in token data: {found} found, {required} required")]
    InsufficientFields { found: usize, required: usize },
    #[error("unterminated value tuple: {0}")]
    Unterminated(String),
}

pub fn read_dump_tokens(path: impl AsRef<Path>) -> anyhow::Result<Vec<LegacyToken>> {
    let path = path.as_ref();
    info!(path = %path.display(), "parsing SQL dump");
    let raw = fs::read(path)
        .with_context(|| format!("failed to read SQL file: {}", path.display()))?;
    let tokens = parse_dump(&String::from_utf8_lossy(&raw));
    info!(count = tokens.len(), "total tokens extracted");
    Ok(tokens)
}

/// Extract every legacy token from the INSERT statements in `sql`.
pub fn parse_dump(sql: &str) -> Vec<LegacyToken> {
    let mut tokens = Vec::new();
    for statement in split_statements(sql) {
        let Some(values) = token_insert_values(&statement) else {
            continue;
        };

        let before = tokens.len();
        for fields in parse_values(values) {
            match token_from_fields(&fields) {
                Ok(token) => tokens.push(token),
                Err(err) => warn!(err = %err, "dropping token tuple"),
            }
        }
        info!(count = tokens.len() - before, "tokens found in INSERT statement");
    }
    tokens
}

/// Split a script into statements on `;` outside quoted text. Comments
/// outside quotes are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if let Some(q) = quote {
            current.push(c);
            if c == q {
                if next == Some(q) {
                    current.push(q);
                    i += 1;
                } else {
                    quote = None;
                }
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                continue;
            }
            ';' => {
                push_statement(&mut statements, &mut current);
            }
            _ => current.push(c),
        }
        i += 1;
    }
    push_statement(&mut statements, &mut current);

    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

/// The text after `VALUES` when `statement` inserts into `tokens`.
pub fn token_insert_values(statement: &str) -> Option<&str> {
    TOKEN_INSERT
        .find(statement)
        .map(|m| &statement[m.end()..])
}

/// Split the text after `VALUES` into tuples of raw field text.
///
/// Quotes toggle literal mode and a doubled quote inside a literal is an
/// escaped quote. Commas and parentheses only count outside literals.
pub fn parse_values(values: &str) -> Vec<Vec<String>> {
    let chars: Vec<char> = values.chars().collect();
    let mut tuples = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0_usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            if depth > 0 {
                current.push(c);
            }
            if c == q {
                if chars.get(i + 1) == Some(&q) {
                    if depth > 0 {
                        current.push(q);
                    }
                    i += 1;
                } else {
                    quote = None;
                }
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                if depth > 0 {
                    current.push(c);
                }
            }
            '(' => {
                if depth == 0 {
                    fields.clear();
                    current.clear();
                } else {
                    current.push(c);
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let last = current.trim();
                    if !last.is_empty() {
                        fields.push(last.to_string());
                    }
                    current.clear();
                    tuples.push(std::mem::take(&mut fields));
                } else {
                    current.push(c);
                }
            }
            ',' if depth == 1 => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ if depth > 0 => current.push(c),
            _ => {}
        }
        i += 1;
    }

    if depth > 0 {
        let err = TupleError::Unterminated(truncate(&current, 40));
        warn!(err = %err, "dropping token tuple");
    }

    tuples
}

/// Decode one raw tuple into a legacy token.
pub fn token_from_fields(fields: &[String]) -> Result<LegacyToken, TupleError> {
    if fields.len() < LEGACY_TOKEN_COLUMNS.len() {
        return Err(TupleError::InsufficientFields {
            found: fields.len(),
            required: LEGACY_TOKEN_COLUMNS.len(),
        });
    }
    let values = fields.iter().map(|f| clean_value(f)).collect::<Vec<_>>();
    Ok(LegacyToken::from_values(&values))
}

/// Convert one raw SQL literal into a value.
///
/// Only plain literals are understood. Expressions such as the
/// `replace('a\nb','\n',char(10))` that `sqlite3 .dump` writes for strings
/// containing newlines are kept verbatim as text.
pub fn clean_value(raw: &str) -> SqlValue {
    let val = raw.trim();
    if val.eq_ignore_ascii_case("null") {
        return SqlValue::Null;
    }
    for q in ['\'', '"'] {
        if val.len() >= 2 && val.starts_with(q) && val.ends_with(q) {
            let doubled = format!("{q}{q}");
            return SqlValue::Text(val[1..val.len() - 1].replace(&doubled, &q.to_string()));
        }
    }
    if val.eq_ignore_ascii_case("true") {
        return SqlValue::Bool(true);
    }
    if val.eq_ignore_ascii_case("false") {
        return SqlValue::Bool(false);
    }

    let numeric = !val.is_empty()
        && val
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if numeric {
        if !val.contains('.') {
            if let Ok(i) = val.parse::<i64>() {
                return SqlValue::Int(i);
            }
        }
        if let Ok(f) = val.parse::<f64>() {
            return SqlValue::Float(f);
        }
    }

    SqlValue::Text(val.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_ROW: &str = "(1, 1, 'sk-abc', 1, 'main', 1700000000, 1700000100, -1, 5000, 0, 12, 'gpt-4,gpt-3.5', NULL)";

    #[test]
    fn escaped_quote_and_comma_stay_in_one_field() {
        let tuples = parse_values(
            "(1, 2, 'sk-x', 1, 'O''Brien, team', 0, 0, -1, 0, false, 0, NULL, NULL)",
        );
        assert_eq!(tuples.len(), 1);
        let token = token_from_fields(&tuples[0]).expect("13 fields");
        assert_eq!(token.name.as_deref(), Some("O'Brien, team"));
        assert_eq!(token.key.as_deref(), Some("sk-x"));
    }

    #[test]
    fn double_quoted_literals_unescape_doubled_quotes() {
        assert_eq!(
            clean_value(r#""say ""hi""""#),
            SqlValue::Text(r#"say "hi""#.to_string())
        );
    }

    #[test]
    fn parentheses_inside_literals_do_not_close_tuples() {
        let tuples = parse_values("(1, 'a (b), c', 3), (4, ')', 6)");
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0], vec!["1", "'a (b), c'", "3"]);
        assert_eq!(tuples[1], vec!["4", "')'", "6"]);
    }

    #[test]
    fn sqlite_replace_expression_is_kept_verbatim() {
        let tuples = parse_values(r"(1, replace('a\nb','\n',char(10)), 3)");
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].len(), 3);
        assert_eq!(
            clean_value(&tuples[0][1]),
            SqlValue::Text(r"replace('a\nb','\n',char(10))".to_string())
        );
    }

    #[test]
    fn ten_field_tuple_is_discarded() {
        let sql = "INSERT INTO tokens VALUES (1, 1, 'sk-short', 1, 'x', 0, 0, -1, 0, 0);";
        assert!(parse_dump(sql).is_empty());

        let tuples = parse_values("(1, 1, 'sk-short', 1, 'x', 0, 0, -1, 0, 0)");
        assert_eq!(
            token_from_fields(&tuples[0]),
            Err(TupleError::InsufficientFields {
                found: 10,
                required: 13
            })
        );
    }

    #[test]
    fn clean_value_coerces_literals() {
        assert_eq!(clean_value("NULL"), SqlValue::Null);
        assert_eq!(clean_value("null"), SqlValue::Null);
        assert_eq!(clean_value("TRUE"), SqlValue::Bool(true));
        assert_eq!(clean_value("False"), SqlValue::Bool(false));
        assert_eq!(clean_value("-1"), SqlValue::Int(-1));
        assert_eq!(clean_value("12.5"), SqlValue::Float(12.5));
        assert_eq!(clean_value("1e3"), SqlValue::Float(1000.0));
        assert_eq!(clean_value("'42'"), SqlValue::Text("42".to_string()));
        assert_eq!(clean_value("inf"), SqlValue::Text("inf".to_string()));
        assert_eq!(clean_value("X'00'"), SqlValue::Text("X'00'".to_string()));
    }

    #[test]
    fn multi_row_insert_yields_every_tuple() {
        let sql = format!(
            "INSERT INTO `tokens` (`id`,`user_id`) VALUES {TOKEN_ROW},\n{};",
            TOKEN_ROW.replace("sk-abc", "sk-def")
        );
        let tokens = parse_dump(&sql);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].key.as_deref(), Some("sk-abc"));
        assert_eq!(tokens[1].key.as_deref(), Some("sk-def"));
        assert_eq!(tokens[0].expired_time, Some(-1));
        assert_eq!(tokens[0].unlimited_quota, Some(false));
        assert_eq!(tokens[0].models.as_deref(), Some("gpt-4,gpt-3.5"));
        assert!(tokens[0].subnet.is_none());
    }

    #[test]
    fn only_token_inserts_are_read() {
        let sql = format!(
            "PRAGMA foreign_keys=OFF;\n\
             BEGIN TRANSACTION;\n\
             CREATE TABLE tokens (id integer);\n\
             INSERT INTO users VALUES (1, 'alice', 'tokens');\n\
             INSERT INTO \"tokens\" VALUES{TOKEN_ROW};\n\
             INSERT INTO tokens_archive VALUES {TOKEN_ROW};\n\
             COMMIT;"
        );
        let tokens = parse_dump(&sql);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].name.as_deref(), Some("main"));
    }

    #[test]
    fn semicolons_in_literals_and_comments_do_not_split() {
        let sql = "-- dump; header\n/* block; comment */\nINSERT INTO t VALUES ('a;b');\nSELECT 1;";
        let statements = split_statements(sql);
        assert_eq!(statements, vec!["INSERT INTO t VALUES ('a;b')", "SELECT 1"]);
    }

    #[test]
    fn insert_header_match_is_case_insensitive() {
        assert_eq!(
            token_insert_values("insert into main.tokens values (1)"),
            Some("(1)")
        );
        assert_eq!(
            token_insert_values("INSERT OR REPLACE INTO [tokens] VALUES(2)"),
            Some("(2)")
        );
        assert!(token_insert_values("INSERT INTO users VALUES (1)").is_none());
    }

    #[test]
    fn unterminated_tuple_is_dropped() {
        let tuples = parse_values("(1, 2, 3), (4, 'open");
        assert_eq!(tuples, vec![vec!["1", "2", "3"]]);
    }

    #[test]
    fn read_dump_tokens_reports_missing_file() {
        let err = read_dump_tokens("/nonexistent/oneapi.sql").expect_err("missing file");
        assert!(err.to_string().contains("failed to read SQL file"));
    }
}
