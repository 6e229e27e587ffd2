//! Readers for One API data: a live SQLite database or a SQL dump.

pub mod dump;
pub mod sqlite;

use std::path::{Path, PathBuf};

use apimigrate_core::{LegacyToken, LegacyUser};
use tracing::error;

pub use dump::{TupleError, clean_value, parse_dump, parse_values, read_dump_tokens};
pub use sqlite::{read_tokens, read_users};

/// Where legacy records come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacySource {
    Sqlite(PathBuf),
    SqlDump(PathBuf),
}

impl LegacySource {
    pub fn path(&self) -> &Path {
        match self {
            LegacySource::Sqlite(path) | LegacySource::SqlDump(path) => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LegacySource::Sqlite(_) => "sqlite",
            LegacySource::SqlDump(_) => "sql",
        }
    }

    /// Dumps carry only the tokens table.
    pub fn has_users(&self) -> bool {
        matches!(self, LegacySource::Sqlite(_))
    }

    /// Read all tokens. A read failure is logged and treated as an empty
    /// source.
    pub fn tokens(&self) -> Vec<LegacyToken> {
        let result = match self {
            LegacySource::Sqlite(path) => read_tokens(path),
            LegacySource::SqlDump(path) => read_dump_tokens(path),
        };
        result.unwrap_or_else(|err| {
            error!(source = self.kind(), err = %format!("{err:#}"), "failed to read tokens");
            Vec::new()
        })
    }

    /// Read all users that are not soft-deleted. Dumps yield none.
    pub fn users(&self) -> Vec<LegacyUser> {
        match self {
            LegacySource::Sqlite(path) => read_users(path).unwrap_or_else(|err| {
                error!(source = self.kind(), err = %format!("{err:#}"), "failed to read users");
                Vec::new()
            }),
            LegacySource::SqlDump(_) => Vec::new(),
        }
    }
}
