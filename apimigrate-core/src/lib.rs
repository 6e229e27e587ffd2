pub mod backup;
pub mod config;
pub mod migrate;
pub mod persistence;
pub mod records;
pub mod transform;

pub use backup::{BackupMethod, BackupOutcome, TokenSnapshot, create_backup};
pub use config::{BackupConfig, MigrateConfig, ResolvedTarget, TargetConfig, load_config};
pub use migrate::{MigrationStats, TargetStore, migrate_tokens, migrate_users};
pub use persistence::PgTarget;
pub use records::{LegacyToken, LegacyUser, NewToken, NewUser, SqlValue};
