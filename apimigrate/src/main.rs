mod prompt;
mod report;

use std::path::PathBuf;

use anyhow::{Context, bail};
use apimigrate_compat::LegacySource;
use apimigrate_core::{
    BackupOutcome, MigrateConfig, PgTarget, create_backup, load_config, migrate_tokens,
    migrate_users,
};
use clap::{ArgGroup, Parser};
use tracing::{error, info};

use crate::report::Summary;

#[derive(Parser, Debug)]
#[command(
    name = "apimigrate",
    version,
    about = "Migrate users and tokens from One API to New API PostgreSQL"
)]
#[command(group(ArgGroup::new("source").required(true).args(["sqlite_file", "sql_file"])))]
struct Cli {
    /// Path to One API SQLite database file.
    #[arg(long)]
    sqlite_file: Option<PathBuf>,
    /// Path to One API SQL export file (tokens only).
    #[arg(long)]
    sql_file: Option<PathBuf>,

    /// Migrate only users (SQLite only).
    #[arg(long, conflicts_with = "tokens_only")]
    users_only: bool,
    /// Migrate only tokens.
    #[arg(long)]
    tokens_only: bool,

    /// PostgreSQL host [default: localhost]
    #[arg(long)]
    db_host: Option<String>,
    /// PostgreSQL port [default: 5432]
    #[arg(long)]
    db_port: Option<u16>,
    /// PostgreSQL database name.
    #[arg(long)]
    db_name: Option<String>,
    /// PostgreSQL username.
    #[arg(long)]
    db_user: Option<String>,
    /// PostgreSQL password.
    #[arg(long)]
    db_password: Option<String>,

    /// Skip database backup before migration. Required for unattended runs:
    /// the prompt after a failed backup only accepts a yes from a terminal.
    #[arg(long)]
    no_backup: bool,
    /// Custom backup file path.
    #[arg(long)]
    backup_path: Option<PathBuf>,

    /// Optional TOML file with target and backup settings.
    #[arg(long, default_value = "apimigrate.toml")]
    config: PathBuf,
}

/// What a run reads and which stages it executes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MigrationPlan {
    source: LegacySource,
    users: bool,
    tokens: bool,
}

impl Cli {
    fn plan(&self) -> anyhow::Result<MigrationPlan> {
        let source = match (&self.sqlite_file, &self.sql_file) {
            (Some(path), _) => LegacySource::Sqlite(path.clone()),
            (None, Some(path)) => LegacySource::SqlDump(path.clone()),
            (None, None) => bail!("one of --sqlite-file or --sql-file is required"),
        };
        if self.users_only && !source.has_users() {
            bail!("--users-only can only be used with --sqlite-file");
        }
        Ok(MigrationPlan {
            users: source.has_users() && !self.tokens_only,
            tokens: !self.users_only,
            source,
        })
    }

    fn apply_overrides(&self, mut config: MigrateConfig) -> MigrateConfig {
        if let Some(host) = &self.db_host {
            config.target.host = host.clone();
        }
        if let Some(port) = self.db_port {
            config.target.port = port;
        }
        if let Some(name) = &self.db_name {
            config.target.database = Some(name.clone());
        }
        if let Some(user) = &self.db_user {
            config.target.user = Some(user.clone());
        }
        if let Some(password) = &self.db_password {
            config.target.password = Some(password.clone());
        }
        if self.no_backup {
            config.backup.enabled = false;
        }
        if let Some(path) = &self.backup_path {
            config.backup.path = Some(path.clone());
        }
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let plan = cli.plan()?;

    let source_path = plan.source.path();
    if !source_path.is_file() {
        bail!("source file not found: {}", source_path.display());
    }

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    let config = cli.apply_overrides(config);
    let resolved = config.target.resolve()?;

    let target = PgTarget::connect(&resolved).await?;

    let backup = if config.backup.enabled {
        info!("creating database backup before migration");
        let result = create_backup(&target, &resolved, &config.backup).await;
        backup_gate(result, prompt::confirm)?
    } else {
        None
    };

    let mut summary = Summary::new(backup, &resolved);
    if plan.users {
        info!(source = plan.source.kind(), "migrating users");
        summary.users = Some(migrate_users(&target, &plan.source.users()).await);
    }
    if plan.tokens {
        info!(source = plan.source.kind(), "migrating tokens");
        summary.tokens = Some(migrate_tokens(&target, &plan.source.tokens()).await);
    }

    println!("{summary}");
    Ok(())
}

/// Decide whether the run may write after the backup step. A failed backup
/// continues only when the operator confirms; declining aborts the run.
fn backup_gate(
    result: anyhow::Result<BackupOutcome>,
    confirm: impl FnOnce(&str) -> anyhow::Result<bool>,
) -> anyhow::Result<Option<BackupOutcome>> {
    match result {
        Ok(outcome) => {
            info!(path = %outcome.path.display(), method = ?outcome.method, "backup created");
            Ok(Some(outcome))
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "backup failed");
            if !confirm("Backup failed. Continue migration?")? {
                bail!("migration aborted: no backup was taken");
            }
            Ok(None)
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("apimigrate").chain(args.iter().copied()))
    }

    #[test]
    fn sqlite_source_migrates_both_by_default() {
        let cli = parse(&["--sqlite-file", "one-api.db", "--db-name", "newapi"]).expect("parse");
        let plan = cli.plan().expect("plan");
        assert_eq!(plan.source, LegacySource::Sqlite(PathBuf::from("one-api.db")));
        assert!(plan.users);
        assert!(plan.tokens);
    }

    #[test]
    fn scope_flags_narrow_sqlite_runs() {
        let plan = parse(&["--sqlite-file", "a.db", "--users-only"])
            .expect("parse")
            .plan()
            .expect("plan");
        assert!(plan.users && !plan.tokens);

        let plan = parse(&["--sqlite-file", "a.db", "--tokens-only"])
            .expect("parse")
            .plan()
            .expect("plan");
        assert!(!plan.users && plan.tokens);
    }

    #[test]
    fn dump_source_is_tokens_only() {
        let plan = parse(&["--sql-file", "dump.sql"]).expect("parse").plan().expect("plan");
        assert_eq!(plan.source, LegacySource::SqlDump(PathBuf::from("dump.sql")));
        assert!(!plan.users);
        assert!(plan.tokens);
    }

    #[test]
    fn users_only_with_dump_is_rejected() {
        let err = parse(&["--sql-file", "dump.sql", "--users-only"])
            .expect("parse")
            .plan()
            .expect_err("usage error");
        assert!(err.to_string().contains("--users-only"));
    }

    #[test]
    fn sources_and_scopes_are_mutually_exclusive() {
        assert!(parse(&["--sqlite-file", "a.db", "--sql-file", "b.sql"]).is_err());
        assert!(parse(&["--sqlite-file", "a.db", "--users-only", "--tokens-only"]).is_err());
        assert!(parse(&["--db-name", "newapi"]).is_err());
    }

    fn taken_backup() -> anyhow::Result<BackupOutcome> {
        Ok(BackupOutcome {
            path: PathBuf::from("newapi_backup.sql"),
            method: apimigrate_core::BackupMethod::PgDump,
        })
    }

    #[test]
    fn successful_backup_passes_without_asking() {
        let outcome = backup_gate(taken_backup(), |_| panic!("no prompt expected"))
            .expect("gate")
            .expect("outcome");
        assert_eq!(outcome.path, PathBuf::from("newapi_backup.sql"));
    }

    #[test]
    fn declined_prompt_aborts_before_migrating() {
        let mut asked = None;
        let err = backup_gate(Err(anyhow::anyhow!("pg_dump failed")), |question| {
            asked = Some(question.to_string());
            Ok(false)
        })
        .expect_err("declined");
        assert!(err.to_string().contains("migration aborted"));
        assert_eq!(asked.as_deref(), Some("Backup failed. Continue migration?"));
    }

    #[test]
    fn confirmed_prompt_continues_without_backup() {
        let gate = backup_gate(Err(anyhow::anyhow!("pg_dump failed")), |_| Ok(true));
        assert!(gate.expect("confirmed").is_none());
    }

    #[test]
    fn prompt_error_aborts() {
        let gate = backup_gate(Err(anyhow::anyhow!("pg_dump failed")), |_| {
            Err(anyhow::anyhow!("stdin closed"))
        });
        assert!(gate.is_err());
    }

    #[test]
    fn cli_flags_override_config() {
        let cli = parse(&[
            "--sqlite-file",
            "a.db",
            "--db-host",
            "db.internal",
            "--db-port",
            "6543",
            "--db-name",
            "newapi",
            "--db-user",
            "postgres",
            "--db-password",
            "secret",
            "--no-backup",
        ])
        .expect("parse");
        let config = cli.apply_overrides(MigrateConfig::default());
        let resolved = config.target.resolve().expect("complete target");
        assert_eq!(resolved.host, "db.internal");
        assert_eq!(resolved.port, 6543);
        assert_eq!(resolved.database, "newapi");
        assert!(!config.backup.enabled);
    }
}
