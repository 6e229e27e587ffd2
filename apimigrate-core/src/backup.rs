//! Pre-migration backup of the New API database.
//!
//! `pg_dump` is tried first. When the binary is not installed, the `tokens`
//! table is rebuilt by hand from the catalog and written out as a replayable
//! SQL script.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Local};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{BackupConfig, ResolvedTarget};
use crate::persistence::{BACKUP_TOKEN_COLUMNS, ColumnInfo};
use crate::records::SqlValue;

/// Read side of the target used to rebuild the `tokens` table when
/// `pg_dump` is not installed.
#[allow(async_fn_in_trait)]
pub trait TokenSnapshot {
    fn database(&self) -> &str;
    async fn token_columns(&self) -> anyhow::Result<Vec<ColumnInfo>>;
    async fn token_rows(&self) -> anyhow::Result<Vec<Vec<SqlValue>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMethod {
    PgDump,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub path: PathBuf,
    pub method: BackupMethod,
}

/// A fully-specified `pg_dump` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgDumpPlan {
    pub bin: String,
    pub args: Vec<String>,
    password: String,
}

impl PgDumpPlan {
    pub fn new(bin: &str, target: &ResolvedTarget, path: &Path) -> Self {
        let args = vec![
            "-h".to_string(),
            target.host.clone(),
            "-p".to_string(),
            target.port.to_string(),
            "-U".to_string(),
            target.user.clone(),
            "-d".to_string(),
            target.database.clone(),
            "-f".to_string(),
            path.display().to_string(),
            "--verbose".to_string(),
            // never block on a password prompt; PGPASSWORD is set instead
            "--no-password".to_string(),
        ];
        Self {
            bin: bin.to_string(),
            args,
            password: target.password.clone(),
        }
    }
}

enum DumpResult {
    Done,
    Unavailable,
}

/// `newapi_backup_YYYYmmdd_HHMMSS.sql` in the working directory.
pub fn default_backup_path(now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("newapi_backup_{}.sql", now.format("%Y%m%d_%H%M%S")))
}

/// Back up the target before any write. Returns an error when neither
/// strategy produced a file; the caller decides whether to continue.
pub async fn create_backup<S: TokenSnapshot>(
    target: &S,
    resolved: &ResolvedTarget,
    config: &BackupConfig,
) -> anyhow::Result<BackupOutcome> {
    let path = config
        .path
        .clone()
        .unwrap_or_else(|| default_backup_path(Local::now()));
    info!(path = %path.display(), "creating database backup");

    let plan = PgDumpPlan::new(&config.pg_dump_bin, resolved, &path);
    match run_pg_dump(&plan).await? {
        DumpResult::Done => {
            info!(path = %path.display(), "database backup completed");
            Ok(BackupOutcome {
                path,
                method: BackupMethod::PgDump,
            })
        }
        DumpResult::Unavailable => {
            warn!(
                bin = %plan.bin,
                "pg_dump not found, install the PostgreSQL client tools; trying manual tokens backup"
            );
            manual_backup(target, &path)
                .await
                .context("manual backup failed")?;
            info!(path = %path.display(), "manual backup completed");
            Ok(BackupOutcome {
                path,
                method: BackupMethod::Manual,
            })
        }
    }
}

async fn run_pg_dump(plan: &PgDumpPlan) -> anyhow::Result<DumpResult> {
    let output = match Command::new(&plan.bin)
        .args(&plan.args)
        .env("PGPASSWORD", &plan.password)
        .output()
        .await
    {
        Ok(output) => output,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(DumpResult::Unavailable),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to execute {}", plan.bin));
        }
    };

    if output.status.success() {
        return Ok(DumpResult::Done);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return Err(anyhow!("{} failed: {stderr}", plan.bin));
    }
    Err(anyhow!("`{}` exited with status {}", plan.bin, output.status))
}

async fn manual_backup<S: TokenSnapshot>(target: &S, path: &Path) -> anyhow::Result<()> {
    let columns = target.token_columns().await?;
    let rows = target.token_rows().await?;
    let created = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let script = render_manual_backup(target.database(), &created, &columns, &rows);
    tokio::fs::write(path, script)
        .await
        .with_context(|| format!("failed to write backup file {}", path.display()))
}

/// Render the fallback backup script: a header, the reconstructed `tokens`
/// table definition and one multi-row INSERT with the current rows.
pub fn render_manual_backup(
    database: &str,
    created: &str,
    columns: &[ColumnInfo],
    rows: &[Vec<SqlValue>],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "-- New API Database Backup");
    let _ = writeln!(out, "-- Created: {created}");
    let _ = writeln!(out, "-- Database: {database}");
    out.push('\n');

    out.push_str("-- Tokens Table Structure\n");
    if !columns.is_empty() {
        let defs = columns
            .iter()
            .map(|col| {
                let mut def = format!("    {} {}", quote_ident(&col.name), col.data_type);
                if !col.nullable {
                    def.push_str(" NOT NULL");
                }
                if let Some(default) = &col.default {
                    let _ = write!(def, " DEFAULT {default}");
                }
                def
            })
            .collect::<Vec<_>>();
        out.push_str("CREATE TABLE IF NOT EXISTS tokens (\n");
        out.push_str(&defs.join(",\n"));
        out.push_str("\n);\n\n");
    }

    out.push_str("-- Tokens Table Data\n");
    if !rows.is_empty() {
        let column_list = BACKUP_TOKEN_COLUMNS
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "INSERT INTO tokens ({column_list}) VALUES");
        let tuples = rows
            .iter()
            .map(|row| {
                let values = row
                    .iter()
                    .map(SqlValue::to_sql_literal)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({values})")
            })
            .collect::<Vec<_>>();
        out.push_str(&tuples.join(",\n"));
        out.push_str(";\n");
    }

    out
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
