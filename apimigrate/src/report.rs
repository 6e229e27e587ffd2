use std::fmt;

use apimigrate_core::{BackupOutcome, MigrationStats, ResolvedTarget};

/// End-of-run report printed to stdout.
pub struct Summary {
    pub users: Option<MigrationStats>,
    pub tokens: Option<MigrationStats>,
    backup: Option<BackupOutcome>,
    restore_hint: String,
}

impl Summary {
    pub fn new(backup: Option<BackupOutcome>, target: &ResolvedTarget) -> Self {
        let restore_hint = format!(
            "psql -h {} -p {} -U {} -d {} -f",
            target.host, target.port, target.user, target.database
        );
        Self {
            users: None,
            tokens: None,
            backup,
            restore_hint,
        }
    }

    fn migrated(&self) -> u64 {
        self.users.map_or(0, |s| s.migrated) + self.tokens.map_or(0, |s| s.migrated)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Migration summary ===")?;
        if let Some(stats) = &self.users {
            write_stage(f, "Users", "users", stats)?;
        }
        if let Some(stats) = &self.tokens {
            write_stage(f, "Tokens", "tokens", stats)?;
        }

        if let Some(backup) = &self.backup {
            if self.migrated() > 0 {
                writeln!(f, "\nDatabase backup file: {}", backup.path.display())?;
                writeln!(f, "Restore with: {} {}", self.restore_hint, backup.path.display())?;
            }
        }
        Ok(())
    }
}

fn write_stage(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    noun: &str,
    stats: &MigrationStats,
) -> fmt::Result {
    writeln!(f, "{title}:")?;
    writeln!(f, "- migrated: {} {noun}", stats.migrated)?;
    writeln!(f, "- skipped:  {} {noun} (already exist)", stats.skipped)?;
    writeln!(f, "- failed:   {} {noun}", stats.failed)
}
