//! Subcommands of the `upkeep` binary.
//!
//! Every command that writes to the hosted database runs as a dry run
//! unless `--execute` is given, and asks for confirmation unless `--yes`.
use anyhow::{Context, Result};
use inquire::Confirm;
use tracing::info;

use crate::config::{SyscomCredentials, UpkeepConfig};
use crate::database_ops::db::Db;
use crate::database_ops::syscom::SyscomClient;
use crate::util::env;

pub mod assign_local_images;
pub mod check_images;
pub mod clean_images;
pub mod dedupe_products;
pub mod download_images;
pub mod export_sql;
pub mod extract;
pub mod fix_broken_images;
pub mod import_syscom;
pub mod migrate_image_urls;
pub mod price_audit;
pub mod refresh_syscom_images;
pub mod resolve_images;
pub mod split_sql;
pub mod update_prices;
pub mod update_prices_csv;

/// Write-mode flags shared by the mutating commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunMode {
    pub execute: bool,
    pub assume_yes: bool,
    pub limit: Option<usize>,
}

impl RunMode {
    /// Whether planned writes should be applied. Dry runs print a hint and
    /// return false; otherwise the user is asked unless `--yes` was given.
    pub fn confirm(&self, pending: usize, what: &str) -> Result<bool> {
        if pending == 0 {
            return Ok(false);
        }
        if !self.execute {
            println!("\nDry run: {pending} {what} not applied. Re-run with --execute to apply.");
            return Ok(false);
        }
        if self.assume_yes {
            return Ok(true);
        }
        Confirm::new(&format!("Apply {pending} {what}?"))
            .with_default(false)
            .prompt()
            .context("reading confirmation")
    }

    pub fn label(&self) -> &'static str {
        if self.execute {
            "execute"
        } else {
            "dry-run"
        }
    }
}

/// Connect to the hosted catalog using the configured database URL.
pub async fn connect_db() -> Result<Db> {
    let url = env::db_url()?;
    let db = Db::connect(&url, 5).await?;
    db.ping().await?;
    info!(target: "db", "database reachable");
    Ok(db)
}

/// Distributor client for commands that call the Syscom API; logs a redacted
/// snapshot of the relevant settings first.
pub fn syscom_client(upkeep: &UpkeepConfig) -> Result<SyscomClient> {
    env::preflight_check(
        "syscom",
        &["SYSCOM_CLIENT_ID", "SYSCOM_CLIENT_SECRET"],
        &["SYSCOM_API_BASE", "SYSCOM_OAUTH_URL"],
    )?;
    let creds = SyscomCredentials::from_env().context("distributor credentials")?;
    SyscomClient::new(upkeep.syscom.clone(), creds)
}

pub(crate) fn banner(title: &str) {
    println!("{}", "=".repeat(60));
    println!("{title}");
    println!("{}", "=".repeat(60));
}

pub(crate) fn clip(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(n).collect();
        out.push_str("...");
        out
    }
}
