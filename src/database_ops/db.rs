use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::util::env::env_flag;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("parsing database URL")?;

        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connecting to database")?;
        info!(target: "db", max_connections, "connected to db");
        Ok(Self { pool })
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .persistent(false)
            .execute(&self.pool)
            .await
            .context("database ping")?;
        Ok(())
    }
}

/// Errors worth retrying: the connection dropped or the pool ran dry.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Protocol(msg) => msg.contains("closed"),
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            // admin_shutdown, cannot_connect_now, connection_failure
            Some("57P01") | Some("57P03") | Some("08006") | Some("08003")
        ),
        _ => false,
    }
}
