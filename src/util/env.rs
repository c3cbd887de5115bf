//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in the binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

/// Dotfiles read in order; the first value seen for a key wins and the
/// process environment always wins over both.
const ENV_FILES: [&str; 2] = [".env.local", ".env"];

/// Load `.env.local` and `.env` exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        for file in ENV_FILES {
            let _ = dotenv::from_filename(file);
        }
    });
}

/// Get required env var; error if missing.
pub fn env_req(key: &str) -> anyhow::Result<String> {
    env_opt(key).ok_or_else(|| anyhow::anyhow!("missing env var {key}"))
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    match env_opt(key) {
        Some(raw) => raw.parse::<T>().unwrap_or(default),
        None => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(raw) => {
            let v = raw.to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        None => default,
    }
}

/// Database URL of the hosted catalog (tries specific -> generic). Returns first found.
pub fn db_url() -> anyhow::Result<String> {
    for k in ["SUPABASE_DB_URL", "DATABASE_URL", "DB_URL"] {
        if let Some(v) = env_opt(k) {
            return Ok(prefer_session_mode(&v));
        }
    }
    Err(anyhow::anyhow!(
        "no database URL env vars set (SUPABASE_DB_URL / DATABASE_URL)"
    ))
}

/// If the URL looks like Supabase's transaction pooler (port 6543),
/// prefer the session pooler (5432) to avoid prepared-statement issues.
pub fn prefer_session_mode(url: &str) -> String {
    if url.contains("pooler.supabase.com:6543") {
        tracing::warn!(
            "detected Supabase transaction pooler (:6543); switching to :5432 (session)"
        );
        url.replace("pooler.supabase.com:6543", "pooler.supabase.com:5432")
    } else {
        url.to_string()
    }
}

pub(crate) fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD") || k.contains("SECRET") || k.contains("KEY") || k.contains("TOKEN")
    {
        return "***".to_string();
    }

    let val_trim = val.trim();

    // Always redact postgres DSNs even if the key isn't obviously sensitive.
    if let Ok(mut u) = url::Url::parse(val_trim) {
        let scheme = u.scheme().to_ascii_lowercase();
        if scheme == "postgres" || scheme == "postgresql" {
            let _ = u.set_username("***");
            let _ = u.set_password(Some("***"));
            return u.to_string();
        }
    }

    val_trim.to_string()
}

/// Validate required keys and log a consolidated, redacted snapshot of configuration.
/// Returns error if any required key is missing.
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> anyhow::Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| env_opt(k).is_none())
        .collect();
    let snapshot: Vec<(String, String)> = required
        .iter()
        .chain(also_log.iter())
        .map(|&k| {
            let v = env_opt(k).unwrap_or_default();
            (k.to_string(), redact_value(k, &v))
        })
        .collect();
    info!(target: "preflight", title, snapshot = ?snapshot, "configuration snapshot");
    if !missing.is_empty() {
        anyhow::bail!("missing required env: {}", missing.join(", "));
    }
    Ok(())
}
