use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Default filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Event targets used across the crate; `--verbose` lowers each to debug
/// along with the crate's module path.
pub const CRATE_TARGETS: [&str; 16] = [
    "catalog_upkeep",
    "bootstrap",
    "catalog",
    "db",
    "dedupe",
    "downloader",
    "image_check",
    "images",
    "import",
    "local_match",
    "preflight",
    "prices",
    "products",
    "resolver",
    "sql_export",
    "syscom",
];

/// `base` plus a debug directive per crate target when `verbose`.
pub fn verbose_filter(base: EnvFilter, verbose: bool) -> Result<EnvFilter, anyhow::Error> {
    if !verbose {
        return Ok(base);
    }
    CRATE_TARGETS.iter().try_fold(base, |filter, target| -> Result<EnvFilter, anyhow::Error> {
        Ok(filter.add_directive(format!("{target}=debug").parse()?))
    })
}

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// The caller provides a fallback filter string that is used when `RUST_LOG` is
/// not set; `verbose` lowers the crate's own targets to debug on top of it.
pub fn init_tracing(default_filter: &str, verbose: bool) -> Result<(), anyhow::Error> {
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let filter = verbose_filter(base, verbose)?;

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, info};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture(verbose: bool) -> String {
        let out = Captured::default();
        let writer = out.clone();
        let filter = verbose_filter(EnvFilter::new(DEFAULT_FILTER), verbose).unwrap();
        let subscriber = SubscriberBuilder::default()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            debug!(target: "resolver", "resolver-debug-line");
            debug!(target: "syscom", "syscom-debug-line");
            debug!(target: "sqlx::query", "sqlx-debug-line");
            info!(target: "import", "import-info-line");
        });
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn verbose_enables_debug_for_crate_targets() {
        let logs = capture(true);
        assert!(logs.contains("resolver-debug-line"), "{logs}");
        assert!(logs.contains("syscom-debug-line"), "{logs}");
        assert!(logs.contains("import-info-line"), "{logs}");
        assert!(!logs.contains("sqlx-debug-line"), "{logs}");
    }

    #[test]
    fn quiet_by_default() {
        let logs = capture(false);
        assert!(!logs.contains("resolver-debug-line"), "{logs}");
        assert!(logs.contains("import-info-line"), "{logs}");
    }
}
