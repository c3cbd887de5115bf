use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use catalog_upkeep::catalog::ResolvePolicy;
use catalog_upkeep::cli::{self, RunMode};
use catalog_upkeep::config::UpkeepConfig;
use catalog_upkeep::database_ops::image_check::DEFAULT_SAMPLE;
use catalog_upkeep::database_ops::sql_export::{DEFAULT_CHUNK_PREFIX, DEFAULT_PER_CHUNK};
use catalog_upkeep::env_boot::bootstrap_cli;

#[derive(Parser, Debug)]
#[command(name = "upkeep", version, about = "Marketplace catalog upkeep tools")]
struct Cli {
    /// Debug logging for this crate
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by commands that write to the database.
#[derive(Args, Debug, Clone, Copy)]
struct WriteFlags {
    /// Apply changes (default is a dry run)
    #[arg(long, default_value_t = false)]
    execute: bool,
    /// Skip the confirmation prompt
    #[arg(long, short = 'y', default_value_t = false)]
    yes: bool,
    /// Process at most N items
    #[arg(long)]
    limit: Option<usize>,
}

impl From<WriteFlags> for RunMode {
    fn from(f: WriteFlags) -> Self {
        RunMode {
            execute: f.execute,
            assume_yes: f.yes,
            limit: f.limit,
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Print the product identifiers found in a piece of text
    Extract {
        text: String,
        /// Catalog CSV to look the identifiers up in
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Assign images to products that have none that can be served
    ResolveImages {
        #[command(flatten)]
        flags: WriteFlags,
        /// Probe remote URLs before accepting them
        #[arg(long, default_value_t = false)]
        verify: bool,
        /// Download vendor images into the local folder
        #[arg(long, default_value_t = false)]
        download: bool,
    },
    /// Match products without images to files in the local vendor folder
    AssignLocalImages {
        #[command(flatten)]
        flags: WriteFlags,
    },
    /// Remove duplicate and wrong images from product arrays
    CleanImages {
        #[command(flatten)]
        flags: WriteFlags,
    },
    /// Rewrite local vendor image paths to the vendor's remote URLs
    MigrateImageUrls {
        #[command(flatten)]
        flags: WriteFlags,
        #[arg(long, default_value_t = cli::migrate_image_urls::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Sample product images and report broken ones
    CheckImages {
        /// Products to scan (default 5000)
        #[arg(long)]
        limit: Option<usize>,
        /// Unique images to probe
        #[arg(long, default_value_t = DEFAULT_SAMPLE)]
        sample: usize,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Download vendor images for the whole catalog (resumable)
    DownloadImages {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value = cli::download_images::DEFAULT_LOG)]
        log: PathBuf,
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Import distributor products not yet in the marketplace
    ImportSyscom {
        #[command(flatten)]
        flags: WriteFlags,
        /// Distributor category id (default: all configured categories)
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 1)]
        start_page: u32,
    },
    /// Refresh zero prices from the distributor
    UpdatePrices {
        #[command(flatten)]
        flags: WriteFlags,
    },
    /// Set prices from a CSV price sheet keyed by SKU
    UpdatePricesCsv {
        #[command(flatten)]
        flags: WriteFlags,
        #[arg(long)]
        file: PathBuf,
    },
    /// Fill empty image arrays of distributor products
    RefreshSyscomImages {
        #[command(flatten)]
        flags: WriteFlags,
        /// Use the image URL template without calling the detail endpoint
        #[arg(long, default_value_t = false)]
        template_only: bool,
    },
    /// Check every product image; drop or replace the broken ones
    FixBrokenImages {
        #[command(flatten)]
        flags: WriteFlags,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Report suspicious prices (read only)
    PriceAudit {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Soft-delete duplicate products
    DedupeProducts {
        #[command(flatten)]
        flags: WriteFlags,
        #[arg(long, default_value_t = false)]
        by_sku: bool,
        #[arg(long, default_value_t = false)]
        by_external_code: bool,
    },
    /// Generate the catalog INSERT script for products with local images
    ExportSql {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long, default_value = "data/import_truper_catalog.sql")]
        output: PathBuf,
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Split a large INSERT script into numbered chunks
    SplitSql {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_PER_CHUNK)]
        per_chunk: usize,
        #[arg(long, default_value = DEFAULT_CHUNK_PREFIX)]
        prefix: String,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Extract { .. } => "extract",
            Commands::ResolveImages { .. } => "resolve-images",
            Commands::AssignLocalImages { .. } => "assign-local-images",
            Commands::CleanImages { .. } => "clean-images",
            Commands::MigrateImageUrls { .. } => "migrate-image-urls",
            Commands::CheckImages { .. } => "check-images",
            Commands::DownloadImages { .. } => "download-images",
            Commands::ImportSyscom { .. } => "import-syscom",
            Commands::UpdatePrices { .. } => "update-prices",
            Commands::UpdatePricesCsv { .. } => "update-prices-csv",
            Commands::RefreshSyscomImages { .. } => "refresh-syscom-images",
            Commands::FixBrokenImages { .. } => "fix-broken-images",
            Commands::PriceAudit { .. } => "price-audit",
            Commands::DedupeProducts { .. } => "dedupe-products",
            Commands::ExportSql { .. } => "export-sql",
            Commands::SplitSql { .. } => "split-sql",
        }
    }
}

fn read_only(limit: Option<usize>) -> RunMode {
    RunMode {
        limit,
        ..RunMode::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    bootstrap_cli("upkeep", args.command.name(), args.verbose)?;
    let upkeep = UpkeepConfig::from_env();

    match args.command {
        Commands::Extract { text, csv } => {
            use cli::extract::{run, ExtractConfig};
            run(ExtractConfig {
                text,
                catalog_csv: csv.or(Some(upkeep.catalog_csv)),
            })
            .await?;
        }
        Commands::ResolveImages { flags, verify, download } => {
            use cli::resolve_images::{run, ResolveImagesConfig};
            run(ResolveImagesConfig {
                upkeep,
                mode: flags.into(),
                policy: ResolvePolicy {
                    verify_remote: verify,
                    download,
                },
            })
            .await?;
        }
        Commands::AssignLocalImages { flags } => {
            use cli::assign_local_images::{run, AssignLocalImagesConfig};
            run(AssignLocalImagesConfig { upkeep, mode: flags.into() }).await?;
        }
        Commands::CleanImages { flags } => {
            use cli::clean_images::{run, CleanImagesConfig};
            run(CleanImagesConfig { upkeep, mode: flags.into() }).await?;
        }
        Commands::MigrateImageUrls { flags, batch_size } => {
            use cli::migrate_image_urls::{run, MigrateImageUrlsConfig};
            run(MigrateImageUrlsConfig {
                upkeep,
                mode: flags.into(),
                batch_size,
            })
            .await?;
        }
        Commands::CheckImages { limit, sample, workers } => {
            use cli::check_images::{run, CheckImagesConfig};
            run(CheckImagesConfig {
                upkeep: upkeep.with_workers(workers),
                mode: read_only(limit),
                sample,
            })
            .await?;
        }
        Commands::DownloadImages { limit, workers, log, csv } => {
            use cli::download_images::{run, DownloadImagesConfig};
            run(DownloadImagesConfig {
                upkeep: upkeep.with_workers(workers).with_catalog_csv(csv.as_deref()),
                limit,
                log,
            })
            .await?;
        }
        Commands::ImportSyscom { flags, category, start_page } => {
            use cli::import_syscom::{run, ImportSyscomConfig};
            run(ImportSyscomConfig {
                upkeep,
                mode: flags.into(),
                category,
                start_page: start_page.max(1),
            })
            .await?;
        }
        Commands::UpdatePrices { flags } => {
            use cli::update_prices::{run, UpdatePricesConfig};
            run(UpdatePricesConfig { upkeep, mode: flags.into() }).await?;
        }
        Commands::UpdatePricesCsv { flags, file } => {
            use cli::update_prices_csv::{run, UpdatePricesCsvConfig};
            run(UpdatePricesCsvConfig { file, mode: flags.into() }).await?;
        }
        Commands::RefreshSyscomImages { flags, template_only } => {
            use cli::refresh_syscom_images::{run, RefreshSyscomImagesConfig};
            run(RefreshSyscomImagesConfig {
                upkeep,
                mode: flags.into(),
                template_only,
            })
            .await?;
        }
        Commands::FixBrokenImages { flags, workers } => {
            use cli::fix_broken_images::{run, FixBrokenImagesConfig};
            run(FixBrokenImagesConfig {
                upkeep: upkeep.with_workers(workers),
                mode: flags.into(),
            })
            .await?;
        }
        Commands::PriceAudit { limit } => {
            use cli::price_audit::{run, PriceAuditConfig};
            run(PriceAuditConfig { upkeep, mode: read_only(limit) }).await?;
        }
        Commands::DedupeProducts { flags, by_sku, by_external_code } => {
            use cli::dedupe_products::{run, DedupeProductsConfig};
            run(DedupeProductsConfig {
                mode: flags.into(),
                by_sku,
                by_external_code,
            })
            .await?;
        }
        Commands::ExportSql { csv, output, log } => {
            use cli::export_sql::{run, ExportSqlConfig};
            run(ExportSqlConfig {
                upkeep: upkeep.with_catalog_csv(csv.as_deref()),
                output,
                log,
            })
            .await?;
        }
        Commands::SplitSql { input, output_dir, per_chunk, prefix } => {
            use cli::split_sql::{run, SplitSqlConfig};
            run(SplitSqlConfig {
                input,
                output_dir,
                per_chunk,
                prefix,
            })
            .await?;
        }
    }
    Ok(())
}
