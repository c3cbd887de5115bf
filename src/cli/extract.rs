use anyhow::Result;
use std::path::PathBuf;

use crate::catalog::CatalogIndex;
use crate::normalization::clave::extract_candidates;

#[derive(Debug, Clone, Default)]
pub struct ExtractConfig {
    pub text: String,
    /// Catalog to look candidates up in; skipped when the file is absent.
    pub catalog_csv: Option<PathBuf>,
}

/// Print the identifiers found in `text`, one per line:
/// `<kind>\t<value>\t<lookup key>[\t<codigo> <descripcion>]`.
pub async fn run(cfg: ExtractConfig) -> Result<()> {
    let candidates = extract_candidates(&cfg.text);
    let index = cfg
        .catalog_csv
        .filter(|p| p.is_file())
        .map(|p| CatalogIndex::load(&p));

    if candidates.is_empty() {
        println!("no identifiers found");
        return Ok(());
    }
    for c in &candidates {
        let hit = index.as_ref().and_then(|idx| idx.lookup(c));
        match hit {
            Some(r) => println!(
                "{}\t{}\t{}\t{} {}",
                c.kind,
                c.value,
                c.lookup_key(),
                r.codigo,
                r.descripcion.as_deref().unwrap_or_default()
            ),
            None => println!("{}\t{}\t{}", c.kind, c.value, c.lookup_key()),
        }
    }
    Ok(())
}
