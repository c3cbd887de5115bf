//! Generated SQL for the vendor catalog: one INSERT per product with a
//! local image, wrapped in a script meant for manual execution, and a
//! splitter that cuts large scripts into executable chunks.
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::catalog::CatalogRecord;

pub const DEFAULT_PER_CHUNK: usize = 1000;
pub const DEFAULT_CHUNK_PREFIX: &str = "import_truper_chunk";
const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 1000;

const FAMILY_CATEGORIES: &[(&str, &str)] = &[
    ("P085", "plomeria"),
    ("P049", "varios"),
    ("P129", "construccion"),
    ("P216", "jardineria"),
    ("P515", "construccion"),
    ("P402", "jardineria"),
];

/// Substring of the family description -> category slug; first hit wins.
const FAMILY_KEYWORDS: &[(&str, &str)] = &[
    ("llaves", "plomeria"),
    ("cutters", "varios"),
    ("sierra", "electricidad"),
    ("serrucho", "jardineria"),
    ("lija", "construccion"),
    ("cavador", "jardineria"),
    ("electric", "electricidad"),
    ("eléctrico", "electricidad"),
    ("eléctrica", "electricidad"),
    ("construccion", "construccion"),
    ("construcción", "construccion"),
    ("plomeria", "plomeria"),
    ("plomería", "plomeria"),
    ("mecanica", "mecanica"),
    ("mecánica", "mecanica"),
    ("pintura", "pintura"),
    ("jardineria", "jardineria"),
    ("jardinería", "jardineria"),
    ("herramienta", "herramienta-manual"),
    ("taladro", "electricidad"),
    ("rotomartillo", "electricidad"),
    ("esmeril", "electricidad"),
    ("pulidora", "electricidad"),
    ("lijadora", "electricidad"),
    ("atornillador", "electricidad"),
    ("destornillador", "electricidad"),
];

const DEFAULT_CATEGORY: &str = "varios";

const CORDLESS_WORDS: &[&str] = &["inalámbrico", "inalambrico", "bateria", "batería", "cordless", "battery"];
const ELECTRIC_WORDS: &[&str] = &["electric", "eléctrico", "eléctrica", "enchufe", "cable"];
const MANUAL_WORDS: &[&str] = &["manual", "mango", "mano"];

/// Quoted SQL string literal; empty input becomes `NULL`.
pub fn sql_literal(value: &str) -> String {
    if value.is_empty() {
        return "NULL".to_string();
    }
    format!("'{}'", value.replace('\'', "''"))
}

pub fn sql_nullable(value: Option<&str>) -> String {
    value.map_or_else(|| "NULL".to_string(), sql_literal)
}

pub fn category_for(familia: Option<&str>, familia_desc: Option<&str>) -> &'static str {
    if let Some(f) = familia.map(str::trim).filter(|f| !f.is_empty()) {
        if let Some(&(_, slug)) = FAMILY_CATEGORIES.iter().find(|(code, _)| *code == f) {
            return slug;
        }
    }
    let desc = familia_desc.unwrap_or_default().to_lowercase();
    FAMILY_KEYWORDS
        .iter()
        .find(|(word, _)| desc.contains(word))
        .map_or(DEFAULT_CATEGORY, |&(_, slug)| slug)
}

pub fn power_type_for(descripcion: Option<&str>, clave: Option<&str>) -> Option<&'static str> {
    let text = format!(
        "{} {}",
        descripcion.unwrap_or_default().to_lowercase(),
        clave.unwrap_or_default().to_lowercase()
    );
    let any = |words: &[&str]| words.iter().any(|w| text.contains(w));
    if any(CORDLESS_WORDS) {
        Some("cordless")
    } else if any(ELECTRIC_WORDS) {
        Some("electric")
    } else if any(MANUAL_WORDS) {
        Some("manual")
    } else {
        None
    }
}

fn truncate_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Local image for a record: `{key}.jpg`, `{key}.webp`, `{codigo}.jpg`, `{codigo}.webp`.
pub fn local_image_for(images_dir: &Path, site_prefix: &str, record: &CatalogRecord) -> Option<String> {
    let key = record.image_key();
    [
        format!("{key}.jpg"),
        format!("{key}.webp"),
        format!("{}.jpg", record.codigo),
        format!("{}.webp", record.codigo),
    ]
    .into_iter()
    .find(|name| images_dir.join(name).is_file())
    .map(|name| format!("{site_prefix}{name}"))
}

/// Public price, else distributor price; must be positive.
pub fn export_price(record: &CatalogRecord) -> Option<f64> {
    record
        .precio_publico
        .filter(|p| *p > 0.0)
        .or(record.precio_distribuidor)
        .filter(|p| *p > 0.0)
}

pub fn insert_statement(record: &CatalogRecord, image: &str, price: f64, contact_phone: &str) -> String {
    let descripcion = record.descripcion.as_deref().unwrap_or_default().trim();
    let category = category_for(record.familia.as_deref(), record.familia_desc.as_deref());
    let power_type = power_type_for(Some(descripcion), record.clave.as_deref());
    format!(
        "INSERT INTO public.marketplace_products (
    seller_id,
    title,
    description,
    price,
    original_price,
    condition,
    category_id,
    images,
    location_city,
    location_zone,
    status,
    contact_phone,
    power_type,
    created_at,
    updated_at
) VALUES (
    NULL,
    {title},
    {description},
    {price},
    NULL,
    'nuevo',
    (SELECT id FROM public.marketplace_categories WHERE slug = {category} LIMIT 1),
    ARRAY[{image}],
    'CDMX',
    'Entrega Inmediata',
    'active',
    {phone},
    {power},
    NOW(),
    NOW()
) ON CONFLICT DO NOTHING;
",
        title = sql_literal(truncate_chars(descripcion, MAX_TITLE_CHARS)),
        description = sql_literal(truncate_chars(descripcion, MAX_DESCRIPTION_CHARS)),
        category = sql_literal(category),
        image = sql_literal(image),
        phone = sql_literal(contact_phone),
        power = sql_nullable(power_type),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    pub total_rows: usize,
    pub with_images: usize,
    pub without_images: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedProduct {
    pub codigo: String,
    pub clave: Option<String>,
    pub title: String,
    pub price: f64,
    pub category: &'static str,
    pub power_type: Option<&'static str>,
    pub image: String,
}

#[derive(Debug, Default)]
pub struct CatalogExport {
    pub statements: Vec<String>,
    pub exported: Vec<ExportedProduct>,
    pub stats: ExportStats,
}

/// Build statements for every record that has a description, a local
/// image and a positive price.
pub fn export_catalog(
    records: &[CatalogRecord],
    images_dir: &Path,
    site_prefix: &str,
    contact_phone: &str,
) -> CatalogExport {
    let mut out = CatalogExport::default();
    out.stats.total_rows = records.len();
    for record in records {
        let descripcion = record.descripcion.as_deref().unwrap_or_default().trim();
        if descripcion.is_empty() {
            continue;
        }
        let Some(image) = local_image_for(images_dir, site_prefix, record) else {
            out.stats.without_images += 1;
            continue;
        };
        let Some(price) = export_price(record) else {
            out.stats.skipped += 1;
            continue;
        };
        out.statements
            .push(insert_statement(record, &image, price, contact_phone));
        out.stats.with_images += 1;
        out.exported.push(ExportedProduct {
            codigo: record.codigo.clone(),
            clave: record.clave.clone(),
            title: truncate_chars(descripcion, 50).to_string(),
            price,
            category: category_for(record.familia.as_deref(), record.familia_desc.as_deref()),
            power_type: power_type_for(Some(descripcion), record.clave.as_deref()),
            image,
        });
    }
    out
}

fn verification_block(contact_phone: &str) -> String {
    format!(
        "-- Verificación final
DO $$
DECLARE
    total_imported INTEGER;
BEGIN
    SELECT COUNT(*) INTO total_imported
    FROM public.marketplace_products
    WHERE seller_id IS NULL AND contact_phone = {};

    RAISE NOTICE 'Importación completada: % productos de TRUPER importados', total_imported;
END $$;
",
        sql_literal(contact_phone)
    )
}

/// Full import script: header with counts, a category pre-check, the
/// statements, and a final verification block.
pub fn render_import_script(
    statements: &[String],
    stats: &ExportStats,
    source_name: &str,
    contact_phone: &str,
) -> String {
    let rule = "-- =========================================================================";
    let mut s = String::new();
    let _ = writeln!(s, "{rule}");
    let _ = writeln!(s, "-- Importación de catálogo TRUPER");
    let _ = writeln!(s, "{rule}");
    let _ = writeln!(s, "-- Productos del catálogo con imagen local disponible");
    let _ = writeln!(s, "-- Generado desde: {source_name}");
    let _ = writeln!(s, "-- Total productos procesados: {}", stats.total_rows);
    let _ = writeln!(s, "-- Productos con imágenes: {}", stats.with_images);
    let _ = writeln!(s, "{rule}");
    s.push_str(
        "
-- Verificar que exista al menos una categoría
DO $$
BEGIN
    IF NOT EXISTS (SELECT 1 FROM public.marketplace_categories LIMIT 1) THEN
        RAISE EXCEPTION 'No hay categorías en marketplace_categories.';
    END IF;
END $$;

-- Insertar productos
",
    );
    s.push_str(&statements.join("\n"));
    s.push('\n');
    s.push_str(&verification_block(contact_phone));
    s
}

/// A script cut into header, per-chunk statements and trailing lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlSplit {
    pub header: Vec<String>,
    pub chunks: Vec<Vec<String>>,
    /// Lines after the last complete statement (the verification block).
    pub trailer: Vec<String>,
}

impl SqlSplit {
    pub fn statement_count(&self) -> usize {
        self.chunks.iter().map(|c| count_inserts(c)).sum()
    }
}

fn count_inserts(lines: &[String]) -> usize {
    lines.iter().filter(|l| l.contains("INSERT INTO")).count()
}

/// Split on statement boundaries: a statement opens at a line containing
/// `INSERT INTO` and closes at the next line ending in `;`. `None` when the
/// content has no INSERT at all.
pub fn split_sql(content: &str, per_chunk: usize) -> Option<SqlSplit> {
    let per_chunk = per_chunk.max(1);
    let lines: Vec<&str> = content.split('\n').collect();
    let start = lines.iter().position(|l| l.contains("INSERT INTO"))?;

    let mut split = SqlSplit {
        header: lines[..start].iter().map(|l| l.to_string()).collect(),
        ..Default::default()
    };
    let mut current: Vec<String> = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut in_count = 0usize;
    let mut in_insert = false;
    for line in &lines[start..] {
        pending.push(line.to_string());
        if line.contains("INSERT INTO") {
            in_insert = true;
        }
        if in_insert && line.trim_end().ends_with(';') {
            in_insert = false;
            current.append(&mut pending);
            in_count += 1;
            if in_count >= per_chunk {
                split.chunks.push(std::mem::take(&mut current));
                in_count = 0;
            }
        }
    }
    if !current.is_empty() {
        split.chunks.push(current);
    }
    split.trailer = pending;
    Some(split)
}

/// Write `{prefix}_{i:03}.sql` files under `dir`; returns their paths.
pub fn write_chunks(split: &SqlSplit, dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let n = split.chunks.len();
    let header = split.header.join("\n");
    let trailer = split.trailer.join("\n");
    let mut written = Vec::with_capacity(n);
    for (i, chunk) in split.chunks.iter().enumerate() {
        let i = i + 1;
        let mut body = String::new();
        body.push_str(&header);
        body.push('\n');
        let _ = writeln!(body, "-- Chunk {i} de {n}");
        let _ = writeln!(body, "-- Productos: {}", count_inserts(chunk));
        body.push('\n');
        body.push_str(&chunk.join("\n"));
        if i == n && !trailer.trim().is_empty() {
            body.push('\n');
            body.push_str(&trailer);
        }
        if !body.ends_with('\n') {
            body.push('\n');
        }
        let path = dir.join(format!("{prefix}_{i:03}.sql"));
        std::fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(codigo: &str, clave: &str, desc: &str, price: Option<f64>) -> CatalogRecord {
        CatalogRecord {
            precio_publico: price,
            ..CatalogRecord::new(codigo, Some(clave), Some(desc))
        }
    }

    #[test]
    fn literals_escape_quotes_and_map_empty_to_null() {
        assert_eq!(sql_literal("Llave 1/2'"), "'Llave 1/2'''");
        assert_eq!(sql_literal(""), "NULL");
        assert_eq!(sql_nullable(None), "NULL");
        assert_eq!(sql_nullable(Some("manual")), "'manual'");
    }

    #[test]
    fn category_uses_family_code_then_keywords() {
        assert_eq!(category_for(Some("P085"), Some("Sierras")), "plomeria");
        assert_eq!(category_for(Some("X1"), Some("Sierras circulares")), "electricidad");
        assert_eq!(category_for(None, Some("Herramienta de Jardinería")), "jardineria");
        assert_eq!(category_for(None, Some("Herramienta de corte")), "herramienta-manual");
        assert_eq!(category_for(None, None), "varios");
    }

    #[test]
    fn power_type_prefers_cordless() {
        assert_eq!(power_type_for(Some("Taladro inalámbrico con cable USB"), None), Some("cordless"));
        assert_eq!(power_type_for(Some("Pulidora eléctrica"), None), Some("electric"));
        assert_eq!(power_type_for(Some("Martillo con mango"), None), Some("manual"));
        assert_eq!(power_type_for(Some("Cinta métrica"), Some("FH-5M")), None);
    }

    #[test]
    fn export_requires_image_and_positive_price() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("PET-15X.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("100.webp"), b"x").unwrap();
        let records = vec![
            record("17158", "PET-15X", "Pinza de electricista", Some(150.0)),
            record("100", "NOPE-1", "Martillo de uña", Some(0.0)),
            record("200", "NOPE-2", "Nivel", Some(10.0)),
        ];
        let out = export_catalog(&records, dir.path(), "/img/", "5636741156");
        assert_eq!(out.statements.len(), 1);
        assert_eq!(out.stats, ExportStats { total_rows: 3, with_images: 1, without_images: 1, skipped: 1 });
        assert_eq!(out.exported[0].image, "/img/PET-15X.jpg");
        let sql = &out.statements[0];
        assert!(sql.contains("ARRAY['/img/PET-15X.jpg']"));
        assert!(sql.contains("    150,\n"));
        assert!(sql.ends_with("ON CONFLICT DO NOTHING;\n"));
    }

    #[test]
    fn long_titles_are_truncated_on_char_boundaries() {
        let long = "ñ".repeat(300);
        assert_eq!(truncate_chars(&long, MAX_TITLE_CHARS).chars().count(), 200);
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    fn script(n: usize) -> String {
        let stmts: Vec<String> = (0..n)
            .map(|i| insert_statement(&record(&i.to_string(), "A-1", "Pala", None), "/a.jpg", 1.0, "1"))
            .collect();
        render_import_script(&stmts, &ExportStats::default(), "catalog.csv", "1")
    }

    #[test]
    fn split_keeps_statements_whole_and_trailer_separate() {
        let split = split_sql(&script(5), 2).unwrap();
        assert_eq!(split.chunks.len(), 3);
        assert_eq!(split.statement_count(), 5);
        assert!(split.header.iter().any(|l| l.contains("Insertar productos")));
        assert!(split.trailer.iter().any(|l| l.contains("Verificación final")));
        for chunk in &split.chunks {
            assert!(chunk.iter().rev().find(|l| !l.trim().is_empty()).unwrap().ends_with(';'));
        }
        assert!(split_sql("SELECT 1;", 10).is_none());
    }

    #[test]
    fn chunks_carry_banner_and_final_verification() {
        let dir = tempfile::tempdir().unwrap();
        let split = split_sql(&script(3), 2).unwrap();
        let files = write_chunks(&split, dir.path(), "chunk").unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("chunk_001.sql"));

        let first = std::fs::read_to_string(&files[0]).unwrap();
        assert!(first.contains("-- Chunk 1 de 2\n-- Productos: 2\n"));
        assert!(first.contains("marketplace_categories LIMIT 1) THEN"));
        assert!(!first.contains("total_imported"));

        let last = std::fs::read_to_string(&files[1]).unwrap();
        assert!(last.contains("-- Productos: 1\n"));
        assert_eq!(last.matches("total_imported INTEGER").count(), 1);
    }
}
