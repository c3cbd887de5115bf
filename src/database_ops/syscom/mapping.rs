//! Distributor payload types and their mapping onto marketplace rows.
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use uuid::Uuid;

use crate::database_ops::products::NewProduct;
use crate::normalization::price::PriceQuote;

/// Category the distributor items are filed under in the marketplace.
pub const TARGET_CATEGORY_SLUG: &str = "sistemas";

/// Distributor categories imported by default: (id, name).
pub const DEFAULT_CATEGORIES: [(&str, &str); 3] = [
    ("22", "Videovigilancia"),
    ("26", "Redes e IT"),
    ("30", "Energía / Herramientas"),
];

pub const DEFAULT_CONDITION: &str = "nuevo";
pub const DEFAULT_CITY: &str = "CDMX";
pub const DEFAULT_ZONE: &str = "Entrega Inmediata";

/// Ids arrive as numbers on some endpoints and strings on others.
fn string_or_number<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyscomProduct {
    #[serde(default, deserialize_with = "string_or_number")]
    pub producto_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub modelo: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub sku: Option<String>,
    #[serde(default)]
    pub titulo: Option<String>,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub marca: Option<String>,
    #[serde(default)]
    pub caracteristicas: Vec<Value>,
    #[serde(default)]
    pub img_portada: Option<String>,
    #[serde(default)]
    pub imagenes: Vec<Value>,
    /// Listing pages send `precio`, the detail endpoint `precios`.
    #[serde(default, alias = "precios")]
    pub precio: Option<Value>,
}

impl SyscomProduct {
    /// Portada first, then gallery entries (objects with `url` or bare strings).
    pub fn image_urls(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let gallery = self.imagenes.iter().filter_map(|img| match img {
            Value::String(s) => Some(s.as_str()),
            Value::Object(o) => o.get("url").and_then(Value::as_str),
            _ => None,
        });
        for url in self.img_portada.as_deref().into_iter().chain(gallery) {
            let url = url.trim();
            if !url.is_empty() && !out.iter().any(|u| u == url) {
                out.push(url.to_string());
            }
        }
        out
    }

    /// Normalized SKU used for duplicate checks (model number, uppercased).
    pub fn sku_key(&self) -> Option<String> {
        self.modelo
            .as_deref()
            .or(self.sku.as_deref())
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
    }

    pub fn has_price(&self) -> bool {
        !matches!(self.precio, None | Some(Value::Null))
    }

    fn full_description(&self) -> String {
        let mut desc = self.descripcion.clone().unwrap_or_default().trim().to_string();
        let features: Vec<String> = self
            .caracteristicas
            .iter()
            .filter_map(|c| match c {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();
        if !features.is_empty() {
            desc.push_str("\n\nCaracterísticas:\n");
            desc.push_str(
                &features
                    .iter()
                    .map(|f| format!("- {f}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
        desc
    }
}

/// Map a distributor item to an insertable row. `None` when it has no title
/// or no positive price.
pub fn map_to_new_product(
    product: &SyscomProduct,
    category_id: Option<Uuid>,
    contact_phone: &str,
) -> Option<NewProduct> {
    let title = product
        .titulo
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())?
        .to_string();
    let quote = PriceQuote::from_syscom(product.precio.as_ref()?)?;
    let description = product.full_description();
    let description = if description.trim().is_empty() {
        title.clone()
    } else {
        description
    };

    Some(NewProduct {
        title,
        description,
        price: quote.price,
        original_price: quote.original_price,
        condition: DEFAULT_CONDITION.to_string(),
        category_id,
        images: product.image_urls(),
        location_city: DEFAULT_CITY.to_string(),
        location_zone: DEFAULT_ZONE.to_string(),
        status: "active".to_string(),
        contact_phone: contact_phone.to_string(),
        external_code: product.producto_id.clone(),
        sku: product
            .modelo
            .as_deref()
            .or(product.sku.as_deref())
            .map(|s| s.trim().to_string()),
    })
}
