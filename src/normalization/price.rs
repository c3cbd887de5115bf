//! Price selection for distributor payloads and the currency heuristics used
//! by the audit commands.
use serde_json::Value;

/// Final price plus the undiscounted list price when a real discount exists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
    pub original_price: Option<f64>,
}

/// Numbers arrive as JSON numbers or numeric strings ("1,234.50").
fn as_price(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price_text(s),
        _ => None,
    }
}

fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|p| p.is_finite() && *p > 0.0)
}

impl PriceQuote {
    /// Pick the price from a distributor `precio` field.
    ///
    /// Objects are read in priority order `precio_especial` (or
    /// `precio_descuento`), then `precio_1`, then `precio_lista`; the first
    /// positive value wins. A bare number is used as-is. `original_price` is
    /// the list price only when `0 < especial < lista`.
    pub fn from_syscom(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => {
                let lista = positive(as_price(map.get("precio_lista")));
                let descuento = positive(as_price(map.get("precio_descuento")));
                let especial = positive(as_price(map.get("precio_especial"))).or(descuento);
                let precio_1 = positive(as_price(map.get("precio_1"))).or(descuento);

                let price = especial.or(precio_1).or(lista)?;
                let original_price = match (especial, lista) {
                    (Some(e), Some(l)) if e < l => Some(l),
                    _ => None,
                };
                Some(Self {
                    price,
                    original_price,
                })
            }
            Value::Number(_) | Value::String(_) => {
                positive(as_price(Some(value))).map(|price| Self {
                    price,
                    original_price: None,
                })
            }
            _ => None,
        }
    }
}

/// Parse a human price like `$1,234.50` or `MXN 99`. Thousands separators
/// are commas; anything other than digits and a dot is dropped.
pub fn parse_price_text(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencyGuess {
    LikelyMxn,
    Ambiguous,
    LikelyUsd,
}

impl CurrencyGuess {
    pub fn label(&self) -> &'static str {
        match self {
            CurrencyGuess::LikelyMxn => "MXN",
            CurrencyGuess::Ambiguous => "ambiguous",
            CurrencyGuess::LikelyUsd => "USD",
        }
    }
}

/// Distributor items rarely exceed 1000 USD, so large amounts are read as MXN.
pub fn guess_currency(amount: f64) -> CurrencyGuess {
    if amount > 1000.0 {
        CurrencyGuess::LikelyMxn
    } else if amount > 100.0 {
        CurrencyGuess::Ambiguous
    } else {
        CurrencyGuess::LikelyUsd
    }
}

pub const DISTRIBUTOR_SUSPICIOUS_ABOVE: f64 = 10_000.0;
pub const CATALOG_SUSPICIOUS_ABOVE: f64 = 100_000.0;
pub const PROBABLE_CONVERSION_ABOVE: f64 = 50_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceFlag {
    Ok,
    Suspicious,
    /// Catalog row that looks like a USD amount multiplied by the rate twice.
    ProbableConversion { estimated: f64 },
}

/// Classify a stored price. Rows with an external code come from the
/// distributor and use a lower ceiling.
pub fn audit_price(price: f64, has_external_code: bool, rate: f64) -> PriceFlag {
    if has_external_code {
        if price > DISTRIBUTOR_SUSPICIOUS_ABOVE {
            PriceFlag::Suspicious
        } else {
            PriceFlag::Ok
        }
    } else if price > CATALOG_SUSPICIOUS_ABOVE {
        PriceFlag::Suspicious
    } else if price > PROBABLE_CONVERSION_ABOVE && rate > 0.0 {
        PriceFlag::ProbableConversion {
            estimated: price / rate,
        }
    } else {
        PriceFlag::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn especial_wins_and_list_becomes_original() {
        let q = PriceQuote::from_syscom(&json!({
            "precio_lista": "120.00", "precio_especial": 99.5, "precio_1": 110
        }))
        .unwrap();
        assert_eq!(q.price, 99.5);
        assert_eq!(q.original_price, Some(120.0));
    }

    #[test]
    fn zero_especial_falls_back() {
        let q = PriceQuote::from_syscom(&json!({
            "precio_lista": 150, "precio_especial": 0, "precio_1": "140"
        }))
        .unwrap();
        assert_eq!(q.price, 140.0);
        assert_eq!(q.original_price, None);

        let q = PriceQuote::from_syscom(&json!({"precio_lista": 150})).unwrap();
        assert_eq!(q, PriceQuote { price: 150.0, original_price: None });
    }

    #[test]
    fn descuento_counts_as_especial() {
        let q = PriceQuote::from_syscom(&json!({"precio_lista": 200, "precio_descuento": 180}))
            .unwrap();
        assert_eq!(q.price, 180.0);
        assert_eq!(q.original_price, Some(200.0));
    }

    #[test]
    fn no_positive_price_is_none() {
        assert!(PriceQuote::from_syscom(&json!({"precio_lista": 0})).is_none());
        assert!(PriceQuote::from_syscom(&json!(null)).is_none());
        assert!(PriceQuote::from_syscom(&json!(0)).is_none());
        assert_eq!(PriceQuote::from_syscom(&json!(42)).unwrap().price, 42.0);
    }

    #[test]
    fn price_text_parsing() {
        assert_eq!(parse_price_text("$1,234.50"), Some(1234.5));
        assert_eq!(parse_price_text("MXN 99"), Some(99.0));
        assert_eq!(parse_price_text("n/a"), None);
    }

    #[test]
    fn currency_thresholds() {
        assert_eq!(guess_currency(1500.0), CurrencyGuess::LikelyMxn);
        assert_eq!(guess_currency(1000.0), CurrencyGuess::Ambiguous);
        assert_eq!(guess_currency(100.0), CurrencyGuess::LikelyUsd);
    }

    #[test]
    fn audit_flags() {
        assert_eq!(audit_price(12_000.0, true, 17.5), PriceFlag::Suspicious);
        assert_eq!(audit_price(12_000.0, false, 17.5), PriceFlag::Ok);
        assert_eq!(audit_price(200_000.0, false, 17.5), PriceFlag::Suspicious);
        assert_eq!(
            audit_price(70_000.0, false, 17.5),
            PriceFlag::ProbableConversion { estimated: 4_000.0 }
        );
    }
}
