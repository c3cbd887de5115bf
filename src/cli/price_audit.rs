use anyhow::Result;
use std::collections::BTreeMap;

use super::{clip, connect_db, RunMode};
use crate::config::UpkeepConfig;
use crate::database_ops::products::{fetch_active_products, price_stats};
use crate::normalization::price::{audit_price, guess_currency, PriceFlag};

#[derive(Debug, Clone)]
pub struct PriceAuditConfig {
    pub upkeep: UpkeepConfig,
    pub mode: RunMode,
}

/// Read-only report of prices that look wrong or mis-converted.
pub async fn run(cfg: PriceAuditConfig) -> Result<()> {
    let db = connect_db().await?;
    let stats = price_stats(&db).await?;
    let products = fetch_active_products(&db, cfg.mode.limit).await?;
    let rate = cfg.upkeep.usd_mxn_rate;

    let mut suspicious = Vec::new();
    let mut conversions = Vec::new();
    let mut currency: BTreeMap<&'static str, usize> = BTreeMap::new();
    for p in &products {
        let Some(price) = p.price.filter(|v| *v > 0.0) else {
            continue;
        };
        let distributor = p.external_code.is_some();
        if distributor {
            *currency.entry(guess_currency(price).label()).or_default() += 1;
        }
        match audit_price(price, distributor, rate) {
            PriceFlag::Ok => {}
            PriceFlag::Suspicious => suspicious.push((p, price)),
            PriceFlag::ProbableConversion { estimated } => conversions.push((p, price, estimated)),
        }
    }

    super::banner("Price audit");
    println!("Active products:        {}", stats.total);
    println!("Zero or missing price:  {}", stats.zero_or_null);
    println!("From distributor:       {}", stats.with_external_code);
    if let Some(avg) = stats.avg {
        println!("Average price:          {avg:.2}");
    }
    if let Some(max) = stats.max {
        println!("Max price:              {max:.2}");
    }
    println!("\nDistributor currency guess:");
    for (label, n) in &currency {
        println!("  {label:<10} {n}");
    }
    println!("\nSuspicious prices: {}", suspicious.len());
    for (p, price) in suspicious.iter().take(20) {
        println!("  {:>12.2}  {}", price, clip(&p.title, 60));
    }
    println!("\nProbable USD->MXN double conversion (rate {rate}): {}", conversions.len());
    for (p, price, estimated) in conversions.iter().take(20) {
        println!("  {:>12.2} -> ~{:.2}  {}", price, estimated, clip(&p.title, 60));
    }
    Ok(())
}
