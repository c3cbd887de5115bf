//! Distributor (Syscom) REST client: OAuth token, paged catalog, detail lookups.
pub mod auth;
pub mod client;
pub mod mapping;

pub use client::SyscomClient;
pub use mapping::{map_to_new_product, SyscomProduct, DEFAULT_CATEGORIES};
