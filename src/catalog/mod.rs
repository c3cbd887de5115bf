//! Vendor catalog lookups: CSV index, local image folder, image resolution.
pub mod index;
pub mod local_match;
pub mod resolver;

pub use index::{CatalogIndex, CatalogRecord};
pub use resolver::{HttpProbe, ImageProbe, ImageResolver, ProbeOutcome, ResolvePolicy};
