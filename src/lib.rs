//! Maintenance tooling for a hosted marketplace catalog: vendor identifier
//! extraction, image resolution and cleanup, distributor imports, price
//! audits and generated SQL.
pub mod catalog;
pub mod cli;
pub mod config;
pub mod database_ops;
pub mod env_boot;
pub mod logging;
pub mod normalization;

pub mod util {
    pub mod env;
}
