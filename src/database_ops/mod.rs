pub mod db;
pub mod dedupe;
pub mod downloader;
pub mod image_check;
pub mod price_sheet;
pub mod products;
pub mod progress;
pub mod sql_export;
pub mod syscom;
