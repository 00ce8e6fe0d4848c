//! Downloads every track of an album listing in a chosen format.
//!
//! - `catalog`: listing page parsing (title, song table, detail links, formats)
//! - `downloader`: chunk planning and the resolve and download worker stages
//! - `progress`: progress events and the console sink
//! - `page`: the small HTML interface the catalog code is written against

pub mod catalog;
pub mod config;
pub mod downloader;
pub mod error;
pub mod page;
pub mod progress;
pub mod utils;

pub use config::Config;
pub use downloader::{RunReport, download};
pub use error::{Error, ErrorKind, Result};
