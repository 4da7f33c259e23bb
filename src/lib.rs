#![doc = include_str!("../README.md")]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
    rustdoc::missing_crate_level_docs,
    rustdoc::invalid_codeblock_attributes,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::bare_urls,
    rustdoc::invalid_html_tags
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_import_braces,
    unreachable_pub,
    clippy::dbg_macro
)]

pub mod audit;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod db;
pub mod geo;
pub mod http;
pub mod kv;
pub mod lock;
pub mod login;
pub mod session;
pub mod state;
pub mod stats;
pub mod stream;
pub mod users;

use std::time::{SystemTime, UNIX_EPOCH};

pub use state::SharedState;

/// The current time as unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the unix epoch")
        .as_secs() as i64
}
