pub mod attach;
pub mod build_info;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod migrate;
pub mod model;
pub mod patch;
pub mod store;
pub mod taxonomy;
