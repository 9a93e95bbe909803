pub mod config;
pub mod error;
pub mod focus_api_client;
pub mod snapshot_cache;
pub mod storage;
pub mod token_store;
